use serde::{Deserialize, Serialize};

use crate::settings::Keys;
use crate::storage::SettingsStore;

/// A user-authored instruction fragment, sent inside the task block when enabled.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct TaskPrompt {
    pub text: String,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl TaskPrompt {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            enabled: true,
            tags: Vec::new(),
        }
    }

    /// Case-insensitive substring match against any tag. An empty filter matches everything.
    pub fn matches_tag(&self, filter: &str) -> bool {
        let filter = filter.trim().to_lowercase();
        filter.is_empty() || self.tags.iter().any(|t| t.to_lowercase().contains(&filter))
    }
}

// Ordered, persisted list; every mutation is written through immediately.
pub struct PromptBook {
    store: SettingsStore,
    key: String,
    prompts: Vec<TaskPrompt>,
}

impl PromptBook {
    pub fn load(store: SettingsStore, keys: &Keys) -> Self {
        let key = keys.user_prompts();
        let prompts = store.get_or_default(&key);
        Self {
            store,
            key,
            prompts,
        }
    }

    pub fn prompts(&self) -> &[TaskPrompt] {
        &self.prompts
    }

    /// Prompts whose tags match `filter`, with their list index.
    pub fn filtered<'a>(&'a self, filter: &'a str) -> impl Iterator<Item = (usize, &'a TaskPrompt)> {
        self.prompts
            .iter()
            .enumerate()
            .filter(move |(_, p)| p.matches_tag(filter))
    }

    pub fn enabled_texts(&self) -> Vec<String> {
        enabled_texts(&self.prompts)
    }

    fn persist(&self) {
        self.store.set(&self.key, &self.prompts);
    }

    pub fn add(&mut self, text: &str) -> bool {
        let text = text.trim();
        if text.is_empty() {
            return false;
        }
        self.prompts.push(TaskPrompt::new(text));
        self.persist();
        true
    }

    /// Replace the text. Blank replacements are ignored.
    pub fn edit(&mut self, index: usize, text: &str) -> bool {
        let text = text.trim();
        match self.prompts.get_mut(index) {
            Some(prompt) if !text.is_empty() => {
                prompt.text = text.to_string();
                self.persist();
                true
            }
            _ => false,
        }
    }

    pub fn set_enabled(&mut self, index: usize, enabled: bool) -> bool {
        match self.prompts.get_mut(index) {
            Some(prompt) => {
                prompt.enabled = enabled;
                self.persist();
                true
            }
            None => false,
        }
    }

    pub fn add_tag(&mut self, index: usize, tag: &str) -> bool {
        let tag = tag.trim();
        match self.prompts.get_mut(index) {
            Some(prompt) if !tag.is_empty() => {
                if !prompt.tags.iter().any(|t| t == tag) {
                    prompt.tags.push(tag.to_string());
                    self.persist();
                }
                true
            }
            _ => false,
        }
    }

    pub fn remove_tag(&mut self, index: usize, tag: &str) -> bool {
        let Some(prompt) = self.prompts.get_mut(index) else {
            return false;
        };
        let before = prompt.tags.len();
        prompt.tags.retain(|t| t != tag);
        let removed = prompt.tags.len() != before;
        if removed {
            self.persist();
        }
        removed
    }

    pub fn remove(&mut self, index: usize) -> Option<TaskPrompt> {
        if index >= self.prompts.len() {
            return None;
        }
        let removed = self.prompts.remove(index);
        self.persist();
        Some(removed)
    }
}

pub fn enabled_texts(prompts: &[TaskPrompt]) -> Vec<String> {
    prompts
        .iter()
        .filter(|p| p.enabled)
        .map(|p| p.text.clone())
        .collect()
}

pub fn load_enabled(store: &SettingsStore, keys: &Keys) -> Vec<String> {
    let prompts: Vec<TaskPrompt> = store.get_or_default(&keys.user_prompts());
    enabled_texts(&prompts)
}
