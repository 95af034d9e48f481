use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use super::{append_to_last_assistant, submit};
use crate::context::Transcript;
use crate::error::{LexiconError, PipelineError};
use crate::lexicon::{Lexicon, LexiconSource};
use crate::message::ChatMessage;
use crate::sink::{Composer, TranscriptEditor};
use crate::watcher::{ChangeFeed, ChangeNotifier, Subscription};

/// In-process host: a transcript, a compose box and a change notifier.
///
/// Every mutation notifies subscribers, like a DOM observer would.
#[derive(Debug)]
pub struct MemoryHost {
    chat: Mutex<Option<Vec<ChatMessage>>>,
    input: Mutex<String>,
    sent: Mutex<Vec<String>>,
    notifier: ChangeNotifier,
}

impl Default for MemoryHost {
    fn default() -> Self {
        Self {
            chat: Mutex::new(Some(Vec::new())),
            input: Mutex::new(String::new()),
            sent: Mutex::new(Vec::new()),
            notifier: ChangeNotifier::new(),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MemoryHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// A host with no chat open.
    pub fn without_chat() -> Self {
        let host = Self::default();
        *lock(&host.chat) = None;
        host
    }

    pub fn with_messages(messages: Vec<ChatMessage>) -> Self {
        let host = Self::default();
        *lock(&host.chat) = Some(messages);
        host
    }

    pub fn push(&self, message: ChatMessage) {
        lock(&self.chat).get_or_insert_with(Vec::new).push(message);
        self.notifier.notify();
    }

    pub fn messages(&self) -> Vec<ChatMessage> {
        lock(&self.chat).clone().unwrap_or_default()
    }

    pub fn input(&self) -> String {
        lock(&self.input).clone()
    }

    /// Everything submitted through the compose box, oldest first.
    pub fn sent(&self) -> Vec<String> {
        lock(&self.sent).clone()
    }
}

impl Transcript for MemoryHost {
    fn len(&self) -> Option<usize> {
        lock(&self.chat).as_ref().map(Vec::len)
    }

    fn tail(&self, n: usize) -> Option<Vec<ChatMessage>> {
        let chat = lock(&self.chat);
        let messages = chat.as_ref()?;
        Some(messages[messages.len().saturating_sub(n)..].to_vec())
    }
}

impl TranscriptEditor for MemoryHost {
    fn append_to_last_assistant_message(&self, text: &str) -> Result<(), PipelineError> {
        {
            let mut chat = lock(&self.chat);
            let messages = chat
                .as_mut()
                .ok_or_else(|| PipelineError::SideEffectNotFound("no chat open".to_string()))?;
            append_to_last_assistant(messages, text)?;
        }
        self.notifier.notify();
        Ok(())
    }
}

impl Composer for MemoryHost {
    fn set_input(&self, text: &str) -> Result<(), PipelineError> {
        *lock(&self.input) = text.to_string();
        Ok(())
    }

    fn send(&self) -> Result<(), PipelineError> {
        let input = std::mem::take(&mut *lock(&self.input));
        {
            let mut chat = lock(&self.chat);
            let messages = chat
                .as_mut()
                .ok_or_else(|| PipelineError::SideEffectNotFound("no chat open".to_string()))?;
            submit(messages, &input)?;
        }
        lock(&self.sent).push(input);
        self.notifier.notify();
        Ok(())
    }
}

impl ChangeFeed for MemoryHost {
    fn subscribe(&self) -> Subscription {
        self.notifier.subscribe()
    }
}

/// World-info sources held in memory, selected in insertion order.
#[derive(Debug, Clone, Default)]
pub struct StaticLexicon {
    sources: Vec<(String, Lexicon)>,
}

impl StaticLexicon {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_source(mut self, id: impl Into<String>, lexicon: Lexicon) -> Self {
        self.sources.push((id.into(), lexicon));
        self
    }
}

#[async_trait]
impl LexiconSource for StaticLexicon {
    fn selected_sources(&self) -> Vec<String> {
        self.sources.iter().map(|(id, _)| id.clone()).collect()
    }

    async fn load_source(&self, id: &str) -> Result<Lexicon, LexiconError> {
        self.sources
            .iter()
            .find(|(source, _)| source == id)
            .map(|(_, lexicon)| lexicon.clone())
            .ok_or_else(|| LexiconError::NotFound(id.to_string()))
    }
}
