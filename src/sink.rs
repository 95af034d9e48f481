use std::sync::{Arc, Mutex, PoisonError};

use log::{info, warn};

use crate::error::PipelineError;

/// Prefix of every failure written to the display.
pub const FAILURE_PREFIX: &str = "生成失败: ";
/// Displayed output containing this is never injected.
pub const FAILURE_MARKER: &str = "生成失败";
pub const SWIPE_COMMAND: &str = "/addswipe";

/// Where a finished generation goes.
pub trait OutputSink: Send + Sync {
    fn deliver(&self, text: &str) -> Result<(), PipelineError>;
}

/// Host capability: rewrite the newest assistant message as `old + "\n" + text`
/// and commit it through the host's own edit path so listeners re-render.
pub trait TranscriptEditor: Send + Sync {
    fn append_to_last_assistant_message(&self, text: &str) -> Result<(), PipelineError>;
}

/// Host capability: the message-compose box and its send action.
pub trait Composer: Send + Sync {
    fn set_input(&self, text: &str) -> Result<(), PipelineError>;
    fn send(&self) -> Result<(), PipelineError>;
}

pub fn appended(old: &str, text: &str) -> String {
    format!("{old}\n{text}")
}

pub fn swipe_command(text: &str) -> String {
    format!("{SWIPE_COMMAND} {text}")
}

pub fn failure_text(error: &PipelineError) -> String {
    format!("{FAILURE_PREFIX}{error}")
}

/// Whether displayed output may be injected: non-empty and not a failure.
pub fn is_injectable(displayed: &str) -> bool {
    let displayed = displayed.trim();
    !displayed.is_empty() && !displayed.contains(FAILURE_MARKER)
}

/// The output panel. Cloning shares the same region.
#[derive(Debug, Clone, Default)]
pub struct DisplayPanel {
    text: Arc<Mutex<String>>,
}

impl DisplayPanel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(&self) -> String {
        self.text
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn show(&self, text: &str) {
        *self.text.lock().unwrap_or_else(PoisonError::into_inner) = text.to_string();
    }

    pub fn show_failure(&self, error: &PipelineError) {
        self.show(&failure_text(error));
    }
}

impl OutputSink for DisplayPanel {
    fn deliver(&self, text: &str) -> Result<(), PipelineError> {
        self.show(text);
        Ok(())
    }
}

pub struct ChatInjector {
    editor: Arc<dyn TranscriptEditor>,
}

impl ChatInjector {
    pub fn new(editor: Arc<dyn TranscriptEditor>) -> Self {
        Self { editor }
    }
}

impl OutputSink for ChatInjector {
    fn deliver(&self, text: &str) -> Result<(), PipelineError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(PipelineError::NothingToInject);
        }
        self.editor
            .append_to_last_assistant_message(text)
            .inspect_err(|e| warn!("Chat injection skipped: {e}"))?;
        info!("Injected {} chars into the last assistant message", text.len());
        Ok(())
    }
}

pub struct SwipeInjector {
    composer: Arc<dyn Composer>,
}

impl SwipeInjector {
    pub fn new(composer: Arc<dyn Composer>) -> Self {
        Self { composer }
    }
}

impl OutputSink for SwipeInjector {
    fn deliver(&self, text: &str) -> Result<(), PipelineError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(PipelineError::NothingToInject);
        }
        self.composer
            .set_input(&swipe_command(text))
            .and_then(|()| self.composer.send())
            .inspect_err(|e| warn!("Swipe injection skipped: {e}"))?;
        info!("Sent generated text as a new swipe");
        Ok(())
    }
}
