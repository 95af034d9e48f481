//! Bundled implementations of the host capabilities.
//!
//! The pipeline only sees the traits; a real chat front end supplies its own
//! [`HostBindings`].

mod file;
mod memory;

use std::sync::Arc;

use crate::context::Transcript;
use crate::error::PipelineError;
use crate::lexicon::LexiconSource;
use crate::message::ChatMessage;
use crate::sink::{Composer, SWIPE_COMMAND, TranscriptEditor, appended};
use crate::watcher::ChangeFeed;

pub use file::{DirectoryLexicon, FileHost};
pub use memory::{MemoryHost, StaticLexicon};

/// Everything the pipeline and its watchers need from the host.
#[derive(Clone)]
pub struct HostBindings {
    pub transcript: Arc<dyn Transcript>,
    pub editor: Arc<dyn TranscriptEditor>,
    pub composer: Arc<dyn Composer>,
    pub changes: Arc<dyn ChangeFeed>,
    pub lexicon: Arc<dyn LexiconSource>,
}

impl HostBindings {
    /// Bind one host object that provides every chat capability.
    pub fn from_host<H>(host: Arc<H>, lexicon: Arc<dyn LexiconSource>) -> Self
    where
        H: Transcript + TranscriptEditor + Composer + ChangeFeed + 'static,
    {
        Self {
            transcript: host.clone(),
            editor: host.clone(),
            composer: host.clone(),
            changes: host,
            lexicon,
        }
    }
}

fn last_assistant_mut(messages: &mut [ChatMessage]) -> Option<&mut ChatMessage> {
    messages.iter_mut().rev().find(|m| !m.is_user)
}

/// Append to the newest assistant message the way the host's edit box would.
pub(crate) fn append_to_last_assistant(
    messages: &mut [ChatMessage],
    text: &str,
) -> Result<(), PipelineError> {
    let message = last_assistant_mut(messages)
        .ok_or_else(|| PipelineError::SideEffectNotFound("no assistant message".to_string()))?;
    message.mes = appended(&message.mes, text);
    Ok(())
}

/// Apply one submitted compose-box input: `/addswipe` adds and selects an
/// alternative for the newest assistant message, anything else is a user turn.
pub(crate) fn submit(messages: &mut Vec<ChatMessage>, input: &str) -> Result<(), PipelineError> {
    let input = input.trim();
    if input.is_empty() {
        return Ok(());
    }
    let Some(swipe) = input.strip_prefix(SWIPE_COMMAND) else {
        messages.push(ChatMessage::user(input));
        return Ok(());
    };
    let swipe = swipe.trim_start();
    let message = last_assistant_mut(messages)
        .ok_or_else(|| PipelineError::SideEffectNotFound("no message to swipe".to_string()))?;
    if message.swipes.is_empty() {
        message.swipes.push(message.mes.clone());
    }
    message.swipes.push(swipe.to_string());
    message.mes = swipe.to_string();
    Ok(())
}
