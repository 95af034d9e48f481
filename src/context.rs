use log::debug;

use crate::cleanup::{CleanupPattern, apply_compiled, compile_enabled};
use crate::message::ChatMessage;

/// Read access to the host's live transcript.
///
/// `None` means no transcript is available right now (no chat open); readers
/// treat that as "no context", never as a failure.
pub trait Transcript: Send + Sync {
    fn len(&self) -> Option<usize>;
    fn tail(&self, n: usize) -> Option<Vec<ChatMessage>>;

    fn is_empty(&self) -> bool {
        self.len().unwrap_or(0) == 0
    }

    fn last(&self) -> Option<ChatMessage> {
        self.tail(1)?.pop()
    }
}

/// Raw text of the trailing `n` messages, oldest first.
pub fn sample(transcript: &dyn Transcript, n: usize) -> Vec<String> {
    if n == 0 {
        return Vec::new();
    }
    transcript
        .tail(n)
        .unwrap_or_default()
        .iter()
        .map(|m| m.text().to_string())
        .collect()
}

/// Sampled messages with the enabled cleanup patterns applied.
/// Messages left empty after cleanup are dropped.
pub fn read_context(
    transcript: &dyn Transcript,
    n: usize,
    patterns: &[CleanupPattern],
) -> Vec<String> {
    let compiled = compile_enabled(patterns);
    let lines: Vec<String> = sample(transcript, n)
        .iter()
        .map(|text| apply_compiled(text, &compiled))
        .filter(|text| !text.is_empty())
        .collect();
    debug!("Read {} context lines from the last {} messages", lines.len(), n);
    lines
}
