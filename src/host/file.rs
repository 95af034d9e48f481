use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use log::{debug, warn};
use tokio::sync::mpsc::unbounded_channel;

use super::{append_to_last_assistant, submit};
use crate::context::Transcript;
use crate::error::{LexiconError, PipelineError, StoreError};
use crate::lexicon::{Lexicon, LexiconSource};
use crate::message::ChatMessage;
use crate::sink::{Composer, TranscriptEditor};
use crate::watcher::{ChangeFeed, Subscription};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// A transcript kept as a JSON array of messages in one file.
///
/// A missing file means no chat is open. Changes are detected by polling the
/// file's modification time and size.
#[derive(Debug)]
pub struct FileHost {
    path: PathBuf,
    input: Mutex<String>,
    poll_interval: Duration,
}

impl FileHost {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            input: Mutex::new(String::new()),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn read(&self) -> Option<Vec<ChatMessage>> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return None,
            Err(e) => {
                warn!("Failed to read transcript {}: {}", self.path.display(), e);
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(messages) => Some(messages),
            Err(e) => {
                warn!("Malformed transcript {}: {}", self.path.display(), e);
                None
            }
        }
    }

    pub fn write(&self, messages: &[ChatMessage]) -> Result<(), PipelineError> {
        let json = serde_json::to_string_pretty(messages)?;
        fs::write(&self.path, json).map_err(StoreError::from)?;
        Ok(())
    }

    fn modify<F>(&self, change: F) -> Result<(), PipelineError>
    where
        F: FnOnce(&mut Vec<ChatMessage>) -> Result<(), PipelineError>,
    {
        let mut messages = self.read().ok_or_else(|| {
            PipelineError::SideEffectNotFound(format!("transcript {}", self.path.display()))
        })?;
        change(&mut messages)?;
        self.write(&messages)
    }
}

impl Transcript for FileHost {
    fn len(&self) -> Option<usize> {
        self.read().map(|messages| messages.len())
    }

    fn tail(&self, n: usize) -> Option<Vec<ChatMessage>> {
        let mut messages = self.read()?;
        let start = messages.len().saturating_sub(n);
        Some(messages.split_off(start))
    }
}

impl TranscriptEditor for FileHost {
    fn append_to_last_assistant_message(&self, text: &str) -> Result<(), PipelineError> {
        self.modify(|messages| append_to_last_assistant(messages, text))
    }
}

impl Composer for FileHost {
    fn set_input(&self, text: &str) -> Result<(), PipelineError> {
        *self.input.lock().unwrap_or_else(PoisonError::into_inner) = text.to_string();
        Ok(())
    }

    fn send(&self) -> Result<(), PipelineError> {
        let input = std::mem::take(&mut *self.input.lock().unwrap_or_else(PoisonError::into_inner));
        self.modify(|messages| submit(messages, &input))
    }
}

async fn stamp(path: &Path) -> Option<(SystemTime, u64)> {
    let metadata = tokio::fs::metadata(path).await.ok()?;
    Some((metadata.modified().ok()?, metadata.len()))
}

impl ChangeFeed for FileHost {
    fn subscribe(&self) -> Subscription {
        let (tx, rx) = unbounded_channel();
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("No async runtime, transcript changes will not be watched");
            return Subscription::new(rx);
        };
        let path = self.path.clone();
        let poll_interval = self.poll_interval;
        runtime.spawn(async move {
            let mut last = stamp(&path).await;
            let mut ticker = tokio::time::interval(poll_interval);
            loop {
                tokio::select! {
                    _ = tx.closed() => break,
                    _ = ticker.tick() => {
                        let current = stamp(&path).await;
                        if current != last {
                            last = current;
                            if tx.send(()).is_err() {
                                break;
                            }
                        }
                    }
                }
            }
            debug!("Stopped polling {}", path.display());
        });
        Subscription::new(rx)
    }
}

/// World-info sources stored as `<id>.json` files in one directory.
///
/// With no explicit selection every file in the directory counts as selected.
#[derive(Debug, Clone)]
pub struct DirectoryLexicon {
    dir: PathBuf,
    selected: Vec<String>,
}

impl DirectoryLexicon {
    pub fn new(dir: impl Into<PathBuf>, selected: Vec<String>) -> Self {
        Self {
            dir: dir.into(),
            selected,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Ids of every `.json` file in the directory, sorted.
    pub fn available(&self) -> Vec<String> {
        let Ok(entries) = fs::read_dir(&self.dir) else {
            return Vec::new();
        };
        let mut ids: Vec<String> = entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
            .filter_map(|path| path.file_stem()?.to_str().map(str::to_string))
            .collect();
        ids.sort();
        ids
    }
}

#[async_trait]
impl LexiconSource for DirectoryLexicon {
    fn selected_sources(&self) -> Vec<String> {
        if self.selected.is_empty() {
            self.available()
        } else {
            self.selected.clone()
        }
    }

    async fn load_source(&self, id: &str) -> Result<Lexicon, LexiconError> {
        let path = self.dir.join(format!("{id}.json"));
        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(LexiconError::NotFound(id.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_str(&raw)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_is_no_chat() {
        let dir = tempdir().unwrap();
        let host = FileHost::new(dir.path().join("chat.json"));
        assert_eq!(host.len(), None);
        assert!(host.append_to_last_assistant_message("x").is_err());
    }

    #[test]
    fn edits_are_written_back() {
        let dir = tempdir().unwrap();
        let host = FileHost::new(dir.path().join("chat.json"));
        host.write(&[ChatMessage::assistant("a"), ChatMessage::user("u")])
            .unwrap();

        host.append_to_last_assistant_message("post").unwrap();
        host.set_input("/addswipe alt").unwrap();
        host.send().unwrap();

        let messages = host.read().unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].mes, "alt");
        assert_eq!(messages[0].swipes, vec!["a\npost", "alt"]);
        assert_eq!(host.tail(1).unwrap()[0].mes, "u");
    }

    #[tokio::test]
    async fn polling_reports_file_changes() {
        let dir = tempdir().unwrap();
        let host = FileHost::new(dir.path().join("chat.json"))
            .with_poll_interval(Duration::from_millis(10));
        let mut subscription = host.subscribe();
        tokio::time::sleep(Duration::from_millis(30)).await;
        host.write(&[ChatMessage::assistant("hello")]).unwrap();
        let changed = tokio::time::timeout(Duration::from_secs(5), subscription.changed())
            .await
            .unwrap();
        assert!(changed);
    }

    #[tokio::test]
    async fn directory_lexicon_lists_and_loads() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("city.json"),
            r#"{"entries":{"0":{"uid":0,"comment":"x","key":["bar"],"content":"The Crow.","disable":false}}}"#,
        )
        .unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let lexicon = DirectoryLexicon::new(dir.path(), Vec::new());
        assert_eq!(lexicon.selected_sources(), vec!["city"]);
        let city = lexicon.load_source("city").await.unwrap();
        assert_eq!(city.get("0").unwrap().label(), "bar");
        assert!(matches!(
            lexicon.load_source("mars").await,
            Err(LexiconError::NotFound(_))
        ));
    }
}
