pub mod ai;
pub mod app;
pub mod cleanup;
pub mod context;
pub mod error;
pub mod host;
pub mod lexicon;
pub mod logging;
pub mod message;
pub mod pipeline;
pub mod prompt;
pub mod prompts;
pub mod settings;
pub mod sink;
pub mod storage;
pub mod watcher;

// Re-export commonly used items for easier access
pub use ai::{CompletionClient, ModelCatalog, ModelListing, OpenAiClient};
pub use app::Controller;
pub use cleanup::{CleanupPattern, PatternList};
pub use context::Transcript;
pub use error::{LexiconError, PipelineError, StoreError};
pub use host::{DirectoryLexicon, FileHost, HostBindings, MemoryHost, StaticLexicon};
pub use lexicon::{Lexicon, LexiconEntry, LexiconSource, ReferenceSelection, SelectionMode};
pub use message::{ChatMessage, PromptMessage, Role};
pub use pipeline::{Pipeline, RunOrigin};
pub use prompts::{PromptBook, TaskPrompt};
pub use settings::{Credentials, Keys, Settings};
pub use sink::{Composer, DisplayPanel, OutputSink, TranscriptEditor};
pub use storage::{JsonFileStore, KeyValueStore, MemoryStore, SettingsStore};
pub use watcher::{ChangeFeed, ChangeNotifier, Subscription, TriggerState, TriggerWatcher, WatchMode};
