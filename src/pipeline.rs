use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use log::{debug, error, info, warn};

use crate::ai::{CompletionClient, ModelCatalog, ModelFetch};
use crate::context::{Transcript, read_context};
use crate::error::PipelineError;
use crate::host::HostBindings;
use crate::lexicon::{LexiconSource, collect_configured};
use crate::message::PromptMessage;
use crate::prompt::assemble;
use crate::prompts::load_enabled;
use crate::settings::{Keys, Settings};
use crate::sink::{ChatInjector, DisplayPanel, OutputSink, SwipeInjector, is_injectable};
use crate::storage::SettingsStore;

/// Who asked for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOrigin {
    Manual,
    Auto,
    Hosted,
}

/// Runs sharing a key never overlap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlightKey {
    Panel,
    Hosted,
}

impl RunOrigin {
    pub fn flight(self) -> FlightKey {
        match self {
            RunOrigin::Manual | RunOrigin::Auto => FlightKey::Panel,
            RunOrigin::Hosted => FlightKey::Hosted,
        }
    }
}

impl fmt::Display for RunOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunOrigin::Manual => write!(f, "manual"),
            RunOrigin::Auto => write!(f, "auto"),
            RunOrigin::Hosted => write!(f, "hosted"),
        }
    }
}

impl FlightKey {
    fn name(self) -> &'static str {
        match self {
            FlightKey::Panel => "panel",
            FlightKey::Hosted => "hosted",
        }
    }
}

/// Rejects a second run for a key that is already in flight.
#[derive(Debug, Clone, Default)]
pub struct SingleFlight {
    busy: Arc<Mutex<HashSet<FlightKey>>>,
}

impl SingleFlight {
    pub fn try_acquire(&self, key: FlightKey) -> Option<FlightGuard> {
        let mut busy = self.busy.lock().unwrap_or_else(PoisonError::into_inner);
        if !busy.insert(key) {
            return None;
        }
        Some(FlightGuard {
            flight: self.clone(),
            key,
        })
    }

    pub fn is_busy(&self, key: FlightKey) -> bool {
        self.busy
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&key)
    }
}

/// Releases its key on drop.
#[derive(Debug)]
pub struct FlightGuard {
    flight: SingleFlight,
    key: FlightKey,
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        self.flight
            .busy
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
    }
}

/// Context → references → assembly → completion → sink, for one namespace.
///
/// Every invocation reads settings fresh from the store, so edits made
/// between runs take effect on the next one. Failures end the invocation and
/// are reduced to display text or a log line.
pub struct Pipeline {
    store: SettingsStore,
    keys: Keys,
    transcript: Arc<dyn Transcript>,
    lexicon: Arc<dyn LexiconSource>,
    client: Arc<dyn CompletionClient>,
    display: DisplayPanel,
    chat: ChatInjector,
    swipe: SwipeInjector,
    flights: SingleFlight,
}

impl Pipeline {
    pub fn new(
        store: SettingsStore,
        keys: Keys,
        host: &HostBindings,
        client: Arc<dyn CompletionClient>,
    ) -> Self {
        Self {
            store,
            keys,
            transcript: host.transcript.clone(),
            lexicon: host.lexicon.clone(),
            client,
            display: DisplayPanel::new(),
            chat: ChatInjector::new(host.editor.clone()),
            swipe: SwipeInjector::new(host.composer.clone()),
            flights: SingleFlight::default(),
        }
    }

    pub fn store(&self) -> &SettingsStore {
        &self.store
    }

    pub fn keys(&self) -> &Keys {
        &self.keys
    }

    pub fn transcript(&self) -> &Arc<dyn Transcript> {
        &self.transcript
    }

    pub fn display(&self) -> &DisplayPanel {
        &self.display
    }

    /// The request the next run would send, built from current settings.
    pub async fn build_request(&self, settings: &Settings) -> Vec<PromptMessage> {
        let chat_lines = read_context(
            self.transcript.as_ref(),
            settings.sample_count as usize,
            &settings.cleanup_patterns,
        );
        let reference_blocks =
            collect_configured(self.lexicon.as_ref(), &self.store, &self.keys).await;
        let tasks = load_enabled(&self.store, &self.keys);
        assemble(&reference_blocks, &chat_lines, &tasks)
    }

    /// Assemble and complete without touching any sink.
    pub async fn generate(&self) -> Result<String, PipelineError> {
        let settings = Settings::load(&self.store, &self.keys);
        let credentials = settings.credentials()?;
        let messages = self.build_request(&settings).await;
        debug!("Sending {} messages to {}", messages.len(), credentials.model);
        self.client.complete(&credentials, &messages).await
    }

    async fn execute(&self, origin: RunOrigin) -> Result<String, PipelineError> {
        info!("Starting {origin} generation");
        match self.generate().await {
            Ok(text) => {
                self.display.deliver(&text)?;
                info!("{origin} generation finished ({} chars)", text.len());
                Ok(text)
            }
            Err(e) => {
                if e.is_displayed() {
                    self.display.show_failure(&e);
                }
                error!("{origin} generation failed: {e}");
                Err(e)
            }
        }
    }

    /// One full run into the display, rejected when its flight is busy.
    pub async fn run(&self, origin: RunOrigin) -> Result<String, PipelineError> {
        let key = origin.flight();
        let Some(_guard) = self.flights.try_acquire(key) else {
            warn!("Skipping {origin} run: {} flight busy", key.name());
            return Err(PipelineError::Busy(key.name()));
        };
        self.execute(origin).await
    }

    /// Run, then inject the displayed output into the last assistant message.
    ///
    /// Returns whether anything was injected. Empty or failed output is
    /// skipped, as is any run that ended in an error.
    pub async fn run_hosted(&self) -> Result<bool, PipelineError> {
        let key = FlightKey::Hosted;
        let Some(_guard) = self.flights.try_acquire(key) else {
            warn!("Skipping hosted run: {} flight busy", key.name());
            return Err(PipelineError::Busy(key.name()));
        };
        self.execute(RunOrigin::Hosted).await?;

        let shown = self.display.text();
        if !is_injectable(&shown) {
            info!("Hosted run produced nothing injectable, skipping");
            return Ok(false);
        }
        self.chat.deliver(&shown)?;
        Ok(true)
    }

    pub fn inject_chat(&self) -> Result<(), PipelineError> {
        self.chat.deliver(&self.display.text())
    }

    pub fn inject_swipe(&self) -> Result<(), PipelineError> {
        self.swipe.deliver(&self.display.text())
    }

    pub async fn ping(&self) -> Result<String, PipelineError> {
        let credentials = Settings::load(&self.store, &self.keys).credentials()?;
        self.client.ping(&credentials).await
    }

    pub async fn models(&self, force: bool) -> Result<ModelFetch, PipelineError> {
        let settings = Settings::load(&self.store, &self.keys);
        ModelCatalog::new(self.store.clone())
            .fetch(
                self.client.as_ref(),
                &settings.api_url,
                &settings.api_key,
                force,
            )
            .await
    }
}
