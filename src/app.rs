use std::sync::Arc;

use log::info;

use crate::ai::CompletionClient;
use crate::error::PipelineError;
use crate::host::HostBindings;
use crate::pipeline::{Pipeline, RunOrigin};
use crate::settings::{Keys, Settings, migrate};
use crate::storage::SettingsStore;
use crate::watcher::{TriggerState, TriggerWatcher, WatchMode};

/// One plugin instance: its pipeline plus the auto and hosted watchers.
///
/// Several controllers may share a store as long as their namespaces differ.
pub struct Controller {
    pipeline: Arc<Pipeline>,
    auto: TriggerWatcher,
    hosted: TriggerWatcher,
}

impl Controller {
    /// Migrates the namespace's settings before anything reads them.
    pub fn new(
        store: SettingsStore,
        keys: Keys,
        host: &HostBindings,
        client: Arc<dyn CompletionClient>,
    ) -> Self {
        migrate(&store, &keys);
        let pipeline = Arc::new(Pipeline::new(store, keys, host, client));
        Self {
            auto: TriggerWatcher::new(WatchMode::Auto, pipeline.clone(), host.changes.clone()),
            hosted: TriggerWatcher::new(WatchMode::Hosted, pipeline.clone(), host.changes.clone()),
            pipeline,
        }
    }

    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    /// Re-enter whichever modes were on when the last session ended.
    pub fn restore(&mut self) {
        let settings = Settings::load(self.pipeline.store(), self.pipeline.keys());
        if settings.auto_mode {
            info!("Restoring auto mode");
            self.auto.enable();
        }
        if settings.hosted_mode {
            info!("Restoring hosted mode");
            self.hosted.enable();
        }
    }

    /// Flip auto mode, or force it with `Some`. Returns the new state.
    pub fn toggle_auto(&mut self, force: Option<bool>) -> bool {
        toggle(&mut self.auto, force)
    }

    pub fn toggle_hosted(&mut self, force: Option<bool>) -> bool {
        toggle(&mut self.hosted, force)
    }

    pub fn auto_state(&self) -> TriggerState {
        self.auto.state()
    }

    pub fn hosted_state(&self) -> TriggerState {
        self.hosted.state()
    }

    pub async fn generate_now(&self) -> Result<String, PipelineError> {
        self.pipeline.run(RunOrigin::Manual).await
    }

    pub fn inject_chat(&self) -> Result<(), PipelineError> {
        self.pipeline.inject_chat()
    }

    pub fn inject_swipe(&self) -> Result<(), PipelineError> {
        self.pipeline.inject_swipe()
    }

    pub fn displayed(&self) -> String {
        self.pipeline.display().text()
    }

    /// Stop both watchers, keeping their persisted flags.
    pub fn shutdown(&mut self) {
        self.auto.stop();
        self.hosted.stop();
        info!("Controller for {} shut down", self.pipeline.keys().namespace());
    }
}

fn toggle(watcher: &mut TriggerWatcher, force: Option<bool>) -> bool {
    let enabled = force.unwrap_or(!watcher.is_watching());
    watcher.set_enabled(enabled);
    enabled
}
