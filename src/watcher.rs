use std::sync::{Arc, Mutex, PoisonError};

use log::{debug, info, warn};
use tokio::runtime::Handle;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::context::Transcript;
use crate::pipeline::{Pipeline, RunOrigin};
use crate::settings::Keys;

/// Host capability: tell subscribers that the transcript may have changed.
///
/// Notifications carry no payload and may repeat for the same state.
pub trait ChangeFeed: Send + Sync {
    fn subscribe(&self) -> Subscription;
}

/// Dropping a subscription unsubscribes it.
#[derive(Debug)]
pub struct Subscription {
    rx: UnboundedReceiver<()>,
}

impl Subscription {
    pub fn new(rx: UnboundedReceiver<()>) -> Self {
        Self { rx }
    }

    /// Wait for the next notification. `false` once the feed is gone.
    pub async fn changed(&mut self) -> bool {
        self.rx.recv().await.is_some()
    }
}

/// Fan-out [`ChangeFeed`] for hosts that know when they mutate.
#[derive(Debug, Clone, Default)]
pub struct ChangeNotifier {
    subscribers: Arc<Mutex<Vec<UnboundedSender<()>>>>,
}

impl ChangeNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notify(&self) {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|tx| tx.send(()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        let mut subscribers = self.subscribers.lock().unwrap_or_else(PoisonError::into_inner);
        subscribers.retain(|tx| !tx.is_closed());
        subscribers.len()
    }
}

impl ChangeFeed for ChangeNotifier {
    fn subscribe(&self) -> Subscription {
        let (tx, rx) = unbounded_channel();
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        Subscription::new(rx)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchMode {
    /// Re-run into the display.
    Auto,
    /// Re-run, then inject into the last assistant message.
    Hosted,
}

impl WatchMode {
    pub fn flag_key(self, keys: &Keys) -> String {
        match self {
            WatchMode::Auto => keys.auto_mode(),
            WatchMode::Hosted => keys.hosted_mode(),
        }
    }

    pub fn last_count_key(self, keys: &Keys) -> String {
        match self {
            WatchMode::Auto => keys.auto_last_count(),
            WatchMode::Hosted => keys.hosted_last_count(),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            WatchMode::Auto => "auto",
            WatchMode::Hosted => "hosted",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    Inactive,
    /// No transcript, or the length did not change.
    Unchanged,
    /// The transcript got shorter; the baseline follows it down.
    Shrunk,
    /// The newest entry is user-authored or empty.
    Ignored,
    Triggered,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TriggerState {
    pub active: bool,
    pub last_observed: usize,
}

impl TriggerState {
    /// Compare the live length against the baseline.
    ///
    /// Growth always moves the baseline, whether or not it triggers.
    /// Repeated calls for the same length are no-ops.
    pub fn observe(&mut self, transcript: &dyn Transcript) -> Observation {
        if !self.active {
            return Observation::Inactive;
        }
        let Some(len) = transcript.len() else {
            return Observation::Unchanged;
        };
        if len < self.last_observed {
            self.last_observed = len;
            return Observation::Shrunk;
        }
        if len == self.last_observed {
            return Observation::Unchanged;
        }
        self.last_observed = len;
        match transcript.last() {
            Some(newest) if !newest.is_user && !newest.text().is_empty() => Observation::Triggered,
            _ => Observation::Ignored,
        }
    }
}

/// Re-runs the pipeline when a new assistant message appears.
///
/// Owns its state; two watchers over the same pipeline (auto and hosted) are
/// independent and never cancel each other's runs.
pub struct TriggerWatcher {
    mode: WatchMode,
    pipeline: Arc<Pipeline>,
    feed: Arc<dyn ChangeFeed>,
    state: Arc<Mutex<TriggerState>>,
    cancellation_token: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl TriggerWatcher {
    pub fn new(mode: WatchMode, pipeline: Arc<Pipeline>, feed: Arc<dyn ChangeFeed>) -> Self {
        Self {
            mode,
            pipeline,
            feed,
            state: Arc::new(Mutex::new(TriggerState::default())),
            cancellation_token: CancellationToken::new(),
            task: None,
        }
    }

    pub fn mode(&self) -> WatchMode {
        self.mode
    }

    pub fn state(&self) -> TriggerState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_watching(&self) -> bool {
        self.state().active
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        if enabled {
            self.enable();
        } else {
            self.disable();
        }
    }

    /// Idle → Watching. The baseline is the transcript length right now, so
    /// history that predates enabling never triggers.
    ///
    /// Outside a tokio runtime there is nothing to watch with; the mode stays
    /// off and nothing is persisted.
    pub fn enable(&mut self) {
        if self.is_watching() {
            return;
        }
        let Ok(runtime) = Handle::try_current() else {
            warn!("No async runtime, {} mode stays off", self.mode.label());
            return;
        };
        let baseline = self.pipeline.transcript().len().unwrap_or(0);
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = TriggerState {
            active: true,
            last_observed: baseline,
        };
        self.persist(true, baseline);
        info!("{} mode on, baseline {baseline}", self.mode.label());

        self.cancellation_token = CancellationToken::new();
        let token = self.cancellation_token.clone();
        let mut subscription = self.feed.subscribe();
        let mode = self.mode;
        let pipeline = self.pipeline.clone();
        let state = self.state.clone();
        self.task = Some(runtime.spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    changed = subscription.changed() => {
                        if !changed {
                            debug!("{} watcher: change feed closed", mode.label());
                            break;
                        }
                        handle_change(mode, &pipeline, &state);
                    }
                }
            }
        }));
    }

    /// Watching → Idle. A run already in flight is left to finish.
    pub fn disable(&mut self) {
        self.cancellation_token.cancel();
        self.task = None;
        let last_observed = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            state.active = false;
            state.last_observed
        };
        self.persist(false, last_observed);
        info!("{} mode off", self.mode.label());
    }

    /// Stop observing without touching the persisted flag, so the mode is
    /// restored on the next start.
    pub fn stop(&mut self) {
        self.cancellation_token.cancel();
        self.task = None;
        self.state.lock().unwrap_or_else(PoisonError::into_inner).active = false;
    }

    /// Process one change notification by hand.
    pub fn handle_change(&self) -> (Observation, Option<JoinHandle<()>>) {
        handle_change(self.mode, &self.pipeline, &self.state)
    }

    fn persist(&self, active: bool, last_observed: usize) {
        let store = self.pipeline.store();
        let keys = self.pipeline.keys();
        store.set(&self.mode.flag_key(keys), &active);
        store.set(&self.mode.last_count_key(keys), &last_observed);
    }
}

impl Drop for TriggerWatcher {
    fn drop(&mut self) {
        self.cancellation_token.cancel();
    }
}

fn handle_change(
    mode: WatchMode,
    pipeline: &Arc<Pipeline>,
    state: &Mutex<TriggerState>,
) -> (Observation, Option<JoinHandle<()>>) {
    let (observation, last_observed) = {
        let mut state = state.lock().unwrap_or_else(PoisonError::into_inner);
        let before = state.last_observed;
        let observation = state.observe(pipeline.transcript().as_ref());
        let moved = state.last_observed != before;
        (observation, moved.then_some(state.last_observed))
    };
    if let Some(count) = last_observed {
        pipeline
            .store()
            .set(&mode.last_count_key(pipeline.keys()), &count);
    }

    if observation != Observation::Triggered {
        debug!("{} watcher: {:?}", mode.label(), observation);
        return (observation, None);
    }

    let Ok(runtime) = Handle::try_current() else {
        warn!("{} watcher: no async runtime, run skipped", mode.label());
        return (observation, None);
    };
    info!("{} watcher: new assistant message, starting run", mode.label());
    let pipeline = pipeline.clone();
    let task = runtime.spawn(async move {
        let outcome = match mode {
            WatchMode::Auto => pipeline.run(RunOrigin::Auto).await.map(|_| ()),
            WatchMode::Hosted => pipeline.run_hosted().await.map(|_| ()),
        };
        if let Err(e) = outcome {
            debug!("{} run ended without output: {e}", mode.label());
        }
    });
    (observation, Some(task))
}
