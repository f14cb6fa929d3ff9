use tokio::sync::watch;
use tracing::{error, info, warn};

use tosm_model::{ResultEntry, ResultLevel};

/// Lifecycle of any network poller, from IDLE up to the terminal
/// STOPPED. Each state carries whether the poller counts as running
/// and as connected, for health checks and conditional transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectorState {
    Idle,
    Initialising,
    Initialized,
    Connecting,
    Connected,
    Reconnecting,
    Failed,
    Stopping,
    Stopped,
}

impl ConnectorState {
    pub fn is_running(&self) -> bool {
        matches!(
            self,
            ConnectorState::Initialized
                | ConnectorState::Connecting
                | ConnectorState::Connected
                | ConnectorState::Reconnecting
        )
    }

    pub fn is_connected(&self) -> bool {
        matches!(
            self,
            ConnectorState::Initialized
                | ConnectorState::Connecting
                | ConnectorState::Connected
                | ConnectorState::Stopping
        )
    }
}

impl std::fmt::Display for ConnectorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ConnectorState::Idle => "IDLE",
            ConnectorState::Initialising => "INITIALISING",
            ConnectorState::Initialized => "INITIALIZED",
            ConnectorState::Connecting => "CONNECTING",
            ConnectorState::Connected => "CONNECTED",
            ConnectorState::Reconnecting => "RECONNECTING",
            ConnectorState::Failed => "FAILED",
            ConnectorState::Stopping => "STOPPING",
            ConnectorState::Stopped => "STOPPED",
        };
        write!(f, "{}", name)
    }
}

/// Current state plus the result of the last state activity.
#[derive(Debug, Clone)]
pub struct ProgressSnapshot {
    pub state: ConnectorState,
    pub result: ResultEntry,
}

/// Tracks a single poller's lifecycle. The machine never transitions
/// on its own; the owning poll loop drives it. Written by exactly one
/// task, observed by anyone through [`subscribe`](Self::subscribe) or
/// [`snapshot`](Self::snapshot) — observers always see a complete
/// (state, result) pair.
#[derive(Debug)]
pub struct ConnectorProgress {
    name: String,
    tx: watch::Sender<ProgressSnapshot>,
}

impl ConnectorProgress {
    pub fn new(name: impl Into<String>) -> Self {
        let (tx, _) = watch::channel(ProgressSnapshot {
            state: ConnectorState::Idle,
            result: ResultEntry::ok(),
        });
        Self {
            name: name.into(),
            tx,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> ConnectorState {
        self.tx.borrow().state
    }

    pub fn result(&self) -> ResultEntry {
        self.tx.borrow().result.clone()
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        self.tx.borrow().clone()
    }

    /// Watch handle for health/monitoring collaborators.
    pub fn subscribe(&self) -> watch::Receiver<ProgressSnapshot> {
        self.tx.subscribe()
    }

    pub fn is(&self, state: ConnectorState) -> bool {
        self.state() == state
    }

    pub fn in_any(&self, states: &[ConnectorState]) -> bool {
        states.contains(&self.state())
    }

    /// Records the transition together with the result of the state
    /// activity. Logs only when the state actually changes, at a
    /// severity derived from the result level.
    pub fn set_progress(
        &self,
        state: ConnectorState,
        result: ResultEntry,
    ) -> &Self {
        let previous = self.state();
        if previous != state {
            self.log_transition(previous, state, result.level());
        }
        self.tx.send_replace(ProgressSnapshot { state, result });
        self
    }

    /// Transition with an implicit OK result.
    pub fn set_progress_ok(&self, state: ConnectorState) -> &Self {
        self.set_progress(state, ResultEntry::ok())
    }

    /// Conditional transition: a no-op unless the current state is
    /// exactly `expected`. Used to avoid clobbering a state that was
    /// changed concurrently.
    pub fn set_progress_when(
        &self,
        state: ConnectorState,
        expected: ConnectorState,
    ) -> &Self {
        if self.is(expected) {
            self.set_progress_ok(state);
        }
        self
    }

    /// Updates the result without progressing the state.
    pub fn set_result(&self, result: ResultEntry) -> &Self {
        self.tx.send_modify(|snap| snap.result = result);
        self
    }

    /// Resets the result to OK without progressing the state.
    pub fn reset_result(&self) -> &Self {
        self.set_result(ResultEntry::ok())
    }

    fn log_transition(
        &self,
        from: ConnectorState,
        to: ConnectorState,
        level: ResultLevel,
    ) {
        match level {
            ResultLevel::Ok => {
                info!(connector = %self.name, %from, %to, "state changed")
            }
            ResultLevel::Warn => {
                warn!(connector = %self.name, %from, %to, "state changed")
            }
            ResultLevel::Error => {
                error!(connector = %self.name, %from, %to, "state changed")
            }
        }
    }
}

impl std::fmt::Display for ConnectorProgress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let snap = self.snapshot();
        write!(f, "{}: {} [{}]", self.name, snap.state, snap.result)
    }
}
