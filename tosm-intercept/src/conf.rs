use std::time::Duration;

use envconfig::Envconfig;
use serde::{Deserialize, Serialize};

use tosm_model::CdcAction;

/// Process-level tunables, read from the environment.
#[derive(Envconfig, Clone, Debug)]
pub struct MediatorConfig {
    /// Capacity of the shared intake queue and of each per-entity
    /// dispatch queue.
    #[envconfig(from = "TOSM_QUEUE_SIZE", default = "1024")]
    pub queue_size: usize,

    #[envconfig(from = "TOSM_POLL_TIMEOUT_MS", default = "1000")]
    pub poll_timeout_ms: u64,

    /// Fixed wait between poll retries while a connector is down.
    #[envconfig(from = "TOSM_RETRY_INTERVAL_MS", default = "10000")]
    pub retry_interval_ms: u64,

    /// How long shutdown waits for workers to drain before abandoning
    /// in-flight items.
    #[envconfig(from = "TOSM_SHUTDOWN_GRACE_MS", default = "5000")]
    pub shutdown_grace_ms: u64,

    /// Number of recently processed message metas kept for inspection.
    #[envconfig(from = "TOSM_META_CACHE_SIZE", default = "100")]
    pub meta_cache_size: usize,
}

impl MediatorConfig {
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

impl Default for MediatorConfig {
    fn default() -> Self {
        Self {
            queue_size: 1024,
            poll_timeout_ms: 1000,
            retry_interval_ms: 10_000,
            shutdown_grace_ms: 5000,
            meta_cache_size: 100,
        }
    }
}

/// Closed set of scenario implementations, resolved at startup. No
/// class names, no reflective loading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScenarioKind {
    /// Logs every relevant event together with the stored window.
    Logger,
    /// Pairs an event with its stored counterpart by message key
    /// within the entity's correlation window.
    Correlation,
}

/// Declares one scenario instance attached to an entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioSpec {
    pub name: String,
    pub kind: ScenarioKind,
    /// Action allow-list; `None` keeps the scenario's own default.
    pub actions: Option<Vec<CdcAction>>,
    /// Field allow-list for CHANGED events; `None` accepts any change.
    pub fields: Option<Vec<String>>,
}

impl ScenarioSpec {
    pub fn new(name: impl Into<String>, kind: ScenarioKind) -> Self {
        Self {
            name: name.into(),
            kind,
            actions: None,
            fields: None,
        }
    }

    pub fn with_actions(mut self, actions: Vec<CdcAction>) -> Self {
        self.actions = Some(actions);
        self
    }

    pub fn with_fields(mut self, fields: Vec<&str>) -> Self {
        self.fields = Some(fields.into_iter().map(String::from).collect());
        self
    }
}

/// Per-entity tunables: storage bounds, correlation window and the
/// categories of changes this entity is monitored for.
///
/// Replaced wholesale on hot reload, never edited in place — the
/// registry swaps the whole table atomically.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityConfig {
    pub entity: String,
    pub topic: Option<String>,
    /// Maximum number of filtered messages retained for this entity.
    pub capacity: usize,
    /// Messages older than this are pruned lazily, independent of
    /// capacity.
    pub retention: Duration,
    /// Time span within which request/response events are paired.
    pub correlation_window: Duration,
    pub monitor_creations: bool,
    pub monitor_changes: bool,
    pub monitor_deletions: bool,
    pub scenarios: Vec<ScenarioSpec>,
}

impl EntityConfig {
    pub fn new(entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            topic: None,
            capacity: 10,
            retention: Duration::from_secs(3600),
            correlation_window: Duration::from_secs(5),
            monitor_creations: false,
            monitor_changes: true,
            monitor_deletions: false,
            scenarios: Vec::new(),
        }
    }

    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    pub fn with_correlation_window(mut self, window: Duration) -> Self {
        self.correlation_window = window;
        self
    }

    pub fn monitoring(
        mut self,
        creations: bool,
        changes: bool,
        deletions: bool,
    ) -> Self {
        self.monitor_creations = creations;
        self.monitor_changes = changes;
        self.monitor_deletions = deletions;
        self
    }

    pub fn with_scenario(mut self, spec: ScenarioSpec) -> Self {
        self.scenarios.push(spec);
        self
    }

    /// Whether this entity is monitored for the given action category.
    pub fn monitors(&self, action: CdcAction) -> bool {
        match action {
            CdcAction::Created => self.monitor_creations,
            CdcAction::Changed => self.monitor_changes,
            CdcAction::Deleted => self.monitor_deletions,
        }
    }
}
