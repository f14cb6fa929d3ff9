mod correlation;
mod logger;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

pub use correlation::CorrelationScenario;
pub use logger::LoggerScenario;
use tracing::debug;

use tosm_model::{
    CdcAction, ChangeEvent, FieldDelta, FieldValue, FilteredMessage,
    ResultEntry, ResultLevel,
};

use crate::conf::{EntityConfig, ScenarioKind, ScenarioSpec};
use crate::error::ScenarioError;
use crate::store::MessageStore;

/// A pluggable business rule scoped to one entity: decides which
/// events are relevant and reacts to the ones that are, with access to
/// the shared message store.
///
/// Keep `process_message` fast: it runs on the entity's dispatch
/// worker and blocks further processing of that entity's queue. Move
/// slow work to a scenario-owned background task.
#[async_trait::async_trait]
pub trait Scenario: Send + Sync {
    fn name(&self) -> &str;

    fn entity(&self) -> &str;

    fn is_running(&self) -> bool;

    /// Whether this scenario enriches the message meta; decides if the
    /// orchestrator pays the meta-cache bookkeeping for its messages.
    fn adds_message_meta(&self) -> bool {
        true
    }

    /// Relevance gate. Implementations combine the shared
    /// [`RelevanceFilter`] with their own domain checks (logical AND);
    /// an event failing the action/field gate is never relevant.
    fn is_relevant_event(&self, event: &ChangeEvent) -> bool;

    /// Reacts to an accepted message. The message is already stored;
    /// `store` holds this entity's recent history. Must be a logged
    /// no-op while the scenario is not running.
    async fn process_message(
        &self,
        message: &FilteredMessage,
        store: &MessageStore,
    ) -> Result<(), ScenarioError>;

    /// Idempotent; must not fail.
    fn stop(&self);

    fn counters(&self) -> &ScenarioCounters;

    fn record_result(&self, result: &ResultEntry) {
        self.counters().record(result);
    }
}

/// Monotonic ok/error counters, the operator-visible trace of a
/// scenario's activity.
#[derive(Debug, Default)]
pub struct ScenarioCounters {
    ok: AtomicU64,
    error: AtomicU64,
}

impl ScenarioCounters {
    pub fn record(&self, result: &ResultEntry) {
        match result.level() {
            ResultLevel::Error => self.error.fetch_add(1, Ordering::Relaxed),
            _ => self.ok.fetch_add(1, Ordering::Relaxed),
        };
    }

    pub fn ok(&self) -> u64 {
        self.ok.load(Ordering::Relaxed)
    }

    pub fn errors(&self) -> u64 {
        self.error.load(Ordering::Relaxed)
    }
}

/// Running flag shared between a scenario and its `stop()` callers.
#[derive(Debug)]
pub struct RunningFlag(AtomicBool);

impl RunningFlag {
    pub fn new(running: bool) -> Self {
        Self(AtomicBool::new(running))
    }

    pub fn get(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn set(&self, running: bool) {
        self.0.store(running, Ordering::Release);
    }
}

/// The reusable default relevance check, composed into scenarios
/// rather than inherited: an event is relevant iff its action is in
/// the allow-list (default CHANGED only), and — for CHANGED events
/// with a configured field allow-list — at least one changed field
/// matches the list.
#[derive(Debug, Clone)]
pub struct RelevanceFilter {
    actions: Vec<CdcAction>,
    fields: Option<Vec<String>>,
}

impl Default for RelevanceFilter {
    fn default() -> Self {
        Self {
            actions: vec![CdcAction::Changed],
            fields: None,
        }
    }
}

impl RelevanceFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_actions(mut self, actions: Vec<CdcAction>) -> Self {
        self.actions = actions;
        self
    }

    pub fn with_fields(mut self, fields: Vec<String>) -> Self {
        self.fields = Some(fields);
        self
    }

    /// Builds the filter from a scenario declaration, restricted to
    /// the action categories the entity is monitored for.
    pub fn from_spec(spec: &ScenarioSpec, config: &EntityConfig) -> Self {
        let mut filter = Self::new();
        if let Some(actions) = &spec.actions {
            filter.actions = actions.clone();
        }
        filter.actions.retain(|a| config.monitors(*a));
        if let Some(fields) = &spec.fields {
            filter.fields = Some(fields.clone());
        }
        filter
    }

    pub fn actions(&self) -> &[CdcAction] {
        &self.actions
    }

    pub fn is_relevant(&self, event: &ChangeEvent) -> bool {
        if !self.actions.contains(&event.action()) {
            return false;
        }
        if event.action() == CdcAction::Changed {
            if let Some(fields) = &self.fields {
                return fields.iter().any(|f| event.has_changed(f));
            }
        }
        true
    }
}

/// Compares a delta's after-value against a reference value. When the
/// runtime types differ, a numeric value is compared against the
/// parsed string and vice versa; a failed coercion logs and counts as
/// a mismatch, never an error.
pub fn matches_field(delta: &FieldDelta, reference: &FieldValue) -> bool {
    let value = delta.after();
    if value.is_null() || reference.is_null() {
        return false;
    }
    match (value, reference) {
        (FieldValue::Int(v), FieldValue::Text(s)) => {
            match s.parse::<i64>() {
                Ok(parsed) => *v == parsed,
                Err(e) => {
                    debug!(
                        field = delta.field(),
                        value = %s,
                        error = %e,
                        "cannot coerce reference to number"
                    );
                    false
                }
            }
        }
        (FieldValue::Text(s), FieldValue::Int(v)) => s == &v.to_string(),
        (FieldValue::Float(v), FieldValue::Text(s)) => {
            match s.parse::<f64>() {
                Ok(parsed) => *v == parsed,
                Err(e) => {
                    debug!(
                        field = delta.field(),
                        value = %s,
                        error = %e,
                        "cannot coerce reference to number"
                    );
                    false
                }
            }
        }
        (FieldValue::Text(s), FieldValue::Float(v)) => s == &v.to_string(),
        (a, b) => a == b,
    }
}

/// Static scenario registry: resolves a declaration to an initialised,
/// running scenario instance. The closed [`ScenarioKind`] set replaces
/// the original's reflective class loading.
pub fn build_scenario(
    spec: &ScenarioSpec,
    config: &EntityConfig,
) -> Arc<dyn Scenario> {
    match spec.kind {
        ScenarioKind::Logger => Arc::new(LoggerScenario::new(spec, config)),
        ScenarioKind::Correlation => {
            Arc::new(CorrelationScenario::new(spec, config))
        }
    }
}
