use tracing::{info, warn};

use tosm_model::{CdcAction, ChangeEvent, FilteredMessage};

use crate::conf::{EntityConfig, ScenarioSpec};
use crate::error::ScenarioError;
use crate::scenario::{
    RelevanceFilter, RunningFlag, Scenario, ScenarioCounters,
};
use crate::store::MessageStore;

/// Diagnostic scenario: logs every event passing the relevance filter
/// together with the size of the stored window. Accepts all three
/// action kinds unless the declaration narrows them.
pub struct LoggerScenario {
    name: String,
    entity: String,
    filter: RelevanceFilter,
    running: RunningFlag,
    counters: ScenarioCounters,
}

impl LoggerScenario {
    pub fn new(spec: &ScenarioSpec, config: &EntityConfig) -> Self {
        let mut spec = spec.clone();
        if spec.actions.is_none() {
            spec.actions = Some(vec![
                CdcAction::Created,
                CdcAction::Changed,
                CdcAction::Deleted,
            ]);
        }
        Self {
            name: spec.name.clone(),
            entity: config.entity.clone(),
            filter: RelevanceFilter::from_spec(&spec, config),
            running: RunningFlag::new(true),
            counters: ScenarioCounters::default(),
        }
    }
}

#[async_trait::async_trait]
impl Scenario for LoggerScenario {
    fn name(&self) -> &str {
        &self.name
    }

    fn entity(&self) -> &str {
        &self.entity
    }

    fn is_running(&self) -> bool {
        self.running.get()
    }

    fn is_relevant_event(&self, event: &ChangeEvent) -> bool {
        self.filter.is_relevant(event)
    }

    async fn process_message(
        &self,
        message: &FilteredMessage,
        store: &MessageStore,
    ) -> Result<(), ScenarioError> {
        if !self.is_running() {
            warn!(
                scenario = %self.name,
                "scenario is not active, ignoring message"
            );
            return Ok(());
        }
        info!(
            scenario = %self.name,
            message = %message,
            stored = store.len(&self.entity),
            changed = message.event().changed_fields().count(),
            "received"
        );
        Ok(())
    }

    fn stop(&self) {
        self.running.set(false);
        info!(scenario = %self.name, "stopping scenario");
    }

    fn counters(&self) -> &ScenarioCounters {
        &self.counters
    }
}
