use std::time::Duration;

use tracing::{info, warn};

use tosm_model::{
    ChangeEvent, FilteredMessage, ResultLevel, TS_END_PREFIX,
    TS_READ_PREFIX, TS_START_PREFIX,
};

use crate::conf::{EntityConfig, ScenarioSpec};
use crate::error::ScenarioError;
use crate::scenario::{
    RelevanceFilter, RunningFlag, Scenario, ScenarioCounters,
};
use crate::store::MessageStore;

/// Pairs an accepted event with the most recent stored counterpart
/// carrying the same message key, received within the entity's
/// correlation window. The request/response pattern of the decking
/// scenarios: the earlier event is the request, the new one closes it.
pub struct CorrelationScenario {
    name: String,
    entity: String,
    filter: RelevanceFilter,
    window: Duration,
    running: RunningFlag,
    counters: ScenarioCounters,
}

impl CorrelationScenario {
    pub fn new(spec: &ScenarioSpec, config: &EntityConfig) -> Self {
        Self {
            name: spec.name.clone(),
            entity: config.entity.clone(),
            filter: RelevanceFilter::from_spec(spec, config),
            window: config.correlation_window,
            running: RunningFlag::new(true),
            counters: ScenarioCounters::default(),
        }
    }

    /// Newest stored message with the same key, excluding the message
    /// itself, received no longer than the window before `message`.
    fn find_counterpart(
        &self,
        message: &FilteredMessage,
        store: &MessageStore,
    ) -> Option<FilteredMessage> {
        let received = message.received_at()?;
        store
            .stored_messages(&self.entity)
            .into_iter()
            .rev()
            .filter(|stored| stored.offset() != message.offset())
            .filter(|stored| stored.message_key() == message.message_key())
            .find(|stored| match stored.received_at() {
                Some(at) => match received.duration_since(at) {
                    Ok(age) => age <= self.window,
                    // stored after the new message: same window, other side
                    Err(_) => true,
                },
                None => false,
            })
    }
}

#[async_trait::async_trait]
impl Scenario for CorrelationScenario {
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
        message.add_timestamp(&format!("{}{}", TS_START_PREFIX, self.name));

        let counterpart = self.find_counterpart(message, store);
        message.add_timestamp(&format!("{}store", TS_READ_PREFIX));

        match counterpart {
            Some(other) => {
                info!(
                    scenario = %self.name,
                    key = message.message_key(),
                    offset = message.offset(),
                    counterpart_offset = other.offset(),
                    "correlated with stored message"
                );
                message.set_result_when_higher(ResultLevel::Ok, None);
            }
            None => {
                let text = format!(
                    "no counterpart for key {} within {} ms",
                    message.message_key(),
                    self.window.as_millis()
                );
                warn!(scenario = %self.name, "{}", text);
                message
                    .set_result_when_higher(ResultLevel::Warn, Some(&text));
            }
        }

        message.add_timestamp(&format!("{}{}", TS_END_PREFIX, self.name));
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
