use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;

use tosm_connect::{ChangePoller, ConnectorState, PollError};
use tosm_intercept::scenario::{
    RelevanceFilter, RunningFlag, Scenario, ScenarioCounters,
};
use tosm_intercept::{
    Decide, EntityConfig, EntityConfigRegistry, Mediator, MediatorConfig,
    MessageStore, ScenarioError,
};
use tosm_model::{
    CdcAction, ChangeEvent, FieldDelta, FieldValue, FilteredMessage,
    ResultLevel, TS_DONE,
};

/// Test scenario that records the keys it processed, with an optional
/// artificial delay and an optional scripted failure.
struct RecordingScenario {
    name: String,
    entity: String,
    filter: RelevanceFilter,
    running: RunningFlag,
    counters: ScenarioCounters,
    seen: Arc<Mutex<Vec<String>>>,
    delay: Duration,
    fail: bool,
}

impl RecordingScenario {
    fn new(name: &str, entity: &str) -> Self {
        Self {
            name: name.to_string(),
            entity: entity.to_string(),
            filter: RelevanceFilter::new(),
            running: RunningFlag::new(true),
            counters: ScenarioCounters::default(),
            seen: Arc::new(Mutex::new(Vec::new())),
            delay: Duration::ZERO,
            fail: false,
        }
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    fn seen(&self) -> Arc<Mutex<Vec<String>>> {
        self.seen.clone()
    }
}

#[async_trait]
impl Scenario for RecordingScenario {
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
        _store: &MessageStore,
    ) -> Result<(), ScenarioError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.fail {
            return Err(ScenarioError::Internal("scripted failure".into()));
        }
        self.seen
            .lock()
            .unwrap()
            .push(message.message_key().to_string());
        Ok(())
    }

    fn stop(&self) {
        self.running.set(false);
    }

    fn counters(&self) -> &ScenarioCounters {
        &self.counters
    }
}

fn changed(entity: &str, offset: i64, key: &str) -> ChangeEvent {
    ChangeEvent::new(
        CdcAction::Changed,
        entity,
        0,
        offset,
        SystemTime::now(),
        key,
        vec![FieldDelta::new("position", "A1".into(), "B2".into())],
    )
}

fn created(entity: &str, offset: i64, key: &str) -> ChangeEvent {
    ChangeEvent::new(
        CdcAction::Created,
        entity,
        0,
        offset,
        SystemTime::now(),
        key,
        vec![FieldDelta::new("position", FieldValue::Null, "A1".into())],
    )
}

fn registry_for(entities: &[&str]) -> Arc<EntityConfigRegistry> {
    Arc::new(EntityConfigRegistry::with_configs(
        entities.iter().map(|e| EntityConfig::new(*e)),
    ))
}

async fn wait_until(mut cond: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached in time"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test]
async fn one_entity_is_processed_in_enqueue_order() {
    let registry = registry_for(&["work_instruction"]);
    let decide = Decide::new(&MediatorConfig::default(), registry);
    let scenario = Arc::new(
        RecordingScenario::new("order", "work_instruction")
            .with_delay(Duration::from_millis(5)),
    );
    let seen = scenario.seen();
    decide.register_scenario("work_instruction", scenario).unwrap();
    decide.start();

    for offset in 0..5 {
        decide
            .add_message_to_shared_queue(changed(
                "work_instruction",
                offset,
                &format!("k-{}", offset),
            ))
            .await;
    }

    wait_until(|| seen.lock().unwrap().len() == 5).await;
    assert_eq!(
        *seen.lock().unwrap(),
        vec!["k-0", "k-1", "k-2", "k-3", "k-4"]
    );
    decide.shutdown().await;
}

#[tokio::test]
async fn failing_scenario_does_not_block_peers_or_later_messages() {
    let registry = registry_for(&["work_instruction"]);
    let decide = Decide::new(&MediatorConfig::default(), registry);
    let broken = Arc::new(
        RecordingScenario::new("broken", "work_instruction").failing(),
    );
    let healthy =
        Arc::new(RecordingScenario::new("healthy", "work_instruction"));
    let seen = healthy.seen();
    decide
        .register_scenario("work_instruction", broken.clone())
        .unwrap();
    decide
        .register_scenario("work_instruction", healthy.clone())
        .unwrap();
    decide.start();

    decide
        .add_message_to_shared_queue(changed("work_instruction", 1, "k-1"))
        .await;
    decide
        .add_message_to_shared_queue(changed("work_instruction", 2, "k-2"))
        .await;

    wait_until(|| seen.lock().unwrap().len() == 2).await;
    assert_eq!(*seen.lock().unwrap(), vec!["k-1", "k-2"]);
    assert_eq!(broken.counters().errors(), 2);
    assert_eq!(healthy.counters().ok(), 2);
    decide.shutdown().await;
}

#[tokio::test]
async fn irrelevant_events_reach_neither_store_nor_scenarios() {
    let registry = registry_for(&["work_instruction"]);
    let decide = Decide::new(&MediatorConfig::default(), registry);
    let scenario =
        Arc::new(RecordingScenario::new("changes", "work_instruction"));
    let seen = scenario.seen();
    decide.register_scenario("work_instruction", scenario).unwrap();
    decide.start();

    // the default filter accepts CHANGED only
    decide
        .add_message_to_shared_queue(created("work_instruction", 1, "k-new"))
        .await;
    decide
        .add_message_to_shared_queue(changed("work_instruction", 2, "k-upd"))
        .await;

    wait_until(|| seen.lock().unwrap().len() == 1).await;
    assert_eq!(*seen.lock().unwrap(), vec!["k-upd"]);
    assert_eq!(decide.stored_messages("work_instruction").len(), 1);
    decide.shutdown().await;
}

#[tokio::test]
async fn slow_entity_does_not_stall_other_entities() {
    let registry = registry_for(&["work_instruction", "road_truck"]);
    let decide = Decide::new(&MediatorConfig::default(), registry);
    let slow = Arc::new(
        RecordingScenario::new("slow", "work_instruction")
            .with_delay(Duration::from_secs(1)),
    );
    let fast = Arc::new(RecordingScenario::new("fast", "road_truck"));
    let slow_seen = slow.seen();
    let fast_seen = fast.seen();
    decide.register_scenario("work_instruction", slow).unwrap();
    decide.register_scenario("road_truck", fast).unwrap();
    decide.start();

    decide
        .add_message_to_shared_queue(changed("work_instruction", 1, "wi-1"))
        .await;
    decide
        .add_message_to_shared_queue(changed("road_truck", 1, "rt-1"))
        .await;

    // the fast entity finishes while the slow one is still inside its
    // scenario
    wait_until(|| fast_seen.lock().unwrap().len() == 1).await;
    assert!(slow_seen.lock().unwrap().is_empty());
    decide.shutdown().await;
}

#[tokio::test]
async fn meta_cache_traces_processing_and_failures() {
    let registry = registry_for(&["work_instruction"]);
    let decide = Decide::new(&MediatorConfig::default(), registry);
    let broken = Arc::new(
        RecordingScenario::new("broken", "work_instruction").failing(),
    );
    decide
        .register_scenario("work_instruction", broken.clone())
        .unwrap();
    decide.start();

    decide
        .add_message_to_shared_queue(changed("work_instruction", 1, "k-1"))
        .await;

    wait_until(|| broken.counters().errors() == 1).await;
    wait_until(|| decide.meta_cache().len() == 1).await;
    let handle = decide.meta_cache().recent().remove(0);
    wait_until(|| handle.lock().unwrap().timestamp(TS_DONE).is_some()).await;

    let meta = handle.lock().unwrap().clone();
    assert_eq!(meta.result().level(), ResultLevel::Error);
    assert!(meta.received_at().is_some());
    decide.shutdown().await;
}

#[tokio::test]
async fn shutdown_closes_intake() {
    let registry = registry_for(&["work_instruction"]);
    let decide = Decide::new(&MediatorConfig::default(), registry);
    let scenario =
        Arc::new(RecordingScenario::new("s", "work_instruction"));
    let seen = scenario.seen();
    decide
        .register_scenario("work_instruction", scenario.clone())
        .unwrap();
    decide.start();
    decide.shutdown().await;

    assert!(!scenario.is_running());
    decide
        .add_message_to_shared_queue(changed("work_instruction", 1, "k-1"))
        .await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(seen.lock().unwrap().is_empty());
    assert_eq!(decide.queued_len(), 0);
}

/// Delivers its scripted batches one per poll, then reports itself
/// stopped.
struct ScriptedPoller {
    batches: Vec<Vec<ChangeEvent>>,
}

#[async_trait]
impl ChangePoller for ScriptedPoller {
    async fn poll(
        &mut self,
        _timeout: Duration,
    ) -> Result<Vec<ChangeEvent>, PollError> {
        Ok(self.batches.remove(0))
    }

    fn is_running(&self) -> bool {
        !self.batches.is_empty()
    }

    async fn close(&mut self) -> Result<(), PollError> {
        Ok(())
    }
}

#[tokio::test]
async fn poller_feeds_the_pipeline_end_to_end() {
    let registry = Arc::new(EntityConfigRegistry::with_configs(vec![
        EntityConfig::new("work_instruction").with_scenario(
            tosm_intercept::ScenarioSpec::new(
                "log",
                tosm_intercept::ScenarioKind::Logger,
            ),
        ),
    ]));
    let mediator = Mediator::new(MediatorConfig::default(), registry);

    let progress = mediator.attach_poller(
        "cdc-scripted",
        ScriptedPoller {
            batches: vec![vec![
                changed("work_instruction", 1, "k-1"),
                changed("work_instruction", 2, "k-2"),
            ]],
        },
    );

    wait_until(|| {
        mediator.decide().stored_messages("work_instruction").len() == 2
    })
    .await;
    wait_until(|| progress.is(ConnectorState::Stopped)).await;
    assert!(progress.result().is_ok());
    mediator.shutdown().await;
}
