use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use tosm_connect::EventSink;
use tosm_model::{
    ChangeEvent, FilteredMessage, MessageMeta, ResultEntry, ResultLevel,
    TS_DONE,
};

use crate::conf::MediatorConfig;
use crate::error::InterceptError;
use crate::registry::EntityConfigRegistry;
use crate::scenario::{build_scenario, Scenario};
use crate::store::MessageStore;

/// Bounded most-recent-first cache of message metas, for operators
/// inspecting what the pipeline did lately. Only messages handled by a
/// scenario that declares `adds_message_meta` end up here.
pub struct MetaCache {
    capacity: usize,
    entries: Mutex<std::collections::VecDeque<Arc<Mutex<MessageMeta>>>>,
}

impl MetaCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Mutex::new(std::collections::VecDeque::new()),
        }
    }

    pub fn push(&self, handle: Arc<Mutex<MessageMeta>>) {
        let mut entries =
            self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if entries.iter().any(|e| Arc::ptr_eq(e, &handle)) {
            return;
        }
        entries.push_front(handle);
        entries.truncate(self.capacity);
    }

    /// Most recent first.
    pub fn recent(&self) -> Vec<Arc<Mutex<MessageMeta>>> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The dispatcher of the interception pipeline. Owns the shared intake
/// queue, the per-entity dispatch workers and the scenario
/// registrations; stores accepted messages and fans them out to the
/// scenarios registered for their entity.
///
/// One worker per entity: messages for a single entity reach each
/// scenario in enqueue order (FIFO), and a slow scenario only stalls
/// its own entity's queue — unrelated entities keep flowing.
pub struct Decide {
    registry: Arc<EntityConfigRegistry>,
    store: Arc<MessageStore>,
    meta_cache: Arc<MetaCache>,
    scenarios: Mutex<HashMap<String, Vec<Arc<dyn Scenario>>>>,
    intake_tx: flume::Sender<ChangeEvent>,
    intake_rx: flume::Receiver<ChangeEvent>,
    queue_size: usize,
    grace: Duration,
    token: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    started: AtomicBool,
    accepting: AtomicBool,
}

impl Decide {
    pub fn new(
        conf: &MediatorConfig,
        registry: Arc<EntityConfigRegistry>,
    ) -> Self {
        let (intake_tx, intake_rx) = flume::bounded(conf.queue_size);
        Self {
            store: Arc::new(MessageStore::new(registry.clone())),
            meta_cache: Arc::new(MetaCache::new(conf.meta_cache_size)),
            registry,
            scenarios: Mutex::new(HashMap::new()),
            intake_tx,
            intake_rx,
            queue_size: conf.queue_size,
            grace: conf.shutdown_grace(),
            token: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
            accepting: AtomicBool::new(true),
        }
    }

    /// Builds the orchestrator with every scenario declared in the
    /// registry's entity configs resolved and registered.
    pub fn from_registry(
        conf: &MediatorConfig,
        registry: Arc<EntityConfigRegistry>,
    ) -> Self {
        let decide = Self::new(conf, registry.clone());
        {
            let mut registered = decide
                .scenarios
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            for entity in registry.entity_names() {
                let Some(config) = registry.get(&entity) else {
                    continue;
                };
                for spec in &config.scenarios {
                    let scenario = build_scenario(spec, &config);
                    info!(
                        entity = %entity,
                        scenario = %scenario.name(),
                        running = scenario.is_running(),
                        "scenario loaded"
                    );
                    registered
                        .entry(entity.clone())
                        .or_default()
                        .push(scenario);
                }
            }
        }
        decide
    }

    /// Registers a scenario for an entity, in registration order.
    /// Only allowed before `start()`.
    pub fn register_scenario(
        &self,
        entity: &str,
        scenario: Arc<dyn Scenario>,
    ) -> Result<(), InterceptError> {
        if self.started.load(Ordering::Acquire) {
            return Err(InterceptError::AlreadyStarted);
        }
        self.scenarios
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(entity.to_string())
            .or_default()
            .push(scenario);
        Ok(())
    }

    pub fn scenarios_for_entity(
        &self,
        entity: &str,
    ) -> Vec<Arc<dyn Scenario>> {
        self.scenarios
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(entity)
            .cloned()
            .unwrap_or_default()
    }

    /// Spawns the dispatch pipeline: one router draining the shared
    /// intake queue plus one worker per entity with scenarios.
    pub fn start(&self) {
        if self.started.swap(true, Ordering::AcqRel) {
            warn!("orchestrator already started");
            return;
        }
        info!("starting filtering and decision pipeline");

        let registered = self
            .scenarios
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let mut pipelines: HashMap<String, flume::Sender<ChangeEvent>> =
            HashMap::new();
        let mut tasks =
            self.tasks.lock().unwrap_or_else(PoisonError::into_inner);

        for (entity, scenarios) in registered {
            let (tx, rx) = flume::bounded(self.queue_size);
            pipelines.insert(entity.clone(), tx);
            tasks.push(tokio::spawn(entity_worker(
                entity,
                scenarios,
                rx,
                self.store.clone(),
                self.meta_cache.clone(),
                self.token.clone(),
            )));
        }

        tasks.push(tokio::spawn(route_intake(
            self.intake_rx.clone(),
            self.registry.clone(),
            pipelines,
            self.token.clone(),
        )));
        info!("all dispatch workers started");
    }

    /// Intake entrypoint for any poller or adapter. Blocks while the
    /// shared queue is full (backpressure towards the poller).
    pub async fn add_message_to_shared_queue(&self, event: ChangeEvent) {
        if !self.accepting.load(Ordering::Acquire) {
            warn!(%event, "intake closed, message dropped");
            return;
        }
        debug!(
            %event,
            queued = self.intake_tx.len(),
            "message added to shared queue"
        );
        if self.intake_tx.send_async(event).await.is_err() {
            warn!("intake queue disconnected, message dropped");
        }
    }

    /// Stops intake, lets workers drain within the grace period, then
    /// stops every scenario. Safe to call from any task; idempotent.
    pub async fn shutdown(&self) {
        info!("starting shutdown");
        self.accepting.store(false, Ordering::Release);
        self.token.cancel();

        let tasks: Vec<JoinHandle<()>> = self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for task in tasks {
            if tokio::time::timeout(self.grace, task).await.is_err() {
                warn!("dispatch worker did not stop within grace period");
            }
        }

        let scenarios = self
            .scenarios
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for scenario in scenarios.values().flatten() {
            scenario.stop();
        }
        info!("shutdown complete");
    }

    pub fn stored_messages(&self, entity: &str) -> Vec<FilteredMessage> {
        self.store.stored_messages(entity)
    }

    pub fn store(&self) -> &Arc<MessageStore> {
        &self.store
    }

    pub fn meta_cache(&self) -> &Arc<MetaCache> {
        &self.meta_cache
    }

    pub fn queued_len(&self) -> usize {
        self.intake_rx.len()
    }

    /// Drops everything queued and stored. Administrative entrypoint.
    pub fn clear_storage(&self) {
        while self.intake_rx.try_recv().is_ok() {}
        self.store.clear();
    }
}

#[async_trait::async_trait]
impl EventSink for Decide {
    async fn submit(&self, event: ChangeEvent) {
        self.add_message_to_shared_queue(event).await;
    }
}

/// Drains the shared intake queue and forwards each event to its
/// entity's worker. Events for entities without config or without
/// scenarios are dropped silently.
async fn route_intake(
    intake: flume::Receiver<ChangeEvent>,
    registry: Arc<EntityConfigRegistry>,
    pipelines: HashMap<String, flume::Sender<ChangeEvent>>,
    token: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = token.cancelled() => break,
            received = intake.recv_async() => match received {
                Ok(event) => event,
                Err(_) => break,
            },
        };
        let entity = event.entity();
        if registry.get(entity).is_none() {
            debug!(entity, "no entity config, event dropped");
            continue;
        }
        let Some(pipeline) = pipelines.get(entity) else {
            debug!(entity, "no scenarios registered, event dropped");
            continue;
        };
        if pipeline.send_async(event).await.is_err() {
            break;
        }
    }
    info!("intake router stopped");
}

/// Processes one entity's stream: relevance gate, store, then the
/// scenarios in registration order. A failing scenario is logged and
/// counted but never stops the worker or its peers.
async fn entity_worker(
    entity: String,
    scenarios: Vec<Arc<dyn Scenario>>,
    queue: flume::Receiver<ChangeEvent>,
    store: Arc<MessageStore>,
    meta_cache: Arc<MetaCache>,
    token: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = token.cancelled() => break,
            received = queue.recv_async() => match received {
                Ok(event) => event,
                Err(_) => break,
            },
        };
        dispatch_event(&entity, &scenarios, event, &store, &meta_cache)
            .await;
    }
    info!(entity, "dispatch worker stopped");
}

async fn dispatch_event(
    entity: &str,
    scenarios: &[Arc<dyn Scenario>],
    event: ChangeEvent,
    store: &Arc<MessageStore>,
    meta_cache: &Arc<MetaCache>,
) {
    let accepted: Vec<&Arc<dyn Scenario>> = scenarios
        .iter()
        .filter(|s| s.is_relevant_event(&event))
        .collect();
    if accepted.is_empty() {
        debug!(entity, %event, "not relevant for any scenario");
        return;
    }

    // store once, before the first scenario runs against it
    let message = FilteredMessage::new(event);
    store.store(&message);
    if accepted.iter().any(|s| s.adds_message_meta()) {
        meta_cache.push(message.meta_handle());
    }

    for scenario in accepted {
        match scenario.process_message(&message, store).await {
            Ok(()) => scenario.record_result(&ResultEntry::ok()),
            Err(e) => {
                error!(
                    entity,
                    scenario = scenario.name(),
                    key = message.message_key(),
                    error = %e,
                    "scenario processing failed"
                );
                if scenario.adds_message_meta() {
                    message.set_result_when_higher(
                        ResultLevel::Error,
                        Some(&format!("{} failed: {}", scenario.name(), e)),
                    );
                }
                scenario.record_result(&ResultEntry::from_error(
                    format!("{} failed", scenario.name()),
                    e,
                ));
            }
        }
    }

    message.add_timestamp(TS_DONE);
    message.set_result_when_higher(ResultLevel::Ok, None);
}
