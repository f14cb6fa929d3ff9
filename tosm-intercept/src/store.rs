use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::SystemTime;

use tracing::{debug, warn};

use tosm_model::{FieldValue, FilteredMessage};

use crate::conf::EntityConfig;
use crate::registry::EntityConfigRegistry;

type Window = Arc<Mutex<VecDeque<FilteredMessage>>>;

/// Per-entity capped history of filtered messages, shared by all
/// scenarios. Insertion ordered, strict FIFO eviction once an entity's
/// window exceeds its configured capacity; entries older than the
/// retention duration are pruned lazily on the next store or read.
///
/// One lock per entity key: a slow scenario holding one entity's
/// window never contends with stores or reads for another entity.
/// Mutation is confined to the orchestrator (single writer per
/// entity); scenarios only read snapshots.
pub struct MessageStore {
    registry: Arc<EntityConfigRegistry>,
    table: scc::HashMap<String, Window>,
}

impl MessageStore {
    pub fn new(registry: Arc<EntityConfigRegistry>) -> Self {
        Self {
            registry,
            table: scc::HashMap::new(),
        }
    }

    /// Appends `message` to its entity's window and enforces the
    /// entity's capacity and retention. A message for an entity
    /// without configuration is dropped; the orchestrator gates those
    /// upstream.
    pub fn store(&self, message: &FilteredMessage) {
        let entity = message.entity();
        let Some(config) = self.registry.get(entity) else {
            warn!(entity, "no entity config, message not stored");
            return;
        };
        let window = self.window(entity);
        let mut guard =
            window.lock().unwrap_or_else(PoisonError::into_inner);
        guard.push_back(message.clone());
        Self::enforce_limits(entity, &config, &mut guard);
        debug!(
            entity,
            offset = message.offset(),
            size = guard.len(),
            "message stored"
        );
    }

    /// Snapshot of an entity's window, oldest first. Safe to iterate
    /// without holding the store lock.
    pub fn stored_messages(&self, entity: &str) -> Vec<FilteredMessage> {
        match self.table.read(entity, |_, window| window.clone()) {
            Some(window) => {
                let mut guard =
                    window.lock().unwrap_or_else(PoisonError::into_inner);
                if let Some(config) = self.registry.get(entity) {
                    Self::prune_expired(entity, &config, &mut guard);
                }
                guard.iter().cloned().collect()
            }
            None => Vec::new(),
        }
    }

    /// Stored messages of `entity` whose after-value of `field`
    /// matches `value`; any value matches when `value` is `None`.
    pub fn find_by_field(
        &self,
        entity: &str,
        field: &str,
        value: Option<&FieldValue>,
    ) -> Vec<FilteredMessage> {
        self.find_matching(entity, |msg| {
            msg.event().field(field).is_some_and(|delta| {
                value.is_none() || Some(delta.after()) == value
            })
        })
    }

    pub fn find_matching(
        &self,
        entity: &str,
        predicate: impl Fn(&FilteredMessage) -> bool,
    ) -> Vec<FilteredMessage> {
        self.stored_messages(entity)
            .into_iter()
            .filter(|m| predicate(m))
            .collect()
    }

    pub fn len(&self, entity: &str) -> usize {
        self.table
            .read(entity, |_, window| {
                window
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .len()
            })
            .unwrap_or(0)
    }

    pub fn is_empty(&self, entity: &str) -> bool {
        self.len(entity) == 0
    }

    pub fn clear(&self) {
        self.table.clear();
    }

    pub fn clear_entity(&self, entity: &str) {
        self.table.remove(entity);
    }

    fn window(&self, entity: &str) -> Window {
        self.table
            .entry(entity.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(VecDeque::new())))
            .get()
            .clone()
    }

    fn enforce_limits(
        entity: &str,
        config: &EntityConfig,
        window: &mut VecDeque<FilteredMessage>,
    ) {
        Self::prune_expired(entity, config, window);
        while window.len() > config.capacity {
            if let Some(evicted) = window.pop_front() {
                debug!(
                    entity,
                    offset = evicted.offset(),
                    "evicted oldest message, capacity reached"
                );
            }
        }
    }

    fn prune_expired(
        entity: &str,
        config: &EntityConfig,
        window: &mut VecDeque<FilteredMessage>,
    ) {
        let now = SystemTime::now();
        while let Some(oldest) = window.front() {
            let expired = oldest
                .received_at()
                .and_then(|at| now.duration_since(at).ok())
                .is_some_and(|age| age > config.retention);
            if !expired {
                break;
            }
            let offset = oldest.offset();
            window.pop_front();
            debug!(entity, offset, "pruned expired message");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, SystemTime};
    use tosm_model::{CdcAction, ChangeEvent, FieldDelta};

    fn registry_with(config: EntityConfig) -> Arc<EntityConfigRegistry> {
        Arc::new(EntityConfigRegistry::with_configs(vec![config]))
    }

    fn message(entity: &str, key: &str, offset: i64) -> FilteredMessage {
        FilteredMessage::new(ChangeEvent::new(
            CdcAction::Changed,
            entity,
            0,
            offset,
            SystemTime::now(),
            key,
            vec![FieldDelta::new("pos", "A1".into(), "B2".into())],
        ))
    }

    #[test]
    fn capacity_two_keeps_the_two_most_recent() {
        let store = MessageStore::new(registry_with(
            EntityConfig::new("work_instruction").with_capacity(2),
        ));
        for (i, key) in ["k1", "k2", "k3"].iter().enumerate() {
            store.store(&message("work_instruction", key, i as i64));
        }
        let keys: Vec<_> = store
            .stored_messages("work_instruction")
            .iter()
            .map(|m| m.message_key().to_string())
            .collect();
        assert_eq!(keys, vec!["k2", "k3"]);
    }

    #[test]
    fn capacity_is_per_entity() {
        let registry = Arc::new(EntityConfigRegistry::with_configs(vec![
            EntityConfig::new("noisy").with_capacity(1),
            EntityConfig::new("quiet").with_capacity(3),
        ]));
        let store = MessageStore::new(registry);
        for i in 0..10 {
            store.store(&message("noisy", &format!("n{}", i), i));
        }
        store.store(&message("quiet", "q0", 0));
        assert_eq!(store.len("noisy"), 1);
        assert_eq!(store.len("quiet"), 1);
    }

    #[test]
    fn unconfigured_entity_is_not_stored() {
        let store = MessageStore::new(Arc::new(EntityConfigRegistry::new()));
        store.store(&message("unknown", "k1", 1));
        assert!(store.is_empty("unknown"));
    }

    #[test]
    fn expired_messages_are_pruned_on_read() {
        let store = MessageStore::new(registry_with(
            EntityConfig::new("work_instruction")
                .with_capacity(10)
                .with_retention(Duration::from_millis(0)),
        ));
        store.store(&message("work_instruction", "k1", 1));
        std::thread::sleep(Duration::from_millis(5));
        assert!(store.stored_messages("work_instruction").is_empty());
    }

    #[test]
    fn find_by_field_matches_after_value() {
        let store = MessageStore::new(registry_with(
            EntityConfig::new("work_instruction").with_capacity(10),
        ));
        store.store(&message("work_instruction", "k1", 1));
        let hit = store.find_by_field(
            "work_instruction",
            "pos",
            Some(&FieldValue::Text("B2".into())),
        );
        assert_eq!(hit.len(), 1);
        let miss = store.find_by_field(
            "work_instruction",
            "pos",
            Some(&FieldValue::Text("Z9".into())),
        );
        assert!(miss.is_empty());
        let any = store.find_by_field("work_instruction", "pos", None);
        assert_eq!(any.len(), 1);
    }

    #[test]
    fn clear_entity_leaves_others() {
        let registry = Arc::new(EntityConfigRegistry::with_configs(vec![
            EntityConfig::new("a"),
            EntityConfig::new("b"),
        ]));
        let store = MessageStore::new(registry);
        store.store(&message("a", "k", 1));
        store.store(&message("b", "k", 1));
        store.clear_entity("a");
        assert!(store.is_empty("a"));
        assert_eq!(store.len("b"), 1);
    }
}
