use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::info;

use crate::conf::EntityConfig;

type ConfigTable = HashMap<String, Arc<EntityConfig>>;

/// Copy-on-write table of entity configurations. Dispatch workers read
/// concurrently; a single administrative writer replaces entries (or
/// the whole table on hot reload) by swapping a fresh map in. An
/// absent entry means the entity is not monitored.
#[derive(Debug, Default)]
pub struct EntityConfigRegistry {
    table: RwLock<Arc<ConfigTable>>,
}

impl EntityConfigRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_configs(
        configs: impl IntoIterator<Item = EntityConfig>,
    ) -> Self {
        let registry = Self::new();
        registry.replace_all(configs);
        registry
    }

    pub fn get(&self, entity: &str) -> Option<Arc<EntityConfig>> {
        self.snapshot().get(entity).cloned()
    }

    /// Inserts or replaces one entity's configuration by swapping a
    /// new table in; readers holding the old snapshot are unaffected.
    pub fn upsert(&self, config: EntityConfig) {
        let mut guard =
            self.table.write().unwrap_or_else(PoisonError::into_inner);
        let mut next: ConfigTable = (**guard).clone();
        info!(entity = %config.entity, "entity config replaced");
        next.insert(config.entity.clone(), Arc::new(config));
        *guard = Arc::new(next);
    }

    /// Hot reload: replaces the whole table in one swap.
    pub fn replace_all(
        &self,
        configs: impl IntoIterator<Item = EntityConfig>,
    ) {
        let next: ConfigTable = configs
            .into_iter()
            .map(|c| (c.entity.clone(), Arc::new(c)))
            .collect();
        info!(entities = next.len(), "entity config table replaced");
        let mut guard =
            self.table.write().unwrap_or_else(PoisonError::into_inner);
        *guard = Arc::new(next);
    }

    pub fn clear(&self) {
        let mut guard =
            self.table.write().unwrap_or_else(PoisonError::into_inner);
        *guard = Arc::new(ConfigTable::new());
    }

    pub fn entity_names(&self) -> Vec<String> {
        self.snapshot().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }

    fn snapshot(&self) -> Arc<ConfigTable> {
        self.table
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
