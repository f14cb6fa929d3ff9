use std::sync::Arc;

use envconfig::Envconfig;
use tracing::info;

use tosm_intercept::{
    init_log, EntityConfig, EntityConfigRegistry, Mediator, MediatorConfig,
};

/// Loads entity configs from the JSON file named by
/// `TOSM_ENTITY_CONFIG`, or starts with an empty registry when unset.
fn load_registry() -> anyhow::Result<EntityConfigRegistry> {
    let registry = EntityConfigRegistry::new();
    if let Ok(path) = std::env::var("TOSM_ENTITY_CONFIG") {
        let raw = std::fs::read_to_string(&path)?;
        let configs: Vec<EntityConfig> = serde_json::from_str(&raw)?;
        info!(path, count = configs.len(), "entity configs loaded");
        registry.replace_all(configs);
    }
    Ok(registry)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_log();
    let conf = MediatorConfig::init_from_env()?;
    let registry = Arc::new(load_registry()?);
    let mediator = Mediator::new(conf, registry);

    tokio::signal::ctrl_c().await?;
    mediator.shutdown().await;
    Ok(())
}
