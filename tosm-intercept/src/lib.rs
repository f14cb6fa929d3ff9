pub mod conf;
pub mod decide;
pub mod error;
pub mod registry;
pub mod scenario;
pub mod store;

use std::sync::{Arc, Mutex, PoisonError};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use tosm_connect::{ChangePoller, ConnectorProgress, ConnectorState, PollLoop};

pub use crate::conf::{EntityConfig, MediatorConfig, ScenarioKind, ScenarioSpec};
pub use crate::decide::{Decide, MetaCache};
pub use crate::error::{InterceptError, ScenarioError};
pub use crate::registry::EntityConfigRegistry;
pub use crate::store::MessageStore;

/// Ties the pieces together for a running process: the entity config
/// registry, the decision pipeline and any number of attached pollers.
pub struct Mediator {
    conf: MediatorConfig,
    registry: Arc<EntityConfigRegistry>,
    decide: Arc<Decide>,
    token: CancellationToken,
    connectors: Mutex<Vec<(Arc<ConnectorProgress>, JoinHandle<()>)>>,
}

impl Mediator {
    /// Builds the pipeline from the registry and starts its dispatch
    /// workers. Pollers are attached afterwards.
    pub fn new(
        conf: MediatorConfig,
        registry: Arc<EntityConfigRegistry>,
    ) -> Self {
        let decide = Arc::new(Decide::from_registry(&conf, registry.clone()));
        decide.start();
        Self {
            conf,
            registry,
            decide,
            token: CancellationToken::new(),
            connectors: Mutex::new(Vec::new()),
        }
    }

    pub fn registry(&self) -> &Arc<EntityConfigRegistry> {
        &self.registry
    }

    pub fn decide(&self) -> &Arc<Decide> {
        &self.decide
    }

    /// Spawns a poll loop feeding this mediator's pipeline and returns
    /// its progress handle for observation.
    pub fn attach_poller<P>(
        &self,
        name: impl Into<String>,
        poller: P,
    ) -> Arc<ConnectorProgress>
    where
        P: ChangePoller + 'static,
    {
        let progress = Arc::new(ConnectorProgress::new(name));
        progress.set_progress_ok(ConnectorState::Initialising);
        progress.set_progress_ok(ConnectorState::Initialized);

        let handle = tokio::spawn(
            PollLoop::new(
                poller,
                self.decide.clone(),
                progress.clone(),
                self.conf.poll_timeout(),
                self.conf.retry_interval(),
                self.token.clone(),
            )
            .run(),
        );
        info!(connector = %progress.name(), "poller attached");
        self.connectors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((progress.clone(), handle));
        progress
    }

    pub fn connector_progress(&self) -> Vec<Arc<ConnectorProgress>> {
        self.connectors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(progress, _)| progress.clone())
            .collect()
    }

    /// Stops the poll loops, then drains and stops the pipeline.
    pub async fn shutdown(&self) {
        info!("mediator shutting down");
        self.token.cancel();
        let connectors: Vec<(Arc<ConnectorProgress>, JoinHandle<()>)> = self
            .connectors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for (progress, handle) in connectors {
            let grace = self.conf.shutdown_grace();
            if tokio::time::timeout(grace, handle).await.is_err() {
                warn!(
                    connector = %progress.name(),
                    "poll loop did not stop within grace period"
                );
            }
        }
        self.decide.shutdown().await;
        info!("mediator stopped");
    }
}

pub fn init_log() {
    use tracing::level_filters::LevelFilter;
    use tracing_subscriber::{
        layer::SubscriberExt, util::SubscriberInitExt, EnvFilter,
    };
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("TOSM_LOG")
                .from_env_lossy(),
        )
        .init();
}
