/// Failure inside a scenario's processing step. Caught at the
/// dispatch worker, logged and counted; never escapes the pipeline.
#[derive(thiserror::Error, Debug)]
pub enum ScenarioError {
    #[error("correlation failed: {0}")]
    Correlation(String),
    #[error("downstream publish failed: {0}")]
    Publish(String),
    #[error("{0}")]
    Internal(String),
}

/// Misuse of the orchestrator's public surface.
#[derive(thiserror::Error, Debug)]
pub enum InterceptError {
    #[error("orchestrator already started")]
    AlreadyStarted,
}
