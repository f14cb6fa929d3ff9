use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Severity of an operation outcome, ordered from best to worst.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum ResultLevel {
    Ok,
    Warn,
    Error,
}

impl ResultLevel {
    pub fn is_lower(&self, other: ResultLevel) -> bool {
        *self < other
    }
}

impl std::fmt::Display for ResultLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResultLevel::Ok => write!(f, "OK"),
            ResultLevel::Warn => write!(f, "WARN"),
            ResultLevel::Error => write!(f, "ERROR"),
        }
    }
}

/// Outcome of an operation: a level, an optional free-text message and
/// an optional captured cause for later inspection.
#[derive(Debug, Clone)]
pub struct ResultEntry {
    level: ResultLevel,
    message: Option<String>,
    cause: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

impl ResultEntry {
    pub fn new(level: ResultLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: Some(message.into()),
            cause: None,
        }
    }

    pub fn ok() -> Self {
        Self {
            level: ResultLevel::Ok,
            message: None,
            cause: None,
        }
    }

    pub fn warn(message: impl Into<String>) -> Self {
        Self::new(ResultLevel::Warn, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(ResultLevel::Error, message)
    }

    /// Builds an error entry keeping the failure around as cause.
    pub fn from_error<E>(message: impl Into<String>, cause: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self {
            level: ResultLevel::Error,
            message: Some(message.into()),
            cause: Some(Arc::new(cause)),
        }
    }

    pub fn with_cause<E>(mut self, cause: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.cause = Some(Arc::new(cause));
        self
    }

    pub fn level(&self) -> ResultLevel {
        self.level
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn cause(&self) -> Option<&(dyn std::error::Error + Send + Sync)> {
        self.cause.as_deref()
    }

    pub fn is_ok(&self) -> bool {
        self.level == ResultLevel::Ok
    }
}

impl Default for ResultEntry {
    fn default() -> Self {
        Self::ok()
    }
}

impl std::fmt::Display for ResultEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.message {
            Some(msg) => write!(f, "{}: {}", self.level, msg),
            None => write!(f, "{}", self.level),
        }
    }
}
