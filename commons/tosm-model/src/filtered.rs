use std::sync::{Arc, Mutex, PoisonError};
use std::time::SystemTime;

use crate::event::{CdcAction, ChangeEvent};
use crate::meta::MessageMeta;
use crate::result::ResultLevel;

/// A change event accepted by at least one scenario, paired with its
/// mutable [`MessageMeta`] trace. Clones share both the event and the
/// meta, so the stored copy and the one handed to scenarios see the
/// same trace.
#[derive(Debug, Clone)]
pub struct FilteredMessage {
    event: Arc<ChangeEvent>,
    meta: Arc<Mutex<MessageMeta>>,
}

impl FilteredMessage {
    pub fn new(event: ChangeEvent) -> Self {
        let meta = MessageMeta::new(
            event.action(),
            event.entity(),
            event.offset(),
            event.offset_timestamp(),
            event.message_key(),
        );
        Self {
            event: Arc::new(event),
            meta: Arc::new(Mutex::new(meta)),
        }
    }

    pub fn event(&self) -> &ChangeEvent {
        &self.event
    }

    pub fn entity(&self) -> &str {
        self.event.entity()
    }

    pub fn message_key(&self) -> &str {
        self.event.message_key()
    }

    pub fn offset(&self) -> i64 {
        self.event.offset()
    }

    pub fn action(&self) -> CdcAction {
        self.event.action()
    }

    /// Runs `f` against the meta under its lock. Keep the closure
    /// short; the same lock serialises all trace writers.
    pub fn with_meta<R>(&self, f: impl FnOnce(&mut MessageMeta) -> R) -> R {
        let mut guard =
            self.meta.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    /// Shared handle to the meta, for observability caches.
    pub fn meta_handle(&self) -> Arc<Mutex<MessageMeta>> {
        self.meta.clone()
    }

    pub fn add_timestamp(&self, key: &str) {
        self.with_meta(|m| m.add_timestamp(key));
    }

    pub fn set_result_when_higher(
        &self,
        level: ResultLevel,
        message: Option<&str>,
    ) {
        self.with_meta(|m| m.set_result_when_higher(level, message));
    }

    pub fn received_at(&self) -> Option<SystemTime> {
        self.with_meta(|m| m.received_at())
    }
}

impl std::fmt::Display for FilteredMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.event)
    }
}
