use std::time::SystemTime;

use crate::event::CdcAction;
use crate::result::{ResultEntry, ResultLevel};

/// Timestamp taken from the record offset metadata.
pub const TS_OFFSET: &str = "CDC.Offset";
/// When the event was received by the poller.
pub const TS_CDC_RECEIVED: &str = "CDC.received";
/// When all processing for the event finished.
pub const TS_DONE: &str = "DONE";
/// Scenario started processing (suffix with the scenario name).
pub const TS_START_PREFIX: &str = "START.";
/// Scenario finished processing.
pub const TS_END_PREFIX: &str = "END.";
/// Read from a datasource (suffix with the source label).
pub const TS_READ_PREFIX: &str = "READ.";
/// Outgoing request handed off.
pub const TS_SEND_PREFIX: &str = "SEND.";
/// Matching response received.
pub const TS_RECV_PREFIX: &str = "RECV.";

/// Metadata acquired about a single message while it travels through
/// the pipeline: named timestamps for latency tracing plus an
/// escalating result slot.
///
/// Timestamps keep insertion order so the trace reads as a timeline.
#[derive(Debug, Clone)]
pub struct MessageMeta {
    entity: String,
    message_key: String,
    offset: i64,
    action: CdcAction,
    timestamps: Vec<(String, SystemTime)>,
    result: Option<ResultEntry>,
}

impl MessageMeta {
    pub fn new(
        action: CdcAction,
        entity: impl Into<String>,
        offset: i64,
        offset_timestamp: SystemTime,
        message_key: impl Into<String>,
    ) -> Self {
        let mut meta = Self {
            entity: entity.into(),
            message_key: message_key.into(),
            offset,
            action,
            timestamps: Vec::new(),
            result: None,
        };
        meta.add_timestamp_at(TS_OFFSET, offset_timestamp);
        meta.add_timestamp(TS_CDC_RECEIVED);
        meta
    }

    pub fn entity(&self) -> &str {
        &self.entity
    }

    pub fn message_key(&self) -> &str {
        &self.message_key
    }

    pub fn offset(&self) -> i64 {
        self.offset
    }

    pub fn action(&self) -> CdcAction {
        self.action
    }

    /// Records `key` at the current instant. A key recorded twice
    /// keeps the first instant, matching at-most-once trace points.
    pub fn add_timestamp(&mut self, key: &str) {
        self.add_timestamp_at(key, SystemTime::now());
    }

    pub fn add_timestamp_at(&mut self, key: &str, at: SystemTime) {
        if self.timestamp(key).is_none() {
            self.timestamps.push((key.to_string(), at));
        }
    }

    pub fn timestamp(&self, key: &str) -> Option<SystemTime> {
        self.timestamps
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, at)| *at)
    }

    /// When the poller received this message.
    pub fn received_at(&self) -> Option<SystemTime> {
        self.timestamp(TS_CDC_RECEIVED)
    }

    pub fn timestamps(&self) -> &[(String, SystemTime)] {
        &self.timestamps
    }

    /// Replaces the stored result only when no result is stored yet or
    /// the new level is at least as severe. A `None` message preserves
    /// the previous one.
    pub fn set_result_when_higher(
        &mut self,
        level: ResultLevel,
        message: Option<&str>,
    ) {
        let keep_current = self
            .result
            .as_ref()
            .map(|r| level.is_lower(r.level()))
            .unwrap_or(false);
        if keep_current {
            return;
        }
        let message = match message {
            Some(m) => Some(m.to_string()),
            None => self.result.as_ref().and_then(|r| r.message().map(String::from)),
        };
        self.result = Some(match message {
            Some(m) => ResultEntry::new(level, m),
            None => match level {
                ResultLevel::Ok => ResultEntry::ok(),
                ResultLevel::Warn => ResultEntry::new(level, ""),
                ResultLevel::Error => ResultEntry::new(level, ""),
            },
        });
    }

    /// The last recorded result; defaults to OK when nothing was set.
    pub fn result(&self) -> ResultEntry {
        self.result.clone().unwrap_or_default()
    }

    /// Milliseconds between the first and the given trace point, for
    /// latency reporting. `None` when either point is missing.
    pub fn elapsed_ms(&self, key: &str) -> Option<u128> {
        let first = self.timestamps.first().map(|(_, at)| *at)?;
        let at = self.timestamp(key)?;
        at.duration_since(first).ok().map(|d| d.as_millis())
    }
}

impl std::fmt::Display for MessageMeta {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{} offset={} [{}] {}",
            self.entity,
            self.message_key,
            self.offset,
            self.action,
            self.result()
        )
    }
}
