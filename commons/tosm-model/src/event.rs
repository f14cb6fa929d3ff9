use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::value::{FieldDelta, FieldValue};

/// What happened to the CDC record.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
pub enum CdcAction {
    Created,
    Changed,
    Deleted,
}

impl CdcAction {
    /// Derives the action from the presence of the before/after images
    /// on the decoded record.
    pub fn from_images(has_before: bool, has_after: bool) -> CdcAction {
        match (has_before, has_after) {
            (false, _) => CdcAction::Created,
            (_, false) => CdcAction::Deleted,
            _ => CdcAction::Changed,
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            CdcAction::Created => "+",
            CdcAction::Deleted => "-",
            CdcAction::Changed => "*",
        }
    }
}

impl std::fmt::Display for CdcAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CdcAction::Created => write!(f, "CREATED"),
            CdcAction::Changed => write!(f, "CHANGED"),
            CdcAction::Deleted => write!(f, "DELETED"),
        }
    }
}

/// A raw entity-change event as decoded at the ingestion boundary.
/// Immutable once constructed; fields keep record order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeEvent {
    action: CdcAction,
    entity: String,
    partition: i32,
    offset: i64,
    offset_timestamp: SystemTime,
    message_key: String,
    fields: Vec<FieldDelta>,
}

impl ChangeEvent {
    pub fn new(
        action: CdcAction,
        entity: impl Into<String>,
        partition: i32,
        offset: i64,
        offset_timestamp: SystemTime,
        message_key: impl Into<String>,
        fields: Vec<FieldDelta>,
    ) -> Self {
        Self {
            action,
            entity: entity.into(),
            partition,
            offset,
            offset_timestamp,
            message_key: message_key.into(),
            fields,
        }
    }

    pub fn action(&self) -> CdcAction {
        self.action
    }

    pub fn entity(&self) -> &str {
        &self.entity
    }

    pub fn partition(&self) -> i32 {
        self.partition
    }

    pub fn offset(&self) -> i64 {
        self.offset
    }

    pub fn offset_timestamp(&self) -> SystemTime {
        self.offset_timestamp
    }

    pub fn message_key(&self) -> &str {
        &self.message_key
    }

    pub fn fields(&self) -> &[FieldDelta] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldDelta> {
        self.fields.iter().find(|d| d.field() == name)
    }

    /// All fields whose before/after values differ.
    pub fn changed_fields(&self) -> impl Iterator<Item = &FieldDelta> {
        self.fields.iter().filter(|d| d.has_changed())
    }

    pub fn has_changed(&self, name: &str) -> bool {
        self.field(name).map(|d| d.has_changed()).unwrap_or(false)
    }

    /// After-value of `name` as text, `None` when absent or null.
    pub fn field_as_str(&self, name: &str) -> Option<&str> {
        match self.field(name) {
            Some(delta) => delta.after().as_str(),
            None => {
                warn!(
                    field = name,
                    offset = self.offset,
                    "field not found in message"
                );
                None
            }
        }
    }

    /// After-value of `name` as integer; falls back on missing field or
    /// non-integer value.
    pub fn field_as_i64(&self, name: &str, fallback: i64) -> i64 {
        match self.field(name) {
            Some(delta) => match delta.after() {
                FieldValue::Int(v) => *v,
                other => {
                    warn!(
                        field = name,
                        value = %other,
                        offset = self.offset,
                        "field is not an integer"
                    );
                    fallback
                }
            },
            None => {
                warn!(
                    field = name,
                    offset = self.offset,
                    "field not found in message"
                );
                fallback
            }
        }
    }
}

impl std::fmt::Display for ChangeEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}] {} key={} offset={} ({} fields)",
            self.action.symbol(),
            self.entity,
            self.message_key,
            self.offset,
            self.fields.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event_with(fields: Vec<FieldDelta>) -> ChangeEvent {
        ChangeEvent::new(
            CdcAction::Changed,
            "work_instruction",
            0,
            42,
            SystemTime::now(),
            "k-42",
            fields,
        )
    }

    #[test]
    fn action_from_images() {
        assert_eq!(CdcAction::from_images(false, true), CdcAction::Created);
        assert_eq!(CdcAction::from_images(true, false), CdcAction::Deleted);
        assert_eq!(CdcAction::from_images(true, true), CdcAction::Changed);
    }

    #[test]
    fn changed_fields_skip_unchanged() {
        let ev = event_with(vec![
            FieldDelta::new("pos", "A1".into(), "B2".into()),
            FieldDelta::new("state", "OK".into(), "OK".into()),
        ]);
        let changed: Vec<_> =
            ev.changed_fields().map(|d| d.field().to_string()).collect();
        assert_eq!(changed, vec!["pos"]);
        assert!(ev.has_changed("pos"));
        assert!(!ev.has_changed("state"));
        assert!(!ev.has_changed("missing"));
    }

    #[test]
    fn typed_accessors_fall_back() {
        let ev = event_with(vec![
            FieldDelta::new("gkey", FieldValue::Null, FieldValue::Int(7)),
            FieldDelta::new("pos", FieldValue::Null, "A1".into()),
        ]);
        assert_eq!(ev.field_as_i64("gkey", -1), 7);
        assert_eq!(ev.field_as_i64("pos", -1), -1);
        assert_eq!(ev.field_as_i64("missing", -1), -1);
        assert_eq!(ev.field_as_str("pos"), Some("A1"));
        assert_eq!(ev.field_as_str("gkey"), None);
    }
}
