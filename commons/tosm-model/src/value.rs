use serde::{Deserialize, Serialize};

/// Typed field value as decoded from a CDC record. Closed set, no
/// reflective payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    Text(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Null,
}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FieldValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Float(v) => Some(*v),
            FieldValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }
}

impl std::fmt::Display for FieldValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldValue::Text(s) => write!(f, "{}", s),
            FieldValue::Int(v) => write!(f, "{}", v),
            FieldValue::Float(v) => write!(f, "{}", v),
            FieldValue::Bool(v) => write!(f, "{}", v),
            FieldValue::Null => write!(f, "null"),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Int(value)
    }
}

/// A collected field with its before/after values. Either side may be
/// `Null` when the record carried no value for that side.
///
/// Equality and hashing go by field name only; the owning
/// [`ChangeEvent`](crate::ChangeEvent) guarantees one delta per name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDelta {
    field: String,
    before: FieldValue,
    after: FieldValue,
}

impl FieldDelta {
    pub fn new(
        field: impl Into<String>,
        before: FieldValue,
        after: FieldValue,
    ) -> Self {
        Self {
            field: field.into(),
            before,
            after,
        }
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn before(&self) -> &FieldValue {
        &self.before
    }

    pub fn after(&self) -> &FieldValue {
        &self.after
    }

    pub fn is_created(&self) -> bool {
        self.before.is_null() && !self.after.is_null()
    }

    pub fn is_deleted(&self) -> bool {
        !self.before.is_null() && self.after.is_null()
    }

    pub fn has_changed(&self) -> bool {
        self.before != self.after
    }
}

impl PartialEq for FieldDelta {
    fn eq(&self, other: &Self) -> bool {
        self.field == other.field
    }
}

impl Eq for FieldDelta {}

impl std::hash::Hash for FieldDelta {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.field.hash(state);
    }
}

impl std::fmt::Display for FieldDelta {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: {} -> {}{}",
            self.field,
            self.before,
            self.after,
            if self.has_changed() { " (*)" } else { "" }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equality_goes_by_field_name() {
        let a = FieldDelta::new("pos", FieldValue::Null, "A1".into());
        let b = FieldDelta::new("pos", "A1".into(), "B2".into());
        let c = FieldDelta::new("state", FieldValue::Null, "A1".into());
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn change_detection_compares_values() {
        let unchanged =
            FieldDelta::new("pos", FieldValue::Int(5), FieldValue::Int(5));
        assert!(!unchanged.has_changed());

        let created = FieldDelta::new("pos", FieldValue::Null, "A1".into());
        assert!(created.has_changed());
        assert!(created.is_created());
        assert!(!created.is_deleted());

        let deleted = FieldDelta::new("pos", "A1".into(), FieldValue::Null);
        assert!(deleted.is_deleted());
        assert!(deleted.has_changed());
    }
}
