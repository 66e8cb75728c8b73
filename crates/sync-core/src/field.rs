//! The typed field value the rest of the engine works with.
//!
//! Source A's field bag arrives over the wire as untyped JSON; parsing it
//! into this sum type happens once, at the external client boundary
//! (`sync-clients`), rather than re-interpreting raw JSON at every layer.

use serde::{Deserialize, Serialize};

/// A Source-A field type, as declared by that table's schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FieldType {
    SingleLineText,
    LongText,
    RichText,
    Number,
    Currency,
    Percent,
    Checkbox,
    Date,
    DateTime,
    SingleSelect,
    MultiSelect,
    Url,
    Email,
    Phone,
    Attachments,
    LinkedRecord,
    Formula,
    Rollup,
    Lookup,
    Count,
    AutoNumber,
    Barcode,
    Rating,
    Button,
    CreatedTime,
    ModifiedTime,
    CreatedBy,
    ModifiedBy,
}

impl FieldType {
    /// Fields Source A computes and that cannot be written back during a B→A sync.
    pub fn is_read_only(self) -> bool {
        matches!(
            self,
            FieldType::Formula
                | FieldType::Rollup
                | FieldType::Lookup
                | FieldType::Count
                | FieldType::AutoNumber
                | FieldType::Button
                | FieldType::CreatedTime
                | FieldType::ModifiedTime
                | FieldType::CreatedBy
                | FieldType::ModifiedBy
        )
    }
}

/// A typed field value, already parsed out of Source A's JSON or coerced
/// from a Source B cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum FieldValue {
    Text(String),
    Number(f64),
    Bool(bool),
    Date(String),
    DateTime(String),
    SelectOne(String),
    SelectMany(Vec<String>),
    /// Linked record ids, unresolved. The linked-record resolver turns this
    /// into `SelectMany` of resolved primary-field names before the field
    /// mapper ever sees it.
    LinkedIds(Vec<String>),
    AttachmentList(Vec<String>),
    /// A computed/read-only value already reduced to its resolved base type.
    Computed(Box<FieldValue>),
    Absent,
}

impl FieldValue {
    pub fn is_absent(&self) -> bool {
        matches!(self, FieldValue::Absent)
            || matches!(self, FieldValue::Text(s) if s.trim().is_empty())
    }

    /// Normalize a value the same way for mapping output and for hashing
    /// (content-hash equality must not be perturbed by field order,
    /// whitespace, or float precision noise).
    pub fn normalized(&self) -> FieldValue {
        match self {
            FieldValue::Text(s) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    FieldValue::Absent
                } else {
                    FieldValue::Text(trimmed.to_string())
                }
            }
            FieldValue::Number(n) => FieldValue::Number(round6(*n)),
            FieldValue::SelectMany(values) => {
                let mut v: Vec<String> = values.iter().map(|s| s.trim().to_string()).collect();
                v.sort();
                if v.is_empty() {
                    FieldValue::Absent
                } else {
                    FieldValue::SelectMany(v)
                }
            }
            FieldValue::LinkedIds(values) => {
                let mut v = values.clone();
                v.sort();
                if v.is_empty() {
                    FieldValue::Absent
                } else {
                    FieldValue::LinkedIds(v)
                }
            }
            FieldValue::AttachmentList(values) => {
                let mut v = values.clone();
                v.sort();
                if v.is_empty() {
                    FieldValue::Absent
                } else {
                    FieldValue::AttachmentList(v)
                }
            }
            FieldValue::Computed(inner) => inner.normalized(),
            FieldValue::SelectOne(s) if s.trim().is_empty() => FieldValue::Absent,
            other => other.clone(),
        }
    }
}

fn round6(n: f64) -> f64 {
    (n * 1_000_000.0).round() / 1_000_000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_text_normalizes_to_absent() {
        assert_eq!(FieldValue::Text("   ".into()).normalized(), FieldValue::Absent);
    }

    #[test]
    fn select_many_sorts_and_trims() {
        let v = FieldValue::SelectMany(vec![" b".into(), "a ".into()]);
        assert_eq!(
            v.normalized(),
            FieldValue::SelectMany(vec!["a".into(), "b".into()])
        );
    }

    #[test]
    fn number_rounds_to_six_decimals() {
        let v = FieldValue::Number(1.0000001234);
        assert_eq!(v.normalized(), FieldValue::Number(1.0));
    }

    #[test]
    fn read_only_field_types() {
        assert!(FieldType::Formula.is_read_only());
        assert!(!FieldType::SingleLineText.is_read_only());
    }
}
