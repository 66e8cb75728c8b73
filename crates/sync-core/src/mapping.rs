//! Bidirectional translation between Source-A field values and Source-B
//! cell values.
//!
//! Linked-record fields are handled specially: by the time a value reaches
//! [`to_sheet_value`]/[`from_sheet_value`] it has already been resolved to
//! names by `linking` (A→B) or is still raw names awaiting a reverse
//! lookup the caller performs before calling `from_sheet_value` for a
//! `FieldType::LinkedRecord` target.

use thiserror::Error;

use crate::field::{FieldType, FieldValue};

#[derive(Debug, Error, PartialEq)]
pub enum MappingError {
    #[error("field {field_id}: cannot coerce sheet value {value:?} to {target:?}")]
    Uncoercible {
        field_id: String,
        value: SheetValue,
        target: FieldType,
    },
    #[error("field {field_id}: value is read-only at the destination ({field_type:?})")]
    ReadOnlyTarget {
        field_id: String,
        field_type: FieldType,
    },
}

/// How an uncoercible / unknown value is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MappingMode {
    Strict,
    Lenient,
}

/// A Source-B cell value. Source B itself only knows string/number/boolean.
#[derive(Debug, Clone, PartialEq)]
pub enum SheetValue {
    String(String),
    Number(f64),
    Bool(bool),
    Empty,
}

impl SheetValue {
    pub fn as_string(&self) -> String {
        match self {
            SheetValue::String(s) => s.clone(),
            SheetValue::Number(n) => format_number(*n),
            SheetValue::Bool(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
            SheetValue::Empty => String::new(),
        }
    }
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

/// A→B: convert one already-resolved field value to the cell Source B will
/// store. Linked-record values must already be `FieldValue::SelectMany`
/// (resolved names), not `LinkedIds`, by the time they reach here.
pub fn to_sheet_value(field_type: FieldType, value: &FieldValue) -> SheetValue {
    let value = value.normalized();
    match (field_type, &value) {
        (_, FieldValue::Absent) => SheetValue::Empty,
        (FieldType::Checkbox, FieldValue::Bool(b)) => {
            SheetValue::String(if *b { "TRUE".into() } else { "FALSE".into() })
        }
        (
            FieldType::Number
            | FieldType::Currency
            | FieldType::Percent
            | FieldType::Rating
            | FieldType::AutoNumber,
            FieldValue::Number(n),
        ) => SheetValue::Number(*n),
        (
            FieldType::MultiSelect | FieldType::LinkedRecord | FieldType::Attachments,
            FieldValue::SelectMany(names),
        ) => SheetValue::String(names.join(", ")),
        (
            FieldType::MultiSelect | FieldType::LinkedRecord | FieldType::Attachments,
            FieldValue::AttachmentList(urls),
        ) => SheetValue::String(urls.join(", ")),
        (FieldType::Date, FieldValue::Date(s))
        | (FieldType::DateTime, FieldValue::DateTime(s))
        | (FieldType::CreatedTime, FieldValue::DateTime(s))
        | (FieldType::ModifiedTime, FieldValue::DateTime(s))
        | (FieldType::CreatedBy, FieldValue::Text(s))
        | (FieldType::ModifiedBy, FieldValue::Text(s))
        | (FieldType::Url, FieldValue::Text(s))
        | (FieldType::Email, FieldValue::Text(s))
        | (FieldType::Phone, FieldValue::Text(s))
        | (FieldType::SingleLineText, FieldValue::Text(s))
        | (FieldType::LongText, FieldValue::Text(s))
        | (FieldType::RichText, FieldValue::Text(s))
        | (FieldType::Barcode, FieldValue::Text(s)) => SheetValue::String(s.clone()),
        (FieldType::Formula | FieldType::Rollup | FieldType::Lookup | FieldType::Count, inner) => {
            to_sheet_value_from_computed(inner)
        }
        // Fallback: best-effort stringification, used for combinations not
        // enumerated above (e.g. a selectOne stored as a bare Text value).
        (_, other) => SheetValue::String(other_to_string(other)),
    }
}

fn to_sheet_value_from_computed(inner: &FieldValue) -> SheetValue {
    match inner {
        FieldValue::Number(n) => SheetValue::Number(*n),
        FieldValue::Bool(b) => SheetValue::String(if *b { "TRUE".into() } else { "FALSE".into() }),
        FieldValue::Computed(boxed) => to_sheet_value_from_computed(boxed),
        other => SheetValue::String(other_to_string(other)),
    }
}

fn other_to_string(value: &FieldValue) -> String {
    match value {
        FieldValue::Text(s) | FieldValue::Date(s) | FieldValue::DateTime(s) | FieldValue::SelectOne(s) => {
            s.clone()
        }
        FieldValue::SelectMany(v) | FieldValue::LinkedIds(v) | FieldValue::AttachmentList(v) => {
            v.join(", ")
        }
        FieldValue::Number(n) => format_number(*n),
        FieldValue::Bool(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
        FieldValue::Computed(inner) => other_to_string(inner),
        FieldValue::Absent => String::new(),
    }
}

/// B→A: coerce a raw sheet cell into the typed value a Source-A field of
/// `field_type` expects. For `FieldType::LinkedRecord`, this yields
/// `FieldValue::SelectMany` of raw names; the caller (linking) still owes a
/// reverse name→id resolution before this can be sent to Source A.
pub fn from_sheet_value(
    field_id: &str,
    field_type: FieldType,
    value: &SheetValue,
    mode: MappingMode,
) -> Result<FieldValue, MappingError> {
    if field_type.is_read_only() {
        return Err(MappingError::ReadOnlyTarget {
            field_id: field_id.to_string(),
            field_type,
        });
    }

    let as_str = value.as_string();
    if as_str.trim().is_empty() {
        return Ok(FieldValue::Absent);
    }

    let result = match field_type {
        FieldType::Checkbox => parse_bool(&as_str).map(FieldValue::Bool),
        FieldType::Number | FieldType::Currency | FieldType::Percent | FieldType::Rating => {
            parse_number(value).map(FieldValue::Number)
        }
        FieldType::Date => Some(FieldValue::Date(as_str.trim().to_string())),
        FieldType::DateTime => Some(FieldValue::DateTime(as_str.trim().to_string())),
        FieldType::SingleSelect => Some(FieldValue::SelectOne(as_str.trim().to_string())),
        FieldType::MultiSelect => Some(FieldValue::SelectMany(split_csv(&as_str))),
        FieldType::LinkedRecord => Some(FieldValue::SelectMany(split_csv(&as_str))),
        FieldType::Attachments => Some(FieldValue::AttachmentList(split_csv(&as_str))),
        FieldType::SingleLineText
        | FieldType::LongText
        | FieldType::RichText
        | FieldType::Url
        | FieldType::Email
        | FieldType::Phone
        | FieldType::Barcode => Some(FieldValue::Text(as_str.trim().to_string())),
        FieldType::Formula
        | FieldType::Rollup
        | FieldType::Lookup
        | FieldType::Count
        | FieldType::AutoNumber
        | FieldType::Button
        | FieldType::CreatedTime
        | FieldType::ModifiedTime
        | FieldType::CreatedBy
        | FieldType::ModifiedBy => unreachable!("filtered by is_read_only above"),
    };

    match result {
        Some(v) => Ok(v),
        None if mode == MappingMode::Lenient => Ok(FieldValue::Absent),
        None => Err(MappingError::Uncoercible {
            field_id: field_id.to_string(),
            value: value.clone(),
            target: field_type,
        }),
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}

fn parse_number(value: &SheetValue) -> Option<f64> {
    match value {
        SheetValue::Number(n) => Some(*n),
        SheetValue::String(s) => s.trim().replace(',', "").parse::<f64>().ok(),
        _ => None,
    }
}

fn split_csv(s: &str) -> Vec<String> {
    s.split(',')
        .map(|part| part.trim().to_string())
        .filter(|part| !part.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checkbox_round_trips() {
        let a_to_b = to_sheet_value(FieldType::Checkbox, &FieldValue::Bool(true));
        assert_eq!(a_to_b, SheetValue::String("TRUE".into()));
        let back = from_sheet_value("f1", FieldType::Checkbox, &a_to_b, MappingMode::Strict).unwrap();
        assert_eq!(back, FieldValue::Bool(true));
    }

    #[test]
    fn multi_select_joins_and_splits() {
        let value = FieldValue::SelectMany(vec!["A".into(), "B".into()]);
        let sheet = to_sheet_value(FieldType::MultiSelect, &value);
        assert_eq!(sheet, SheetValue::String("A, B".into()));
        let back =
            from_sheet_value("f1", FieldType::MultiSelect, &sheet, MappingMode::Strict).unwrap();
        assert_eq!(back, FieldValue::SelectMany(vec!["A".into(), "B".into()]));
    }

    #[test]
    fn yes_no_coerces_to_bool() {
        let sheet = SheetValue::String("yes".into());
        let back = from_sheet_value("f1", FieldType::Checkbox, &sheet, MappingMode::Strict).unwrap();
        assert_eq!(back, FieldValue::Bool(true));
    }

    #[test]
    fn uncoercible_fails_strict_and_skips_lenient() {
        let sheet = SheetValue::String("not-a-number".into());
        let strict = from_sheet_value("f1", FieldType::Number, &sheet, MappingMode::Strict);
        assert!(strict.is_err());

        let lenient = from_sheet_value("f1", FieldType::Number, &sheet, MappingMode::Lenient).unwrap();
        assert_eq!(lenient, FieldValue::Absent);
    }

    #[test]
    fn read_only_target_rejected_even_in_lenient_mode() {
        let sheet = SheetValue::String("x".into());
        let err = from_sheet_value("f1", FieldType::Formula, &sheet, MappingMode::Lenient);
        assert!(matches!(err, Err(MappingError::ReadOnlyTarget { .. })));
    }

    #[test]
    fn empty_cell_is_absent_regardless_of_type() {
        let sheet = SheetValue::Empty;
        let back = from_sheet_value("f1", FieldType::SingleLineText, &sheet, MappingMode::Strict)
            .unwrap();
        assert_eq!(back, FieldValue::Absent);
    }

    #[test]
    fn numeric_string_with_thousands_separator_parses() {
        let sheet = SheetValue::String("1,234.5".into());
        let back = from_sheet_value("f1", FieldType::Number, &sheet, MappingMode::Strict).unwrap();
        assert_eq!(back, FieldValue::Number(1234.5));
    }
}
