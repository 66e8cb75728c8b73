//! Small serde-through-SQLite-TEXT helpers, matching the teacher's
//! `enum_to_db`/`enum_from_db` convention for storing Rust enums as plain
//! strings rather than adding a diesel custom-type mapping per enum.

use crate::errors::{Result, StorageError};

pub fn enum_to_db<T: serde::Serialize>(value: &T) -> String {
    serde_json::to_string(value)
        .unwrap_or_default()
        .trim_matches('"')
        .to_string()
}

pub fn enum_from_db<T: serde::de::DeserializeOwned>(value: &str) -> Result<T> {
    serde_json::from_str(&format!("\"{value}\"")).map_err(StorageError::from)
}

pub fn parse_datetime(value: &str) -> Result<chrono::DateTime<chrono::Utc>> {
    chrono::DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&chrono::Utc))
        .map_err(|e| StorageError::Internal(format!("invalid timestamp '{value}': {e}")))
}
