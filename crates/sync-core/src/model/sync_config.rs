use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Direction a `SyncConfig` runs in. Immutable once the config is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncDirection {
    AirtableToSheets,
    SheetsToAirtable,
    Bidirectional,
}

/// Strategy applied to a `BOTH_MODIFIED` or deletion conflict in
/// bidirectional mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    AWins,
    BWins,
    NewestWins,
}

/// Source-A field id -> zero-based Source-B column index. Stable across a
/// run; changing it requires creating a new `SyncConfig`.
pub type FieldMapping = BTreeMap<String, usize>;

/// A configured sync between one Source-A table and one Source-B sheet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncConfig {
    pub id: uuid::Uuid,
    pub owner_user_id: uuid::Uuid,

    pub airtable_base_id: String,
    pub airtable_table_id: String,
    pub airtable_view_id: Option<String>,

    pub sheets_spreadsheet_id: String,
    pub sheets_sheet_id: i64,
    pub sheets_sheet_name: String,

    pub field_mapping: FieldMapping,
    pub direction: SyncDirection,
    pub conflict_policy: ConflictPolicy,

    pub delete_extra_records: bool,
    pub delete_extra_rows: bool,

    pub active: bool,
    pub last_sync_at: Option<chrono::DateTime<chrono::Utc>>,
    pub last_sync_outcome: Option<SyncConfigOutcome>,
    pub last_error_at: Option<chrono::DateTime<chrono::Utc>>,
    pub last_error_message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncConfigOutcome {
    Success,
    Partial,
    Failed,
}

impl SyncConfig {
    /// The direction is fixed at creation; this guards against accidental
    /// mutation of an immutable field elsewhere in the codebase.
    pub fn with_direction_unchanged(self, new_direction: SyncDirection) -> Result<Self, String> {
        if self.direction != new_direction {
            return Err(format!(
                "direction is immutable for sync config {}: was {:?}, attempted {:?}",
                self.id, self.direction, new_direction
            ));
        }
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> SyncConfig {
        SyncConfig {
            id: uuid::Uuid::nil(),
            owner_user_id: uuid::Uuid::nil(),
            airtable_base_id: "app123".into(),
            airtable_table_id: "tbl123".into(),
            airtable_view_id: None,
            sheets_spreadsheet_id: "sheet123".into(),
            sheets_sheet_id: 0,
            sheets_sheet_name: "Sheet1".into(),
            field_mapping: FieldMapping::new(),
            direction: SyncDirection::AirtableToSheets,
            conflict_policy: ConflictPolicy::NewestWins,
            delete_extra_records: false,
            delete_extra_rows: false,
            active: true,
            last_sync_at: None,
            last_sync_outcome: None,
            last_error_at: None,
            last_error_message: None,
        }
    }

    #[test]
    fn direction_change_rejected() {
        let cfg = sample();
        assert!(cfg
            .with_direction_unchanged(SyncDirection::Bidirectional)
            .is_err());
    }

    #[test]
    fn direction_unchanged_ok() {
        let cfg = sample();
        assert!(cfg
            .with_direction_unchanged(SyncDirection::AirtableToSheets)
            .is_ok());
    }
}
