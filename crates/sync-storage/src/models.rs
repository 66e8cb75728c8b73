//! Diesel row structs. Each mirrors a `sync-core` domain type one-for-one
//! but stores enums/maps as JSON-in-TEXT, matching the teacher's
//! `enum_to_db`/`enum_from_db` convention for SQLite-backed enum columns.

use diesel::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Queryable, Identifiable, Insertable, AsChangeset, Debug, Clone, Serialize, Deserialize)]
#[diesel(primary_key(user_id, service))]
#[diesel(table_name = crate::schema::credentials)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct CredentialRow {
    pub user_id: String,
    pub service: String,
    pub encrypted_access_token: String,
    pub encrypted_refresh_token: String,
    pub expires_at: String,
    pub last_refresh_attempt_at: Option<String>,
    pub last_refresh_error: Option<String>,
    pub needs_reauth: bool,
    pub account_identifier: Option<String>,
}

#[derive(Queryable, Identifiable, Insertable, AsChangeset, Debug, Clone, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::sync_configs)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct SyncConfigRow {
    pub id: String,
    pub owner_user_id: String,
    pub airtable_base_id: String,
    pub airtable_table_id: String,
    pub airtable_view_id: Option<String>,
    pub sheets_spreadsheet_id: String,
    pub sheets_sheet_id: i64,
    pub sheets_sheet_name: String,
    pub field_mapping_json: String,
    pub direction: String,
    pub conflict_policy: String,
    pub delete_extra_records: bool,
    pub delete_extra_rows: bool,
    pub active: bool,
    pub last_sync_at: Option<String>,
    pub last_sync_outcome: Option<String>,
    pub last_error_at: Option<String>,
    pub last_error_message: Option<String>,
}

#[derive(Queryable, Identifiable, Insertable, Debug, Clone, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::sync_logs)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct SyncLogRow {
    pub id: String,
    pub sync_config_id: String,
    pub outcome: String,
    pub direction: String,
    pub trigger_source: String,
    pub records_synced: i32,
    pub records_failed: i32,
    pub errors_json: String,
    pub warnings_json: String,
    pub started_at: String,
    pub completed_at: String,
}

#[derive(Queryable, Identifiable, Insertable, AsChangeset, Debug, Clone, Serialize, Deserialize)]
#[diesel(primary_key(sync_config_id, record_id))]
#[diesel(table_name = crate::schema::checkpoint_entries)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct CheckpointEntryRow {
    pub sync_config_id: String,
    pub record_id: String,
    pub content_hash: String,
    pub captured_at: String,
}

#[derive(Queryable, Identifiable, Insertable, AsChangeset, Debug, Clone, Serialize, Deserialize)]
#[diesel(primary_key(user_id, year_month))]
#[diesel(table_name = crate::schema::usage_stats)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct UsageStatsRow {
    pub user_id: String,
    pub year_month: String,
    pub records_synced: i64,
    pub sync_configs_created: i32,
}

#[derive(Queryable, Identifiable, Insertable, AsChangeset, Debug, Clone)]
#[diesel(primary_key(sync_config_id))]
#[diesel(table_name = crate::schema::sync_run_locks)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct SyncRunLockRow {
    pub sync_config_id: String,
    pub lock_version: i64,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
}
