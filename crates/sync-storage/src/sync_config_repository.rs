//! Persistence for `SyncConfig` (§3): creation, lookup, and the
//! operational-state fields an executor writes back after a run.

use std::collections::BTreeMap;
use std::sync::Arc;

use diesel::prelude::*;

use sync_core::model::{ConflictPolicy, SyncConfig, SyncConfigOutcome, SyncDirection};

use crate::db::{get_connection, SqlitePool, WriteHandle};
use crate::errors::{Result, StorageError};
use crate::models::SyncConfigRow;
use crate::schema::sync_configs;
use crate::util::{enum_from_db, enum_to_db, parse_datetime};

pub struct SyncConfigRepository {
    pool: Arc<SqlitePool>,
    writer: WriteHandle,
}

impl SyncConfigRepository {
    pub fn new(pool: Arc<SqlitePool>, writer: WriteHandle) -> Self {
        Self { pool, writer }
    }

    pub fn get(&self, id: uuid::Uuid) -> Result<Option<SyncConfig>> {
        let mut conn = get_connection(&self.pool)?;
        let row = sync_configs::table
            .find(id.to_string())
            .first::<SyncConfigRow>(&mut conn)
            .optional()
            .map_err(StorageError::from)?;
        row.map(row_to_config).transpose()
    }

    /// All active configs, for the scheduler's per-tick enumeration.
    pub fn list_active(&self) -> Result<Vec<SyncConfig>> {
        let mut conn = get_connection(&self.pool)?;
        sync_configs::table
            .filter(sync_configs::active.eq(true))
            .load::<SyncConfigRow>(&mut conn)
            .map_err(StorageError::from)?
            .into_iter()
            .map(row_to_config)
            .collect()
    }

    pub fn list_for_owner(&self, owner_user_id: uuid::Uuid) -> Result<Vec<SyncConfig>> {
        let mut conn = get_connection(&self.pool)?;
        sync_configs::table
            .filter(sync_configs::owner_user_id.eq(owner_user_id.to_string()))
            .load::<SyncConfigRow>(&mut conn)
            .map_err(StorageError::from)?
            .into_iter()
            .map(row_to_config)
            .collect()
    }

    pub async fn create(&self, config: SyncConfig) -> Result<()> {
        let row = config_to_row(&config);
        self.writer
            .exec(move |conn| {
                diesel::insert_into(sync_configs::table)
                    .values(&row)
                    .execute(conn)
                    .map_err(StorageError::from)?;
                Ok(())
            })
            .await
    }

    /// Updates every field the config editor is allowed to change
    /// (§3: direction is immutable — callers must not pass a config whose
    /// `direction` differs from the stored row; `SyncConfig::with_direction_unchanged`
    /// is the caller-side guard for that invariant).
    pub async fn update(&self, config: SyncConfig) -> Result<()> {
        let row = config_to_row(&config);
        self.writer
            .exec(move |conn| {
                diesel::update(sync_configs::table.find(row.id.clone()))
                    .set((
                        sync_configs::airtable_view_id.eq(row.airtable_view_id),
                        sync_configs::field_mapping_json.eq(row.field_mapping_json),
                        sync_configs::conflict_policy.eq(row.conflict_policy),
                        sync_configs::delete_extra_records.eq(row.delete_extra_records),
                        sync_configs::delete_extra_rows.eq(row.delete_extra_rows),
                        sync_configs::active.eq(row.active),
                    ))
                    .execute(conn)
                    .map_err(StorageError::from)?;
                Ok(())
            })
            .await
    }

    /// Called by the executor after a run completes (§2 "updates
    /// checkpoint state and persists a SyncLog entry").
    pub async fn record_run_outcome(
        &self,
        id: uuid::Uuid,
        outcome: SyncConfigOutcome,
        error_message: Option<String>,
    ) -> Result<()> {
        let now = chrono::Utc::now().to_rfc3339();
        let outcome_str = enum_to_db(&outcome);
        self.writer
            .exec(move |conn| {
                diesel::update(sync_configs::table.find(id.to_string()))
                    .set((
                        sync_configs::last_sync_at.eq(Some(now.clone())),
                        sync_configs::last_sync_outcome.eq(Some(outcome_str)),
                        sync_configs::last_error_at
                            .eq(error_message.as_ref().map(|_| now.clone())),
                        sync_configs::last_error_message.eq(error_message),
                    ))
                    .execute(conn)
                    .map_err(StorageError::from)?;
                Ok(())
            })
            .await
    }

    /// Deletion cascades to logs/checkpoints (§3 "Ownership and lifecycle").
    pub async fn delete_cascade(&self, id: uuid::Uuid) -> Result<()> {
        self.writer
            .exec(move |conn| {
                conn.transaction(|conn| {
                    use crate::schema::{checkpoint_entries, sync_logs, sync_run_locks};
                    let id_str = id.to_string();
                    diesel::delete(checkpoint_entries::table.filter(checkpoint_entries::sync_config_id.eq(&id_str)))
                        .execute(conn)?;
                    diesel::delete(sync_logs::table.filter(sync_logs::sync_config_id.eq(&id_str)))
                        .execute(conn)?;
                    diesel::delete(sync_run_locks::table.find(&id_str)).execute(conn)?;
                    diesel::delete(sync_configs::table.find(&id_str)).execute(conn)?;
                    Ok::<_, diesel::result::Error>(())
                })
                .map_err(StorageError::from)?;
                Ok(())
            })
            .await
    }
}

fn row_to_config(row: SyncConfigRow) -> Result<SyncConfig> {
    let field_mapping: BTreeMap<String, usize> =
        serde_json::from_str(&row.field_mapping_json).map_err(StorageError::from)?;
    Ok(SyncConfig {
        id: row.id.parse().map_err(|_| StorageError::Internal("invalid config id".into()))?,
        owner_user_id: row
            .owner_user_id
            .parse()
            .map_err(|_| StorageError::Internal("invalid owner id".into()))?,
        airtable_base_id: row.airtable_base_id,
        airtable_table_id: row.airtable_table_id,
        airtable_view_id: row.airtable_view_id,
        sheets_spreadsheet_id: row.sheets_spreadsheet_id,
        sheets_sheet_id: row.sheets_sheet_id,
        sheets_sheet_name: row.sheets_sheet_name,
        field_mapping,
        direction: enum_from_db::<SyncDirection>(&row.direction)?,
        conflict_policy: enum_from_db::<ConflictPolicy>(&row.conflict_policy)?,
        delete_extra_records: row.delete_extra_records,
        delete_extra_rows: row.delete_extra_rows,
        active: row.active,
        last_sync_at: row.last_sync_at.as_deref().map(parse_datetime).transpose()?,
        last_sync_outcome: row
            .last_sync_outcome
            .as_deref()
            .map(enum_from_db::<SyncConfigOutcome>)
            .transpose()?,
        last_error_at: row.last_error_at.as_deref().map(parse_datetime).transpose()?,
        last_error_message: row.last_error_message,
    })
}

fn config_to_row(config: &SyncConfig) -> SyncConfigRow {
    SyncConfigRow {
        id: config.id.to_string(),
        owner_user_id: config.owner_user_id.to_string(),
        airtable_base_id: config.airtable_base_id.clone(),
        airtable_table_id: config.airtable_table_id.clone(),
        airtable_view_id: config.airtable_view_id.clone(),
        sheets_spreadsheet_id: config.sheets_spreadsheet_id.clone(),
        sheets_sheet_id: config.sheets_sheet_id,
        sheets_sheet_name: config.sheets_sheet_name.clone(),
        field_mapping_json: serde_json::to_string(&config.field_mapping).unwrap_or_default(),
        direction: enum_to_db(&config.direction),
        conflict_policy: enum_to_db(&config.conflict_policy),
        delete_extra_records: config.delete_extra_records,
        delete_extra_rows: config.delete_extra_rows,
        active: config.active,
        last_sync_at: config.last_sync_at.map(|t| t.to_rfc3339()),
        last_sync_outcome: config.last_sync_outcome.map(|o| enum_to_db(&o)),
        last_error_at: config.last_error_at.map(|t| t.to_rfc3339()),
        last_error_message: config.last_error_message.clone(),
    }
}
