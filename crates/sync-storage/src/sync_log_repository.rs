//! Append-only `SyncLog` persistence with retention pruning (§3: "at most
//! the N most recent logs are retained per config").

use std::sync::Arc;

use diesel::prelude::*;

use sync_core::model::{SyncDirection, SyncLog, SyncLogOutcome, SyncTrigger};

use crate::db::{get_connection, SqlitePool, WriteHandle};
use crate::errors::{Result, StorageError};
use crate::models::SyncLogRow;
use crate::schema::sync_logs;
use crate::util::{enum_from_db, enum_to_db, parse_datetime};

pub struct SyncLogRepository {
    pool: Arc<SqlitePool>,
    writer: WriteHandle,
}

impl SyncLogRepository {
    pub fn new(pool: Arc<SqlitePool>, writer: WriteHandle) -> Self {
        Self { pool, writer }
    }

    /// Appends the log, then prunes anything past `SyncLog::RETENTION_LIMIT`
    /// for that config, oldest-first.
    pub async fn append(&self, log: SyncLog) -> Result<()> {
        let row = log_to_row(&log);
        let sync_config_id = log.sync_config_id.to_string();
        self.writer
            .exec(move |conn| {
                conn.transaction(|conn| {
                    diesel::insert_into(sync_logs::table).values(&row).execute(conn)?;

                    let ids: Vec<String> = sync_logs::table
                        .filter(sync_logs::sync_config_id.eq(&sync_config_id))
                        .order(sync_logs::started_at.desc())
                        .select(sync_logs::id)
                        .load(conn)?;

                    if ids.len() > SyncLog::RETENTION_LIMIT {
                        let stale = &ids[SyncLog::RETENTION_LIMIT..];
                        diesel::delete(sync_logs::table.filter(sync_logs::id.eq_any(stale)))
                            .execute(conn)?;
                    }
                    Ok::<_, diesel::result::Error>(())
                })
                .map_err(StorageError::from)?;
                Ok(())
            })
            .await
    }

    pub fn list_recent(&self, sync_config_id: uuid::Uuid, limit: i64) -> Result<Vec<SyncLog>> {
        let mut conn = get_connection(&self.pool)?;
        sync_logs::table
            .filter(sync_logs::sync_config_id.eq(sync_config_id.to_string()))
            .order(sync_logs::started_at.desc())
            .limit(limit)
            .load::<SyncLogRow>(&mut conn)
            .map_err(StorageError::from)?
            .into_iter()
            .map(row_to_log)
            .collect()
    }

    /// Is there an open run (started within the last 5 minutes, no
    /// completion recorded yet) — the basis of the per-config advisory
    /// lock described in §5, used as a fallback when the dedicated
    /// `sync_run_locks` row is unavailable.
    pub fn has_recent_log_within(
        &self,
        sync_config_id: uuid::Uuid,
        within: chrono::Duration,
    ) -> Result<bool> {
        let mut conn = get_connection(&self.pool)?;
        let cutoff = (chrono::Utc::now() - within).to_rfc3339();
        let count: i64 = sync_logs::table
            .filter(sync_logs::sync_config_id.eq(sync_config_id.to_string()))
            .filter(sync_logs::started_at.ge(cutoff))
            .count()
            .get_result(&mut conn)
            .map_err(StorageError::from)?;
        Ok(count > 0)
    }
}

fn log_to_row(log: &SyncLog) -> SyncLogRow {
    SyncLogRow {
        id: log.id.to_string(),
        sync_config_id: log.sync_config_id.to_string(),
        outcome: enum_to_db(&log.outcome),
        direction: enum_to_db(&log.direction),
        trigger_source: enum_to_db(&log.trigger),
        records_synced: log.records_synced as i32,
        records_failed: log.records_failed as i32,
        errors_json: serde_json::to_string(&log.errors).unwrap_or_default(),
        warnings_json: serde_json::to_string(&log.warnings).unwrap_or_default(),
        started_at: log.started_at.to_rfc3339(),
        completed_at: log.completed_at.to_rfc3339(),
    }
}

fn row_to_log(row: SyncLogRow) -> Result<SyncLog> {
    Ok(SyncLog {
        id: row.id.parse().map_err(|_| StorageError::Internal("invalid log id".into()))?,
        sync_config_id: row
            .sync_config_id
            .parse()
            .map_err(|_| StorageError::Internal("invalid sync_config_id".into()))?,
        outcome: enum_from_db::<SyncLogOutcome>(&row.outcome)?,
        direction: enum_from_db::<SyncDirection>(&row.direction)?,
        trigger: enum_from_db::<SyncTrigger>(&row.trigger_source)?,
        records_synced: row.records_synced as u32,
        records_failed: row.records_failed as u32,
        errors: serde_json::from_str(&row.errors_json).map_err(StorageError::from)?,
        warnings: serde_json::from_str(&row.warnings_json).map_err(StorageError::from)?,
        started_at: parse_datetime(&row.started_at)?,
        completed_at: parse_datetime(&row.completed_at)?,
    })
}
