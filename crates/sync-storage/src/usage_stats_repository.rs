//! Monthly usage accounting (SPEC_FULL.md "Usage accounting" supplement):
//! the scheduler consults this before starting a cycle to enforce the
//! plan-tier record ceiling from §4.2's `PlanLimits`.

use std::sync::Arc;

use diesel::prelude::*;

use sync_core::model::UsageStats;

use crate::db::{get_connection, SqlitePool, WriteHandle};
use crate::errors::{Result, StorageError};
use crate::models::UsageStatsRow;
use crate::schema::usage_stats;

pub struct UsageStatsRepository {
    pool: Arc<SqlitePool>,
    writer: WriteHandle,
}

impl UsageStatsRepository {
    pub fn new(pool: Arc<SqlitePool>, writer: WriteHandle) -> Self {
        Self { pool, writer }
    }

    pub fn get(&self, user_id: uuid::Uuid, year_month: &str) -> Result<UsageStats> {
        let mut conn = get_connection(&self.pool)?;
        let row = usage_stats::table
            .find((user_id.to_string(), year_month.to_string()))
            .first::<UsageStatsRow>(&mut conn)
            .optional()
            .map_err(StorageError::from)?;
        Ok(row
            .map(|r| UsageStats {
                records_synced: r.records_synced as u64,
                sync_configs_created: r.sync_configs_created as u32,
            })
            .unwrap_or_else(UsageStats::zero))
    }

    /// Adds `records` to the current month's counter, creating the row if
    /// absent.
    pub async fn add_records_synced(
        &self,
        user_id: uuid::Uuid,
        year_month: String,
        records: u64,
    ) -> Result<()> {
        let user_id_str = user_id.to_string();
        self.writer
            .exec(move |conn| {
                diesel::insert_into(usage_stats::table)
                    .values(UsageStatsRow {
                        user_id: user_id_str.clone(),
                        year_month: year_month.clone(),
                        records_synced: records as i64,
                        sync_configs_created: 0,
                    })
                    .on_conflict((usage_stats::user_id, usage_stats::year_month))
                    .do_update()
                    .set(
                        usage_stats::records_synced
                            .eq(usage_stats::records_synced + records as i64),
                    )
                    .execute(conn)
                    .map_err(StorageError::from)?;
                Ok(())
            })
            .await
    }

    /// Increments the config-creation counter for `year_month`, backing the
    /// `PlanLimits::max_sync_configs` gate.
    pub async fn increment_configs_created(
        &self,
        user_id: uuid::Uuid,
        year_month: String,
    ) -> Result<()> {
        let user_id_str = user_id.to_string();
        self.writer
            .exec(move |conn| {
                diesel::insert_into(usage_stats::table)
                    .values(UsageStatsRow {
                        user_id: user_id_str.clone(),
                        year_month: year_month.clone(),
                        records_synced: 0,
                        sync_configs_created: 1,
                    })
                    .on_conflict((usage_stats::user_id, usage_stats::year_month))
                    .do_update()
                    .set(
                        usage_stats::sync_configs_created
                            .eq(usage_stats::sync_configs_created + 1),
                    )
                    .execute(conn)
                    .map_err(StorageError::from)?;
                Ok(())
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{build_pool, run_migrations, WriteHandle};

    async fn test_repo() -> (UsageStatsRepository, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.sqlite");
        let url = path.to_str().unwrap().to_string();
        let pool = build_pool(&url).unwrap();
        run_migrations(&pool).unwrap();
        let writer = WriteHandle::spawn(&url).unwrap();
        (UsageStatsRepository::new(pool, writer), dir)
    }

    #[tokio::test]
    async fn missing_row_reads_as_zero() {
        let (repo, _dir) = test_repo().await;
        let stats = repo.get(uuid::Uuid::new_v4(), "2026-07").unwrap();
        assert_eq!(stats.records_synced, 0);
    }

    #[tokio::test]
    async fn records_synced_accumulates() {
        let (repo, _dir) = test_repo().await;
        let user_id = uuid::Uuid::new_v4();
        repo.add_records_synced(user_id, "2026-07".into(), 100).await.unwrap();
        repo.add_records_synced(user_id, "2026-07".into(), 50).await.unwrap();
        let stats = repo.get(user_id, "2026-07").unwrap();
        assert_eq!(stats.records_synced, 150);
    }

    #[tokio::test]
    async fn months_are_independent() {
        let (repo, _dir) = test_repo().await;
        let user_id = uuid::Uuid::new_v4();
        repo.add_records_synced(user_id, "2026-06".into(), 900).await.unwrap();
        repo.add_records_synced(user_id, "2026-07".into(), 10).await.unwrap();
        assert_eq!(repo.get(user_id, "2026-06").unwrap().records_synced, 900);
        assert_eq!(repo.get(user_id, "2026-07").unwrap().records_synced, 10);
    }
}
