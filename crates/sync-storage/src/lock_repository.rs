//! Per-`SyncConfig` advisory lock (§5: "at most one cycle runs per config
//! at any time"), grounded on the teacher's cycle-lock pattern in
//! `AppSyncRepository::acquire_cycle_lock`/`verify_cycle_lock` — an
//! optimistic lock keyed by a monotonically increasing `lock_version`
//! rather than a session-held database lock, so a crashed worker can't
//! wedge a config forever.

use std::sync::Arc;

use diesel::prelude::*;

use crate::db::{get_connection, SqlitePool, WriteHandle};
use crate::errors::{Result, StorageError};
use crate::models::SyncRunLockRow;
use crate::schema::sync_run_locks;

pub struct LockRepository {
    pool: Arc<SqlitePool>,
    writer: WriteHandle,
}

/// A held lock carries the version it was acquired at, so `release` can
/// verify nobody else took over (e.g. after a stale-lock reclaim raced us).
#[derive(Debug, Clone, Copy)]
pub struct CycleLockGuard {
    pub sync_config_id: uuid::Uuid,
    pub lock_version: i64,
}

impl LockRepository {
    pub fn new(pool: Arc<SqlitePool>, writer: WriteHandle) -> Self {
        Self { pool, writer }
    }

    /// Attempts to acquire the lock for `sync_config_id`. Succeeds if no
    /// row exists yet, or if the existing row has no `started_at` (clean),
    /// or if `started_at` is older than `stale_after` (previous holder
    /// presumed crashed). Returns `None` if another run currently holds it.
    pub async fn acquire(
        &self,
        sync_config_id: uuid::Uuid,
        stale_after: chrono::Duration,
    ) -> Result<Option<CycleLockGuard>> {
        let id_str = sync_config_id.to_string();
        self.writer
            .exec(move |conn| {
                conn.transaction(|conn| {
                    let existing = sync_run_locks::table
                        .find(&id_str)
                        .first::<SyncRunLockRow>(conn)
                        .optional()?;

                    let now = chrono::Utc::now();
                    let stale_cutoff = now - stale_after;

                    let (next_version, held) = match &existing {
                        None => (0i64, false),
                        Some(row) => {
                            let holder_active = match &row.started_at {
                                None => false,
                                Some(started_at) => {
                                    let started =
                                        chrono::DateTime::parse_from_rfc3339(started_at)
                                            .map(|dt| dt.with_timezone(&chrono::Utc))
                                            .unwrap_or(now);
                                    row.completed_at.is_none() && started > stale_cutoff
                                }
                            };
                            (row.lock_version + 1, holder_active)
                        }
                    };

                    if held {
                        return Ok::<_, diesel::result::Error>(None);
                    }

                    let row = SyncRunLockRow {
                        sync_config_id: id_str.clone(),
                        lock_version: next_version,
                        started_at: Some(now.to_rfc3339()),
                        completed_at: None,
                    };
                    diesel::insert_into(sync_run_locks::table)
                        .values(&row)
                        .on_conflict(sync_run_locks::sync_config_id)
                        .do_update()
                        .set(&row)
                        .execute(conn)?;

                    Ok(Some(CycleLockGuard {
                        sync_config_id,
                        lock_version: next_version,
                    }))
                })
                .map_err(StorageError::from)
            })
            .await
    }

    /// Releases the lock, but only if `guard.lock_version` still matches
    /// the stored row — otherwise somebody else already reclaimed it as
    /// stale and this release must be a no-op.
    pub async fn release(&self, guard: CycleLockGuard) -> Result<()> {
        let id_str = guard.sync_config_id.to_string();
        let version = guard.lock_version;
        self.writer
            .exec(move |conn| {
                diesel::update(
                    sync_run_locks::table
                        .filter(sync_run_locks::sync_config_id.eq(&id_str))
                        .filter(sync_run_locks::lock_version.eq(version)),
                )
                .set(sync_run_locks::completed_at.eq(Some(chrono::Utc::now().to_rfc3339())))
                .execute(conn)
                .map_err(StorageError::from)?;
                Ok(())
            })
            .await
    }

    pub fn is_locked(&self, sync_config_id: uuid::Uuid, stale_after: chrono::Duration) -> Result<bool> {
        let mut conn = get_connection(&self.pool)?;
        let row = sync_run_locks::table
            .find(sync_config_id.to_string())
            .first::<SyncRunLockRow>(&mut conn)
            .optional()
            .map_err(StorageError::from)?;
        Ok(match row {
            None => false,
            Some(row) => match row.started_at {
                None => false,
                Some(started_at) => {
                    let started = chrono::DateTime::parse_from_rfc3339(&started_at)
                        .map(|dt| dt.with_timezone(&chrono::Utc))
                        .unwrap_or_else(|_| chrono::Utc::now());
                    row.completed_at.is_none() && started > chrono::Utc::now() - stale_after
                }
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{build_pool, run_migrations, WriteHandle};

    async fn test_repo() -> (LockRepository, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.sqlite");
        let url = path.to_str().unwrap().to_string();
        let pool = build_pool(&url).unwrap();
        run_migrations(&pool).unwrap();
        let writer = WriteHandle::spawn(&url).unwrap();
        (LockRepository::new(pool, writer), dir)
    }

    #[tokio::test]
    async fn second_acquire_fails_while_held() {
        let (repo, _dir) = test_repo().await;
        let id = uuid::Uuid::new_v4();
        let guard = repo.acquire(id, chrono::Duration::minutes(5)).await.unwrap();
        assert!(guard.is_some());
        let second = repo.acquire(id, chrono::Duration::minutes(5)).await.unwrap();
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn acquire_succeeds_again_after_release() {
        let (repo, _dir) = test_repo().await;
        let id = uuid::Uuid::new_v4();
        let guard = repo.acquire(id, chrono::Duration::minutes(5)).await.unwrap().unwrap();
        repo.release(guard).await.unwrap();
        let reacquired = repo.acquire(id, chrono::Duration::minutes(5)).await.unwrap();
        assert!(reacquired.is_some());
    }

    #[tokio::test]
    async fn stale_lock_can_be_reclaimed() {
        let (repo, _dir) = test_repo().await;
        let id = uuid::Uuid::new_v4();
        repo.acquire(id, chrono::Duration::minutes(5)).await.unwrap();
        let reclaimed = repo.acquire(id, chrono::Duration::seconds(0)).await.unwrap();
        assert!(reclaimed.is_some());
    }

    #[tokio::test]
    async fn stale_release_after_reclaim_is_noop() {
        let (repo, _dir) = test_repo().await;
        let id = uuid::Uuid::new_v4();
        let first = repo.acquire(id, chrono::Duration::minutes(5)).await.unwrap().unwrap();
        let _second = repo.acquire(id, chrono::Duration::seconds(0)).await.unwrap().unwrap();
        repo.release(first).await.unwrap();
        assert!(repo.is_locked(id, chrono::Duration::minutes(5)).unwrap());
    }
}
