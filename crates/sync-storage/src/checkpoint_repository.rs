//! Per-`SyncConfig` checkpoint storage (§3, §9 "move it behind a
//! read-modify-write interface backed by the same store as SyncConfig" —
//! the re-architecture away from the source's in-memory-only map).

use std::sync::Arc;

use diesel::prelude::*;

use sync_core::model::Checkpoint;

use crate::db::{get_connection, SqlitePool, WriteHandle};
use crate::errors::{Result, StorageError};
use crate::models::CheckpointEntryRow;
use crate::schema::checkpoint_entries;
use crate::util::parse_datetime;

pub struct CheckpointRepository {
    pool: Arc<SqlitePool>,
    writer: WriteHandle,
}

impl CheckpointRepository {
    pub fn new(pool: Arc<SqlitePool>, writer: WriteHandle) -> Self {
        Self { pool, writer }
    }

    /// Missing checkpoint is returned as empty (§3: "recreated from empty
    /// if missing").
    pub fn load(&self, sync_config_id: uuid::Uuid) -> Result<Checkpoint> {
        let mut conn = get_connection(&self.pool)?;
        let rows = checkpoint_entries::table
            .filter(checkpoint_entries::sync_config_id.eq(sync_config_id.to_string()))
            .load::<CheckpointEntryRow>(&mut conn)
            .map_err(StorageError::from)?;

        let mut checkpoint = Checkpoint::empty();
        for row in rows {
            let captured_at = parse_datetime(&row.captured_at)?;
            checkpoint.set(row.record_id, row.content_hash, captured_at);
        }
        Ok(checkpoint)
    }

    /// Replaces the entire checkpoint for this config with `checkpoint`,
    /// matching §3's invariant that the checkpoint covers *exactly* the
    /// records that existed at last-sync completion — stale entries for
    /// records no longer present must not linger.
    pub async fn replace(&self, sync_config_id: uuid::Uuid, checkpoint: Checkpoint) -> Result<()> {
        let sync_config_id_str = sync_config_id.to_string();
        let rows: Vec<CheckpointEntryRow> = checkpoint
            .entries
            .into_iter()
            .map(|(record_id, entry)| CheckpointEntryRow {
                sync_config_id: sync_config_id_str.clone(),
                record_id,
                content_hash: entry.content_hash,
                captured_at: entry.captured_at.to_rfc3339(),
            })
            .collect();

        self.writer
            .exec(move |conn| {
                conn.transaction(|conn| {
                    diesel::delete(
                        checkpoint_entries::table
                            .filter(checkpoint_entries::sync_config_id.eq(&sync_config_id_str)),
                    )
                    .execute(conn)?;
                    if !rows.is_empty() {
                        diesel::insert_into(checkpoint_entries::table)
                            .values(&rows)
                            .execute(conn)?;
                    }
                    Ok::<_, diesel::result::Error>(())
                })
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

    async fn test_repo() -> (CheckpointRepository, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.sqlite");
        let url = path.to_str().unwrap().to_string();
        let pool = build_pool(&url).unwrap();
        run_migrations(&pool).unwrap();
        let writer = WriteHandle::spawn(&url).unwrap();
        (CheckpointRepository::new(pool, writer), dir)
    }

    #[tokio::test]
    async fn missing_checkpoint_loads_empty() {
        let (repo, _dir) = test_repo().await;
        let checkpoint = repo.load(uuid::Uuid::new_v4()).unwrap();
        assert!(checkpoint.entries.is_empty());
    }

    #[tokio::test]
    async fn replace_covers_exactly_the_given_records() {
        let (repo, _dir) = test_repo().await;
        let config_id = uuid::Uuid::new_v4();

        let mut first = Checkpoint::empty();
        first.set("r1".into(), "h1".into(), chrono::Utc::now());
        first.set("r2".into(), "h2".into(), chrono::Utc::now());
        repo.replace(config_id, first).await.unwrap();

        let mut second = Checkpoint::empty();
        second.set("r1".into(), "h1-updated".into(), chrono::Utc::now());
        repo.replace(config_id, second).await.unwrap();

        let loaded = repo.load(config_id).unwrap();
        assert_eq!(loaded.entries.len(), 1);
        assert_eq!(loaded.get("r1").unwrap().content_hash, "h1-updated");
        assert!(loaded.get("r2").is_none());
    }
}
