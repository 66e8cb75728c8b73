//! SQLite-backed persistence for the engine's data model (§3, §6): one
//! `Storage` facade that owns the pool and writer actor and hands out a
//! repository per entity, mirroring the teacher's `storage-sqlite` crate
//! layout (one repository module per aggregate, a shared `db` module for
//! pool/writer plumbing).

mod checkpoint_repository;
mod credentials_repository;
mod db;
mod errors;
mod lock_repository;
mod models;
mod schema;
mod sync_config_repository;
mod sync_log_repository;
mod usage_stats_repository;
mod util;

pub use checkpoint_repository::CheckpointRepository;
pub use credentials_repository::CredentialRepository;
pub use db::{build_pool, get_connection, run_migrations, SqlitePool, WriteHandle};
pub use errors::{Result, StorageError};
pub use lock_repository::{CycleLockGuard, LockRepository};
pub use sync_config_repository::SyncConfigRepository;
pub use sync_log_repository::SyncLogRepository;
pub use usage_stats_repository::UsageStatsRepository;

use std::sync::Arc;

/// Constructs the pool, spawns the writer actor, runs pending migrations,
/// and hands back every repository. The one entry point callers (the
/// engine, the HTTP server) need to bootstrap storage.
pub struct Storage {
    pub pool: Arc<SqlitePool>,
    pub writer: WriteHandle,
    pub credentials: CredentialRepository,
    pub sync_configs: SyncConfigRepository,
    pub sync_logs: SyncLogRepository,
    pub checkpoints: CheckpointRepository,
    pub usage_stats: UsageStatsRepository,
    pub locks: LockRepository,
}

impl Storage {
    pub fn connect(database_url: &str) -> Result<Self> {
        let pool = build_pool(database_url)?;
        run_migrations(&pool)?;
        let writer = WriteHandle::spawn(database_url)?;

        Ok(Self {
            credentials: CredentialRepository::new(pool.clone(), writer.clone()),
            sync_configs: SyncConfigRepository::new(pool.clone(), writer.clone()),
            sync_logs: SyncLogRepository::new(pool.clone(), writer.clone()),
            checkpoints: CheckpointRepository::new(pool.clone(), writer.clone()),
            usage_stats: UsageStatsRepository::new(pool.clone(), writer.clone()),
            locks: LockRepository::new(pool.clone(), writer.clone()),
            pool,
            writer,
        })
    }
}
