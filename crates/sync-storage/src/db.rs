//! Connection pool plus a single-writer actor.
//!
//! SQLite allows exactly one writer at a time; rather than let every
//! repository call fight over `SQLITE_BUSY`, all writes funnel through
//! one dedicated connection owned by a background task (`WriteHandle`),
//! mirroring the teacher's writer-actor split between `get_connection`
//! (pooled, read-only callers) and `WriteHandle::exec` (serialized
//! writes).

use std::sync::Arc;

use diesel::connection::SimpleConnection;
use diesel::r2d2::{ConnectionManager, Pool, PooledConnection};
use diesel::sqlite::SqliteConnection;
use diesel::Connection;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use tokio::sync::{mpsc, oneshot};

use crate::errors::{Result, StorageError};

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

pub type SqlitePool = Pool<ConnectionManager<SqliteConnection>>;

pub fn build_pool(database_url: &str) -> Result<Arc<SqlitePool>> {
    let manager = ConnectionManager::<SqliteConnection>::new(database_url);
    let pool = Pool::builder()
        .max_size(8)
        .build(manager)
        .map_err(|e| StorageError::Internal(format!("failed to build connection pool: {e}")))?;
    Ok(Arc::new(pool))
}

pub fn run_migrations(pool: &SqlitePool) -> Result<()> {
    let mut conn = pool.get()?;
    conn.run_pending_migrations(MIGRATIONS)
        .map_err(|e| StorageError::Migration(e.to_string()))?;
    Ok(())
}

pub fn get_connection(pool: &SqlitePool) -> Result<PooledConnection<ConnectionManager<SqliteConnection>>> {
    Ok(pool.get()?)
}

type WriteJob = Box<dyn FnOnce(&mut SqliteConnection) + Send + 'static>;

/// A handle to the background writer task. Cloning is cheap; all clones
/// share the same underlying SQLite connection and job queue.
#[derive(Clone)]
pub struct WriteHandle {
    sender: mpsc::UnboundedSender<WriteJob>,
}

impl WriteHandle {
    /// Spawns the writer actor with its own connection to `database_url`.
    /// `PRAGMA busy_timeout` absorbs brief contention from readers holding
    /// the pool's connections during a write.
    pub fn spawn(database_url: &str) -> Result<Self> {
        let mut conn = SqliteConnection::establish(database_url)
            .map_err(|e| StorageError::Internal(format!("writer connection failed: {e}")))?;
        conn.batch_execute("PRAGMA busy_timeout = 5000; PRAGMA journal_mode = WAL;")
            .map_err(StorageError::Database)?;

        let (sender, mut receiver) = mpsc::unbounded_channel::<WriteJob>();
        tokio::task::spawn_blocking(move || {
            while let Some(job) = receiver.blocking_recv() {
                job(&mut conn);
            }
        });

        Ok(Self { sender })
    }

    pub async fn exec<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut SqliteConnection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let job: WriteJob = Box::new(move |conn| {
            let result = f(conn);
            let _ = tx.send(result);
        });
        self.sender
            .send(job)
            .map_err(|_| StorageError::Internal("writer task has shut down".into()))?;
        rx.await
            .map_err(|_| StorageError::Internal("writer task dropped the response channel".into()))?
    }
}
