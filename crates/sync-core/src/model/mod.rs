//! The persisted data model: `SyncConfig`, `Credential` metadata,
//! `SyncLog`, `Checkpoint`, `UsageStats`.

mod checkpoint;
mod credential;
mod sync_config;
mod sync_log;
mod usage_stats;

pub use checkpoint::{Checkpoint, CheckpointEntry};
pub use credential::{CredentialHealth, CredentialService};
pub use sync_config::{ConflictPolicy, FieldMapping, SyncConfig, SyncConfigOutcome, SyncDirection};
pub use sync_log::{SyncLog, SyncLogOutcome, SyncTrigger};
pub use usage_stats::UsageStats;
