//! Sync Executors (C6) and Scheduler & Trigger (C7): the orchestration
//! layer that composes `sync-core`'s pure algorithms with `sync-clients`,
//! `sync-credentials`, and `sync-storage` into the three directional runs
//! §4.6 specifies, plus the periodic/manual dispatch of §4.7.

pub mod context;
pub mod error;
pub mod executors;
pub mod id_column;
pub mod progress;
pub mod scheduler;

pub use context::RunContext;
pub use error::{EngineError, Result};
pub use executors::{ConflictSummary, RunOutcome};
pub use progress::{NoopProgressReporter, SyncPhase, SyncProgressReporter};
pub use scheduler::{AlwaysAllow, RunState, Scheduler, SchedulerHandle, SubscriptionGate};

use sync_core::model::{SyncConfig, SyncDirection, SyncTrigger};

/// Dispatches to the executor matching `config.direction` (§4.6's three
/// orchestrators). The single entry point the scheduler and the manual
/// trigger both call — neither needs to know which of the three phase
/// sequences actually ran.
pub async fn run_sync(
    ctx: &RunContext,
    config: &SyncConfig,
    trigger: SyncTrigger,
    dry_run: bool,
) -> Result<RunOutcome> {
    match config.direction {
        SyncDirection::AirtableToSheets => executors::a_to_b::run(ctx, config, trigger, dry_run).await,
        SyncDirection::SheetsToAirtable => executors::b_to_a::run(ctx, config, trigger, dry_run).await,
        SyncDirection::Bidirectional => executors::bidirectional::run(ctx, config, trigger, dry_run).await,
    }
}
