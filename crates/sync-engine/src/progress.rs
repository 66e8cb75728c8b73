//! Progress reporting hook, generalized from the teacher's
//! `EventBusProgressReporter` (`apps/server/src/api/connect.rs`): the
//! engine itself only knows it should announce phase transitions, not who
//! is listening. The HTTP layer supplies the concrete reporter (typically
//! one that publishes to an SSE broker); tests use `NoopProgressReporter`.

use async_trait::async_trait;

use crate::RunOutcome;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    FetchSchema,
    FetchRecords,
    ResolveLinks,
    MapFields,
    DetectChanges,
    Write,
    UpdateCheckpoint,
}

impl SyncPhase {
    pub fn label(self) -> &'static str {
        match self {
            SyncPhase::FetchSchema => "fetching schema",
            SyncPhase::FetchRecords => "fetching records",
            SyncPhase::ResolveLinks => "resolving linked records",
            SyncPhase::MapFields => "mapping fields",
            SyncPhase::DetectChanges => "detecting changes",
            SyncPhase::Write => "writing changes",
            SyncPhase::UpdateCheckpoint => "updating checkpoint",
        }
    }
}

#[async_trait]
pub trait SyncProgressReporter: Send + Sync {
    async fn report_sync_start(&self, sync_config_id: uuid::Uuid);
    async fn report_progress(&self, sync_config_id: uuid::Uuid, phase: SyncPhase, detail: String);
    async fn report_sync_complete(&self, sync_config_id: uuid::Uuid, outcome: &RunOutcome);
}

/// Used by tests and by callers that don't need live progress updates.
pub struct NoopProgressReporter;

#[async_trait]
impl SyncProgressReporter for NoopProgressReporter {
    async fn report_sync_start(&self, _sync_config_id: uuid::Uuid) {}
    async fn report_progress(&self, _sync_config_id: uuid::Uuid, _phase: SyncPhase, _detail: String) {}
    async fn report_sync_complete(&self, _sync_config_id: uuid::Uuid, _outcome: &RunOutcome) {}
}
