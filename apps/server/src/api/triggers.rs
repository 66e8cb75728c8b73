//! `Manual trigger(syncConfigId)` and `Run initial sync(syncConfigId, dryRun?)`
//! (§6): the two synchronous trigger surfaces, both returning the
//! structured result shape §6 specifies. Also exposes the recent
//! `SyncLog` history for a config, since the manual-trigger result on its
//! own doesn't let a caller see runs dispatched by the scheduler.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use sync_core::model::{SyncDirection, SyncLog, SyncLogOutcome};
use sync_engine::{ConflictSummary, RunOutcome};

use crate::error::ApiResult;
use crate::state::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerResult {
    pub status: SyncLogOutcome,
    pub details: TriggerDetails,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub conflicts: Option<ConflictSummary>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerDetails {
    pub added: u32,
    pub updated: u32,
    pub deleted: u32,
    pub error_count: u32,
    pub duration_ms: i64,
    pub direction: SyncDirection,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub completed_at: chrono::DateTime<chrono::Utc>,
}

impl From<RunOutcome> for TriggerResult {
    fn from(outcome: RunOutcome) -> Self {
        TriggerResult {
            status: outcome.outcome,
            details: TriggerDetails {
                added: outcome.added,
                updated: outcome.updated,
                deleted: outcome.deleted,
                error_count: outcome.errors.len() as u32,
                duration_ms: (outcome.completed_at - outcome.started_at).num_milliseconds(),
                direction: outcome.direction,
                started_at: outcome.started_at,
                completed_at: outcome.completed_at,
            },
            errors: outcome.errors,
            warnings: outcome.warnings,
            conflicts: outcome.conflicts,
        }
    }
}

/// `Manual trigger(syncConfigId)`. Rejects with `Conflict` (mapped from
/// `EngineError::ConcurrencyConflict`) if a run for the same config
/// started within the last 5 minutes and hasn't recorded a completion.
async fn trigger_manual(
    State(state): State<Arc<AppState>>,
    Path(id): Path<uuid::Uuid>,
) -> ApiResult<Json<TriggerResult>> {
    let outcome = state.scheduler.trigger_manual(id).await?;
    Ok(Json(outcome.into()))
}

#[derive(Debug, Deserialize, Default)]
pub struct InitialSyncQuery {
    #[serde(default)]
    pub dry_run: bool,
}

/// `Run initial sync(syncConfigId, dryRun?)`. Same executor as every
/// other trigger source, but with `deleteExtraRows`/`deleteExtraRecords`
/// defaulted to true for this run, and optionally no writes at all.
async fn trigger_initial(
    State(state): State<Arc<AppState>>,
    Path(id): Path<uuid::Uuid>,
    axum::extract::Query(query): axum::extract::Query<InitialSyncQuery>,
) -> ApiResult<Json<TriggerResult>> {
    let outcome = state.scheduler.trigger_initial(id, query.dry_run).await?;
    Ok(Json(outcome.into()))
}

#[derive(Debug, Deserialize)]
pub struct ListLogsQuery {
    #[serde(default = "default_log_limit")]
    pub limit: i64,
}

fn default_log_limit() -> i64 {
    20
}

async fn list_sync_logs(
    State(state): State<Arc<AppState>>,
    Path(id): Path<uuid::Uuid>,
    axum::extract::Query(query): axum::extract::Query<ListLogsQuery>,
) -> ApiResult<Json<Vec<SyncLog>>> {
    let logs = state.storage.sync_logs.list_recent(id, query.limit)?;
    Ok(Json(logs))
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/sync-configs/:id/trigger", post(trigger_manual))
        .route("/sync-configs/:id/initial-sync", post(trigger_initial))
        .route("/sync-configs/:id/logs", get(list_sync_logs))
}
