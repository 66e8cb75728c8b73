//! `Create / update / delete SyncConfig(fields per §3)` — invoked by the
//! config editor (out of scope itself, §1), which only ever talks to the
//! engine through these four operations.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::Deserialize;

use sync_core::model::{ConflictPolicy, FieldMapping, SyncConfig, SyncDirection};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSyncConfigRequest {
    pub owner_user_id: uuid::Uuid,
    pub airtable_base_id: String,
    pub airtable_table_id: String,
    pub airtable_view_id: Option<String>,
    pub sheets_spreadsheet_id: String,
    pub sheets_sheet_id: i64,
    pub sheets_sheet_name: String,
    pub field_mapping: FieldMapping,
    pub direction: SyncDirection,
    pub conflict_policy: ConflictPolicy,
    #[serde(default)]
    pub delete_extra_records: bool,
    #[serde(default)]
    pub delete_extra_rows: bool,
}

async fn create_sync_config(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateSyncConfigRequest>,
) -> ApiResult<Json<SyncConfig>> {
    let config = SyncConfig {
        id: uuid::Uuid::new_v4(),
        owner_user_id: body.owner_user_id,
        airtable_base_id: body.airtable_base_id,
        airtable_table_id: body.airtable_table_id,
        airtable_view_id: body.airtable_view_id,
        sheets_spreadsheet_id: body.sheets_spreadsheet_id,
        sheets_sheet_id: body.sheets_sheet_id,
        sheets_sheet_name: body.sheets_sheet_name,
        field_mapping: body.field_mapping,
        direction: body.direction,
        conflict_policy: body.conflict_policy,
        delete_extra_records: body.delete_extra_records,
        delete_extra_rows: body.delete_extra_rows,
        active: true,
        last_sync_at: None,
        last_sync_outcome: None,
        last_error_at: None,
        last_error_message: None,
    };
    state.storage.sync_configs.create(config.clone()).await?;
    Ok(Json(config))
}

async fn get_sync_config(
    State(state): State<Arc<AppState>>,
    Path(id): Path<uuid::Uuid>,
) -> ApiResult<Json<SyncConfig>> {
    let config = state.storage.sync_configs.get(id)?.ok_or(ApiError::NotFound)?;
    Ok(Json(config))
}

#[derive(Debug, Deserialize)]
pub struct ListSyncConfigsQuery {
    pub owner_user_id: uuid::Uuid,
}

async fn list_sync_configs(
    State(state): State<Arc<AppState>>,
    axum::extract::Query(query): axum::extract::Query<ListSyncConfigsQuery>,
) -> ApiResult<Json<Vec<SyncConfig>>> {
    let configs = state.storage.sync_configs.list_for_owner(query.owner_user_id)?;
    Ok(Json(configs))
}

/// §3 invariant: "direction is immutable once created (edit produces an
/// effective-new config)". An update request that changes `direction`
/// is rejected outright rather than silently applied — the caller must
/// create a new `SyncConfig` instead.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateSyncConfigRequest {
    pub airtable_view_id: Option<String>,
    pub field_mapping: FieldMapping,
    pub direction: SyncDirection,
    pub conflict_policy: ConflictPolicy,
    pub delete_extra_records: bool,
    pub delete_extra_rows: bool,
    pub active: bool,
}

async fn update_sync_config(
    State(state): State<Arc<AppState>>,
    Path(id): Path<uuid::Uuid>,
    Json(body): Json<UpdateSyncConfigRequest>,
) -> ApiResult<Json<SyncConfig>> {
    let existing = state.storage.sync_configs.get(id)?.ok_or(ApiError::NotFound)?;
    let existing = existing
        .with_direction_unchanged(body.direction)
        .map_err(ApiError::BadRequest)?;

    let updated = SyncConfig {
        airtable_view_id: body.airtable_view_id,
        field_mapping: body.field_mapping,
        conflict_policy: body.conflict_policy,
        delete_extra_records: body.delete_extra_records,
        delete_extra_rows: body.delete_extra_rows,
        active: body.active,
        ..existing
    };

    state.storage.sync_configs.update(updated.clone()).await?;
    Ok(Json(updated))
}

async fn delete_sync_config(State(state): State<Arc<AppState>>, Path(id): Path<uuid::Uuid>) -> ApiResult<Json<()>> {
    state.storage.sync_configs.delete_cascade(id).await?;
    Ok(Json(()))
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/sync-configs", post(create_sync_config).get(list_sync_configs))
        .route(
            "/sync-configs/:id",
            get(get_sync_config).put(update_sync_config).delete(delete_sync_config),
        )
}

