//! Inbound operations over credentials (§6): storing freshly-exchanged
//! tokens, reading connection status, running the diagnostics snapshot,
//! and the operator escape hatch that clears a latched reauth flag.
//! Grounded on the teacher's `store_sync_session` / `get_sync_session_status`
//! handlers (`apps/server/src/api/connect.rs`), generalized from one
//! hardcoded cloud session to the two-service `CredentialService` enum.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use sync_core::model::{CredentialHealth, CredentialService};
use sync_credentials::TokenPair;

use crate::error::ApiResult;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreTokensRequest {
    pub user_id: uuid::Uuid,
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in_secs: i64,
    pub account_identifier: Option<String>,
}

/// `Store new tokens(user, service, {access, refresh, expiry, account})`
/// — invoked after the OAuth callback collaborator (out of scope per §1)
/// verifies PKCE and exchanges the authorization code.
async fn store_tokens(
    State(state): State<Arc<AppState>>,
    Path(service): Path<CredentialService>,
    Json(body): Json<StoreTokensRequest>,
) -> ApiResult<Json<()>> {
    let tokens = TokenPair {
        access_token: body.access_token,
        refresh_token: body.refresh_token,
        expires_at: chrono::Utc::now() + chrono::Duration::seconds(body.expires_in_secs.max(60)),
    };
    state
        .credentials
        .store_new_tokens(body.user_id, service, tokens, body.account_identifier)
        .await?;
    Ok(Json(()))
}

#[derive(Debug, Deserialize)]
pub struct UserQuery {
    pub user_id: uuid::Uuid,
}

/// `Get connection status(user, service)`.
async fn connection_status(
    State(state): State<Arc<AppState>>,
    Path(service): Path<CredentialService>,
    axum::extract::Query(query): axum::extract::Query<UserQuery>,
) -> ApiResult<Json<CredentialHealth>> {
    let health = state.credentials.connection_status(query.user_id, service).await?;
    Ok(Json(health))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticsResponse {
    pub airtable: CredentialHealth,
    pub sheets: CredentialHealth,
}

/// `Run diagnostics(user)` — a snapshot of both services' credential
/// health plus advice strings, never the decrypted token material itself
/// (§3: "credentials are never returned outside the engine in plaintext").
async fn diagnostics(
    State(state): State<Arc<AppState>>,
    axum::extract::Query(query): axum::extract::Query<UserQuery>,
) -> ApiResult<Json<DiagnosticsResponse>> {
    let airtable = state
        .credentials
        .connection_status(query.user_id, CredentialService::Airtable)
        .await?;
    let sheets = state
        .credentials
        .connection_status(query.user_id, CredentialService::Sheets)
        .await?;
    Ok(Json(DiagnosticsResponse { airtable, sheets }))
}

#[derive(Debug, Deserialize)]
pub struct ClearReauthRequest {
    pub user_id: uuid::Uuid,
}

/// `Clear reauth flags(user)` — operator escape hatch (§6).
async fn clear_reauth(
    State(state): State<Arc<AppState>>,
    Path(service): Path<CredentialService>,
    Json(body): Json<ClearReauthRequest>,
) -> ApiResult<Json<()>> {
    state.credentials.clear_reauth_flag(body.user_id, service).await?;
    Ok(Json(()))
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/connections/:service/tokens", post(store_tokens))
        .route("/connections/:service/status", get(connection_status))
        .route("/connections/:service/reauth", delete(clear_reauth))
        .route("/connections/diagnostics", get(diagnostics))
}
