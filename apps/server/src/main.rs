//! The HTTP surface binding C1-C7 together (§6 "Inbound operations" /
//! "Outbound surfaces"). Bootstraps storage, the credential manager, the
//! two external clients, and the scheduler, then serves the axum router
//! the teacher's `apps/server` builds the same way (`AppState` + a single
//! `axum::serve` call, `tower_http::trace` for request logging).

mod api;
mod error;
mod events;
mod state;

use std::collections::HashMap;
use std::sync::Arc;

use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use sync_clients::{AirtableClient, SheetsClient};
use sync_core::model::CredentialService;
use sync_core::EngineConfig;
use sync_credentials::{AirtableOAuthRefresher, CredentialManager, SheetsOAuthRefresher};
use sync_engine::{AlwaysAllow, RunContext, Scheduler};
use sync_storage::Storage;

use events::EventBus;
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = Arc::new(EngineConfig::from_env());
    let database_url = std::env::var("DATABASE_URL").unwrap_or_else(|_| "sync.db".to_string());

    let storage = Arc::new(Storage::connect(&database_url)?);

    let mut refreshers: HashMap<CredentialService, Arc<dyn sync_credentials::TokenRefresher>> = HashMap::new();
    refreshers.insert(
        CredentialService::Airtable,
        Arc::new(AirtableOAuthRefresher::new(
            config.airtable_client_id.clone(),
            config.airtable_client_secret.clone(),
        )),
    );
    refreshers.insert(
        CredentialService::Sheets,
        Arc::new(SheetsOAuthRefresher::new(
            config.sheets_client_id.clone(),
            config.sheets_client_secret.clone(),
        )),
    );

    let credentials = Arc::new(CredentialManager::new(
        Arc::new(storage.credentials.clone()),
        refreshers,
        &config.encryption_key_hex,
    )?);

    let airtable = Arc::new(AirtableClient::new("https://api.airtable.com"));
    let sheets = Arc::new(SheetsClient::new("https://sheets.googleapis.com"));

    let events = EventBus::new();
    let progress = Arc::new(events::EventBusProgressReporter::new(events.clone()));

    let ctx = RunContext::new(
        airtable.clone(),
        sheets.clone(),
        credentials.clone(),
        storage.clone(),
        config.clone(),
        progress,
    );

    let scheduler = Scheduler::new(ctx, Arc::new(AlwaysAllow));
    let scheduler_handle = scheduler.clone().spawn();

    let state = Arc::new(AppState {
        storage,
        credentials,
        airtable,
        sheets,
        config,
        scheduler,
        events,
        subscription_gate: Arc::new(AlwaysAllow),
    });

    let app = Router::new()
        .merge(api::router())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    let addr = std::env::var("SYNC_SERVER_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "sync server listening");

    axum::serve(listener, app).await?;

    scheduler_handle.shutdown().await;
    Ok(())
}
