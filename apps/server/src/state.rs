//! Shared application state, generalized from the teacher's `AppState`
//! (`apps/server/src/api/connect.rs`): every handler reaches the engine,
//! storage, and credential manager through one `Arc<AppState>` rather
//! than module-level globals (§9's "model the Credential Manager as a
//! service value passed explicitly").

use std::sync::Arc;

use sync_clients::{AirtableClient, SheetsClient};
use sync_core::EngineConfig;
use sync_credentials::CredentialManager;
use sync_engine::{Scheduler, SubscriptionGate};
use sync_storage::Storage;

use crate::events::EventBus;

pub struct AppState {
    pub storage: Arc<Storage>,
    pub credentials: Arc<CredentialManager>,
    pub airtable: Arc<AirtableClient>,
    pub sheets: Arc<SheetsClient>,
    pub config: Arc<EngineConfig>,
    pub scheduler: Arc<Scheduler>,
    pub events: EventBus,
    pub subscription_gate: Arc<dyn SubscriptionGate>,
}
