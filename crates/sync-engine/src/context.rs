//! Everything one sync run needs, bundled once by the scheduler and handed
//! down to whichever executor the config's direction selects.

use std::sync::Arc;

use sync_clients::{AirtableClient, SheetsClient};
use sync_core::EngineConfig;
use sync_credentials::CredentialManager;
use sync_storage::Storage;

use crate::progress::SyncProgressReporter;

#[derive(Clone)]
pub struct RunContext {
    pub airtable: Arc<AirtableClient>,
    pub sheets: Arc<SheetsClient>,
    pub credentials: Arc<CredentialManager>,
    pub storage: Arc<Storage>,
    pub config: Arc<EngineConfig>,
    pub progress: Arc<dyn SyncProgressReporter>,
}

impl RunContext {
    pub fn new(
        airtable: Arc<AirtableClient>,
        sheets: Arc<SheetsClient>,
        credentials: Arc<CredentialManager>,
        storage: Arc<Storage>,
        config: Arc<EngineConfig>,
        progress: Arc<dyn SyncProgressReporter>,
    ) -> Self {
        Self {
            airtable,
            sheets,
            credentials,
            storage,
            config,
            progress,
        }
    }
}
