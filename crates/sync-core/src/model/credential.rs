use serde::{Deserialize, Serialize};

/// Which external service a credential belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialService {
    Airtable,
    Sheets,
}

/// Non-secret view of a credential's health, returned by diagnostics and
/// connection-status endpoints. Never carries token material.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialHealth {
    pub service: CredentialService,
    pub connected: bool,
    pub account_identifier: Option<String>,
    pub needs_reauth: bool,
    pub expires_at: Option<chrono::DateTime<chrono::Utc>>,
    pub last_refresh_error: Option<String>,
    pub advice: Option<String>,
}
