//! Persistence-agnostic credential storage contract. `sync-storage`
//! implements this against SQLite; tests implement it in-memory.

use async_trait::async_trait;
use sync_core::model::CredentialService;

use crate::error::Result;

#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: chrono::DateTime<chrono::Utc>,
}

/// One row: at most one per {user, service}.
#[derive(Debug, Clone)]
pub struct CredentialRecord {
    pub user_id: uuid::Uuid,
    pub service: CredentialService,
    /// Ciphertext, never decrypted by the store itself.
    pub encrypted_access_token: String,
    pub encrypted_refresh_token: String,
    pub expires_at: chrono::DateTime<chrono::Utc>,
    pub last_refresh_attempt_at: Option<chrono::DateTime<chrono::Utc>>,
    pub last_refresh_error: Option<String>,
    pub needs_reauth: bool,
    pub account_identifier: Option<String>,
}

#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn get(
        &self,
        user_id: uuid::Uuid,
        service: CredentialService,
    ) -> Result<Option<CredentialRecord>>;

    async fn upsert(&self, record: CredentialRecord) -> Result<()>;

    async fn mark_needs_reauth(
        &self,
        user_id: uuid::Uuid,
        service: CredentialService,
        reason: &str,
    ) -> Result<()>;

    async fn clear_reauth_flag(&self, user_id: uuid::Uuid, service: CredentialService) -> Result<()>;
}
