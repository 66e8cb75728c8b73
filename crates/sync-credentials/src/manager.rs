//! `CredentialManager::get_valid_token` — the sync engine's only way to
//! reach a live access token. Modeled on the teacher's `mint_access_token`
//! cache-then-refresh pattern, generalized to two services and backed by
//! an explicit store rather than module-level state.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use sync_core::model::{CredentialHealth, CredentialService};
use tokio::sync::{Mutex, RwLock};

use crate::crypto::Cipher;
use crate::error::{CredentialError, Result};
use crate::store::{CredentialRecord, CredentialStore, TokenPair};

/// Tokens with less than this much life left are treated as expired, to
/// absorb clock skew and in-flight request latency.
const EXPIRY_BUFFER: Duration = Duration::from_secs(5 * 60);

#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(&self, refresh_token: &str) -> Result<TokenPair>;
}

#[derive(Clone)]
struct CachedToken {
    access_token: String,
    expires_at_instant: Instant,
}

type CacheKey = (uuid::Uuid, CredentialService);

pub struct CredentialManager {
    store: Arc<dyn CredentialStore>,
    refreshers: HashMap<CredentialService, Arc<dyn TokenRefresher>>,
    cipher: Cipher,
    cache: RwLock<HashMap<CacheKey, CachedToken>>,
    /// One lock per {user, service} so concurrent callers never trigger
    /// two refreshes for the same credential.
    refresh_locks: Mutex<HashMap<CacheKey, Arc<Mutex<()>>>>,
}

impl CredentialManager {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        refreshers: HashMap<CredentialService, Arc<dyn TokenRefresher>>,
        encryption_key_hex: &str,
    ) -> Result<Self> {
        let cipher =
            Cipher::from_hex_key(encryption_key_hex).map_err(|e| CredentialError::Crypto(e.to_string()))?;
        Ok(Self {
            store,
            refreshers,
            cipher,
            cache: RwLock::new(HashMap::new()),
            refresh_locks: Mutex::new(HashMap::new()),
        })
    }

    async fn key_lock(&self, key: CacheKey) -> Arc<Mutex<()>> {
        let mut locks = self.refresh_locks.lock().await;
        locks.entry(key).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    /// Returns a live access token, refreshing if necessary.
    pub async fn get_valid_token(
        &self,
        user_id: uuid::Uuid,
        service: CredentialService,
    ) -> Result<String> {
        let key = (user_id, service);

        if let Some(cached) = self.cache.read().await.get(&key) {
            if cached.expires_at_instant > Instant::now() {
                return Ok(cached.access_token.clone());
            }
        }

        let lock = self.key_lock(key).await;
        let _guard = lock.lock().await;

        // Double-check: another caller may have refreshed while we waited.
        if let Some(cached) = self.cache.read().await.get(&key) {
            if cached.expires_at_instant > Instant::now() {
                return Ok(cached.access_token.clone());
            }
        }

        let record = self
            .store
            .get(user_id, service)
            .await?
            .ok_or(CredentialError::NotFound)?;

        if record.needs_reauth {
            return Err(CredentialError::ReauthRequired(
                record
                    .last_refresh_error
                    .unwrap_or_else(|| "reauthorization previously required".into()),
            ));
        }

        if record.expires_at > chrono::Utc::now() + chrono::Duration::from_std(EXPIRY_BUFFER).unwrap() {
            let access_token = self
                .cipher
                .decrypt(&record.encrypted_access_token)
                .map_err(|e| CredentialError::Crypto(e.to_string()))?;
            self.cache_token(key, &access_token, record.expires_at).await;
            return Ok(access_token);
        }

        self.refresh(user_id, service, record).await
    }

    async fn refresh(
        &self,
        user_id: uuid::Uuid,
        service: CredentialService,
        record: CredentialRecord,
    ) -> Result<String> {
        let refresher = self
            .refreshers
            .get(&service)
            .expect("a refresher must be registered for every CredentialService");

        let refresh_token = self
            .cipher
            .decrypt(&record.encrypted_refresh_token)
            .map_err(|e| CredentialError::Crypto(e.to_string()))?;

        match refresher.refresh(&refresh_token).await {
            Ok(pair) => {
                let updated = CredentialRecord {
                    encrypted_access_token: self
                        .cipher
                        .encrypt(&pair.access_token)
                        .map_err(|e| CredentialError::Crypto(e.to_string()))?,
                    encrypted_refresh_token: self
                        .cipher
                        .encrypt(&pair.refresh_token)
                        .map_err(|e| CredentialError::Crypto(e.to_string()))?,
                    expires_at: pair.expires_at,
                    last_refresh_attempt_at: Some(chrono::Utc::now()),
                    last_refresh_error: None,
                    needs_reauth: false,
                    ..record
                };
                self.store.upsert(updated).await?;
                self.cache_token((user_id, service), &pair.access_token, pair.expires_at)
                    .await;
                Ok(pair.access_token)
            }
            Err(err) => {
                let reason = err.to_string();
                self.store
                    .mark_needs_reauth(user_id, service, &reason)
                    .await?;
                tracing::warn!(%user_id, ?service, error = %reason, "token refresh failed, reauth required");
                Err(CredentialError::ReauthRequired(reason))
            }
        }
    }

    async fn cache_token(
        &self,
        key: CacheKey,
        access_token: &str,
        expires_at: chrono::DateTime<chrono::Utc>,
    ) {
        let ttl = (expires_at - chrono::Utc::now() - chrono::Duration::from_std(EXPIRY_BUFFER).unwrap())
            .to_std()
            .unwrap_or(Duration::from_secs(0));
        self.cache.write().await.insert(
            key,
            CachedToken {
                access_token: access_token.to_string(),
                expires_at_instant: Instant::now() + ttl,
            },
        );
    }

    /// Operator escape hatch (§6): clear a latched reauth flag once the
    /// user has reconnected out-of-band.
    pub async fn clear_reauth_flag(&self, user_id: uuid::Uuid, service: CredentialService) -> Result<()> {
        self.store.clear_reauth_flag(user_id, service).await
    }

    pub async fn mark_needs_reauth(
        &self,
        user_id: uuid::Uuid,
        service: CredentialService,
        reason: &str,
    ) -> Result<()> {
        self.cache.write().await.remove(&(user_id, service));
        self.store.mark_needs_reauth(user_id, service, reason).await
    }

    /// Called by the OAuth callback collaborator once the authorization
    /// code has been exchanged (the code exchange itself is out of scope).
    pub async fn store_new_tokens(
        &self,
        user_id: uuid::Uuid,
        service: CredentialService,
        tokens: TokenPair,
        account_identifier: Option<String>,
    ) -> Result<()> {
        let record = CredentialRecord {
            user_id,
            service,
            encrypted_access_token: self
                .cipher
                .encrypt(&tokens.access_token)
                .map_err(|e| CredentialError::Crypto(e.to_string()))?,
            encrypted_refresh_token: self
                .cipher
                .encrypt(&tokens.refresh_token)
                .map_err(|e| CredentialError::Crypto(e.to_string()))?,
            expires_at: tokens.expires_at,
            last_refresh_attempt_at: None,
            last_refresh_error: None,
            needs_reauth: false,
            account_identifier,
        };
        self.cache.write().await.remove(&(user_id, service));
        self.store.upsert(record).await
    }

    pub async fn connection_status(
        &self,
        user_id: uuid::Uuid,
        service: CredentialService,
    ) -> Result<CredentialHealth> {
        match self.store.get(user_id, service).await? {
            None => Ok(CredentialHealth {
                service,
                connected: false,
                account_identifier: None,
                needs_reauth: false,
                expires_at: None,
                last_refresh_error: None,
                advice: None,
            }),
            Some(record) => Ok(CredentialHealth {
                service,
                connected: !record.needs_reauth,
                account_identifier: record.account_identifier.clone(),
                needs_reauth: record.needs_reauth,
                expires_at: Some(record.expires_at),
                last_refresh_error: record.last_refresh_error.clone(),
                advice: advice_for(&record),
            }),
        }
    }
}

fn advice_for(record: &CredentialRecord) -> Option<String> {
    if record.needs_reauth {
        return Some("Reconnect this account to resume syncing.".to_string());
    }
    if record.expires_at < chrono::Utc::now() + chrono::Duration::minutes(30) {
        return Some("This connection's token is about to expire; it will refresh automatically on next use.".to_string());
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    struct InMemoryStore {
        records: StdMutex<HashMap<CacheKey, CredentialRecord>>,
    }

    impl InMemoryStore {
        fn new() -> Self {
            Self {
                records: StdMutex::new(HashMap::new()),
            }
        }
    }

    #[async_trait]
    impl CredentialStore for InMemoryStore {
        async fn get(
            &self,
            user_id: uuid::Uuid,
            service: CredentialService,
        ) -> Result<Option<CredentialRecord>> {
            Ok(self.records.lock().unwrap().get(&(user_id, service)).cloned())
        }

        async fn upsert(&self, record: CredentialRecord) -> Result<()> {
            self.records
                .lock()
                .unwrap()
                .insert((record.user_id, record.service), record);
            Ok(())
        }

        async fn mark_needs_reauth(
            &self,
            user_id: uuid::Uuid,
            service: CredentialService,
            reason: &str,
        ) -> Result<()> {
            if let Some(record) = self.records.lock().unwrap().get_mut(&(user_id, service)) {
                record.needs_reauth = true;
                record.last_refresh_error = Some(reason.to_string());
            }
            Ok(())
        }

        async fn clear_reauth_flag(&self, user_id: uuid::Uuid, service: CredentialService) -> Result<()> {
            if let Some(record) = self.records.lock().unwrap().get_mut(&(user_id, service)) {
                record.needs_reauth = false;
            }
            Ok(())
        }
    }

    struct FailingRefresher;
    #[async_trait]
    impl TokenRefresher for FailingRefresher {
        async fn refresh(&self, _refresh_token: &str) -> Result<TokenPair> {
            Err(CredentialError::ReauthRequired("invalid_grant".into()))
        }
    }

    struct SucceedingRefresher;
    #[async_trait]
    impl TokenRefresher for SucceedingRefresher {
        async fn refresh(&self, _refresh_token: &str) -> Result<TokenPair> {
            Ok(TokenPair {
                access_token: "new-access".into(),
                refresh_token: "new-refresh".into(),
                expires_at: chrono::Utc::now() + chrono::Duration::hours(1),
            })
        }
    }

    fn key_hex() -> String {
        hex::encode([1u8; 32])
    }

    async fn manager_with(refresher: Arc<dyn TokenRefresher>) -> (CredentialManager, Arc<InMemoryStore>) {
        let store = Arc::new(InMemoryStore::new());
        let mut refreshers: HashMap<CredentialService, Arc<dyn TokenRefresher>> = HashMap::new();
        refreshers.insert(CredentialService::Airtable, refresher);
        let manager =
            CredentialManager::new(store.clone(), refreshers, &key_hex()).unwrap();
        (manager, store)
    }

    #[tokio::test]
    async fn fresh_token_returned_without_refresh() {
        let (manager, store) = manager_with(Arc::new(FailingRefresher)).await;
        let user_id = uuid::Uuid::new_v4();
        let cipher = Cipher::from_hex_key(&key_hex()).unwrap();
        store
            .upsert(CredentialRecord {
                user_id,
                service: CredentialService::Airtable,
                encrypted_access_token: cipher.encrypt("still-good").unwrap(),
                encrypted_refresh_token: cipher.encrypt("refresh").unwrap(),
                expires_at: chrono::Utc::now() + chrono::Duration::hours(1),
                last_refresh_attempt_at: None,
                last_refresh_error: None,
                needs_reauth: false,
                account_identifier: None,
            })
            .await
            .unwrap();

        let token = manager
            .get_valid_token(user_id, CredentialService::Airtable)
            .await
            .unwrap();
        assert_eq!(token, "still-good");
    }

    #[tokio::test]
    async fn expiring_token_triggers_refresh() {
        let (manager, store) = manager_with(Arc::new(SucceedingRefresher)).await;
        let user_id = uuid::Uuid::new_v4();
        let cipher = Cipher::from_hex_key(&key_hex()).unwrap();
        store
            .upsert(CredentialRecord {
                user_id,
                service: CredentialService::Airtable,
                encrypted_access_token: cipher.encrypt("about-to-expire").unwrap(),
                encrypted_refresh_token: cipher.encrypt("refresh").unwrap(),
                expires_at: chrono::Utc::now() + chrono::Duration::seconds(30),
                last_refresh_attempt_at: None,
                last_refresh_error: None,
                needs_reauth: false,
                account_identifier: None,
            })
            .await
            .unwrap();

        let token = manager
            .get_valid_token(user_id, CredentialService::Airtable)
            .await
            .unwrap();
        assert_eq!(token, "new-access");
    }

    #[tokio::test]
    async fn failed_refresh_marks_needs_reauth() {
        let (manager, store) = manager_with(Arc::new(FailingRefresher)).await;
        let user_id = uuid::Uuid::new_v4();
        let cipher = Cipher::from_hex_key(&key_hex()).unwrap();
        store
            .upsert(CredentialRecord {
                user_id,
                service: CredentialService::Airtable,
                encrypted_access_token: cipher.encrypt("expired").unwrap(),
                encrypted_refresh_token: cipher.encrypt("refresh").unwrap(),
                expires_at: chrono::Utc::now() - chrono::Duration::seconds(1),
                last_refresh_attempt_at: None,
                last_refresh_error: None,
                needs_reauth: false,
                account_identifier: None,
            })
            .await
            .unwrap();

        let result = manager
            .get_valid_token(user_id, CredentialService::Airtable)
            .await;
        assert!(matches!(result, Err(CredentialError::ReauthRequired(_))));

        let status = manager
            .connection_status(user_id, CredentialService::Airtable)
            .await
            .unwrap();
        assert!(status.needs_reauth);
    }

    #[tokio::test]
    async fn missing_credential_is_not_found() {
        let (manager, _store) = manager_with(Arc::new(FailingRefresher)).await;
        let result = manager
            .get_valid_token(uuid::Uuid::new_v4(), CredentialService::Airtable)
            .await;
        assert!(matches!(result, Err(CredentialError::NotFound)));
    }
}
