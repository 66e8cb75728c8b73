//! SQLite-backed `CredentialStore` (C1, §3, §6).

use std::sync::Arc;

use async_trait::async_trait;
use diesel::prelude::*;

use sync_core::model::CredentialService;
use sync_credentials::{CredentialRecord, CredentialStore, TokenPair};

use crate::db::{get_connection, SqlitePool, WriteHandle};
use crate::errors::StorageError;
use crate::models::CredentialRow;
use crate::schema::credentials;
use crate::util::{enum_from_db, enum_to_db, parse_datetime};

#[derive(Clone)]
pub struct CredentialRepository {
    pool: Arc<SqlitePool>,
    writer: WriteHandle,
}

impl CredentialRepository {
    pub fn new(pool: Arc<SqlitePool>, writer: WriteHandle) -> Self {
        Self { pool, writer }
    }
}

fn row_to_record(row: CredentialRow) -> sync_credentials::Result<CredentialRecord> {
    Ok(CredentialRecord {
        user_id: row
            .user_id
            .parse()
            .map_err(|_| sync_credentials::CredentialError::Storage("invalid user_id".into()))?,
        service: enum_from_db(&row.service)
            .map_err(|_| sync_credentials::CredentialError::Storage("invalid service".into()))?,
        encrypted_access_token: row.encrypted_access_token,
        encrypted_refresh_token: row.encrypted_refresh_token,
        expires_at: parse_datetime(&row.expires_at)
            .map_err(|_| sync_credentials::CredentialError::Storage("invalid expires_at".into()))?,
        last_refresh_attempt_at: row
            .last_refresh_attempt_at
            .as_deref()
            .map(parse_datetime)
            .transpose()
            .map_err(|_| sync_credentials::CredentialError::Storage("invalid timestamp".into()))?,
        last_refresh_error: row.last_refresh_error,
        needs_reauth: row.needs_reauth,
        account_identifier: row.account_identifier,
    })
}

fn record_to_row(record: &CredentialRecord) -> CredentialRow {
    CredentialRow {
        user_id: record.user_id.to_string(),
        service: enum_to_db(&record.service),
        encrypted_access_token: record.encrypted_access_token.clone(),
        encrypted_refresh_token: record.encrypted_refresh_token.clone(),
        expires_at: record.expires_at.to_rfc3339(),
        last_refresh_attempt_at: record.last_refresh_attempt_at.map(|t| t.to_rfc3339()),
        last_refresh_error: record.last_refresh_error.clone(),
        needs_reauth: record.needs_reauth,
        account_identifier: record.account_identifier.clone(),
    }
}

#[async_trait]
impl CredentialStore for CredentialRepository {
    async fn get(
        &self,
        user_id: uuid::Uuid,
        service: CredentialService,
    ) -> sync_credentials::Result<Option<CredentialRecord>> {
        let mut conn = get_connection(&self.pool)
            .map_err(|e| sync_credentials::CredentialError::Storage(e.to_string()))?;
        let row = credentials::table
            .find((user_id.to_string(), enum_to_db(&service)))
            .first::<CredentialRow>(&mut conn)
            .optional()
            .map_err(|e| sync_credentials::CredentialError::Storage(e.to_string()))?;
        row.map(row_to_record).transpose()
    }

    async fn upsert(&self, record: CredentialRecord) -> sync_credentials::Result<()> {
        let row = record_to_row(&record);
        self.writer
            .exec(move |conn| {
                diesel::insert_into(credentials::table)
                    .values(&row)
                    .on_conflict((credentials::user_id, credentials::service))
                    .do_update()
                    .set(&row)
                    .execute(conn)
                    .map_err(StorageError::from)?;
                Ok(())
            })
            .await
            .map_err(|e| sync_credentials::CredentialError::Storage(e.to_string()))
    }

    async fn mark_needs_reauth(
        &self,
        user_id: uuid::Uuid,
        service: CredentialService,
        reason: &str,
    ) -> sync_credentials::Result<()> {
        let reason = reason.to_string();
        let key = (user_id.to_string(), enum_to_db(&service));
        self.writer
            .exec(move |conn| {
                diesel::update(credentials::table.find(key))
                    .set((
                        credentials::needs_reauth.eq(true),
                        credentials::last_refresh_error.eq(Some(reason)),
                        credentials::last_refresh_attempt_at.eq(Some(chrono::Utc::now().to_rfc3339())),
                    ))
                    .execute(conn)
                    .map_err(StorageError::from)?;
                Ok(())
            })
            .await
            .map_err(|e| sync_credentials::CredentialError::Storage(e.to_string()))
    }

    async fn clear_reauth_flag(
        &self,
        user_id: uuid::Uuid,
        service: CredentialService,
    ) -> sync_credentials::Result<()> {
        let key = (user_id.to_string(), enum_to_db(&service));
        self.writer
            .exec(move |conn| {
                diesel::update(credentials::table.find(key))
                    .set(credentials::needs_reauth.eq(false))
                    .execute(conn)
                    .map_err(StorageError::from)?;
                Ok(())
            })
            .await
            .map_err(|e| sync_credentials::CredentialError::Storage(e.to_string()))
    }
}
