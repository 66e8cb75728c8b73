//! HTTP-backed `TokenRefresher`s for the two external OAuth2 services.
//! Both providers speak the same `grant_type=refresh_token` form-POST
//! shape (RFC 6749 §6), so a single helper does the request and the two
//! public types differ only in endpoint and client credentials — the same
//! shape the REST clients in `sync-clients` use for their own calls, one
//! request builder per external surface rather than a shared generic one.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use crate::error::{CredentialError, Result};
use crate::manager::TokenRefresher;
use crate::store::TokenPair;

const REFRESH_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    /// Not every provider rotates the refresh token on every refresh;
    /// when absent, the caller keeps using the one it already has.
    #[serde(default)]
    refresh_token: Option<String>,
    expires_in: i64,
}

#[derive(Debug, Deserialize)]
struct TokenErrorResponse {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

async fn exchange_refresh_token(
    client: &Client,
    token_url: &str,
    client_id: &str,
    client_secret: &str,
    refresh_token: &str,
) -> Result<TokenPair> {
    let response = client
        .post(token_url)
        .form(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", client_id),
            ("client_secret", client_secret),
        ])
        .send()
        .await?;

    let status = response.status();
    let body = response.text().await.unwrap_or_default();

    if !status.is_success() {
        let reason = serde_json::from_str::<TokenErrorResponse>(&body)
            .map(|e| match e.error_description {
                Some(desc) => format!("{}: {desc}", e.error),
                None => e.error,
            })
            .unwrap_or(body);

        // OAuth2 invalid_grant is the canonical "refresh token is dead,
        // the user must reconnect" response; everything else (rate limit,
        // transient 5xx) is retried by the caller's own retry policy.
        if status.as_u16() == 400 || status.as_u16() == 401 {
            return Err(CredentialError::ReauthRequired(reason));
        }
        return Err(CredentialError::ReauthRequired(format!("{status}: {reason}")));
    }

    let parsed: TokenResponse = serde_json::from_str(&body)
        .map_err(|e| CredentialError::ReauthRequired(format!("unparseable token response: {e}")))?;

    Ok(TokenPair {
        access_token: parsed.access_token,
        refresh_token: parsed.refresh_token.unwrap_or_else(|| refresh_token.to_string()),
        expires_at: chrono::Utc::now() + chrono::Duration::seconds(parsed.expires_in.max(60)),
    })
}

/// Source A's OAuth2 token endpoint.
pub struct AirtableOAuthRefresher {
    client: Client,
    token_url: String,
    client_id: String,
    client_secret: String,
}

impl AirtableOAuthRefresher {
    pub fn new(client_id: String, client_secret: String) -> Self {
        Self {
            client: Client::builder().timeout(REFRESH_TIMEOUT).build().expect("reqwest client"),
            token_url: "https://airtable.com/oauth2/v1/token".to_string(),
            client_id,
            client_secret,
        }
    }

    #[cfg(test)]
    fn with_token_url(client_id: String, client_secret: String, token_url: String) -> Self {
        Self {
            client: Client::builder().timeout(REFRESH_TIMEOUT).build().expect("reqwest client"),
            token_url,
            client_id,
            client_secret,
        }
    }
}

#[async_trait]
impl TokenRefresher for AirtableOAuthRefresher {
    async fn refresh(&self, refresh_token: &str) -> Result<TokenPair> {
        exchange_refresh_token(&self.client, &self.token_url, &self.client_id, &self.client_secret, refresh_token).await
    }
}

/// Source B's OAuth2 token endpoint (Google's, shared by Sheets and Drive
/// scopes alike).
pub struct SheetsOAuthRefresher {
    client: Client,
    token_url: String,
    client_id: String,
    client_secret: String,
}

impl SheetsOAuthRefresher {
    pub fn new(client_id: String, client_secret: String) -> Self {
        Self {
            client: Client::builder().timeout(REFRESH_TIMEOUT).build().expect("reqwest client"),
            token_url: "https://oauth2.googleapis.com/token".to_string(),
            client_id,
            client_secret,
        }
    }

    #[cfg(test)]
    fn with_token_url(client_id: String, client_secret: String, token_url: String) -> Self {
        Self {
            client: Client::builder().timeout(REFRESH_TIMEOUT).build().expect("reqwest client"),
            token_url,
            client_id,
            client_secret,
        }
    }
}

#[async_trait]
impl TokenRefresher for SheetsOAuthRefresher {
    async fn refresh(&self, refresh_token: &str) -> Result<TokenPair> {
        exchange_refresh_token(&self.client, &self.token_url, &self.client_id, &self.client_secret, refresh_token).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpListener;

    /// Hand-rolled single-shot mock token endpoint, in the teacher's
    /// `start_mock_upload_server` style: a raw TCP listener on a scratch
    /// port that reads one HTTP request and replies with a fixed body,
    /// no `wiremock` dependency pulled in for a single-shot test double.
    fn start_mock_token_server(status_line: &str, body: &'static str) -> (String, std::thread::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind scratch port");
        let addr = listener.local_addr().unwrap();
        let status_line = status_line.to_string();
        let handle = std::thread::spawn(move || {
            if let Ok((mut stream, _)) = listener.accept() {
                let mut buf = [0u8; 4096];
                let _ = stream.read(&mut buf);
                let response = format!(
                    "HTTP/1.1 {status_line}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = stream.write_all(response.as_bytes());
            }
        });
        (format!("http://{addr}"), handle)
    }

    #[tokio::test]
    async fn successful_refresh_parses_token_response() {
        let (url, handle) = start_mock_token_server(
            "200 OK",
            r#"{"access_token":"new-access","refresh_token":"new-refresh","expires_in":3600}"#,
        );
        let refresher = AirtableOAuthRefresher::with_token_url("id".into(), "secret".into(), format!("{url}/token"));
        let pair = refresher.refresh("old-refresh").await.unwrap();
        assert_eq!(pair.access_token, "new-access");
        assert_eq!(pair.refresh_token, "new-refresh");
        handle.join().unwrap();
    }

    #[tokio::test]
    async fn missing_rotated_refresh_token_keeps_the_old_one() {
        let (url, handle) =
            start_mock_token_server("200 OK", r#"{"access_token":"new-access","expires_in":3600}"#);
        let refresher = SheetsOAuthRefresher::with_token_url("id".into(), "secret".into(), format!("{url}/token"));
        let pair = refresher.refresh("still-valid-refresh").await.unwrap();
        assert_eq!(pair.refresh_token, "still-valid-refresh");
        handle.join().unwrap();
    }

    #[tokio::test]
    async fn invalid_grant_maps_to_reauth_required() {
        let (url, handle) =
            start_mock_token_server("400 Bad Request", r#"{"error":"invalid_grant","error_description":"Token has been revoked."}"#);
        let refresher = AirtableOAuthRefresher::with_token_url("id".into(), "secret".into(), format!("{url}/token"));
        let err = refresher.refresh("dead-refresh").await.unwrap_err();
        assert!(matches!(err, CredentialError::ReauthRequired(_)));
        handle.join().unwrap();
    }
}
