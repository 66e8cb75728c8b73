//! Error types for the credential manager.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CredentialError>;

/// Retry policy class, mirrored in shape from the external-client crate so
/// the scheduler can match on it without depending on that crate directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    Retryable,
    Permanent,
    ReauthRequired,
}

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("no credential stored for this user/service")]
    NotFound,

    #[error("refresh failed, reauthorization required: {0}")]
    ReauthRequired(String),

    #[error("token refresh request failed: {0}")]
    RefreshHttp(#[from] reqwest::Error),

    #[error("encryption failure: {0}")]
    Crypto(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl CredentialError {
    pub fn retry_class(&self) -> RetryClass {
        match self {
            CredentialError::ReauthRequired(_) => RetryClass::ReauthRequired,
            CredentialError::RefreshHttp(_) => RetryClass::Retryable,
            CredentialError::NotFound | CredentialError::Crypto(_) | CredentialError::Storage(_) => {
                RetryClass::Permanent
            }
        }
    }

    /// Human-readable message safe to surface to an end user, distinct
    /// from the internal diagnostic `Display` used in logs.
    pub fn user_message(&self) -> &'static str {
        match self {
            CredentialError::ReauthRequired(_) => {
                "Authentication failed — please reconnect your account."
            }
            CredentialError::RefreshHttp(_) => "Could not reach the authentication service.",
            CredentialError::NotFound => "This account is not connected yet.",
            CredentialError::Crypto(_) | CredentialError::Storage(_) => {
                "An internal error occurred. Please try again."
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reauth_required_classifies_correctly() {
        let err = CredentialError::ReauthRequired("invalid_grant".into());
        assert_eq!(err.retry_class(), RetryClass::ReauthRequired);
        assert!(err.user_message().contains("reconnect"));
    }
}
