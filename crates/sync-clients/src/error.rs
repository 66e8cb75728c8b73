//! Error classification for the two outbound REST clients (§4.2, §7).
//! Mirrors the teacher's `DeviceSyncError`/`ApiRetryClass` split: a single
//! error enum with a `retry_class()` projection the executors consult to
//! decide whether to back off and retry or give up.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ClientError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    /// RATE_LIMIT / NETWORK: retry with exponential backoff + jitter.
    Retryable,
    /// VALIDATION and anything else not worth retrying.
    Permanent,
    /// OAUTH: credential must be flagged needs-reauth, run aborts.
    ReauthRequired,
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("transport error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("authentication failed ({status}): {message}")]
    Oauth { status: u16, message: String },

    #[error("rate limited ({status}): {message}")]
    RateLimit { status: u16, message: String },

    #[error("upstream validation error ({status}): {message}")]
    Validation { status: u16, message: String },

    #[error("unresolved link: {table_key} has no match for {count} name(s)")]
    UnresolvedLink { table_key: String, count: usize },

    #[error("upstream error ({status}): {message}")]
    Unknown { status: u16, message: String },

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ClientError {
    /// Classifies an HTTP status + body into the §4.2 taxonomy.
    pub fn from_status(status: u16, body: &str) -> Self {
        let lower = body.to_ascii_lowercase();
        match status {
            401 | 403 => ClientError::Oauth {
                status,
                message: body.to_string(),
            },
            429 => ClientError::RateLimit {
                status,
                message: body.to_string(),
            },
            _ if lower.contains("invalid_grant") => ClientError::Oauth {
                status,
                message: body.to_string(),
            },
            _ if lower.contains("quota") => ClientError::RateLimit {
                status,
                message: body.to_string(),
            },
            400 | 422 => ClientError::Validation {
                status,
                message: body.to_string(),
            },
            500..=599 => ClientError::Unknown {
                status,
                message: body.to_string(),
            },
            _ => ClientError::Unknown {
                status,
                message: body.to_string(),
            },
        }
    }

    pub fn retry_class(&self) -> RetryClass {
        match self {
            ClientError::Oauth { .. } => RetryClass::ReauthRequired,
            ClientError::RateLimit { .. } => RetryClass::Retryable,
            ClientError::Network(e) if e.is_timeout() || e.is_connect() => RetryClass::Retryable,
            ClientError::Network(_) => RetryClass::Retryable,
            ClientError::Validation { .. } => RetryClass::Permanent,
            ClientError::UnresolvedLink { .. } => RetryClass::Permanent,
            ClientError::Json(_) => RetryClass::Permanent,
            ClientError::Unknown { status, .. } if (500..=599).contains(status) => {
                RetryClass::Retryable
            }
            ClientError::Unknown { .. } => RetryClass::Permanent,
        }
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            ClientError::Oauth { status, .. }
            | ClientError::RateLimit { status, .. }
            | ClientError::Validation { status, .. }
            | ClientError::Unknown { status, .. } => Some(*status),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unauthorized_classifies_as_oauth() {
        let err = ClientError::from_status(401, "invalid token");
        assert_eq!(err.retry_class(), RetryClass::ReauthRequired);
    }

    #[test]
    fn too_many_requests_is_retryable() {
        let err = ClientError::from_status(429, "rate limited");
        assert_eq!(err.retry_class(), RetryClass::Retryable);
    }

    #[test]
    fn invalid_grant_message_overrides_status() {
        let err = ClientError::from_status(400, "error: invalid_grant");
        assert_eq!(err.retry_class(), RetryClass::ReauthRequired);
    }

    #[test]
    fn bad_request_is_permanent() {
        let err = ClientError::from_status(400, "missing field foo");
        assert_eq!(err.retry_class(), RetryClass::Permanent);
    }

    #[test]
    fn server_error_is_retryable() {
        let err = ClientError::from_status(503, "service unavailable");
        assert_eq!(err.retry_class(), RetryClass::Retryable);
    }
}
