//! HTTP-facing error type (§7). Wraps every layer's error into one of a
//! small set of status codes, keeping the user-visible message distinct
//! from the internal diagnostic string the way §7 requires — the
//! internal string is logged, never serialized into the response body.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("not found")]
    NotFound,

    #[error("{0}")]
    BadRequest(String),

    #[error("subscription required")]
    SubscriptionRequired,

    #[error("concurrency conflict")]
    Conflict(String),

    #[error(transparent)]
    Engine(#[from] sync_engine::EngineError),

    #[error(transparent)]
    Credential(#[from] sync_credentials::CredentialError),

    #[error(transparent)]
    Storage(#[from] sync_storage::StorageError),

    #[error("{0}")]
    Internal(String),
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, user_message) = match &self {
            ApiError::NotFound => (StatusCode::NOT_FOUND, "Not found.".to_string()),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            ApiError::SubscriptionRequired => (
                StatusCode::PAYMENT_REQUIRED,
                "Your subscription doesn't allow this sync to run right now.".to_string(),
            ),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            ApiError::Engine(e) => (engine_status(e), e.user_message()),
            ApiError::Credential(e) => (StatusCode::BAD_GATEWAY, e.user_message().to_string()),
            ApiError::Storage(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "An internal error occurred. Please try again.".to_string(),
            ),
            ApiError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "An internal error occurred. Please try again.".to_string(),
            ),
        };

        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::warn!(error = %self, "request rejected");
        }

        (status, Json(ErrorBody { error: user_message })).into_response()
    }
}

fn engine_status(err: &sync_engine::EngineError) -> StatusCode {
    match err {
        sync_engine::EngineError::SubscriptionRequired => StatusCode::PAYMENT_REQUIRED,
        sync_engine::EngineError::ConcurrencyConflict => StatusCode::CONFLICT,
        sync_engine::EngineError::LimitReached => StatusCode::TOO_MANY_REQUESTS,
        sync_engine::EngineError::Timeout => StatusCode::GATEWAY_TIMEOUT,
        sync_engine::EngineError::Client(e)
            if matches!(e.retry_class(), sync_clients::RetryClass::ReauthRequired) =>
        {
            StatusCode::UNAUTHORIZED
        }
        sync_engine::EngineError::Credential(_) => StatusCode::UNAUTHORIZED,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
