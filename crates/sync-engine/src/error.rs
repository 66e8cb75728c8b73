//! Run-level error taxonomy (§7). Record-level failures never surface as
//! an `EngineError` — they're collected into `RunOutcome::errors` instead;
//! this enum is only for failures that abort a run before it can produce a
//! result, grounded on the teacher's `DeviceSyncError` split between
//! recoverable-per-item and run-aborting conditions.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Client(#[from] sync_clients::ClientError),

    #[error(transparent)]
    Credential(#[from] sync_credentials::CredentialError),

    #[error(transparent)]
    Mapping(#[from] sync_core::mapping::MappingError),

    #[error(transparent)]
    Link(#[from] sync_core::linking::LinkResolutionError),

    #[error(transparent)]
    Storage(#[from] sync_storage::StorageError),

    #[error("subscription required: plan is inactive or trial has expired")]
    SubscriptionRequired,

    #[error("monthly record limit reached for this plan")]
    LimitReached,

    #[error("a run for this sync config is already in progress")]
    ConcurrencyConflict,

    #[error("run exceeded its deadline")]
    Timeout,

    #[error("{0}")]
    Internal(String),
}

impl EngineError {
    /// Human-readable message safe to surface to an end user (§7).
    pub fn user_message(&self) -> String {
        match self {
            EngineError::Client(e) if matches!(e.retry_class(), sync_clients::RetryClass::ReauthRequired) => {
                "Authentication failed — please reconnect your account.".to_string()
            }
            EngineError::Credential(e) => e.user_message().to_string(),
            EngineError::SubscriptionRequired => {
                "Your subscription doesn't allow this sync to run right now.".to_string()
            }
            EngineError::LimitReached => {
                "This month's record limit has been reached for your plan.".to_string()
            }
            EngineError::ConcurrencyConflict => {
                "A sync for this configuration is already running.".to_string()
            }
            EngineError::Timeout => "The sync took too long and was stopped partway through.".to_string(),
            other => format!("An internal error occurred: {other}"),
        }
    }
}
