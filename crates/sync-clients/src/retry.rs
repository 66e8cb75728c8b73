//! Generic retry-with-backoff loop, generalized from the teacher's
//! `upload_snapshot_with_retry` (manual attempt counter + backoff-then-
//! continue) into something both REST clients can reuse per-call.

use crate::error::{ClientError, RetryClass, Result};
use crate::rate_limit::{backoff_delay, DEFAULT_BACKOFF_BASE, DEFAULT_BACKOFF_CAP, DEFAULT_MAX_RETRIES};

pub async fn with_retry<F, Fut, T>(mut attempt_fn: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut attempt = 0u32;
    loop {
        match attempt_fn().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                let retryable = matches!(err.retry_class(), RetryClass::Retryable);
                if !retryable || attempt >= DEFAULT_MAX_RETRIES {
                    return Err(err);
                }
                let delay = backoff_delay(attempt, DEFAULT_BACKOFF_BASE, DEFAULT_BACKOFF_CAP);
                tracing::debug!(attempt, delay_ms = delay.as_millis() as u64, error = %err, "retrying after transient error");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

/// Wraps a transport-level `reqwest::Error` the same way the teacher's
/// client funnels both send errors and non-2xx bodies through one error
/// type before deciding whether to retry.
pub fn network_error(err: reqwest::Error) -> ClientError {
    ClientError::Network(err)
}
