//! Bounded retry for remote calls.
//!
//! Transient connectivity issues should not surface as user failures on
//! read-heavy calls, so every remote call runs through this wrapper:
//! up to three attempts with a 1s/2s/4s backoff schedule. Permanent
//! failures (any 4xx) are rethrown immediately.

use crate::api::ApiError;
use std::future::Future;
use std::time::Duration;

/// Maximum number of attempts per call.
pub const MAX_ATTEMPTS: usize = 3;

/// Backoff schedule; entry `n` is slept after failed attempt `n + 1`.
const BACKOFF: [Duration; 3] = [
    Duration::from_secs(1),
    Duration::from_secs(2),
    Duration::from_secs(4),
];

/// Run `call` until it succeeds, fails permanently, or runs out of
/// attempts. The final error is returned as-is.
pub async fn send_with_retry<T, F, Fut>(operation: &str, mut call: F) -> Result<T, ApiError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ApiError>>,
{
    let mut attempt = 0;

    loop {
        attempt += 1;

        match call().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < MAX_ATTEMPTS => {
                let delay = BACKOFF[attempt - 1];
                tracing::debug!(
                    operation,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "retrying after transient failure"
                );
                tokio::time::sleep(delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}
