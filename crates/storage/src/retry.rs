//! Retry with exponential backoff for network operations.

use std::future::Future;
use std::time::Duration;

use crate::error::StorageError;
use crate::types::RetrySettings;

/// Run an operation, retrying transient failures.
///
/// The first attempt is followed by up to `settings.max_retries` retries,
/// so `max_retries + 1` attempts are made at most. After a retryable failure
/// the task sleeps for `retry_delay_ms * multiplier^attempt`, or for
/// `rate_limit_wait_ms` when the failure was a rate-limit response.
/// Non-retryable errors are returned immediately.
///
/// # Arguments
/// * `settings` - Retry policy
/// * `label` - Identifies the item in log messages
/// * `op` - Produces a fresh future for each attempt
pub async fn retry_with_backoff<T, F, Fut>(
    settings: &RetrySettings,
    label: &str,
    mut op: F,
) -> Result<T, StorageError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StorageError>>,
{
    let max_attempts: u32 = settings.max_retries.saturating_add(1);
    let mut attempt: u32 = 0;

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt + 1 < max_attempts => {
                let delay: Duration = settings.delay_for(attempt, &err);
                log::warn!(
                    "Attempt {}/{} for {} failed: {}; retrying in {}ms",
                    attempt + 1,
                    max_attempts,
                    label,
                    err,
                    delay.as_millis()
                );
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                attempt += 1;
            }
            Err(err) => {
                if err.is_retryable() {
                    log::warn!("Giving up on {} after {} attempts: {}", label, max_attempts, err);
                }
                return Err(err);
            }
        }
    }
}
