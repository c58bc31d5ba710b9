//! Retry with exponential backoff.

use std::future::Future;

use log::debug;
use rusty_migrate_storage::{RetrySettings, StorageError};

/// Final error of a retried operation.
#[derive(Debug, Clone)]
pub(crate) struct RetryExhausted {
    /// Attempts made, including the first.
    pub attempts: u32,
    /// Error from the last attempt.
    pub error: StorageError,
}

/// Run `op` until it succeeds, returns a non-retryable error, or the
/// attempt budget in `settings` is spent.
///
/// # Arguments
/// * `settings` - Attempt budget and backoff curve
/// * `what` - Operation description for logs
/// * `op` - Produces one attempt
pub(crate) async fn with_backoff<T, F, Fut>(
    settings: &RetrySettings,
    what: &str,
    mut op: F,
) -> Result<T, RetryExhausted>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StorageError>>,
{
    let max_attempts: u32 = settings.max_attempts.max(1);
    let mut attempt: u32 = 1;

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(error) if error.is_retryable() && attempt < max_attempts => {
                let delay = settings.backoff_for(attempt);
                debug!(
                    "{} failed (attempt {}/{}): {}; retrying in {:?}",
                    what, attempt, max_attempts, error, delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(error) => {
                return Err(RetryExhausted {
                    attempts: attempt,
                    error,
                })
            }
        }
    }
}
