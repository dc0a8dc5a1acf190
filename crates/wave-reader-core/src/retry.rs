//! Bounded retry with pluggable backoff.

use std::{fmt, future::Future, time::Duration};

use thiserror::Error;

/// All attempts failed.
#[derive(Debug, Error)]
#[error("gave up after {attempts} attempts: {last}")]
pub struct RetryError<E: fmt::Display> {
    /// Attempts made.
    pub attempts: u32,
    /// Error from the final attempt.
    pub last: E,
}

/// Backoff growing by `step` per failed attempt: `step × attempt`.
pub fn linear_backoff(step: Duration) -> impl Fn(u32) -> Duration + Send + Sync + Copy {
    move |attempt| step.saturating_mul(attempt)
}

/// Run `operation` up to `max_attempts` times.
///
/// The operation receives the 1-based attempt number. After a failed
/// attempt `n` (other than the last) the combinator sleeps `backoff(n)`.
/// A `max_attempts` of zero is treated as one.
///
/// # Errors
/// Returns the last error once every attempt has failed.
pub async fn retry<T, E, F, Fut, B>(
    max_attempts: u32,
    backoff: B,
    mut operation: F,
) -> Result<T, RetryError<E>>
where
    E: fmt::Display,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    B: Fn(u32) -> Duration,
{
    let max_attempts = max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(last) if attempt >= max_attempts => {
                return Err(RetryError {
                    attempts: attempt,
                    last,
                });
            }
            Err(e) => {
                let delay = backoff(attempt);
                tracing::debug!(attempt, max_attempts, ?delay, error = %e, "retrying after failure");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
