use std::cmp::min;
use std::future::Future;
use std::time::Duration;

use anyhow::Context;
use tokio::time;
use tracing::debug;

/// Bounded exponential backoff: an operation is tried at most `max_attempts` times, waiting
///  `initial_backoff` after the first failure and doubling the wait after each further failure,
///  up to `max_backoff`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_backoff: Duration) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff,
            max_backoff: Duration::from_secs(30),
        }
    }

    /// the delay after the n-th failed attempt (1-based)
    pub fn backoff_after_attempt(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1))
            .unwrap_or(u32::MAX);
        min(self.initial_backoff.saturating_mul(factor), self.max_backoff)
    }

    /// Runs `op` until it succeeds or the attempts are exhausted. The last error is returned with
    ///  `what` as context; logging it (or not) is the caller's decision.
    pub async fn retry<T, F, Fut>(&self, what: &str, mut op: F) -> anyhow::Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match op().await {
                Ok(result) => return Ok(result),
                Err(e) if attempt >= max_attempts => {
                    return Err(e).with_context(|| format!("{} failed after {} attempts", what, attempt));
                }
                Err(e) => {
                    let delay = self.backoff_after_attempt(attempt);
                    debug!("{} failed (attempt {} of {}), retrying in {:?}: {}", what, attempt, max_attempts, delay, e);
                    time::sleep(delay).await;
                }
            }
        }
    }
}
