use std::future::Future;
use std::time::Duration;
use tracing::warn;

use super::{StoreError, StoreResult};

/// Bounded exponential backoff for transient store failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(25),
            max_backoff: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Fail on the first error.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay before attempt `attempt + 1`, given `attempt` failed (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32
            .checked_shl(attempt.saturating_sub(1))
            .unwrap_or(u32::MAX);
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }

    /// Decide whether a failed attempt should be retried. Sleeps for the
    /// backoff delay before returning true.
    pub async fn should_retry(&self, what: &str, attempt: u32, err: &StoreError) -> bool {
        let max_attempts = self.max_attempts.max(1);
        if !err.is_transient() || attempt >= max_attempts {
            return false;
        }

        let delay = self.backoff(attempt);
        warn!(
            operation = what,
            attempt,
            max_attempts,
            ?delay,
            error = %err,
            "Store unavailable, retrying"
        );
        tokio::time::sleep(delay).await;
        true
    }

    /// The error surfaced once retrying stops.
    pub fn give_up(&self, err: StoreError, attempts: u32) -> StoreError {
        match err {
            StoreError::Unavailable(reason) if attempts > 1 => StoreError::Unavailable(format!(
                "{} (gave up after {} attempts)",
                reason, attempts
            )),
            other => other,
        }
    }

    /// Run `op` until it succeeds, fails with a non-transient error, or
    /// `max_attempts` is used up.
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> StoreResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = StoreResult<T>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Err(err) => {
                    if self.should_retry(what, attempt, &err).await {
                        attempt += 1;
                        continue;
                    }
                    return Err(self.give_up(err, attempt));
                }
                ok => return ok,
            }
        }
    }
}
