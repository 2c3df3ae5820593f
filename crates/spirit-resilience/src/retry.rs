//! Bounded retry with exponential backoff.

use std::future::Future;
use std::time::Duration;

use crate::error::{Classify, FailureClass, RetryError};

/// Retry tuning: `delay = base * 2^attempt`, capped at `max_delay`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. At least one.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Create a policy.
    pub const fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
        }
    }

    /// Attempts actually made, never zero.
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Delay before retrying after the zero-based `attempt` failed.
    ///
    /// A server-provided `retry_after` wins over the computed backoff but is
    /// still capped.
    pub fn delay_for(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let backoff = retry_after.unwrap_or_else(|| {
            let factor = 2_u32.checked_pow(attempt).unwrap_or(u32::MAX);
            self.base_delay.saturating_mul(factor)
        });
        backoff.min(self.max_delay)
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out.
    pub async fn run<F, Fut, T, E>(&self, mut op: F) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Classify + std::fmt::Display,
    {
        let attempts = self.attempts();
        let mut attempt: u32 = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) => match e.classify() {
                    FailureClass::Permanent => return Err(RetryError::Permanent(e)),
                    FailureClass::Transient { retry_after } => {
                        let made = attempt.saturating_add(1);
                        if made >= attempts {
                            return Err(RetryError::Exhausted {
                                attempts: made,
                                last: e,
                            });
                        }
                        let delay = self.delay_for(attempt, retry_after);
                        tracing::warn!(
                            attempt = made,
                            max_attempts = attempts,
                            delay_ms = delay.as_millis(),
                            error = %e,
                            "Transient failure, retrying"
                        );
                        tokio::time::sleep(delay).await;
                        attempt = made;
                    }
                },
            }
        }
    }
}
