//! The composed guard every outbound call goes through.
//!
//! One guarded call takes a single breaker permit and then runs the retry
//! loop inside it. Each attempt waits for the rate limiter and is bounded
//! by the per-attempt timeout. A timed-out attempt is transient.
//!
//! Breaker accounting per call:
//!
//! | Outcome | Breaker |
//! |---------|---------|
//! | success | success |
//! | permanent failure | success (the dependency answered) |
//! | retries exhausted | failure |

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::circuit_breaker::CircuitBreaker;
use crate::error::{AttemptError, CallError, Classify, FailureClass};
use crate::rate_limiter::SlidingWindowLimiter;
use crate::retry::RetryPolicy;

/// Default per-attempt timeout.
const DEFAULT_ATTEMPT_TIMEOUT_SECS: u64 = 10;

/// Breaker + limiter + retry + timeout for one call class.
#[derive(Debug, Clone)]
pub struct CallGuard {
    breaker: Arc<CircuitBreaker>,
    limiter: Option<Arc<SlidingWindowLimiter>>,
    retry: RetryPolicy,
    attempt_timeout: Duration,
}

impl CallGuard {
    /// Create a guard around `breaker` with default retry and timeout.
    pub fn new(breaker: Arc<CircuitBreaker>) -> Self {
        Self {
            breaker,
            limiter: None,
            retry: RetryPolicy::default(),
            attempt_timeout: Duration::from_secs(DEFAULT_ATTEMPT_TIMEOUT_SECS),
        }
    }

    /// Share a rate limiter with other guards.
    #[must_use]
    pub fn with_limiter(mut self, limiter: Arc<SlidingWindowLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    /// Set the retry policy.
    #[must_use]
    pub const fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Set the per-attempt timeout.
    #[must_use]
    pub const fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    /// The guarded breaker.
    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Run `op` under the guard.
    ///
    /// `op` is invoked once per attempt, so it must be safe to repeat.
    pub async fn call<F, Fut, T, E>(&self, mut op: F) -> Result<T, CallError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Classify + std::fmt::Display,
    {
        let Some(permit) = self.breaker.try_acquire() else {
            tracing::debug!(breaker = %self.breaker.name(), "Call rejected by open breaker");
            return Err(CallError::BreakerOpen {
                breaker: self.breaker.name().to_owned(),
            });
        };

        let attempts = self.retry.attempts();
        let mut attempt: u32 = 0;
        loop {
            if let Some(limiter) = &self.limiter {
                limiter.acquire().await;
            }

            let failure = match tokio::time::timeout(self.attempt_timeout, op()).await {
                Ok(Ok(value)) => {
                    permit.success();
                    return Ok(value);
                }
                Ok(Err(e)) => AttemptError::Failed(e),
                Err(_elapsed) => AttemptError::TimedOut(self.attempt_timeout),
            };

            let made = attempt.saturating_add(1);
            match failure.classify() {
                FailureClass::Permanent => {
                    permit.success();
                    return Err(match failure {
                        AttemptError::Failed(e) => CallError::Permanent(e),
                        timed_out @ AttemptError::TimedOut(_) => CallError::Exhausted {
                            attempts: made,
                            last: timed_out,
                        },
                    });
                }
                FailureClass::Transient { retry_after } => {
                    if made >= attempts {
                        tracing::warn!(
                            breaker = %self.breaker.name(),
                            attempts = made,
                            error = %failure,
                            "Retries exhausted"
                        );
                        permit.failure();
                        return Err(CallError::Exhausted {
                            attempts: made,
                            last: failure,
                        });
                    }
                    let delay = self.retry.delay_for(attempt, retry_after);
                    tracing::warn!(
                        breaker = %self.breaker.name(),
                        attempt = made,
                        max_attempts = attempts,
                        delay_ms = delay.as_millis(),
                        error = %failure,
                        "Transient failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt = made;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::circuit_breaker::{BreakerConfig, BreakerState};

    #[derive(Debug)]
    enum Upstream {
        ServerError,
        RateLimited(Duration),
        Forbidden,
    }

    impl std::fmt::Display for Upstream {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{self:?}")
        }
    }

    impl Classify for Upstream {
        fn classify(&self) -> FailureClass {
            match self {
                Self::ServerError => FailureClass::Transient { retry_after: None },
                Self::RateLimited(after) => FailureClass::Transient {
                    retry_after: Some(*after),
                },
                Self::Forbidden => FailureClass::Permanent,
            }
        }
    }

    fn guard(threshold: u32) -> CallGuard {
        let breaker = Arc::new(CircuitBreaker::new(
            "critical",
            BreakerConfig {
                failure_threshold: threshold,
                cooldown: Duration::from_secs(30),
            },
        ));
        CallGuard::new(breaker)
            .with_retry(RetryPolicy::new(3, Duration::from_millis(100), Duration::from_secs(2)))
            .with_attempt_timeout(Duration::from_secs(1))
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_count_as_one_breaker_failure() {
        let guard = guard(2);
        let calls = AtomicU32::new(0);

        let result: Result<(), CallError<Upstream>> = guard
            .call(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(Upstream::ServerError)
            })
            .await;

        assert!(matches!(result, Err(CallError::Exhausted { attempts: 3, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(guard.breaker().snapshot().consecutive_failures, 1);
        assert_eq!(guard.breaker().state(), BreakerState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn open_breaker_is_distinct_from_exhaustion() {
        let guard = guard(1);
        let _: Result<(), CallError<Upstream>> =
            guard.call(|| async { Err(Upstream::ServerError) }).await;
        assert_eq!(guard.breaker().state(), BreakerState::Open);

        let calls = AtomicU32::new(0);
        let result: Result<(), CallError<Upstream>> = guard
            .call(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(CallError::BreakerOpen { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_error_returns_immediately() {
        let guard = guard(1);
        let calls = AtomicU32::new(0);
        let result: Result<(), CallError<Upstream>> = guard
            .call(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(Upstream::Forbidden)
            })
            .await;
        assert!(matches!(result, Err(CallError::Permanent(Upstream::Forbidden))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(guard.breaker().state(), BreakerState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn timeouts_are_retried_and_retry_after_is_honored() {
        let guard = guard(5);
        let calls = AtomicU32::new(0);
        let start = tokio::time::Instant::now();

        let result: Result<u32, CallError<Upstream>> = guard
            .call(|| async {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                match n {
                    0 => {
                        tokio::time::sleep(Duration::from_secs(5)).await;
                        Ok(0)
                    }
                    1 => Err(Upstream::RateLimited(Duration::from_millis(1500))),
                    _ => Ok(n),
                }
            })
            .await;

        assert!(matches!(result, Ok(2)));
        // 1s timeout + 100ms backoff + 1.5s retry-after.
        assert_eq!(start.elapsed(), Duration::from_millis(2600));
    }
}
