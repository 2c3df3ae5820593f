//! Per-call-class circuit breaker.
//!
//! ```text
//! CLOSED --N consecutive failures--> OPEN --cooldown elapsed--> HALF_OPEN
//!   ^                                  ^                            |
//!   +---------- trial success ---------+------- trial failure ------+
//! ```
//!
//! While `HALF_OPEN` exactly one trial is in flight; other callers are
//! rejected as if the breaker were still open. State lives behind a std
//! [`Mutex`] that is never held across an await.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    /// Calls flow normally.
    Closed,
    /// Calls are rejected until the cooldown elapses.
    Open,
    /// One trial call is allowed through.
    HalfOpen,
}

impl BreakerState {
    /// Upper-case name used in logs and status reports.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "CLOSED",
            Self::Open => "OPEN",
            Self::HalfOpen => "HALF_OPEN",
        }
    }
}

/// Breaker tuning.
#[derive(Debug, Clone, Copy)]
pub struct BreakerConfig {
    /// Consecutive failures that trip the breaker.
    pub failure_threshold: u32,
    /// How long the breaker stays open before allowing a trial.
    pub cooldown: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(60),
        }
    }
}

/// Point-in-time view of a breaker for the health report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BreakerSnapshot {
    /// Breaker name.
    pub name: String,
    /// Current state.
    pub state: BreakerState,
    /// Consecutive failures counted so far.
    pub consecutive_failures: u32,
}

#[derive(Debug)]
struct BreakerInner {
    state: BreakerState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
}

/// A named circuit breaker.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
}

/// Permission to make one call. Report the result with
/// [`BreakerPermit::success`] or [`BreakerPermit::failure`].
///
/// A permit dropped without a report (for example because the calling
/// future was cancelled) releases a half-open trial back to `OPEN`.
#[derive(Debug)]
#[must_use = "report the call result through the permit"]
pub struct BreakerPermit<'a> {
    breaker: &'a CircuitBreaker,
    trial: bool,
    reported: bool,
}

impl BreakerPermit<'_> {
    /// Whether this permit is the single half-open trial.
    pub const fn is_trial(&self) -> bool {
        self.trial
    }

    /// Report a successful call.
    pub fn success(mut self) {
        self.reported = true;
        self.breaker.on_success();
    }

    /// Report a failed call.
    pub fn failure(mut self) {
        self.reported = true;
        self.breaker.on_failure();
    }
}

impl Drop for BreakerPermit<'_> {
    fn drop(&mut self) {
        if !self.reported && self.trial {
            self.breaker.on_failure();
        }
    }
}

impl CircuitBreaker {
    /// Create a closed breaker.
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                trial_in_flight: false,
            }),
        }
    }

    /// Breaker name.
    pub fn name(&self) -> &str {
        &self.name
    }

    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Ask for permission to make a call.
    ///
    /// Returns `None` when the call must be rejected without being made.
    pub fn try_acquire(&self) -> Option<BreakerPermit<'_>> {
        let mut inner = self.lock();
        let trial = match inner.state {
            BreakerState::Closed => false,
            BreakerState::Open => {
                let cooled = inner
                    .opened_at
                    .is_none_or(|at| at.elapsed() >= self.config.cooldown);
                if !cooled {
                    return None;
                }
                inner.state = BreakerState::HalfOpen;
                inner.trial_in_flight = true;
                tracing::info!(breaker = %self.name, "Circuit breaker HALF_OPEN, allowing trial call");
                true
            }
            BreakerState::HalfOpen => {
                if inner.trial_in_flight {
                    return None;
                }
                inner.trial_in_flight = true;
                true
            }
        };
        Some(BreakerPermit {
            breaker: self,
            trial,
            reported: false,
        })
    }

    fn on_success(&self) {
        let mut inner = self.lock();
        if inner.state != BreakerState::Closed {
            tracing::info!(breaker = %self.name, "Circuit breaker CLOSED after successful trial");
        }
        inner.state = BreakerState::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
        inner.trial_in_flight = false;
    }

    fn on_failure(&self) {
        let mut inner = self.lock();
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
        inner.trial_in_flight = false;
        let trip = match inner.state {
            BreakerState::HalfOpen => true,
            BreakerState::Closed => inner.consecutive_failures >= self.config.failure_threshold,
            BreakerState::Open => false,
        };
        if trip {
            inner.state = BreakerState::Open;
            inner.opened_at = Some(Instant::now());
            tracing::warn!(
                breaker = %self.name,
                failures = inner.consecutive_failures,
                cooldown_secs = self.config.cooldown.as_secs(),
                "Circuit breaker OPEN"
            );
        }
    }

    /// Current state. An open breaker whose cooldown has elapsed still
    /// reports `OPEN` until the next call moves it to `HALF_OPEN`.
    pub fn state(&self) -> BreakerState {
        self.lock().state
    }

    /// State and failure count for the health report.
    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.lock();
        BreakerSnapshot {
            name: self.name.clone(),
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
        }
    }
}
