//! Error and outcome types for guarded calls.

use std::time::Duration;

/// How a failed attempt should be treated by the retry loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Worth retrying: timeouts, server errors, rate-limit responses.
    Transient {
        /// Server-specified wait before the next attempt, if any.
        retry_after: Option<Duration>,
    },
    /// Not worth retrying: permission denied, malformed request, bad auth.
    Permanent,
}

/// Errors that know whether they are worth retrying.
pub trait Classify {
    /// Classify this failure.
    fn classify(&self) -> FailureClass;
}

/// Why a single attempt inside a [`crate::CallGuard`] failed.
#[derive(Debug, thiserror::Error)]
pub enum AttemptError<E> {
    /// The attempt did not finish within the per-attempt timeout.
    #[error("attempt timed out after {0:?}")]
    TimedOut(Duration),

    /// The wrapped operation returned an error.
    #[error("{0}")]
    Failed(E),
}

impl<E: Classify> Classify for AttemptError<E> {
    fn classify(&self) -> FailureClass {
        match self {
            Self::TimedOut(_) => FailureClass::Transient { retry_after: None },
            Self::Failed(e) => e.classify(),
        }
    }
}

/// Outcome of a call that went through a [`crate::CallGuard`].
#[derive(Debug, thiserror::Error)]
pub enum CallError<E> {
    /// The breaker was open; the operation was not attempted.
    #[error("circuit breaker {breaker} is open")]
    BreakerOpen {
        /// Name of the breaker that rejected the call.
        breaker: String,
    },

    /// Every attempt failed with a transient error.
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted {
        /// Number of attempts made.
        attempts: u32,
        /// The final attempt's failure.
        last: AttemptError<E>,
    },

    /// The operation failed in a way retrying cannot fix.
    #[error("{0}")]
    Permanent(E),
}

impl<E> CallError<E> {
    /// Whether the failure was caused by an unavailable dependency rather
    /// than by the request itself.
    pub const fn is_unavailable(&self) -> bool {
        matches!(self, Self::BreakerOpen { .. } | Self::Exhausted { .. })
    }
}

/// Outcome of [`crate::RetryPolicy::run`].
#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    /// Every attempt failed with a transient error.
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted {
        /// Number of attempts made.
        attempts: u32,
        /// The final attempt's failure.
        last: E,
    },

    /// A permanent failure stopped the loop early.
    #[error("{0}")]
    Permanent(E),
}

impl<E> RetryError<E> {
    /// The underlying error of the final attempt.
    pub fn into_inner(self) -> E {
        match self {
            Self::Exhausted { last, .. } | Self::Permanent(last) => last,
        }
    }
}
