//! Resilience primitives guarding every outbound network call.
//!
//! Components are constructed once at startup and shared through `Arc`;
//! nothing here is a process-wide global.
//!
//! # Modules
//!
//! - [`circuit_breaker`] -- Per-call-class breaker with a single half-open trial
//! - [`rate_limiter`] -- Sliding-window limiter
//! - [`retry`] -- Exponential backoff with a fixed attempt ceiling
//! - [`guard`] -- Breaker + limiter + retry + timeout composed for one call
//! - [`cooldown`] -- Per-user command cooldowns
//! - [`error`] -- Failure classification and call outcomes

pub mod circuit_breaker;
pub mod cooldown;
pub mod error;
pub mod guard;
pub mod rate_limiter;
pub mod retry;

pub use circuit_breaker::{BreakerConfig, BreakerPermit, BreakerSnapshot, BreakerState, CircuitBreaker};
pub use cooldown::{CooldownActive, CooldownTracker, format_wait};
pub use error::{AttemptError, CallError, Classify, FailureClass, RetryError};
pub use guard::CallGuard;
pub use rate_limiter::SlidingWindowLimiter;
pub use retry::RetryPolicy;
