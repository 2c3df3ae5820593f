//! Guarded access to the chat platform.
//!
//! [`ResilientPlatform`] owns the two call classes and the shared rate
//! limiter:
//!
//! ```text
//!                 +--> critical guard ------+
//! caller ---------+                         +--> limiter --> ChatPlatform
//!                 +--> notifications guard -+
//! ```
//!
//! Command replies, role grants, and name card nicknames are critical.
//! Sweep-time role removals, nickname reverts, and other best-effort
//! messages use the notifications breaker, which trips independently of
//! the critical one.

use std::sync::Arc;

use serde::Serialize;
use spirit_resilience::{
    BreakerSnapshot, CallError, CallGuard, CircuitBreaker, SlidingWindowLimiter,
};
use spirit_types::{ChannelId, GuildId, RoleId, UserId};

use crate::config::ResilienceSection;
use crate::platform::{BotIdentity, ChatPlatform, PlatformError};

/// Message shown to users when a dependency is unavailable.
pub const UNAVAILABLE_MESSAGE: &str =
    "The chat service is temporarily unavailable. Please try again in a few minutes.";

/// Which breaker a call goes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallClass {
    /// User-visible work: replies, grants.
    Critical,
    /// Best-effort work: cleanup, notices.
    Notifications,
}

/// Why a guarded platform call did not succeed.
#[derive(Debug, thiserror::Error)]
pub enum PlatformFailure {
    /// The breaker was open or every retry failed.
    #[error("platform unavailable: {0}")]
    Unavailable(String),

    /// The platform refused the request.
    #[error("{0}")]
    Rejected(PlatformError),

    /// No platform connection is configured.
    #[error("platform not connected")]
    Disconnected,
}

impl PlatformFailure {
    /// Text safe to show the user.
    pub const fn user_message(&self) -> &'static str {
        match self {
            Self::Unavailable(_) => UNAVAILABLE_MESSAGE,
            Self::Rejected(PlatformError::Permission(_)) => {
                "I do not have the permission needed to do that on this server."
            }
            Self::Rejected(PlatformError::NotFound(_)) => {
                "That member, role, or channel could not be found."
            }
            Self::Rejected(_) => "The chat service rejected the request.",
            Self::Disconnected => "The bot is not connected to the chat service right now.",
        }
    }
}

impl From<CallError<PlatformError>> for PlatformFailure {
    fn from(e: CallError<PlatformError>) -> Self {
        match e {
            CallError::Permanent(PlatformError::Disconnected) => Self::Disconnected,
            CallError::Permanent(inner) => Self::Rejected(inner),
            unavailable @ (CallError::BreakerOpen { .. } | CallError::Exhausted { .. }) => {
                Self::Unavailable(unavailable.to_string())
            }
        }
    }
}

/// Point-in-time view of platform connectivity for the health report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlatformStatus {
    /// Whether an adapter is configured.
    pub connected: bool,
    /// Critical breaker.
    pub critical: BreakerSnapshot,
    /// Notifications breaker.
    pub notifications: BreakerSnapshot,
    /// Calls still available in the current rate-limit window.
    pub rate_limit_remaining: usize,
    /// Calls allowed per window.
    pub rate_limit_max: usize,
}

/// A [`ChatPlatform`] behind breakers, retries, and a rate limiter.
#[derive(Clone)]
pub struct ResilientPlatform {
    inner: Option<Arc<dyn ChatPlatform>>,
    critical: CallGuard,
    notifications: CallGuard,
    limiter: Arc<SlidingWindowLimiter>,
}

impl std::fmt::Debug for ResilientPlatform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilientPlatform")
            .field("connected", &self.inner.is_some())
            .field("critical", &self.critical.breaker().state())
            .field("notifications", &self.notifications.breaker().state())
            .finish_non_exhaustive()
    }
}

impl ResilientPlatform {
    /// Wrap `inner`. `None` builds a disconnected platform whose calls all
    /// fail with [`PlatformFailure::Disconnected`].
    pub fn new(inner: Option<Arc<dyn ChatPlatform>>, settings: &ResilienceSection) -> Self {
        let limiter = Arc::new(SlidingWindowLimiter::new(
            settings.rate_limit_calls,
            settings.rate_limit_window(),
        ));
        let guard = |name: &str, breaker| {
            CallGuard::new(Arc::new(CircuitBreaker::new(name, breaker)))
                .with_limiter(Arc::clone(&limiter))
                .with_retry(settings.retry_policy())
                .with_attempt_timeout(settings.attempt_timeout())
        };
        let critical = guard("critical", settings.critical_breaker());
        let notifications = guard("notifications", settings.notifications_breaker());
        Self {
            inner,
            critical,
            notifications,
            limiter,
        }
    }

    /// Whether an adapter is configured.
    pub const fn is_connected(&self) -> bool {
        self.inner.is_some()
    }

    const fn guard(&self, class: CallClass) -> &CallGuard {
        match class {
            CallClass::Critical => &self.critical,
            CallClass::Notifications => &self.notifications,
        }
    }

    fn adapter(&self) -> Result<&Arc<dyn ChatPlatform>, PlatformFailure> {
        self.inner.as_ref().ok_or(PlatformFailure::Disconnected)
    }

    /// Check credentials through the critical breaker.
    pub async fn verify_credentials(&self) -> Result<BotIdentity, PlatformFailure> {
        let adapter = self.adapter()?;
        Ok(self.critical.call(move || adapter.verify_credentials()).await?)
    }

    /// Post a message.
    pub async fn send_message(
        &self,
        class: CallClass,
        channel: &ChannelId,
        content: &str,
    ) -> Result<(), PlatformFailure> {
        let adapter = self.adapter()?;
        Ok(self
            .guard(class)
            .call(move || adapter.send_message(channel, content))
            .await?)
    }

    /// Give a member a role.
    pub async fn add_role(
        &self,
        class: CallClass,
        guild: &GuildId,
        user: &UserId,
        role: &RoleId,
    ) -> Result<(), PlatformFailure> {
        let adapter = self.adapter()?;
        Ok(self
            .guard(class)
            .call(move || adapter.add_role(guild, user, role))
            .await?)
    }

    /// Take a role from a member.
    pub async fn remove_role(
        &self,
        class: CallClass,
        guild: &GuildId,
        user: &UserId,
        role: &RoleId,
    ) -> Result<(), PlatformFailure> {
        let adapter = self.adapter()?;
        Ok(self
            .guard(class)
            .call(move || adapter.remove_role(guild, user, role))
            .await?)
    }

    /// Set or reset a member's nickname.
    pub async fn set_nickname(
        &self,
        class: CallClass,
        guild: &GuildId,
        user: &UserId,
        nickname: Option<&str>,
    ) -> Result<(), PlatformFailure> {
        let adapter = self.adapter()?;
        Ok(self
            .guard(class)
            .call(move || adapter.set_nickname(guild, user, nickname))
            .await?)
    }

    /// A member's current nickname.
    pub async fn member_nickname(
        &self,
        class: CallClass,
        guild: &GuildId,
        user: &UserId,
    ) -> Result<Option<String>, PlatformFailure> {
        let adapter = self.adapter()?;
        Ok(self
            .guard(class)
            .call(move || adapter.member_nickname(guild, user))
            .await?)
    }

    /// Breakers and rate-limit budget.
    pub fn status(&self) -> PlatformStatus {
        PlatformStatus {
            connected: self.is_connected(),
            critical: self.critical.breaker().snapshot(),
            notifications: self.notifications.breaker().snapshot(),
            rate_limit_remaining: self.limiter.remaining(),
            rate_limit_max: self.limiter.max_calls(),
        }
    }
}
