//! The chat platform port.
//!
//! [`ChatPlatform`] is the seam between the bot and the platform's REST API.
//! Production uses [`crate::discord::DiscordRest`]; tests substitute an
//! in-memory fake. Callers never use an adapter directly: every call goes
//! through [`crate::resilient::ResilientPlatform`].

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use spirit_resilience::{Classify, FailureClass};
use spirit_types::{ChannelId, GuildId, RoleId, UserId};

/// Errors from a chat platform adapter.
#[derive(Debug, thiserror::Error)]
pub enum PlatformError {
    /// The bot token was rejected (401).
    #[error("platform rejected the bot token")]
    Auth,

    /// The bot lacks permission for the operation (403).
    #[error("missing platform permission: {0}")]
    Permission(String),

    /// The request was malformed (400 and other 4xx).
    #[error("platform rejected request: {0}")]
    Invalid(String),

    /// The channel, guild, member, or role does not exist (404).
    #[error("platform object not found: {0}")]
    NotFound(String),

    /// The platform asked us to slow down (429).
    #[error("platform rate limited")]
    RateLimited {
        /// Server-specified wait, if any.
        retry_after: Option<Duration>,
    },

    /// The platform failed (5xx).
    #[error("platform server error {status}")]
    Server {
        /// HTTP status code.
        status: u16,
    },

    /// The request never completed: connect failure or timeout.
    #[error("platform transport error: {0}")]
    Transport(String),

    /// The response body could not be decoded.
    #[error("platform response decode error: {0}")]
    Decode(String),

    /// No platform connection is configured.
    #[error("platform not connected")]
    Disconnected,
}

impl Classify for PlatformError {
    fn classify(&self) -> FailureClass {
        match self {
            Self::RateLimited { retry_after } => FailureClass::Transient {
                retry_after: *retry_after,
            },
            Self::Server { .. } | Self::Transport(_) => FailureClass::Transient { retry_after: None },
            Self::Auth
            | Self::Permission(_)
            | Self::Invalid(_)
            | Self::NotFound(_)
            | Self::Decode(_)
            | Self::Disconnected => FailureClass::Permanent,
        }
    }
}

impl From<reqwest::Error> for PlatformError {
    fn from(e: reqwest::Error) -> Self {
        Self::Transport(e.to_string())
    }
}

/// Who the bot is logged in as.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BotIdentity {
    /// The bot's own user id.
    pub id: UserId,
    /// The bot's account name.
    pub username: String,
}

/// Outbound operations the bot needs from a chat platform.
///
/// Every method must be safe to repeat: the resilience layer retries
/// transient failures.
#[async_trait]
pub trait ChatPlatform: Send + Sync {
    /// Check the credentials and report the bot's identity.
    async fn verify_credentials(&self) -> Result<BotIdentity, PlatformError>;

    /// Post a plain-text message.
    async fn send_message(&self, channel: &ChannelId, content: &str) -> Result<(), PlatformError>;

    /// Give a member a role.
    async fn add_role(
        &self,
        guild: &GuildId,
        user: &UserId,
        role: &RoleId,
    ) -> Result<(), PlatformError>;

    /// Take a role from a member.
    async fn remove_role(
        &self,
        guild: &GuildId,
        user: &UserId,
        role: &RoleId,
    ) -> Result<(), PlatformError>;

    /// Set a member's nickname. `None` resets it to the account name.
    async fn set_nickname(
        &self,
        guild: &GuildId,
        user: &UserId,
        nickname: Option<&str>,
    ) -> Result<(), PlatformError>;

    /// A member's current nickname, `None` when they have none.
    async fn member_nickname(
        &self,
        guild: &GuildId,
        user: &UserId,
    ) -> Result<Option<String>, PlatformError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limits_and_server_errors_are_transient() {
        let wait = Some(Duration::from_secs(2));
        assert_eq!(
            PlatformError::RateLimited { retry_after: wait }.classify(),
            FailureClass::Transient { retry_after: wait }
        );
        assert_eq!(
            PlatformError::Server { status: 502 }.classify(),
            FailureClass::Transient { retry_after: None }
        );
    }

    #[test]
    fn auth_and_permission_are_permanent() {
        assert_eq!(PlatformError::Auth.classify(), FailureClass::Permanent);
        assert_eq!(
            PlatformError::Permission("manage roles".to_owned()).classify(),
            FailureClass::Permanent
        );
        assert_eq!(PlatformError::Disconnected.classify(), FailureClass::Permanent);
    }
}
