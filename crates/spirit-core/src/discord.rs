//! Discord REST API v10 adapter for [`ChatPlatform`].
//!
//! Only the handful of endpoints the bot needs are wrapped. The gateway
//! connection (receiving messages) is not handled here; inbound commands
//! arrive through the observer's command endpoint.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use spirit_types::{ChannelId, GuildId, RoleId, UserId};

use crate::platform::{BotIdentity, ChatPlatform, PlatformError};

/// Default API root.
pub const DEFAULT_API_URL: &str = "https://discord.com/api/v10";

/// Longest message the platform accepts, in characters.
pub const MAX_MESSAGE_CHARS: usize = 2_000;

/// Longest error body kept in an error value.
const MAX_ERROR_BODY: usize = 512;

const USER_AGENT: &str = concat!("DiscordBot (spirit-bot, ", env!("CARGO_PKG_VERSION"), ")");

/// Discord REST client.
pub struct DiscordRest {
    client: reqwest::Client,
    api_url: String,
    token: String,
}

impl std::fmt::Debug for DiscordRest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscordRest")
            .field("api_url", &self.api_url)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
struct CurrentUser {
    id: String,
    username: String,
}

#[derive(Debug, Deserialize)]
struct GuildMember {
    #[serde(default)]
    nick: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RateLimitBody {
    retry_after: f64,
}

impl DiscordRest {
    /// Build a client for `api_url` authenticating with `token`.
    ///
    /// # Errors
    ///
    /// Returns [`PlatformError::Transport`] if the HTTP client cannot be built.
    pub fn new(
        api_url: impl Into<String>,
        token: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, PlatformError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self {
            client,
            api_url: api_url.into(),
            token: token.into(),
        })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}/{}", self.api_url.trim_end_matches('/'), path.trim_start_matches('/'));
        self.client
            .request(method, url)
            .header(reqwest::header::AUTHORIZATION, format!("Bot {}", self.token))
    }

    async fn send(&self, builder: reqwest::RequestBuilder) -> Result<reqwest::Response, PlatformError> {
        let response = builder.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let header_wait = parse_retry_after(response.headers());
        let mut body = response
            .text()
            .await
            .unwrap_or_else(|_e| "unable to read error body".to_owned());
        let retry_after = header_wait.or_else(|| body_retry_after(&body));
        truncate_chars(&mut body, MAX_ERROR_BODY);
        Err(status_error(status, body, retry_after))
    }
}

fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<f64>().ok())
        .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
}

/// `retry_after` from a 429 JSON body, in (fractional) seconds.
fn body_retry_after(body: &str) -> Option<Duration> {
    serde_json::from_str::<RateLimitBody>(body)
        .ok()
        .and_then(|b| Duration::try_from_secs_f64(b.retry_after).ok())
}

/// Map an unsuccessful status onto a [`PlatformError`].
fn status_error(status: StatusCode, body: String, retry_after: Option<Duration>) -> PlatformError {
    match status {
        StatusCode::UNAUTHORIZED => PlatformError::Auth,
        StatusCode::FORBIDDEN => PlatformError::Permission(body),
        StatusCode::NOT_FOUND => PlatformError::NotFound(body),
        StatusCode::TOO_MANY_REQUESTS => PlatformError::RateLimited { retry_after },
        s if s.is_server_error() => PlatformError::Server { status: s.as_u16() },
        _ => PlatformError::Invalid(body),
    }
}

fn truncate_chars(text: &mut String, max: usize) {
    if let Some((cut, _)) = text.char_indices().nth(max) {
        text.truncate(cut);
    }
}

#[async_trait]
impl ChatPlatform for DiscordRest {
    async fn verify_credentials(&self) -> Result<BotIdentity, PlatformError> {
        let response = self.send(self.request(reqwest::Method::GET, "users/@me")).await?;
        let user: CurrentUser = response
            .json()
            .await
            .map_err(|e| PlatformError::Decode(e.to_string()))?;
        Ok(BotIdentity {
            id: UserId::new(user.id),
            username: user.username,
        })
    }

    async fn send_message(&self, channel: &ChannelId, content: &str) -> Result<(), PlatformError> {
        let mut content = content.to_owned();
        truncate_chars(&mut content, MAX_MESSAGE_CHARS);
        let body = serde_json::json!({
            "content": content,
            "allowed_mentions": { "parse": [] },
        });
        let path = format!("channels/{channel}/messages");
        self.send(self.request(reqwest::Method::POST, &path).json(&body))
            .await?;
        Ok(())
    }

    async fn add_role(
        &self,
        guild: &GuildId,
        user: &UserId,
        role: &RoleId,
    ) -> Result<(), PlatformError> {
        let path = format!("guilds/{guild}/members/{user}/roles/{role}");
        self.send(self.request(reqwest::Method::PUT, &path)).await?;
        Ok(())
    }

    async fn remove_role(
        &self,
        guild: &GuildId,
        user: &UserId,
        role: &RoleId,
    ) -> Result<(), PlatformError> {
        let path = format!("guilds/{guild}/members/{user}/roles/{role}");
        match self.send(self.request(reqwest::Method::DELETE, &path)).await {
            // The member left or the role is already gone.
            Ok(_) | Err(PlatformError::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn set_nickname(
        &self,
        guild: &GuildId,
        user: &UserId,
        nickname: Option<&str>,
    ) -> Result<(), PlatformError> {
        let path = format!("guilds/{guild}/members/{user}");
        let body = serde_json::json!({ "nick": nickname });
        self.send(self.request(reqwest::Method::PATCH, &path).json(&body))
            .await?;
        Ok(())
    }

    async fn member_nickname(
        &self,
        guild: &GuildId,
        user: &UserId,
    ) -> Result<Option<String>, PlatformError> {
        let path = format!("guilds/{guild}/members/{user}");
        let response = self.send(self.request(reqwest::Method::GET, &path)).await?;
        let member: GuildMember = response
            .json()
            .await
            .map_err(|e| PlatformError::Decode(e.to_string()))?;
        Ok(member.nick)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_map_to_error_kinds() {
        assert!(matches!(
            status_error(StatusCode::UNAUTHORIZED, String::new(), None),
            PlatformError::Auth
        ));
        assert!(matches!(
            status_error(StatusCode::FORBIDDEN, "Missing Permissions".to_owned(), None),
            PlatformError::Permission(body) if body == "Missing Permissions"
        ));
        assert!(matches!(
            status_error(StatusCode::BAD_REQUEST, String::new(), None),
            PlatformError::Invalid(_)
        ));
        assert!(matches!(
            status_error(StatusCode::BAD_GATEWAY, String::new(), None),
            PlatformError::Server { status: 502 }
        ));
    }

    #[test]
    fn rate_limit_body_is_parsed() {
        let body = r#"{"message": "You are being rate limited.", "retry_after": 1.5, "global": false}"#;
        assert_eq!(body_retry_after(body), Some(Duration::from_millis(1_500)));
        assert_eq!(body_retry_after("not json"), None);
        assert!(matches!(
            status_error(StatusCode::TOO_MANY_REQUESTS, String::new(), body_retry_after(body)),
            PlatformError::RateLimited { retry_after: Some(d) } if d == Duration::from_millis(1_500)
        ));
    }

    #[test]
    fn long_text_is_cut_on_char_boundary() {
        let mut text = "é".repeat(10);
        truncate_chars(&mut text, 4);
        assert_eq!(text, "éééé");

        let mut short = "ok".to_owned();
        truncate_chars(&mut short, 4);
        assert_eq!(short, "ok");
    }
}
