//! GitHub contents API adapter for [`RemoteRepository`].
//!
//! Files are read and written through `/repos/{repo}/contents/{path}` on a
//! fixed branch. Uploads are base64 encoded in the JSON body; downloads ask
//! for the raw media type so large snapshots are not size-limited by the
//! JSON representation.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest::StatusCode;
use serde::Deserialize;

use crate::error::RemoteError;
use crate::remote::{RemoteEntry, RemoteMeta, RemoteRef, RemoteRepository};

/// Default API root.
pub const DEFAULT_API_URL: &str = "https://api.github.com";

/// Default per-request timeout.
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;

/// Longest error body kept in an error value.
const MAX_ERROR_BODY: usize = 512;

const USER_AGENT: &str = concat!("spirit-bot/", env!("CARGO_PKG_VERSION"));

/// Connection settings for [`GitHubRepository`].
#[derive(Debug, Clone)]
pub struct GitHubConfig {
    /// Personal access token.
    pub token: String,
    /// `owner/name`.
    pub repo: String,
    /// Branch holding the backups.
    pub branch: String,
    /// API root, overridable for tests and GitHub Enterprise.
    pub api_url: String,
    /// Per-request timeout.
    pub request_timeout: Duration,
}

impl GitHubConfig {
    /// Settings for `repo` on `branch` against public GitHub.
    pub fn new(token: impl Into<String>, repo: impl Into<String>, branch: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            repo: repo.into(),
            branch: branch.into(),
            api_url: DEFAULT_API_URL.to_owned(),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        }
    }

    /// Override the API root.
    #[must_use]
    pub fn with_api_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = url.into();
        self
    }

    /// Override the per-request timeout.
    #[must_use]
    pub const fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

/// GitHub-backed remote repository.
pub struct GitHubRepository {
    client: reqwest::Client,
    config: GitHubConfig,
}

impl std::fmt::Debug for GitHubRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitHubRepository")
            .field("repo", &self.config.repo)
            .field("branch", &self.config.branch)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
struct ContentItem {
    name: String,
    path: String,
    sha: String,
    #[serde(default)]
    size: u64,
    #[serde(rename = "type", default)]
    kind: String,
}

#[derive(Debug, Deserialize)]
struct PutResponse {
    content: ContentItem,
}

impl GitHubRepository {
    /// Build the adapter.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::Transport`] if the HTTP client cannot be built.
    pub fn new(config: GitHubConfig) -> Result<Self, RemoteError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self { client, config })
    }

    fn contents_url(&self, path: &str) -> String {
        format!(
            "{}/repos/{}/contents/{}",
            self.config.api_url.trim_end_matches('/'),
            self.config.repo,
            path.trim_start_matches('/')
        )
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, self.contents_url(path))
            .bearer_auth(&self.config.token)
            .header("X-GitHub-Api-Version", "2022-11-28")
    }

    async fn send(&self, builder: reqwest::RequestBuilder) -> Result<reqwest::Response, RemoteError> {
        let response = builder.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let retry_after = parse_retry_after(response.headers());
        let mut body = response
            .text()
            .await
            .unwrap_or_else(|_e| "unable to read error body".to_owned());
        truncate_on_char_boundary(&mut body, MAX_ERROR_BODY);
        Err(status_error(status, body, retry_after))
    }
}

/// Cut `text` to at most `max` bytes without splitting a character.
fn truncate_on_char_boundary(text: &mut String, max: usize) {
    if text.len() <= max {
        return;
    }
    let cut = text
        .char_indices()
        .map(|(i, _)| i)
        .take_while(|&i| i <= max)
        .last()
        .unwrap_or(0);
    text.truncate(cut);
}

fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// Map an unsuccessful status onto a [`RemoteError`].
fn status_error(status: StatusCode, body: String, retry_after: Option<Duration>) -> RemoteError {
    match status {
        StatusCode::UNAUTHORIZED => RemoteError::Unauthorized,
        // Secondary rate limits come back as 403 with a Retry-After header.
        StatusCode::FORBIDDEN if retry_after.is_some() => RemoteError::RateLimited { retry_after },
        StatusCode::FORBIDDEN => RemoteError::Forbidden(body),
        StatusCode::NOT_FOUND => RemoteError::NotFound(body),
        StatusCode::CONFLICT | StatusCode::UNPROCESSABLE_ENTITY => RemoteError::Conflict(body),
        StatusCode::TOO_MANY_REQUESTS => RemoteError::RateLimited { retry_after },
        s if s.is_server_error() => RemoteError::Server {
            status: s.as_u16(),
            body,
        },
        s => RemoteError::BadRequest {
            status: s.as_u16(),
            body,
        },
    }
}

#[async_trait]
impl RemoteRepository for GitHubRepository {
    async fn fetch_meta(&self, path: &str) -> Result<Option<RemoteMeta>, RemoteError> {
        let builder = self
            .request(reqwest::Method::GET, path)
            .query(&[("ref", self.config.branch.as_str())])
            .header(reqwest::header::ACCEPT, "application/vnd.github.object+json");
        match self.send(builder).await {
            Ok(response) => {
                let item: ContentItem = response
                    .json()
                    .await
                    .map_err(|e| RemoteError::Decode(e.to_string()))?;
                Ok(Some(RemoteMeta {
                    sha: item.sha,
                    size: item.size,
                }))
            }
            Err(RemoteError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn put(
        &self,
        path: &str,
        content: &[u8],
        message: &str,
        sha: Option<&str>,
    ) -> Result<RemoteRef, RemoteError> {
        let mut body = serde_json::json!({
            "message": message,
            "content": BASE64.encode(content),
            "branch": self.config.branch,
        });
        if let (Some(sha), Some(map)) = (sha, body.as_object_mut()) {
            map.insert("sha".to_owned(), serde_json::Value::String(sha.to_owned()));
        }

        let builder = self
            .request(reqwest::Method::PUT, path)
            .header(reqwest::header::ACCEPT, "application/vnd.github+json")
            .json(&body);
        let response = self.send(builder).await?;
        let put: PutResponse = response
            .json()
            .await
            .map_err(|e| RemoteError::Decode(e.to_string()))?;
        Ok(RemoteRef {
            path: put.content.path,
            sha: put.content.sha,
        })
    }

    async fn list(&self, dir: &str) -> Result<Vec<RemoteEntry>, RemoteError> {
        let builder = self
            .request(reqwest::Method::GET, dir)
            .query(&[("ref", self.config.branch.as_str())])
            .header(reqwest::header::ACCEPT, "application/vnd.github+json");
        let response = match self.send(builder).await {
            Ok(response) => response,
            Err(RemoteError::NotFound(_)) => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let items: Vec<ContentItem> = response
            .json()
            .await
            .map_err(|e| RemoteError::Decode(e.to_string()))?;
        Ok(items
            .into_iter()
            .filter(|item| item.kind == "file")
            .map(|item| RemoteEntry {
                name: item.name,
                path: item.path,
                sha: item.sha,
            })
            .collect())
    }

    async fn get(&self, path: &str) -> Result<Vec<u8>, RemoteError> {
        let builder = self
            .request(reqwest::Method::GET, path)
            .query(&[("ref", self.config.branch.as_str())])
            .header(reqwest::header::ACCEPT, "application/vnd.github.raw");
        let response = self.send(builder).await?;
        let bytes = response.bytes().await?;
        Ok(bytes.to_vec())
    }

    async fn delete(&self, path: &str, sha: &str, message: &str) -> Result<(), RemoteError> {
        let body = serde_json::json!({
            "message": message,
            "sha": sha,
            "branch": self.config.branch,
        });
        let builder = self
            .request(reqwest::Method::DELETE, path)
            .header(reqwest::header::ACCEPT, "application/vnd.github+json")
            .json(&body);
        self.send(builder).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping_separates_terminal_and_transient() {
        use spirit_resilience::{Classify, FailureClass};

        let forbidden = status_error(StatusCode::FORBIDDEN, String::new(), None);
        assert!(matches!(forbidden, RemoteError::Forbidden(_)));
        assert_eq!(forbidden.classify(), FailureClass::Permanent);

        let throttled = status_error(
            StatusCode::TOO_MANY_REQUESTS,
            String::new(),
            Some(Duration::from_secs(3)),
        );
        assert_eq!(
            throttled.classify(),
            FailureClass::Transient {
                retry_after: Some(Duration::from_secs(3))
            }
        );

        let server = status_error(StatusCode::BAD_GATEWAY, String::new(), None);
        assert!(matches!(server, RemoteError::Server { status: 502, .. }));

        let conflict = status_error(StatusCode::CONFLICT, String::new(), None);
        assert!(matches!(conflict, RemoteError::Conflict(_)));
    }

    #[test]
    fn error_body_truncation_keeps_whole_characters() {
        let mut body = format!("a{}", "é".repeat(300));
        truncate_on_char_boundary(&mut body, MAX_ERROR_BODY);
        assert_eq!(body.len(), 511);
        assert!(body.ends_with('é'));

        let mut even = "é".repeat(300);
        truncate_on_char_boundary(&mut even, MAX_ERROR_BODY);
        assert_eq!(even.len(), MAX_ERROR_BODY);

        let mut short = "Не найдено".to_owned();
        truncate_on_char_boundary(&mut short, MAX_ERROR_BODY);
        assert_eq!(short, "Не найдено");
    }

    #[test]
    fn contents_url_joins_cleanly() {
        let repo = GitHubRepository::new(
            GitHubConfig::new("t", "owner/bot-backups", "main")
                .with_api_url("https://example.test/"),
        );
        let url = repo.map(|r| r.contents_url("/backups/backup_20261016_000000.db"));
        assert_eq!(
            url.ok().as_deref(),
            Some("https://example.test/repos/owner/bot-backups/contents/backups/backup_20261016_000000.db")
        );
    }
}
