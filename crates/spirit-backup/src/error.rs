//! Error types for backups and the remote repository.

use std::time::Duration;

use spirit_db::DbError;
use spirit_resilience::{Classify, FailureClass};

/// Errors from the remote backup repository.
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    /// Credentials were rejected (401).
    #[error("remote rejected credentials")]
    Unauthorized,

    /// Credentials lack permission for the operation (403).
    #[error("remote denied permission: {0}")]
    Forbidden(String),

    /// The path does not exist (404).
    #[error("remote path not found: {0}")]
    NotFound(String),

    /// The write raced with another write or the sha was stale (409/422).
    #[error("remote write conflict: {0}")]
    Conflict(String),

    /// The remote asked us to slow down (429).
    #[error("remote rate limited")]
    RateLimited {
        /// Server-specified wait, if any.
        retry_after: Option<Duration>,
    },

    /// The remote failed (5xx).
    #[error("remote server error {status}: {body}")]
    Server {
        /// HTTP status code.
        status: u16,
        /// Response body, truncated.
        body: String,
    },

    /// The request was malformed (other 4xx).
    #[error("remote rejected request {status}: {body}")]
    BadRequest {
        /// HTTP status code.
        status: u16,
        /// Response body, truncated.
        body: String,
    },

    /// The request never completed: connect failure or timeout.
    #[error("remote transport error: {0}")]
    Transport(String),

    /// The response body could not be decoded.
    #[error("remote response decode error: {0}")]
    Decode(String),
}

impl Classify for RemoteError {
    fn classify(&self) -> FailureClass {
        match self {
            Self::RateLimited { retry_after } => FailureClass::Transient {
                retry_after: *retry_after,
            },
            Self::Server { .. } | Self::Transport(_) | Self::Conflict(_) => {
                FailureClass::Transient { retry_after: None }
            }
            Self::Unauthorized
            | Self::Forbidden(_)
            | Self::NotFound(_)
            | Self::BadRequest { .. }
            | Self::Decode(_) => FailureClass::Permanent,
        }
    }
}

impl From<reqwest::Error> for RemoteError {
    fn from(e: reqwest::Error) -> Self {
        Self::Transport(e.to_string())
    }
}

/// Errors from the backup manager.
#[derive(Debug, thiserror::Error)]
pub enum BackupError {
    /// The store refused or failed an operation.
    #[error("store error: {0}")]
    Db(#[from] DbError),

    /// A local filesystem operation failed.
    #[error("backup I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The snapshot could not be produced or was empty.
    #[error("snapshot failed: {0}")]
    Snapshot(String),

    /// A file failed its integrity check.
    #[error("integrity check failed for {path}: {details}")]
    Integrity {
        /// File that was checked.
        path: String,
        /// Check output.
        details: String,
    },

    /// A remote operation failed.
    #[error("remote error: {0}")]
    Remote(#[from] RemoteError),

    /// No remote repository is configured.
    #[error("remote backup is not configured")]
    RemoteDisabled,

    /// No artifact matched the request.
    #[error("no backup found: {0}")]
    NotFound(String),
}
