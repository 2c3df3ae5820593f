//! Remote repository port.
//!
//! The remote is a versioned content store addressed by path. Writes to an
//! existing path must carry the current content version (`sha`).

use async_trait::async_trait;
use serde::Serialize;

use crate::error::RemoteError;

/// Metadata of an existing remote file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteMeta {
    /// Current content version.
    pub sha: String,
    /// Size in bytes.
    pub size: u64,
}

/// One entry of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    /// File name.
    pub name: String,
    /// Full path inside the repository.
    pub path: String,
    /// Content version.
    pub sha: String,
}

/// Result of a successful write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoteRef {
    /// Path written.
    pub path: String,
    /// New content version.
    pub sha: String,
}

/// A remote versioned content store.
#[async_trait]
pub trait RemoteRepository: Send + Sync {
    /// Metadata of `path`, or `None` if it does not exist.
    async fn fetch_meta(&self, path: &str) -> Result<Option<RemoteMeta>, RemoteError>;

    /// Create `path`, or update it when `sha` names the current version.
    async fn put(
        &self,
        path: &str,
        content: &[u8],
        message: &str,
        sha: Option<&str>,
    ) -> Result<RemoteRef, RemoteError>;

    /// Files directly under `dir`. A missing directory lists as empty.
    async fn list(&self, dir: &str) -> Result<Vec<RemoteEntry>, RemoteError>;

    /// Full content of `path`.
    async fn get(&self, path: &str) -> Result<Vec<u8>, RemoteError>;

    /// Delete `path` at version `sha`.
    async fn delete(&self, path: &str, sha: &str, message: &str) -> Result<(), RemoteError>;
}
