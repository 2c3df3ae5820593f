//! Backup artifact naming.
//!
//! An artifact's identity is its file name. Timestamps are UTC and encoded
//! as `YYYYMMDD_HHMMSS`:
//!
//! | Kind | Name |
//! |------|------|
//! | snapshot | `backup_<ts>.db` |
//! | pre-restore copy | `pre_restore_backup_<ts>.db` |
//! | quarantined store | `<store file>.corrupted_<ts>` |

use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Serialize;

const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";
const SNAPSHOT_PREFIX: &str = "backup_";
const SNAPSHOT_SUFFIX: &str = ".db";
const PRE_RESTORE_PREFIX: &str = "pre_restore_backup_";

/// A snapshot file on the local disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackupArtifact {
    /// File name, `backup_<ts>.db`.
    pub name: String,
    /// Full local path.
    pub path: PathBuf,
    /// Timestamp encoded in the name.
    pub created_at: DateTime<Utc>,
    /// Size in bytes.
    pub size: u64,
}

/// A snapshot stored in the remote repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoteArtifact {
    /// File name, `backup_<ts>.db`.
    pub name: String,
    /// Path inside the repository.
    pub path: String,
    /// Content version identifier.
    pub sha: String,
    /// Timestamp encoded in the name.
    pub created_at: DateTime<Utc>,
}

fn stamp(at: DateTime<Utc>) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}

/// `backup_<ts>.db`
pub fn snapshot_name(at: DateTime<Utc>) -> String {
    format!("{SNAPSHOT_PREFIX}{}{SNAPSHOT_SUFFIX}", stamp(at))
}

/// `pre_restore_backup_<ts>.db`
pub fn pre_restore_name(at: DateTime<Utc>) -> String {
    format!("{PRE_RESTORE_PREFIX}{}{SNAPSHOT_SUFFIX}", stamp(at))
}

/// `<store file>.corrupted_<ts>` next to the store file.
pub fn quarantine_path(store: &Path, at: DateTime<Utc>) -> PathBuf {
    let file_name = store
        .file_name()
        .map_or_else(|| "store".to_owned(), |n| n.to_string_lossy().into_owned());
    store.with_file_name(format!("{file_name}.corrupted_{}", stamp(at)))
}

/// Timestamp of a `backup_<ts>.db` name, or `None` for any other name.
///
/// Pre-restore copies are deliberately not matched.
pub fn parse_snapshot_name(name: &str) -> Option<DateTime<Utc>> {
    let raw = name
        .strip_prefix(SNAPSHOT_PREFIX)?
        .strip_suffix(SNAPSHOT_SUFFIX)?;
    parse_stamp(raw)
}

/// Timestamp of a `pre_restore_backup_<ts>.db` name.
pub fn parse_pre_restore_name(name: &str) -> Option<DateTime<Utc>> {
    let raw = name
        .strip_prefix(PRE_RESTORE_PREFIX)?
        .strip_suffix(SNAPSHOT_SUFFIX)?;
    parse_stamp(raw)
}

/// Timestamp of a quarantine copy of `store`, matched by file name only.
pub fn parse_quarantine_name(store: &Path, name: &str) -> Option<DateTime<Utc>> {
    let file_name = store.file_name()?.to_string_lossy();
    let raw = name
        .strip_prefix(file_name.as_ref())?
        .strip_prefix(".corrupted_")?;
    parse_stamp(raw)
}

fn parse_stamp(raw: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(raw, TIMESTAMP_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}
