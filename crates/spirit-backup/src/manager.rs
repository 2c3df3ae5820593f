//! Backup manager and corruption-recovery state machine.
//!
//! ```text
//! IDLE -> CHECK_INTEGRITY -> HEALTHY -> IDLE
//!                         -> CORRUPT -> ATTEMPT_REPAIR -> ok -> IDLE
//!                                    -> ATTEMPT_LOCAL_RESTORE -> ok -> IDLE
//!                                    -> ATTEMPT_REMOTE_RESTORE -> ok -> IDLE
//!                                    -> REINITIALIZE_EMPTY -> IDLE
//! ```
//!
//! File-level operations (snapshot, restore, repair, reinitialize) are
//! serialized by an internal lock so a backup cycle and a recovery never
//! touch the live file at the same time. Remote operations degrade
//! gracefully: without a configured remote, or with an unreachable one,
//! local snapshots and restores keep working.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use spirit_db::{IntegrityStatus, Store, integrity_check_file};
use spirit_resilience::RetryPolicy;
use tokio::sync::Mutex;

use crate::artifact::{
    BackupArtifact, RemoteArtifact, parse_pre_restore_name, parse_quarantine_name,
    parse_snapshot_name, pre_restore_name, quarantine_path, snapshot_name,
};
use crate::error::{BackupError, RemoteError};
use crate::remote::{RemoteRef, RemoteRepository};

/// Default number of local snapshots kept.
pub const DEFAULT_KEEP_LOCAL: usize = 10;

/// Default number of remote snapshots kept.
pub const DEFAULT_KEEP_REMOTE: usize = 10;

/// Default directory inside the remote repository.
pub const DEFAULT_REMOTE_PREFIX: &str = "backups";

/// Backup manager settings.
#[derive(Debug, Clone)]
pub struct BackupConfig {
    /// Local directory holding snapshots and pre-restore copies.
    pub backup_dir: PathBuf,
    /// Directory inside the remote repository.
    pub remote_prefix: String,
    /// Local snapshots kept by pruning.
    pub keep_local: usize,
    /// Remote snapshots kept by pruning.
    pub keep_remote: usize,
    /// Retry policy for remote calls.
    pub retry: RetryPolicy,
}

impl BackupConfig {
    /// Defaults with snapshots under `backup_dir`.
    pub fn new(backup_dir: impl Into<PathBuf>) -> Self {
        Self {
            backup_dir: backup_dir.into(),
            remote_prefix: DEFAULT_REMOTE_PREFIX.to_owned(),
            keep_local: DEFAULT_KEEP_LOCAL,
            keep_remote: DEFAULT_KEEP_REMOTE,
            retry: RetryPolicy::default(),
        }
    }

    /// Set the remote directory.
    #[must_use]
    pub fn with_remote_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.remote_prefix = prefix.into();
        self
    }

    /// Set how many snapshots pruning keeps on each side.
    #[must_use]
    pub const fn with_retention(mut self, keep_local: usize, keep_remote: usize) -> Self {
        self.keep_local = keep_local;
        self.keep_remote = keep_remote;
        self
    }

    /// Set the remote retry policy.
    #[must_use]
    pub const fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// A step of the recovery state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecoveryState {
    /// Nothing in progress.
    Idle,
    /// Running the integrity check.
    CheckIntegrity,
    /// The check passed.
    Healthy,
    /// The check failed.
    Corrupt,
    /// Rebuilding the file from its readable contents.
    AttemptRepair,
    /// Restoring the newest usable local snapshot.
    AttemptLocalRestore,
    /// Restoring the newest remote snapshot.
    AttemptRemoteRestore,
    /// Replacing the store with an empty one.
    ReinitializeEmpty,
}

impl RecoveryState {
    /// Upper-case name used in logs.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::CheckIntegrity => "CHECK_INTEGRITY",
            Self::Healthy => "HEALTHY",
            Self::Corrupt => "CORRUPT",
            Self::AttemptRepair => "ATTEMPT_REPAIR",
            Self::AttemptLocalRestore => "ATTEMPT_LOCAL_RESTORE",
            Self::AttemptRemoteRestore => "ATTEMPT_REMOTE_RESTORE",
            Self::ReinitializeEmpty => "REINITIALIZE_EMPTY",
        }
    }
}

/// How a call to [`BackupManager::check_and_recover`] ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum RecoveryOutcome {
    /// The store passed its integrity check.
    Healthy,
    /// The store was corrupt and repaired in place.
    Repaired,
    /// The store was restored from the named local snapshot.
    RestoredLocal(String),
    /// The store was restored from the named remote snapshot.
    RestoredRemote(String),
    /// Every recovery path failed; the store was replaced by an empty one.
    Reinitialized,
    /// Even reinitialization failed. The store stays degraded.
    Failed(String),
}

/// Result of one scheduled backup cycle.
#[derive(Debug, Clone, Serialize)]
pub struct BackupCycleReport {
    /// The snapshot produced this cycle.
    pub artifact: BackupArtifact,
    /// Where the snapshot was uploaded, if it was.
    pub uploaded: Option<RemoteRef>,
    /// Why the upload did not happen or failed.
    pub remote_error: Option<String>,
    /// Local snapshots deleted by pruning.
    pub pruned_local: usize,
    /// Remote snapshots deleted by pruning.
    pub pruned_remote: usize,
}

/// Produces, ships, lists, and restores snapshots of the store.
pub struct BackupManager {
    store: Store,
    config: BackupConfig,
    remote: Option<Arc<dyn RemoteRepository>>,
    file_lock: Mutex<()>,
}

impl std::fmt::Debug for BackupManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackupManager")
            .field("store", &self.store)
            .field("config", &self.config)
            .field("remote", &self.remote.is_some())
            .finish_non_exhaustive()
    }
}

impl BackupManager {
    /// Create a manager. Pass `None` for `remote` to run local-only.
    pub fn new(
        store: Store,
        config: BackupConfig,
        remote: Option<Arc<dyn RemoteRepository>>,
    ) -> Self {
        if remote.is_none() {
            tracing::info!("Remote backup not configured, running local-only");
        }
        Self {
            store,
            config,
            remote,
            file_lock: Mutex::new(()),
        }
    }

    /// Whether a remote repository is configured.
    pub const fn has_remote(&self) -> bool {
        self.remote.is_some()
    }

    /// Manager settings.
    pub const fn config(&self) -> &BackupConfig {
        &self.config
    }

    // -----------------------------------------------------------------------
    // Snapshots
    // -----------------------------------------------------------------------

    /// Write a consistent point-in-time copy of the live store.
    ///
    /// The copy is built under a temporary name, checked, and only then
    /// renamed into place, so a failed attempt leaves nothing behind.
    pub async fn create_snapshot(&self) -> Result<BackupArtifact, BackupError> {
        let _guard = self.file_lock.lock().await;
        self.create_snapshot_locked().await
    }

    async fn create_snapshot_locked(&self) -> Result<BackupArtifact, BackupError> {
        tokio::fs::create_dir_all(&self.config.backup_dir).await?;

        let created_at = Utc::now();
        let name = snapshot_name(created_at);
        let final_path = self.config.backup_dir.join(&name);
        let partial = self.config.backup_dir.join(format!(".{name}.partial"));
        remove_if_exists(&partial).await?;

        let result = self.write_snapshot(&partial).await;
        let size = match result {
            Ok(size) => size,
            Err(e) => {
                if let Err(cleanup) = remove_if_exists(&partial).await {
                    tracing::warn!(path = %partial.display(), error = %cleanup, "Could not remove partial snapshot");
                }
                return Err(e);
            }
        };

        tokio::fs::rename(&partial, &final_path).await?;
        tracing::info!(name = %name, size, "Snapshot created");

        Ok(BackupArtifact {
            name,
            path: final_path,
            created_at,
            size,
        })
    }

    async fn write_snapshot(&self, target: &Path) -> Result<u64, BackupError> {
        if let Err(e) = self.store.vacuum_into(target).await {
            tracing::warn!(error = %e, "VACUUM INTO failed, falling back to checkpoint and copy");
            remove_if_exists(target).await?;
            self.store.checkpoint().await?;
            tokio::fs::copy(self.store.path(), target).await?;
        }

        let size = tokio::fs::metadata(target).await?.len();
        if size == 0 {
            return Err(BackupError::Snapshot("snapshot file is empty".to_owned()));
        }
        if let IntegrityStatus::Corrupt(details) = integrity_check_file(target).await {
            return Err(BackupError::Integrity {
                path: target.display().to_string(),
                details,
            });
        }
        Ok(size)
    }

    /// Local snapshots, newest first. Files that do not follow the
    /// `backup_<ts>.db` naming are ignored.
    pub async fn list_local(&self) -> Result<Vec<BackupArtifact>, BackupError> {
        let mut artifacts = Vec::new();
        let mut dir = match tokio::fs::read_dir(&self.config.backup_dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(artifacts),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = dir.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            let Some(created_at) = parse_snapshot_name(&name) else {
                continue;
            };
            let size = entry.metadata().await?.len();
            artifacts.push(BackupArtifact {
                name,
                path: entry.path(),
                created_at,
                size,
            });
        }
        artifacts.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(artifacts)
    }

    /// Newest local snapshot, if any.
    pub async fn newest_local(&self) -> Result<Option<BackupArtifact>, BackupError> {
        Ok(self.list_local().await?.into_iter().next())
    }

    /// Delete local snapshots beyond the newest `keep`. Pre-restore copies
    /// and quarantined store files are held to the same retention, each
    /// kind counted on its own. Returns how many files were deleted;
    /// individual failures are logged and skipped.
    pub async fn prune_local(&self, keep: usize) -> Result<usize, BackupError> {
        let snapshots: Vec<PathBuf> = self
            .list_local()
            .await?
            .into_iter()
            .map(|artifact| artifact.path)
            .collect();
        let mut deleted = delete_beyond(snapshots, keep, "snapshot").await;

        let pre_restore = stamped_files(&self.config.backup_dir, parse_pre_restore_name).await?;
        deleted = deleted.saturating_add(delete_beyond(pre_restore, keep, "pre-restore copy").await);

        let live = self.store.path();
        let store_dir = match live.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let quarantined = stamped_files(&store_dir, |name| parse_quarantine_name(live, name)).await?;
        deleted = deleted.saturating_add(delete_beyond(quarantined, keep, "quarantined store").await);

        if deleted > 0 {
            tracing::info!(deleted, keep, "Pruned local backup files");
        }
        Ok(deleted)
    }

    // -----------------------------------------------------------------------
    // Remote
    // -----------------------------------------------------------------------

    fn remote(&self) -> Result<&Arc<dyn RemoteRepository>, BackupError> {
        self.remote.as_ref().ok_or(BackupError::RemoteDisabled)
    }

    fn remote_path(&self, name: &str) -> String {
        let prefix = self.config.remote_prefix.trim_matches('/');
        if prefix.is_empty() {
            name.to_owned()
        } else {
            format!("{prefix}/{name}")
        }
    }

    /// Upload a snapshot under `<prefix>/<name>`.
    ///
    /// An existing file is updated in place. A write that conflicts is
    /// retried once with the freshly read version before counting as a
    /// transient failure.
    pub async fn upload(&self, artifact: &BackupArtifact) -> Result<RemoteRef, BackupError> {
        let remote = self.remote()?;
        let content = tokio::fs::read(&artifact.path).await?;
        let path = self.remote_path(&artifact.name);
        let message = format!("Backup {}", artifact.name);

        let uploaded = self
            .config
            .retry
            .run(|| put_resolving_conflict(remote.as_ref(), &path, &content, &message))
            .await
            .map_err(|e| BackupError::Remote(e.into_inner()))?;

        tracing::info!(path = %uploaded.path, size = content.len(), "Snapshot uploaded");
        Ok(uploaded)
    }

    /// Remote snapshots, newest first by the timestamp in their names.
    pub async fn list_remote(&self) -> Result<Vec<RemoteArtifact>, BackupError> {
        let remote = self.remote()?;
        let prefix = self.config.remote_prefix.trim_matches('/');
        let entries = self
            .config
            .retry
            .run(|| remote.list(prefix))
            .await
            .map_err(|e| BackupError::Remote(e.into_inner()))?;

        let mut artifacts: Vec<RemoteArtifact> = entries
            .into_iter()
            .filter_map(|entry| {
                parse_snapshot_name(&entry.name).map(|created_at| RemoteArtifact {
                    name: entry.name,
                    path: entry.path,
                    sha: entry.sha,
                    created_at,
                })
            })
            .collect();
        artifacts.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(artifacts)
    }

    /// Fetch the named remote snapshot, or the newest one, into the local
    /// backup directory.
    pub async fn download(&self, name: Option<&str>) -> Result<PathBuf, BackupError> {
        let remote = self.remote()?;
        let artifacts = self.list_remote().await?;
        let chosen = match name {
            Some(name) => artifacts.into_iter().find(|a| a.name == name),
            None => artifacts.into_iter().next(),
        }
        .ok_or_else(|| BackupError::NotFound(name.unwrap_or("any remote snapshot").to_owned()))?;

        let content = self
            .config
            .retry
            .run(|| remote.get(&chosen.path))
            .await
            .map_err(|e| BackupError::Remote(e.into_inner()))?;
        if content.is_empty() {
            return Err(BackupError::Snapshot(format!("remote {} is empty", chosen.name)));
        }

        tokio::fs::create_dir_all(&self.config.backup_dir).await?;
        let target = self.config.backup_dir.join(&chosen.name);
        let partial = self.config.backup_dir.join(format!(".{}.download", chosen.name));
        tokio::fs::write(&partial, &content).await?;
        tokio::fs::rename(&partial, &target).await?;

        tracing::info!(name = %chosen.name, size = content.len(), "Snapshot downloaded");
        Ok(target)
    }

    /// Delete remote snapshots beyond the newest `keep`, oldest first.
    /// Individual failures are logged and skipped.
    pub async fn prune_remote(&self, keep: usize) -> Result<usize, BackupError> {
        let remote = self.remote()?;
        let mut doomed: Vec<RemoteArtifact> = self.list_remote().await?.into_iter().skip(keep).collect();
        doomed.reverse();

        let mut deleted: usize = 0;
        for artifact in doomed {
            let message = format!("Prune {}", artifact.name);
            let result = self
                .config
                .retry
                .run(|| remote.delete(&artifact.path, &artifact.sha, &message))
                .await;
            match result {
                Ok(()) => deleted = deleted.saturating_add(1),
                Err(e) => {
                    tracing::warn!(name = %artifact.name, error = %e, "Could not delete remote snapshot");
                }
            }
        }
        if deleted > 0 {
            tracing::info!(deleted, keep, "Pruned remote snapshots");
        }
        Ok(deleted)
    }

    // -----------------------------------------------------------------------
    // Whole-file replacement
    // -----------------------------------------------------------------------

    /// Replace the live store with `source`.
    ///
    /// `source` must pass an integrity check. The current live file is
    /// copied aside as `pre_restore_backup_<ts>.db` first.
    pub async fn restore(&self, source: &Path) -> Result<(), BackupError> {
        let _guard = self.file_lock.lock().await;
        self.restore_locked(source).await
    }

    async fn restore_locked(&self, source: &Path) -> Result<(), BackupError> {
        let size = tokio::fs::metadata(source).await?.len();
        if size == 0 {
            return Err(BackupError::Snapshot(format!("{} is empty", source.display())));
        }
        if let IntegrityStatus::Corrupt(details) = integrity_check_file(source).await {
            return Err(BackupError::Integrity {
                path: source.display().to_string(),
                details,
            });
        }

        let was_degraded = self.store.is_degraded();
        self.store.mark_degraded();

        let live = self.store.path().to_path_buf();
        let mut closed = false;
        if let Err(e) = self.swap_live_file(source, &live, &mut closed).await {
            if let Err(cleanup) = remove_if_exists(&sibling(&live, ".restoring")).await {
                tracing::warn!(error = %cleanup, "Could not remove restore staging file");
            }
            self.settle_after_failure(was_degraded, closed).await;
            return Err(e);
        }

        if !was_degraded {
            self.store.clear_degraded();
        }
        tracing::info!(source = %source.display(), "Store restored");
        Ok(())
    }

    /// Copy the live file aside and put `source` in its place. `closed`
    /// tracks whether the pool is currently shut.
    async fn swap_live_file(
        &self,
        source: &Path,
        live: &Path,
        closed: &mut bool,
    ) -> Result<(), BackupError> {
        tokio::fs::create_dir_all(&self.config.backup_dir).await?;
        if tokio::fs::try_exists(live).await? {
            // Flush what we can into the main file so the safety copy is complete.
            if let Err(e) = self.store.checkpoint().await {
                tracing::warn!(error = %e, "Checkpoint before restore failed");
            }
            let safety = self.config.backup_dir.join(pre_restore_name(Utc::now()));
            tokio::fs::copy(live, &safety).await?;
            tracing::info!(path = %safety.display(), "Saved pre-restore copy");
        }

        self.store.close().await;
        *closed = true;
        remove_side_files(live).await?;

        let staging = sibling(live, ".restoring");
        tokio::fs::copy(source, &staging).await?;
        tokio::fs::rename(&staging, live).await?;

        self.store.reopen().await?;
        *closed = false;
        if let IntegrityStatus::Corrupt(details) = self.store.integrity_check().await {
            return Err(BackupError::Integrity {
                path: live.display().to_string(),
                details,
            });
        }
        Ok(())
    }

    /// Bring the store back into service after a failed file replacement.
    ///
    /// The pool is reopened if it was left closed. The degraded flag is only
    /// lifted when it was clear before and the file now live passes its
    /// integrity check.
    async fn settle_after_failure(&self, was_degraded: bool, closed: bool) {
        let reopened = if closed { self.store.reopen().await } else { Ok(()) };
        if let Err(e) = reopened {
            tracing::error!(error = %e, "Could not reopen store after failed replacement, staying degraded");
            return;
        }
        if was_degraded {
            return;
        }
        match self.store.integrity_check().await {
            IntegrityStatus::Ok => self.store.clear_degraded(),
            IntegrityStatus::Corrupt(details) => {
                tracing::error!(details = %details, "Store corrupt after failed replacement, staying degraded");
            }
        }
    }

    /// Rebuild the live store from whatever is still readable.
    ///
    /// The readable contents are exported into a fresh file which must pass
    /// an integrity check; the damaged file is then quarantined as
    /// `<store>.corrupted_<ts>` and the fresh file takes its place.
    pub async fn repair(&self) -> Result<(), BackupError> {
        let _guard = self.file_lock.lock().await;
        self.repair_locked().await
    }

    async fn repair_locked(&self) -> Result<(), BackupError> {
        let live = self.store.path().to_path_buf();
        let fresh = sibling(&live, ".repair");
        remove_if_exists(&fresh).await?;

        if let Err(e) = self.store.vacuum_into(&fresh).await {
            remove_if_exists(&fresh).await?;
            return Err(e.into());
        }
        if let IntegrityStatus::Corrupt(details) = integrity_check_file(&fresh).await {
            remove_if_exists(&fresh).await?;
            return Err(BackupError::Integrity {
                path: fresh.display().to_string(),
                details,
            });
        }

        let was_degraded = self.store.is_degraded();
        self.store.mark_degraded();
        self.store.close().await;
        let quarantine = quarantine_path(&live, Utc::now());
        if let Err(e) = swap_in_repaired(&live, &fresh, &quarantine).await {
            if let Err(cleanup) = remove_if_exists(&fresh).await {
                tracing::warn!(error = %cleanup, "Could not remove repair file");
            }
            self.settle_after_failure(was_degraded, true).await;
            return Err(e);
        }
        if let Err(e) = self.store.reopen().await {
            self.settle_after_failure(was_degraded, true).await;
            return Err(e.into());
        }

        if let IntegrityStatus::Corrupt(details) = self.store.integrity_check().await {
            self.settle_after_failure(was_degraded, false).await;
            return Err(BackupError::Integrity {
                path: live.display().to_string(),
                details,
            });
        }
        if !was_degraded {
            self.store.clear_degraded();
        }
        tracing::info!(quarantine = %quarantine.display(), "Store repaired");
        Ok(())
    }

    /// Replace the live store with an empty one. Every row is lost; the
    /// old file is kept as a quarantine copy.
    pub async fn reinitialize_empty(&self) -> Result<(), BackupError> {
        let _guard = self.file_lock.lock().await;
        self.reinitialize_locked().await
    }

    async fn reinitialize_locked(&self) -> Result<(), BackupError> {
        let live = self.store.path().to_path_buf();
        self.store.close().await;
        if tokio::fs::try_exists(&live).await? {
            let quarantine = quarantine_path(&live, Utc::now());
            tokio::fs::rename(&live, &quarantine).await?;
            tracing::error!(
                quarantine = %quarantine.display(),
                "DATA LOSS: store reinitialized empty, previous file quarantined"
            );
        }
        remove_side_files(&live).await?;
        self.store.reopen().await?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Scheduled work
    // -----------------------------------------------------------------------

    /// Snapshot, upload, and prune both sides.
    ///
    /// A remote failure is reported in the result and never removes the
    /// local snapshot just produced.
    pub async fn run_backup_cycle(&self) -> Result<BackupCycleReport, BackupError> {
        let artifact = {
            let _guard = self.file_lock.lock().await;
            self.create_snapshot_locked().await?
        };

        let (uploaded, remote_error, pruned_remote) = if self.has_remote() {
            match self.upload(&artifact).await {
                Ok(uploaded) => {
                    let pruned = match self.prune_remote(self.config.keep_remote).await {
                        Ok(pruned) => pruned,
                        Err(e) => {
                            tracing::warn!(error = %e, "Remote prune failed");
                            0
                        }
                    };
                    (Some(uploaded), None, pruned)
                }
                Err(e) => {
                    tracing::warn!(name = %artifact.name, error = %e, "Upload failed, local snapshot kept");
                    (None, Some(e.to_string()), 0)
                }
            }
        } else {
            (None, Some(BackupError::RemoteDisabled.to_string()), 0)
        };

        let pruned_local = self.prune_local(self.config.keep_local.max(1)).await?;

        Ok(BackupCycleReport {
            artifact,
            uploaded,
            remote_error,
            pruned_local,
            pruned_remote,
        })
    }

    /// Run the integrity check and, on corruption, walk the recovery
    /// chain until one step succeeds.
    ///
    /// The store is degraded for the whole corrupt branch.
    pub async fn check_and_recover(&self) -> RecoveryOutcome {
        let _guard = self.file_lock.lock().await;
        transition(RecoveryState::Idle, RecoveryState::CheckIntegrity);

        let details = match self.store.integrity_check().await {
            IntegrityStatus::Ok => {
                transition(RecoveryState::CheckIntegrity, RecoveryState::Healthy);
                self.store.clear_degraded();
                transition(RecoveryState::Healthy, RecoveryState::Idle);
                return RecoveryOutcome::Healthy;
            }
            IntegrityStatus::Corrupt(details) => details,
        };

        tracing::error!(details = %details, "Store integrity check failed");
        transition(RecoveryState::CheckIntegrity, RecoveryState::Corrupt);
        self.store.mark_degraded();

        let outcome = self.recover_corrupt().await;
        if matches!(outcome, RecoveryOutcome::Failed(_)) {
            tracing::error!(?outcome, "Recovery failed, store stays degraded");
        } else {
            self.store.clear_degraded();
            tracing::info!(to = RecoveryState::Idle.as_str(), ?outcome, "Recovery finished");
        }
        outcome
    }

    async fn recover_corrupt(&self) -> RecoveryOutcome {
        transition(RecoveryState::Corrupt, RecoveryState::AttemptRepair);
        match self.repair_locked().await {
            Ok(()) => return RecoveryOutcome::Repaired,
            Err(e) => tracing::warn!(error = %e, "Repair failed"),
        }

        transition(RecoveryState::AttemptRepair, RecoveryState::AttemptLocalRestore);
        match self.list_local().await {
            Ok(artifacts) => {
                for artifact in artifacts {
                    match self.restore_locked(&artifact.path).await {
                        Ok(()) => return RecoveryOutcome::RestoredLocal(artifact.name),
                        Err(e) => {
                            tracing::warn!(name = %artifact.name, error = %e, "Local restore failed");
                        }
                    }
                }
                tracing::warn!("No usable local snapshot");
            }
            Err(e) => tracing::warn!(error = %e, "Could not list local snapshots"),
        }

        transition(RecoveryState::AttemptLocalRestore, RecoveryState::AttemptRemoteRestore);
        if self.has_remote() {
            match self.download(None).await {
                Ok(path) => {
                    let name = path
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_default();
                    match self.restore_locked(&path).await {
                        Ok(()) => return RecoveryOutcome::RestoredRemote(name),
                        Err(e) => tracing::warn!(name = %name, error = %e, "Remote restore failed"),
                    }
                }
                Err(e) => tracing::warn!(error = %e, "Remote download failed"),
            }
        } else {
            tracing::info!("Remote backup not configured, skipping remote restore");
        }

        transition(RecoveryState::AttemptRemoteRestore, RecoveryState::ReinitializeEmpty);
        match self.reinitialize_locked().await {
            Ok(()) => RecoveryOutcome::Reinitialized,
            Err(e) => RecoveryOutcome::Failed(e.to_string()),
        }
    }
}

/// Put `content` at `path`, creating or updating it. On a version
/// conflict the current version is read again and the write retried once.
async fn put_resolving_conflict(
    remote: &dyn RemoteRepository,
    path: &str,
    content: &[u8],
    message: &str,
) -> Result<RemoteRef, RemoteError> {
    let sha = remote.fetch_meta(path).await?.map(|meta| meta.sha);
    match remote.put(path, content, message, sha.as_deref()).await {
        Err(RemoteError::Conflict(details)) => {
            tracing::debug!(path, details = %details, "Remote write conflict, refreshing version");
            let sha = remote.fetch_meta(path).await?.map(|meta| meta.sha);
            remote.put(path, content, message, sha.as_deref()).await
        }
        other => other,
    }
}

fn transition(from: RecoveryState, to: RecoveryState) {
    if to == RecoveryState::ReinitializeEmpty {
        tracing::error!(from = from.as_str(), to = to.as_str(), "Recovery state transition");
    } else {
        tracing::info!(from = from.as_str(), to = to.as_str(), "Recovery state transition");
    }
}

/// `path` with `suffix` appended to its file name.
fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut raw: OsString = path.as_os_str().to_owned();
    raw.push(suffix);
    PathBuf::from(raw)
}

/// Files in `dir` whose names `parse` accepts, newest first. A missing
/// directory yields nothing.
async fn stamped_files(
    dir: &Path,
    parse: impl Fn(&str) -> Option<DateTime<Utc>>,
) -> Result<Vec<PathBuf>, BackupError> {
    let mut found: Vec<(DateTime<Utc>, PathBuf)> = Vec::new();
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().into_owned();
        if let Some(at) = parse(&name) {
            found.push((at, entry.path()));
        }
    }
    found.sort_by_key(|(at, _)| std::cmp::Reverse(*at));
    Ok(found.into_iter().map(|(_, path)| path).collect())
}

/// Delete every path after the first `keep`, logging failures.
async fn delete_beyond(paths: Vec<PathBuf>, keep: usize, kind: &str) -> usize {
    let mut deleted: usize = 0;
    for path in paths.into_iter().skip(keep) {
        match tokio::fs::remove_file(&path).await {
            Ok(()) => deleted = deleted.saturating_add(1),
            Err(e) => tracing::warn!(kind, path = %path.display(), error = %e, "Could not delete local backup file"),
        }
    }
    deleted
}

async fn remove_if_exists(path: &Path) -> Result<(), std::io::Error> {
    match tokio::fs::remove_file(path).await {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

/// Quarantine the damaged live file and move the repaired copy in. If the
/// repaired copy cannot be moved in, the damaged file is put back.
async fn swap_in_repaired(live: &Path, fresh: &Path, quarantine: &Path) -> Result<(), BackupError> {
    tokio::fs::rename(live, quarantine).await?;
    let moved = match remove_side_files(live).await {
        Ok(()) => tokio::fs::rename(fresh, live).await,
        Err(e) => Err(e),
    };
    if let Err(e) = moved {
        if let Err(undo) = tokio::fs::rename(quarantine, live).await {
            tracing::error!(error = %undo, "Could not put damaged store back after failed repair");
        }
        return Err(e.into());
    }
    Ok(())
}

async fn remove_side_files(live: &Path) -> Result<(), std::io::Error> {
    remove_if_exists(&sibling(live, "-wal")).await?;
    remove_if_exists(&sibling(live, "-shm")).await
}

/// Move an unopenable store file aside and put the newest usable local
/// snapshot in its place.
///
/// Used at startup when the store cannot even be opened, before a
/// [`Store`] exists to run [`BackupManager::check_and_recover`] on.
/// Returns the name of the snapshot restored, or `None` when no usable
/// snapshot exists and a fresh store will be created.
pub async fn salvage_unopenable_store(
    store_path: &Path,
    backup_dir: &Path,
) -> Result<Option<String>, BackupError> {
    if tokio::fs::try_exists(store_path).await? {
        let quarantine = quarantine_path(store_path, Utc::now());
        tokio::fs::rename(store_path, &quarantine).await?;
        tracing::error!(quarantine = %quarantine.display(), "Unopenable store quarantined");
    }
    remove_side_files(store_path).await?;

    let mut candidates: Vec<(chrono::DateTime<Utc>, PathBuf, String)> = Vec::new();
    if let Ok(mut dir) = tokio::fs::read_dir(backup_dir).await {
        while let Some(entry) = dir.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if let Some(created_at) = parse_snapshot_name(&name) {
                candidates.push((created_at, entry.path(), name));
            }
        }
    }
    candidates.sort_by(|a, b| b.0.cmp(&a.0));

    for (_, path, name) in candidates {
        if integrity_check_file(&path).await.is_ok() {
            tokio::fs::copy(&path, store_path).await?;
            tracing::warn!(name = %name, "Store salvaged from local snapshot");
            return Ok(Some(name));
        }
        tracing::warn!(name = %name, "Skipping unusable snapshot");
    }

    tracing::error!("DATA LOSS: no usable snapshot, a fresh store will be created");
    Ok(None)
}
