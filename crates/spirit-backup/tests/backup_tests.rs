//! Integration tests for snapshots, remote shipping, restore, and recovery.
//!
//! The remote side is an in-memory [`RemoteRepository`] so no network is
//! touched.

// Integration tests use expect/unwrap extensively for clarity -- panicking
// on failure is the correct behavior in test code.
#![allow(
    clippy::expect_used,
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    clippy::indexing_slicing,
    clippy::arithmetic_side_effects
)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use spirit_backup::{
    BackupConfig, BackupError, BackupManager, RecoveryOutcome, RemoteEntry, RemoteError,
    RemoteMeta, RemoteRef, RemoteRepository, salvage_unopenable_store,
};
use spirit_db::{IntegrityStatus, Store, StoreConfig, integrity_check_file};
use spirit_resilience::RetryPolicy;
use spirit_types::{AccountDelta, UserId};
use tempfile::TempDir;

// =============================================================================
// In-memory remote
// =============================================================================

#[derive(Default)]
struct MemoryRemote {
    files: Mutex<HashMap<String, (Vec<u8>, String)>>,
    version: AtomicU32,
    puts: AtomicU32,
    conflicts_left: AtomicU32,
    forbid_writes: bool,
}

impl MemoryRemote {
    fn forbidding() -> Self {
        Self {
            forbid_writes: true,
            ..Self::default()
        }
    }

    fn with_conflicts(n: u32) -> Self {
        let remote = Self::default();
        remote.conflicts_left.store(n, Ordering::SeqCst);
        remote
    }

    fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.files.lock().unwrap().keys().cloned().collect();
        names.sort();
        names
    }
}

#[async_trait]
impl RemoteRepository for MemoryRemote {
    async fn fetch_meta(&self, path: &str) -> Result<Option<RemoteMeta>, RemoteError> {
        Ok(self.files.lock().unwrap().get(path).map(|(bytes, sha)| RemoteMeta {
            sha: sha.clone(),
            size: bytes.len() as u64,
        }))
    }

    async fn put(
        &self,
        path: &str,
        content: &[u8],
        _message: &str,
        sha: Option<&str>,
    ) -> Result<RemoteRef, RemoteError> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        if self.forbid_writes {
            return Err(RemoteError::Forbidden("read-only token".to_owned()));
        }
        if self
            .conflicts_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(RemoteError::Conflict("sha does not match".to_owned()));
        }

        let mut files = self.files.lock().unwrap();
        let current = files.get(path).map(|(_, sha)| sha.clone());
        if current.as_deref() != sha {
            return Err(RemoteError::Conflict("sha does not match".to_owned()));
        }
        let next = format!("v{}", self.version.fetch_add(1, Ordering::SeqCst));
        files.insert(path.to_owned(), (content.to_vec(), next.clone()));
        Ok(RemoteRef {
            path: path.to_owned(),
            sha: next,
        })
    }

    async fn list(&self, dir: &str) -> Result<Vec<RemoteEntry>, RemoteError> {
        let prefix = format!("{dir}/");
        Ok(self
            .files
            .lock()
            .unwrap()
            .iter()
            .filter_map(|(path, (_, sha))| {
                path.strip_prefix(&prefix).map(|name| RemoteEntry {
                    name: name.to_owned(),
                    path: path.clone(),
                    sha: sha.clone(),
                })
            })
            .collect())
    }

    async fn get(&self, path: &str) -> Result<Vec<u8>, RemoteError> {
        self.files
            .lock()
            .unwrap()
            .get(path)
            .map(|(bytes, _)| bytes.clone())
            .ok_or_else(|| RemoteError::NotFound(path.to_owned()))
    }

    async fn delete(&self, path: &str, sha: &str, _message: &str) -> Result<(), RemoteError> {
        let mut files = self.files.lock().unwrap();
        match files.get(path) {
            Some((_, current)) if current == sha => {
                files.remove(path);
                Ok(())
            }
            Some(_) => Err(RemoteError::Conflict(path.to_owned())),
            None => Err(RemoteError::NotFound(path.to_owned())),
        }
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn fast_retry() -> RetryPolicy {
    RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(5))
}

async fn open(dir: &TempDir) -> Store {
    Store::connect(StoreConfig::new(dir.path().join("spirit.db")))
        .await
        .expect("open store")
}

fn manager(dir: &TempDir, store: &Store, remote: Option<Arc<dyn RemoteRepository>>) -> BackupManager {
    BackupManager::new(
        store.clone(),
        BackupConfig::new(dir.path().join("backups")).with_retry(fast_retry()),
        remote,
    )
}

async fn fund(store: &Store, id: &str, balance: i64) {
    let user = UserId::new(id);
    store.get_or_create_account(&user).await.expect("create");
    store
        .adjust_account(&user, AccountDelta::balance(balance))
        .await
        .expect("adjust")
        .expect("funded");
}

async fn balance(store: &Store, id: &str) -> Option<i64> {
    store
        .find_account(&UserId::new(id))
        .await
        .expect("find")
        .map(|a| a.balance)
}

async fn plant_snapshot(source: &Path, backup_dir: &Path, name: &str) {
    tokio::fs::create_dir_all(backup_dir).await.unwrap();
    tokio::fs::copy(source, backup_dir.join(name)).await.unwrap();
}

// =============================================================================
// Local snapshots and restore
// =============================================================================

#[tokio::test]
async fn snapshot_then_restore_returns_exact_rows() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(&dir).await;
    let backups = manager(&dir, &store, None);

    fund(&store, "alice", 500).await;
    fund(&store, "bob", 20).await;

    let artifact = backups.create_snapshot().await.expect("snapshot");
    assert!(artifact.size > 0);
    assert!(artifact.name.starts_with("backup_"));
    assert!(integrity_check_file(&artifact.path).await.is_ok());

    fund(&store, "carol", 999).await;
    store
        .adjust_account(&UserId::new("alice"), AccountDelta::balance(-400))
        .await
        .unwrap();

    backups.restore(&artifact.path).await.expect("restore");

    assert_eq!(balance(&store, "alice").await, Some(500));
    assert_eq!(balance(&store, "bob").await, Some(20));
    assert_eq!(balance(&store, "carol").await, None);
    assert_eq!(store.count_accounts().await.unwrap(), 2);
    assert!(!store.is_degraded());

    let pre_restore: Vec<_> = std::fs::read_dir(dir.path().join("backups"))
        .unwrap()
        .filter_map(Result::ok)
        .filter(|e| e.file_name().to_string_lossy().starts_with("pre_restore_backup_"))
        .collect();
    assert_eq!(pre_restore.len(), 1);
}

#[tokio::test]
async fn restore_rejects_a_corrupt_source_without_touching_the_store() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(&dir).await;
    let backups = manager(&dir, &store, None);
    fund(&store, "alice", 10).await;

    let garbage = dir.path().join("garbage.db");
    std::fs::write(&garbage, vec![0x5a_u8; 8192]).unwrap();

    let err = backups.restore(&garbage).await.unwrap_err();
    assert!(matches!(err, BackupError::Integrity { .. }));
    assert_eq!(balance(&store, "alice").await, Some(10));
    assert!(!store.is_degraded());
}

#[tokio::test]
async fn failed_restore_puts_the_store_back_in_service() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(&dir).await;
    fund(&store, "alice", 75).await;
    let artifact = manager(&dir, &store, None).create_snapshot().await.unwrap();

    // A regular file where the backup directory should be.
    let blocked = dir.path().join("not-a-dir");
    std::fs::write(&blocked, b"occupied").unwrap();
    let broken = BackupManager::new(
        store.clone(),
        BackupConfig::new(&blocked).with_retry(fast_retry()),
        None,
    );

    let result = broken.restore(&artifact.path).await;
    assert!(matches!(result, Err(BackupError::Io(_))), "{result:?}");
    assert!(!store.is_degraded());
    assert_eq!(balance(&store, "alice").await, Some(75));
    fund(&store, "bob", 5).await;
    assert_eq!(balance(&store, "bob").await, Some(5));
}

#[tokio::test]
async fn healthy_check_lifts_a_stale_degraded_flag() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(&dir).await;
    let backups = manager(&dir, &store, None);
    store.mark_degraded();

    assert_eq!(backups.check_and_recover().await, RecoveryOutcome::Healthy);
    assert!(!store.is_degraded());
    fund(&store, "alice", 1).await;
}

#[tokio::test]
async fn local_prune_also_bounds_recovery_leftovers() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(&dir).await;
    let backups = manager(&dir, &store, None);
    let backup_dir = dir.path().join("backups");
    std::fs::create_dir_all(&backup_dir).unwrap();

    for stamp in ["20240101_000000", "20250101_000000", "20260101_000000"] {
        std::fs::write(backup_dir.join(format!("pre_restore_backup_{stamp}.db")), b"x").unwrap();
        std::fs::write(dir.path().join(format!("spirit.db.corrupted_{stamp}")), b"x").unwrap();
    }

    let deleted = backups.prune_local(1).await.unwrap();
    assert_eq!(deleted, 4);
    assert!(backup_dir.join("pre_restore_backup_20260101_000000.db").exists());
    assert!(!backup_dir.join("pre_restore_backup_20240101_000000.db").exists());
    assert!(dir.path().join("spirit.db.corrupted_20260101_000000").exists());
    assert!(!dir.path().join("spirit.db.corrupted_20250101_000000").exists());
    assert!(dir.path().join("spirit.db").exists());
}

#[tokio::test]
async fn local_listing_is_newest_first_and_prunes_oldest() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(&dir).await;
    let backups = manager(&dir, &store, None);
    let artifact = backups.create_snapshot().await.unwrap();
    let backup_dir = dir.path().join("backups");

    for name in [
        "backup_20200101_000000.db",
        "backup_20210101_000000.db",
        "backup_20220101_000000.db",
    ] {
        plant_snapshot(&artifact.path, &backup_dir, name).await;
    }
    std::fs::write(backup_dir.join("notes.txt"), b"ignored").unwrap();

    let listed = backups.list_local().await.unwrap();
    assert_eq!(listed.len(), 4);
    assert_eq!(listed[0].name, artifact.name);
    assert_eq!(listed[3].name, "backup_20200101_000000.db");

    let deleted = backups.prune_local(2).await.unwrap();
    assert_eq!(deleted, 2);
    let names: Vec<String> = backups
        .list_local()
        .await
        .unwrap()
        .into_iter()
        .map(|a| a.name)
        .collect();
    assert_eq!(names, vec![artifact.name, "backup_20220101_000000.db".to_owned()]);
    assert!(backup_dir.join("notes.txt").exists());
}

#[tokio::test]
async fn repair_rebuilds_a_healthy_store_and_quarantines_the_old_file() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(&dir).await;
    let backups = manager(&dir, &store, None);
    fund(&store, "alice", 42).await;

    backups.repair().await.expect("repair");

    assert_eq!(balance(&store, "alice").await, Some(42));
    assert_eq!(store.integrity_check().await, IntegrityStatus::Ok);
    let quarantined = std::fs::read_dir(dir.path())
        .unwrap()
        .filter_map(Result::ok)
        .any(|e| e.file_name().to_string_lossy().starts_with("spirit.db.corrupted_"));
    assert!(quarantined);
}

#[tokio::test]
async fn healthy_store_needs_no_recovery() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(&dir).await;
    let backups = manager(&dir, &store, None);
    assert_eq!(backups.check_and_recover().await, RecoveryOutcome::Healthy);
    assert!(!store.is_degraded());
}

#[tokio::test]
async fn corrupted_pages_are_recovered() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(&dir).await;
    let backups = manager(&dir, &store, None);

    for i in 0..400 {
        fund(&store, &format!("{i:0>48}"), 1 + i64::from(i)).await;
    }
    let artifact = backups.create_snapshot().await.unwrap();
    store.checkpoint().await.unwrap();
    store.close().await;

    let live = dir.path().join("spirit.db");
    let mut bytes = std::fs::read(&live).unwrap();
    let half = bytes.len() / 2;
    for b in &mut bytes[half..] {
        *b = 0xa5;
    }
    std::fs::write(&live, &bytes).unwrap();
    store.reopen().await.expect("header still readable");
    assert!(!store.integrity_check().await.is_ok());

    let outcome = backups.check_and_recover().await;
    assert!(
        matches!(outcome, RecoveryOutcome::Repaired | RecoveryOutcome::RestoredLocal(_)),
        "unexpected outcome {outcome:?}"
    );
    assert_eq!(store.integrity_check().await, IntegrityStatus::Ok);
    assert!(!store.is_degraded());
    if let RecoveryOutcome::RestoredLocal(name) = outcome {
        assert_eq!(name, artifact.name);
        assert_eq!(store.count_accounts().await.unwrap(), 400);
    }
}

#[tokio::test]
async fn salvage_replaces_an_unopenable_file_with_the_newest_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let live = dir.path().join("spirit.db");
    let backup_dir = dir.path().join("backups");
    {
        let store = open(&dir).await;
        fund(&store, "alice", 77).await;
        let artifact = manager(&dir, &store, None).create_snapshot().await.unwrap();
        plant_snapshot(&artifact.path, &backup_dir, "backup_20200101_000000.db").await;
        store.close().await;
    }
    std::fs::write(&live, b"definitely not sqlite").unwrap();

    let restored = salvage_unopenable_store(&live, &backup_dir).await.unwrap();
    assert!(restored.is_some_and(|name| name != "backup_20200101_000000.db"));

    let store = open(&dir).await;
    assert_eq!(balance(&store, "alice").await, Some(77));
}

#[tokio::test]
async fn salvage_without_snapshots_leaves_room_for_a_fresh_store() {
    let dir = tempfile::tempdir().unwrap();
    let live = dir.path().join("spirit.db");
    std::fs::write(&live, b"definitely not sqlite").unwrap();

    let restored = salvage_unopenable_store(&live, &dir.path().join("backups"))
        .await
        .unwrap();
    assert_eq!(restored, None);
    assert!(!live.exists());

    let store = open(&dir).await;
    assert_eq!(store.count_accounts().await.unwrap(), 0);
}

#[tokio::test]
async fn reinitialize_empty_drops_every_row() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(&dir).await;
    let backups = manager(&dir, &store, None);
    fund(&store, "alice", 5).await;

    backups.reinitialize_empty().await.unwrap();
    assert_eq!(store.count_accounts().await.unwrap(), 0);
}

// =============================================================================
// Remote
// =============================================================================

#[tokio::test]
async fn without_remote_uploads_are_disabled_but_cycles_succeed() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(&dir).await;
    let backups = manager(&dir, &store, None);

    let artifact = backups.create_snapshot().await.unwrap();
    assert!(matches!(
        backups.upload(&artifact).await,
        Err(BackupError::RemoteDisabled)
    ));

    let report = backups.run_backup_cycle().await.unwrap();
    assert!(report.uploaded.is_none());
    assert!(report.remote_error.is_some());
    assert!(report.artifact.path.exists());
}

#[tokio::test]
async fn upload_download_restore_through_remote() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(&dir).await;
    let remote = Arc::new(MemoryRemote::default());
    let backups = manager(&dir, &store, Some(remote.clone()));
    fund(&store, "alice", 300).await;

    let report = backups.run_backup_cycle().await.unwrap();
    let uploaded = report.uploaded.expect("uploaded");
    assert_eq!(uploaded.path, format!("backups/{}", report.artifact.name));
    assert_eq!(remote.names(), vec![uploaded.path.clone()]);

    // Uploading the same artifact again updates it in place.
    backups.upload(&report.artifact).await.unwrap();
    assert_eq!(remote.names().len(), 1);

    std::fs::remove_file(&report.artifact.path).unwrap();
    fund(&store, "alice", 1).await;

    let downloaded = backups.download(None).await.unwrap();
    backups.restore(&downloaded).await.unwrap();
    assert_eq!(balance(&store, "alice").await, Some(300));
}

#[tokio::test]
async fn conflicting_upload_refreshes_version_and_succeeds() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(&dir).await;
    let remote = Arc::new(MemoryRemote::with_conflicts(1));
    let backups = manager(&dir, &store, Some(remote.clone()));

    let artifact = backups.create_snapshot().await.unwrap();
    backups.upload(&artifact).await.expect("upload");
    assert_eq!(remote.puts.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn forbidden_upload_is_not_retried_and_keeps_local_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(&dir).await;
    let remote = Arc::new(MemoryRemote::forbidding());
    let backups = manager(&dir, &store, Some(remote.clone()));

    let report = backups.run_backup_cycle().await.unwrap();
    assert!(report.uploaded.is_none());
    assert!(report.remote_error.is_some());
    assert_eq!(remote.puts.load(Ordering::SeqCst), 1);
    assert!(report.artifact.path.exists());
}

#[tokio::test]
async fn remote_prune_keeps_newest() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(&dir).await;
    let remote = Arc::new(MemoryRemote::default());
    let backups = manager(&dir, &store, Some(remote.clone()));

    for name in [
        "backup_20200101_000000.db",
        "backup_20210101_000000.db",
        "backup_20220101_000000.db",
    ] {
        remote
            .put(&format!("backups/{name}"), b"x", "seed", None)
            .await
            .unwrap();
    }
    remote
        .put("backups/README.md", b"x", "seed", None)
        .await
        .unwrap();

    let listed = backups.list_remote().await.unwrap();
    assert_eq!(listed.len(), 3);
    assert_eq!(listed[0].name, "backup_20220101_000000.db");

    assert_eq!(backups.prune_remote(1).await.unwrap(), 2);
    assert_eq!(
        remote.names(),
        vec![
            "backups/README.md".to_owned(),
            "backups/backup_20220101_000000.db".to_owned()
        ]
    );
}

#[tokio::test]
async fn download_of_unknown_name_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(&dir).await;
    let backups = manager(&dir, &store, Some(Arc::new(MemoryRemote::default())));
    assert!(matches!(
        backups.download(Some("backup_19990101_000000.db")).await,
        Err(BackupError::NotFound(_))
    ));
}
