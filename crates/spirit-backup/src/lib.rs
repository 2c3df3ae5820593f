//! Backups and corruption recovery for the Spirit store.
//!
//! ```text
//!   Store ──VACUUM INTO──► backup_<ts>.db ──upload──► RemoteRepository
//!     ▲                          │                        │
//!     └──── restore / repair ◄───┴──────── download ◄─────┘
//! ```
//!
//! # Modules
//!
//! - [`artifact`] -- Snapshot, pre-restore, and quarantine file naming
//! - [`manager`] -- [`BackupManager`] and the recovery state machine
//! - [`remote`] -- The [`RemoteRepository`] port
//! - [`github`] -- GitHub contents API adapter
//! - [`error`] -- [`BackupError`] and [`RemoteError`]

pub mod artifact;
pub mod error;
pub mod github;
pub mod manager;
pub mod remote;

pub use artifact::{
    BackupArtifact, RemoteArtifact, parse_pre_restore_name, parse_quarantine_name,
    parse_snapshot_name, snapshot_name,
};
pub use error::{BackupError, RemoteError};
pub use github::{GitHubConfig, GitHubRepository};
pub use manager::{
    BackupConfig, BackupCycleReport, BackupManager, RecoveryOutcome, RecoveryState,
    salvage_unopenable_store,
};
pub use remote::{RemoteEntry, RemoteMeta, RemoteRef, RemoteRepository};
