//! Embedded `SQLite` store for the Spirit economy bot.
//!
//! One file holds every account, monthly stat, grant, and log entry. The
//! store is the only resource shared across concurrent command handlers.
//!
//! # Architecture
//!
//! ```text
//! Store (Arc, cheap clone)
//!     |
//!     +-- RwLock<SqlitePool>   (swapped by close/reopen during restore)
//!     +-- degraded flag        (writes refused while set)
//!     |
//!     +-- account_store        (accounts, transfers, leaderboards)
//!     +-- stats_store          (monthly wins/losses)
//!     +-- transaction_log      (append-only audit)
//!     +-- grant_store          (temp admin, name cards, nickname locks)
//!     +-- maintenance_state    (restart-safe bookkeeping)
//! ```
//!
//! # Modules
//!
//! - [`sqlite`] -- Pool, configuration, lifecycle, integrity check
//! - [`account_store`] -- Account reads and writes
//! - [`stats_store`] -- Monthly stat upsert, purge, and ranking
//! - [`transaction_log`] -- Log insertion and audit reads
//! - [`grant_store`] -- Time-limited grants and nickname locks
//! - [`maintenance_state`] -- Key/value bookkeeping
//! - [`error`] -- Shared error type

pub mod account_store;
pub mod error;
pub mod grant_store;
pub mod maintenance_state;
pub mod sqlite;
pub mod stats_store;
pub mod transaction_log;

// Re-export primary types for convenience.
pub use account_store::{AccountRow, ClaimRecord, Conversion, TransferOutcome};
pub use error::DbError;
pub use maintenance_state::LAST_CONVERSION_MONTH;
pub use sqlite::{IntegrityStatus, Store, StoreConfig, integrity_check_file};
pub use transaction_log::TransactionRow;
