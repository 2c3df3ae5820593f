//! `SQLite` connection pool, lifecycle, and integrity operations.
//!
//! The store is a single embedded file opened in WAL mode so readers are not
//! blocked by the writer. Every logical write runs inside a short
//! `BEGIN IMMEDIATE` transaction on one pooled connection, and the
//! connection returns to the pool when the transaction guard drops.
//!
//! The pool sits behind an async [`RwLock`] so the backup manager can close
//! it, replace the file, and reopen it without handing out a new [`Store`].
//!
//! Uses [`sqlx`] with runtime query construction (not compile-time checked)
//! so no live database is needed at build time.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::{Sqlite, Transaction};
use tokio::sync::RwLock;

use crate::error::DbError;

/// Default maximum number of pooled connections.
const DEFAULT_MAX_CONNECTIONS: u32 = 5;

/// Hard bounds on the pool size.
const MIN_CONNECTIONS: u32 = 1;
const MAX_CONNECTIONS: u32 = 5;

/// Default time to wait for a pooled connection.
const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 5;

/// Default `SQLite` busy timeout.
const DEFAULT_BUSY_TIMEOUT_SECS: u64 = 5;

/// Configuration for the store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Path of the live database file.
    pub path: PathBuf,
    /// Maximum number of pooled connections, clamped to `1..=5`.
    pub max_connections: u32,
    /// How long a caller waits for a free connection.
    pub acquire_timeout: Duration,
    /// How long `SQLite` retries a locked database before failing.
    pub busy_timeout: Duration,
}

impl StoreConfig {
    /// Create a configuration for the file at `path` with default pool settings.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            acquire_timeout: Duration::from_secs(DEFAULT_ACQUIRE_TIMEOUT_SECS),
            busy_timeout: Duration::from_secs(DEFAULT_BUSY_TIMEOUT_SECS),
        }
    }

    /// Set the maximum number of connections.
    #[must_use]
    pub const fn with_max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    /// Set the connection acquire timeout.
    #[must_use]
    pub const fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// Set the `SQLite` busy timeout.
    #[must_use]
    pub const fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    fn clamped_connections(&self) -> u32 {
        self.max_connections.clamp(MIN_CONNECTIONS, MAX_CONNECTIONS)
    }
}

/// Result of `PRAGMA integrity_check`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntegrityStatus {
    /// The check reported `ok`.
    Ok,
    /// The check reported problems, or could not run at all.
    Corrupt(String),
}

impl IntegrityStatus {
    /// Whether the file passed the check.
    pub const fn is_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }
}

struct StoreInner {
    config: StoreConfig,
    pool: RwLock<SqlitePool>,
    degraded: AtomicBool,
}

/// Handle to the embedded store.
///
/// Cheap to clone; all clones share the same pool and degraded flag.
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("path", &self.inner.config.path)
            .field("degraded", &self.is_degraded())
            .finish_non_exhaustive()
    }
}

impl Store {
    /// Open (or create) the store file and run pending migrations.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Sqlite`] if the file cannot be opened and
    /// [`DbError::Migration`] if a migration fails.
    pub async fn connect(config: StoreConfig) -> Result<Self, DbError> {
        let pool = open_pool(&config).await?;
        run_migrations(&pool).await?;

        tracing::info!(
            path = %config.path.display(),
            max_connections = config.clamped_connections(),
            "Opened SQLite store"
        );

        Ok(Self {
            inner: Arc::new(StoreInner {
                config,
                pool: RwLock::new(pool),
                degraded: AtomicBool::new(false),
            }),
        })
    }

    /// Path of the live database file.
    pub fn path(&self) -> &Path {
        &self.inner.config.path
    }

    /// Clone the current pool handle.
    pub async fn pool(&self) -> SqlitePool {
        self.inner.pool.read().await.clone()
    }

    /// Begin an exclusive write transaction, refusing while degraded.
    pub(crate) async fn begin_write(&self) -> Result<Transaction<'static, Sqlite>, DbError> {
        self.ensure_writable()?;
        let pool = self.pool().await;
        Ok(pool.begin_with("BEGIN IMMEDIATE").await?)
    }

    /// Fail with [`DbError::Degraded`] while recovery is pending.
    pub(crate) fn ensure_writable(&self) -> Result<(), DbError> {
        if self.is_degraded() {
            return Err(DbError::Degraded);
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Degraded state
    // -----------------------------------------------------------------------

    /// Refuse writes until [`Store::clear_degraded`] is called.
    pub fn mark_degraded(&self) {
        if !self.inner.degraded.swap(true, Ordering::SeqCst) {
            tracing::warn!(path = %self.path().display(), "Store marked degraded");
        }
    }

    /// Accept writes again.
    pub fn clear_degraded(&self) {
        if self.inner.degraded.swap(false, Ordering::SeqCst) {
            tracing::info!(path = %self.path().display(), "Store degraded flag cleared");
        }
    }

    /// Whether writes are currently refused.
    pub fn is_degraded(&self) -> bool {
        self.inner.degraded.load(Ordering::SeqCst)
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Close every pooled connection. Calls made before [`Store::reopen`]
    /// fail with a pool-closed error.
    pub async fn close(&self) {
        let pool = self.inner.pool.read().await;
        pool.close().await;
        tracing::info!(path = %self.path().display(), "SQLite pool closed");
    }

    /// Replace the pool with a fresh one over the file now at [`Store::path`].
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the file cannot be opened or migrated.
    pub async fn reopen(&self) -> Result<(), DbError> {
        let mut guard = self.inner.pool.write().await;
        guard.close().await;
        let fresh = open_pool(&self.inner.config).await?;
        run_migrations(&fresh).await?;
        *guard = fresh;
        tracing::info!(path = %self.path().display(), "SQLite pool reopened");
        Ok(())
    }

    /// Cheap reachability probe.
    pub async fn ping(&self) -> bool {
        let pool = self.pool().await;
        sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&pool)
            .await
            .is_ok()
    }

    // -----------------------------------------------------------------------
    // Integrity and file-level operations
    // -----------------------------------------------------------------------

    /// Run `PRAGMA integrity_check` on the live file.
    ///
    /// A check that cannot run at all (for example because the header is
    /// unreadable) is reported as [`IntegrityStatus::Corrupt`].
    pub async fn integrity_check(&self) -> IntegrityStatus {
        let pool = self.pool().await;
        integrity_check_pool(&pool).await
    }

    /// Force a WAL checkpoint that truncates the `-wal` file.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Sqlite`] if the checkpoint fails.
    pub async fn checkpoint(&self) -> Result<(), DbError> {
        let pool = self.pool().await;
        sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)")
            .execute(&pool)
            .await?;
        tracing::debug!("WAL checkpoint completed");
        Ok(())
    }

    /// Write a compacted, consistent copy of the live database to `target`.
    ///
    /// `target` must not exist yet.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Sqlite`] if `VACUUM INTO` fails.
    pub async fn vacuum_into(&self, target: &Path) -> Result<(), DbError> {
        let target = target
            .to_str()
            .ok_or_else(|| DbError::Config(format!("non UTF-8 path {}", target.display())))?;
        let pool = self.pool().await;
        sqlx::query("VACUUM INTO ?")
            .bind(target)
            .execute(&pool)
            .await?;
        Ok(())
    }
}

/// Run `PRAGMA integrity_check` on the database file at `path` without
/// touching the live pool.
pub async fn integrity_check_file(path: &Path) -> IntegrityStatus {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(false);
    match SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
    {
        Ok(pool) => {
            let status = integrity_check_pool(&pool).await;
            pool.close().await;
            status
        }
        Err(e) => IntegrityStatus::Corrupt(format!("cannot open {}: {e}", path.display())),
    }
}

async fn integrity_check_pool(pool: &SqlitePool) -> IntegrityStatus {
    match sqlx::query_scalar::<_, String>("PRAGMA integrity_check")
        .fetch_all(pool)
        .await
    {
        Ok(lines) if lines.len() == 1 && lines.first().is_some_and(|l| l == "ok") => {
            IntegrityStatus::Ok
        }
        Ok(lines) => IntegrityStatus::Corrupt(lines.join("; ")),
        Err(e) => IntegrityStatus::Corrupt(e.to_string()),
    }
}

async fn open_pool(config: &StoreConfig) -> Result<SqlitePool, DbError> {
    let options = SqliteConnectOptions::new()
        .filename(&config.path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .foreign_keys(true)
        .busy_timeout(config.busy_timeout);

    let pool = SqlitePoolOptions::new()
        .max_connections(config.clamped_connections())
        .acquire_timeout(config.acquire_timeout)
        .connect_with(options)
        .await?;
    Ok(pool)
}

async fn run_migrations(pool: &SqlitePool) -> Result<(), DbError> {
    sqlx::migrate!("./migrations").run(pool).await?;
    tracing::debug!("Store migrations completed");
    Ok(())
}

// ---------------------------------------------------------------------------
// Timestamp encoding
// ---------------------------------------------------------------------------

/// Encode a timestamp as fixed-width RFC 3339 UTC text.
pub(crate) fn encode_ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Decode a stored RFC 3339 timestamp.
pub(crate) fn decode_ts(raw: &str) -> Result<DateTime<Utc>, DbError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DbError::Decode(format!("timestamp {raw:?}: {e}")))
}
