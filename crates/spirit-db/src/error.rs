//! Error types for the store.
//!
//! All errors are propagated via [`DbError`] which wraps the underlying
//! [`sqlx`] errors with additional context about which operation failed.

/// Errors that can occur in the store.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// A `SQLite` operation failed.
    #[error("SQLite error: {0}")]
    Sqlite(#[from] sqlx::Error),

    /// A migration failed.
    #[error("SQLite migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A filesystem operation on the store file failed.
    #[error("store file I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The store is degraded after a failed integrity check and refuses writes.
    #[error("store is degraded, writes are refused until recovery completes")]
    Degraded,

    /// A row that must exist was missing.
    #[error("row not found: {0}")]
    NotFound(String),

    /// A stored value could not be decoded into its domain type.
    #[error("decode error: {0}")]
    Decode(String),

    /// A caller passed a value the store refuses to write.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

impl DbError {
    /// Whether the error indicates on-disk corruption rather than a
    /// transient condition such as a busy database.
    pub fn is_corruption(&self) -> bool {
        match self {
            Self::Sqlite(sqlx::Error::Database(db)) => {
                let message = db.message();
                message.contains("malformed") || message.contains("not a database")
            }
            _ => false,
        }
    }
}
