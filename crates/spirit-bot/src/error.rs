//! Error types for the bot binary.
//!
//! [`BotError`] covers the startup failures that stop the process.
//! Everything after startup is handled inside the loops and the pipeline.

/// Fatal startup error.
#[derive(Debug, thiserror::Error)]
pub enum BotError {
    /// Configuration loading failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: spirit_core::ConfigError,
    },

    /// The store could not be opened, even after salvage.
    #[error("store error: {source}")]
    Store {
        /// The underlying store error.
        #[from]
        source: spirit_db::DbError,
    },

    /// Salvaging an unopenable store failed.
    #[error("salvage error: {source}")]
    Salvage {
        /// The underlying backup error.
        #[from]
        source: spirit_backup::BackupError,
    },

    /// The platform rejected the bot token.
    #[error("platform rejected the bot token; fix DISCORD_BOT_TOKEN and restart")]
    InvalidToken,

    /// The platform client could not be built.
    #[error("platform error: {source}")]
    Platform {
        /// The underlying platform error.
        #[from]
        source: spirit_core::PlatformError,
    },

    /// The HTTP server could not start.
    #[error("server error: {source}")]
    Server {
        /// The underlying server error.
        #[from]
        source: spirit_observer::ServerError,
    },
}
