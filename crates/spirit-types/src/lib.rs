//! Shared type definitions for the Spirit economy bot.
//!
//! This crate is the single source of truth for the entities that flow
//! between the store, the ledger, the backup manager, and the command layer.
//!
//! # Modules
//!
//! - [`ids`] -- Platform id and UUID wrappers
//! - [`enums`] -- Transaction types, currencies, stat sides, coin faces
//! - [`structs`] -- Accounts, partial updates, monthly stats, log entries, grants

pub mod enums;
pub mod ids;
pub mod structs;

// Re-export all public types at crate root for convenience.
pub use enums::{CoinFace, Currency, StatSide, TransactionType};
pub use ids::{CardId, ChannelId, GuildId, RoleId, TransactionId, UserId};
pub use structs::{
    AccountDelta, AccountUpdate, LeaderboardEntry, Month, MonthParseError, MonthlyStat,
    NameChangeCard, NewTransaction, STARTING_LEVEL, STARTING_SPIRIT_POINTS, STREAK_LENGTH,
    TempAdminGrant, TransactionLogEntry, UserAccount,
};
