//! Balance-changing operations of the Spirit economy.
//!
//! Every command that moves Spirit Points (SP) or Spirit Stones (SS) goes
//! through [`Ledger`]. Each operation holds the per-user lock of every
//! account it touches for its whole read-compute-write span, validates
//! before mutating, and appends a transaction log entry after the write.
//!
//! # Modules
//!
//! - [`ledger`] -- The [`Ledger`] and its operation outcomes
//! - [`daily`] -- Daily claim and streak rules
//! - [`shop`] -- Catalog of purchasable items
//! - [`locks`] -- Per-user async locks
//! - [`config`] -- Economy tuning
//!
//! # Invariants
//!
//! - No account's `balance` or `spirit_points` is ever negative. Checks run
//!   before mutation and the store's conditional updates enforce them again.
//! - A gift either moves the full amount or changes nothing.
//! - Rejections ([`LedgerError::Validation`]) never mutate state.

pub mod config;
pub mod daily;
pub mod ledger;
pub mod locks;
pub mod shop;

pub use config::EconomyConfig;
pub use daily::{ClaimDecision, MemberTier, Progression, award_claim_xp, evaluate_claim, xp_to_next_level};
pub use ledger::{
    AdminOutcome, Amount, ClaimOutcome, CoinflipOutcome, ConversionReport, ExchangeOutcome,
    GiftOutcome, Ledger, PurchaseEffect, PurchaseOutcome, PurchaseRequest,
};
pub use locks::UserLocks;
pub use shop::{CATALOG, ShopItem, ShopItemKind};

use std::time::Duration;

use spirit_db::DbError;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Why a request was refused. The `Display` text is shown to the user.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    /// The amount was zero or negative.
    #[error("The amount must be a positive number.")]
    NonPositiveAmount,

    /// The amount is above the per-operation ceiling.
    #[error("The amount must not exceed {max}.")]
    AmountTooLarge {
        /// Largest allowed amount.
        max: i64,
    },

    /// Crediting the amount would overflow the receiving balance.
    #[error("That balance cannot hold any more.")]
    BalanceLimit,

    /// Not enough Spirit Points.
    #[error("Insufficient Spirit Points: you have {available} SP, {requested} SP needed.")]
    InsufficientSpiritPoints {
        /// Current Spirit Points.
        available: i64,
        /// Amount asked for.
        requested: i64,
    },

    /// Not enough Spirit Stones.
    #[error("Insufficient Spirit Stones: {available} SS available, {requested} SS needed.")]
    InsufficientBalance {
        /// Current Spirit Stones.
        available: i64,
        /// Amount asked for.
        requested: i64,
    },

    /// The wager is outside `1..=max` or above the bettor's Spirit Points.
    #[error("Bets must be between 1 and {max} SP and within your {available} SP.")]
    BetOutOfRange {
        /// Largest allowed wager.
        max: i64,
        /// Current Spirit Points.
        available: i64,
    },

    /// The daily reward was already claimed.
    #[error("You have already claimed your daily reward. Come back in {remaining_hours} hour(s).")]
    AlreadyClaimed {
        /// Whole hours until the next claim.
        remaining_hours: i64,
    },

    /// Sender and receiver are the same user.
    #[error("You cannot gift Spirit Stones to yourself.")]
    SelfGift,

    /// The sender gifted this receiver too recently.
    #[error("You can gift this member again in {wait}.")]
    GiftCooldown {
        /// Time until the pair may gift again.
        remaining: Duration,
        /// `remaining` rendered for display.
        wait: String,
    },

    /// No such shop item.
    #[error("No item named `{0}` in the shop.")]
    UnknownItem(String),

    /// The item needs a target member and a new nickname.
    #[error("This item needs a target member and a new nickname.")]
    MissingTarget,

    /// The nickname is empty or longer than the platform allows.
    #[error("Nicknames must be 1 to {max} characters long.")]
    InvalidNickname {
        /// Longest allowed nickname.
        max: usize,
    },

    /// The target holds a nickname lock.
    #[error("That member's nickname is locked.")]
    TargetNicknameLocked,

    /// The buyer already owns a nickname lock.
    #[error("Your nickname is already locked.")]
    NicknameAlreadyLocked,

    /// The buyer's level is below the item's requirement.
    #[error("You need to reach level {required} to buy this item (you are level {level}).")]
    LevelTooLow {
        /// Level the item requires.
        required: i32,
        /// Buyer's current level.
        level: i32,
    },

    /// The item can only be used inside a server.
    #[error("This item can only be bought inside a server.")]
    GuildOnly,
}

/// Errors from ledger operations.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// The request was refused before any state changed.
    #[error("{0}")]
    Validation(#[from] Rejection),

    /// The store failed or is degraded.
    #[error("store error: {0}")]
    Store(#[from] DbError),
}

impl LedgerError {
    /// The rejection, if this is a validation failure.
    pub const fn rejection(&self) -> Option<&Rejection> {
        match self {
            Self::Validation(rejection) => Some(rejection),
            Self::Store(_) => None,
        }
    }
}
