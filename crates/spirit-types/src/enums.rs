//! Enumeration types shared across the workspace.
//!
//! Every enum that is persisted has a stable lowercase database string
//! produced by `as_db_str` and parsed back with `from_db_str`. The database
//! never stores Rust debug names.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Transaction log types
// ---------------------------------------------------------------------------

/// The category of a ledger mutation recorded in the transaction log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    /// Periodic Spirit Point reward.
    DailyClaim,
    /// Spirit Points converted into Spirit Stones.
    Exchange,
    /// Coinflip won.
    GamblingWin,
    /// Coinflip lost.
    GamblingLoss,
    /// Shop item bought.
    ShopPurchase,
    /// Administrator credited Spirit Stones.
    AdminGrant,
    /// Administrator removed Spirit Stones.
    AdminRemove,
    /// Spirit Stones moved between two users.
    Gift,
    /// Month-boundary conversion of all Spirit Points.
    MonthlyConversion,
    /// A name change card was used on another member.
    NameChangeCard,
}

impl TransactionType {
    /// Stable database representation.
    pub const fn as_db_str(self) -> &'static str {
        match self {
            Self::DailyClaim => "daily_claim",
            Self::Exchange => "exchange",
            Self::GamblingWin => "gambling_win",
            Self::GamblingLoss => "gambling_loss",
            Self::ShopPurchase => "shop_purchase",
            Self::AdminGrant => "admin_grant",
            Self::AdminRemove => "admin_remove",
            Self::Gift => "gift",
            Self::MonthlyConversion => "monthly_conversion",
            Self::NameChangeCard => "name_change_card",
        }
    }

    /// Parse the database representation.
    pub fn from_db_str(raw: &str) -> Option<Self> {
        let parsed = match raw {
            "daily_claim" => Self::DailyClaim,
            "exchange" => Self::Exchange,
            "gambling_win" => Self::GamblingWin,
            "gambling_loss" => Self::GamblingLoss,
            "shop_purchase" => Self::ShopPurchase,
            "admin_grant" => Self::AdminGrant,
            "admin_remove" => Self::AdminRemove,
            "gift" => Self::Gift,
            "monthly_conversion" => Self::MonthlyConversion,
            "name_change_card" => Self::NameChangeCard,
            _ => return None,
        };
        Some(parsed)
    }
}

// ---------------------------------------------------------------------------
// Currencies
// ---------------------------------------------------------------------------

/// The two balances held on every account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Currency {
    /// Durable currency (Spirit Stones), stored in `balance`.
    Balance,
    /// Volatile currency (Spirit Points), stored in `spirit_points`.
    SpiritPoints,
}

impl Currency {
    /// Column name and database representation.
    pub const fn as_db_str(self) -> &'static str {
        match self {
            Self::Balance => "balance",
            Self::SpiritPoints => "spirit_points",
        }
    }

    /// Parse the database representation.
    pub fn from_db_str(raw: &str) -> Option<Self> {
        match raw {
            "balance" => Some(Self::Balance),
            "spirit_points" => Some(Self::SpiritPoints),
            _ => None,
        }
    }

    /// Short display suffix used in replies.
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Balance => "SS",
            Self::SpiritPoints => "SP",
        }
    }
}

// ---------------------------------------------------------------------------
// Monthly gambling stats
// ---------------------------------------------------------------------------

/// Which side of the monthly gambling record to rank by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatSide {
    /// Cumulative amount won this month.
    Wins,
    /// Cumulative amount lost this month.
    Losses,
}

impl StatSide {
    /// Column name in `monthly_stats`.
    pub const fn column(self) -> &'static str {
        match self {
            Self::Wins => "wins",
            Self::Losses => "losses",
        }
    }
}

// ---------------------------------------------------------------------------
// Coinflip
// ---------------------------------------------------------------------------

/// A face of the coin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoinFace {
    /// Heads.
    Heads,
    /// Tails.
    Tails,
}

impl CoinFace {
    /// Parse a user guess (`heads`/`tails`, case-insensitive, `h`/`t` accepted).
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "heads" | "head" | "h" => Some(Self::Heads),
            "tails" | "tail" | "t" => Some(Self::Tails),
            _ => None,
        }
    }

    /// Map a random boolean onto a face.
    pub const fn from_bool(heads: bool) -> Self {
        if heads { Self::Heads } else { Self::Tails }
    }

    /// Lowercase name for replies.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Heads => "heads",
            Self::Tails => "tails",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_TYPES: [TransactionType; 10] = [
        TransactionType::DailyClaim,
        TransactionType::Exchange,
        TransactionType::GamblingWin,
        TransactionType::GamblingLoss,
        TransactionType::ShopPurchase,
        TransactionType::AdminGrant,
        TransactionType::AdminRemove,
        TransactionType::Gift,
        TransactionType::MonthlyConversion,
        TransactionType::NameChangeCard,
    ];

    #[test]
    fn transaction_type_db_strings_are_stable() {
        for tx_type in ALL_TYPES {
            assert_eq!(
                TransactionType::from_db_str(tx_type.as_db_str()),
                Some(tx_type)
            );
        }
        assert_eq!(TransactionType::from_db_str("transfer"), None);
    }

    #[test]
    fn coin_guess_parsing() {
        assert_eq!(CoinFace::parse("HEADS"), Some(CoinFace::Heads));
        assert_eq!(CoinFace::parse("t"), Some(CoinFace::Tails));
        assert_eq!(CoinFace::parse("edge"), None);
    }
}
