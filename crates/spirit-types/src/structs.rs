//! Core entity structs for accounts, stats, the transaction log, and
//! time-limited grants.

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};

use crate::enums::{Currency, TransactionType};
use crate::ids::{CardId, GuildId, TransactionId, UserId};

/// Spirit Points granted to a freshly created account.
pub const STARTING_SPIRIT_POINTS: i64 = 100;

/// Exclusive upper bound of the daily streak counter.
pub const STREAK_LENGTH: i32 = 5;

/// Level of a freshly created account.
pub const STARTING_LEVEL: i32 = 1;

// ---------------------------------------------------------------------------
// Accounts
// ---------------------------------------------------------------------------

/// One account per platform user.
///
/// Rows are created lazily on first access with [`STARTING_SPIRIT_POINTS`]
/// and a zero balance. Both currencies are never negative.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserAccount {
    /// Owning platform user.
    pub user_id: UserId,
    /// Durable currency (Spirit Stones).
    pub balance: i64,
    /// Volatile currency (Spirit Points).
    pub spirit_points: i64,
    /// Last daily claim, if any.
    pub last_claim_at: Option<DateTime<Utc>>,
    /// Consecutive daily claims, in `0..STREAK_LENGTH`.
    pub streak: i32,
    /// Cultivation level, starting at [`STARTING_LEVEL`].
    pub level: i32,
    /// Experience gathered toward the next level.
    pub xp: i64,
    /// Row creation time. Never updated.
    pub created_at: DateTime<Utc>,
}

impl UserAccount {
    /// Amount held in the given currency.
    pub const fn amount(&self, currency: Currency) -> i64 {
        match currency {
            Currency::Balance => self.balance,
            Currency::SpiritPoints => self.spirit_points,
        }
    }
}

/// Typed partial update of the mutable account fields.
///
/// Only the fields listed here can be written; anything else on the row is
/// immutable by construction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccountUpdate {
    /// New Spirit Stone balance.
    pub balance: Option<i64>,
    /// New Spirit Point balance.
    pub spirit_points: Option<i64>,
    /// New last-claim timestamp. `Some(None)` clears it.
    pub last_claim_at: Option<Option<DateTime<Utc>>>,
    /// New streak counter.
    pub streak: Option<i32>,
    /// New level.
    pub level: Option<i32>,
    /// New experience toward the next level.
    pub xp: Option<i64>,
}

impl AccountUpdate {
    /// Whether no field is set.
    pub const fn is_empty(&self) -> bool {
        self.balance.is_none()
            && self.spirit_points.is_none()
            && self.last_claim_at.is_none()
            && self.streak.is_none()
            && self.level.is_none()
            && self.xp.is_none()
    }

    /// Whether any counter would be written below its floor: a negative
    /// currency or experience value, or a level under [`STARTING_LEVEL`].
    pub fn has_negative_amount(&self) -> bool {
        self.balance.is_some_and(i64::is_negative)
            || self.spirit_points.is_some_and(i64::is_negative)
            || self.xp.is_some_and(i64::is_negative)
            || self.level.is_some_and(|level| level < STARTING_LEVEL)
    }
}

/// Signed additive change applied to both currencies in one statement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AccountDelta {
    /// Change to `balance`.
    pub balance: i64,
    /// Change to `spirit_points`.
    pub spirit_points: i64,
}

impl AccountDelta {
    /// Change only the Spirit Stone balance.
    pub const fn balance(amount: i64) -> Self {
        Self {
            balance: amount,
            spirit_points: 0,
        }
    }

    /// Change only the Spirit Point balance.
    pub const fn spirit_points(amount: i64) -> Self {
        Self {
            balance: 0,
            spirit_points: amount,
        }
    }
}

/// One row of a currency leaderboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    /// Ranked user.
    pub user_id: UserId,
    /// Value of the ranked field.
    pub value: i64,
    /// The user's level, or [`STARTING_LEVEL`] if they have no account row.
    pub level: i32,
}

// ---------------------------------------------------------------------------
// Months and monthly stats
// ---------------------------------------------------------------------------

/// A calendar month in UTC, formatted `YYYY-MM`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Month(String);

/// A string that is not a `YYYY-MM` month.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid month {0:?}, expected YYYY-MM")]
pub struct MonthParseError(pub String);

impl Month {
    /// The month containing `at`.
    pub fn of(at: DateTime<Utc>) -> Self {
        Self(format!("{:04}-{:02}", at.year(), at.month()))
    }

    /// Parse and validate a `YYYY-MM` string.
    pub fn parse(raw: &str) -> Result<Self, MonthParseError> {
        let invalid = || MonthParseError(raw.to_owned());
        let (year, month) = raw.split_once('-').ok_or_else(invalid)?;
        if year.len() != 4 || month.len() != 2 {
            return Err(invalid());
        }
        let _year: u16 = year.parse().map_err(|_e| invalid())?;
        let month_num: u8 = month.parse().map_err(|_e| invalid())?;
        if !(1..=12).contains(&month_num) {
            return Err(invalid());
        }
        Ok(Self(raw.to_owned()))
    }

    /// Borrow the `YYYY-MM` string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for Month {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Month {
    type Error = MonthParseError;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        Self::parse(&raw)
    }
}

impl From<Month> for String {
    fn from(month: Month) -> Self {
        month.0
    }
}

/// Gambling totals for one user in one month.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonthlyStat {
    /// Owning user.
    pub user_id: UserId,
    /// Month the totals belong to.
    pub month: Month,
    /// Sum of all amounts won.
    pub wins: i64,
    /// Sum of all amounts lost.
    pub losses: i64,
}

// ---------------------------------------------------------------------------
// Transaction log
// ---------------------------------------------------------------------------

/// A transaction log entry awaiting insertion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTransaction {
    /// Account the entry documents.
    pub user_id: UserId,
    /// Category of the mutation.
    pub tx_type: TransactionType,
    /// Which balance `balance_before`/`balance_after` refer to.
    pub currency: Currency,
    /// Signed change.
    pub amount: i64,
    /// Balance before the mutation.
    pub balance_before: i64,
    /// Balance after the mutation.
    pub balance_after: i64,
    /// Free-form description.
    pub description: String,
    /// When the mutation happened.
    pub created_at: DateTime<Utc>,
}

/// A persisted, immutable transaction log entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionLogEntry {
    /// Entry identifier.
    pub id: TransactionId,
    /// Account the entry documents.
    pub user_id: UserId,
    /// Category of the mutation.
    pub tx_type: TransactionType,
    /// Which balance the before/after values refer to.
    pub currency: Currency,
    /// Signed change.
    pub amount: i64,
    /// Balance before the mutation.
    pub balance_before: i64,
    /// Balance after the mutation.
    pub balance_after: i64,
    /// Free-form description.
    pub description: String,
    /// When the mutation happened.
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Time-limited grants
// ---------------------------------------------------------------------------

/// A temporary admin role that the sweep removes at `expires_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TempAdminGrant {
    /// Holder of the role.
    pub user_id: UserId,
    /// When the role must be removed.
    pub expires_at: DateTime<Utc>,
    /// Guild the role lives in.
    pub guild_id: GuildId,
}

/// A nickname override that the sweep reverts at `expires_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameChangeCard {
    /// Card identifier.
    pub id: CardId,
    /// User who bought and used the card.
    pub owner_id: UserId,
    /// Member whose nickname was changed.
    pub target_id: UserId,
    /// Nickname to restore on expiry. `None` restores the account name.
    pub original_nickname: Option<String>,
    /// Nickname applied by the card.
    pub new_nickname: String,
    /// When the original nickname is restored.
    pub expires_at: DateTime<Utc>,
    /// Guild the nickname applies to.
    pub guild_id: GuildId,
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn month_of_timestamp() {
        let at = Utc.with_ymd_and_hms(2026, 3, 9, 23, 59, 0).single();
        let month = at.map(Month::of);
        assert_eq!(month.as_ref().map(Month::as_str), Some("2026-03"));
    }

    #[test]
    fn month_parsing_rejects_garbage() {
        assert!(Month::parse("2026-10").is_ok());
        assert!(Month::parse("2026-13").is_err());
        assert!(Month::parse("26-10").is_err());
        assert!(Month::parse("monthly").is_err());
    }

    #[test]
    fn account_update_flags() {
        assert!(AccountUpdate::default().is_empty());
        let update = AccountUpdate {
            balance: Some(-1),
            ..AccountUpdate::default()
        };
        assert!(!update.is_empty());
        assert!(update.has_negative_amount());

        let demotion = AccountUpdate {
            level: Some(0),
            ..AccountUpdate::default()
        };
        assert!(demotion.has_negative_amount());
        let promotion = AccountUpdate {
            level: Some(STARTING_LEVEL),
            xp: Some(0),
            ..AccountUpdate::default()
        };
        assert!(!promotion.has_negative_amount());
    }
}
