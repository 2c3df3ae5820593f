//! Account rows: lazy creation, typed partial updates, conditional
//! additive adjustments, atomic transfers, and leaderboards.
//!
//! Every mutation that could drive a currency below zero is expressed as a
//! conditional `UPDATE ... WHERE balance + ? >= 0`, so the check and the
//! write happen in one statement.

use chrono::{DateTime, Utc};
use spirit_types::{AccountDelta, AccountUpdate, Currency, LeaderboardEntry, UserAccount, UserId};
use sqlx::{QueryBuilder, Sqlite};

use crate::error::DbError;
use crate::sqlite::{Store, decode_ts, encode_ts};

const ACCOUNT_COLUMNS: &str =
    "user_id, balance, spirit_points, last_claim_at, streak, level, xp, created_at";

/// Database row representation of an account.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AccountRow {
    /// Platform user id.
    pub user_id: String,
    /// Spirit Stones.
    pub balance: i64,
    /// Spirit Points.
    pub spirit_points: i64,
    /// RFC 3339 text, if the user ever claimed.
    pub last_claim_at: Option<String>,
    /// Streak counter.
    pub streak: i64,
    /// Cultivation level.
    pub level: i64,
    /// Experience toward the next level.
    pub xp: i64,
    /// RFC 3339 text.
    pub created_at: String,
}

impl TryFrom<AccountRow> for UserAccount {
    type Error = DbError;

    fn try_from(row: AccountRow) -> Result<Self, Self::Error> {
        Ok(Self {
            user_id: UserId::new(row.user_id),
            balance: row.balance,
            spirit_points: row.spirit_points,
            last_claim_at: row.last_claim_at.as_deref().map(decode_ts).transpose()?,
            streak: i32::try_from(row.streak)
                .map_err(|e| DbError::Decode(format!("streak {}: {e}", row.streak)))?,
            level: i32::try_from(row.level)
                .map_err(|e| DbError::Decode(format!("level {}: {e}", row.level)))?,
            xp: row.xp,
            created_at: decode_ts(&row.created_at)?,
        })
    }
}

/// Everything a daily claim writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClaimRecord {
    /// Spirit Points credited.
    pub reward: i64,
    /// Streak stored after the claim.
    pub streak: i32,
    /// Level after the claim.
    pub level: i32,
    /// Experience after the claim.
    pub xp: i64,
    /// When the claim happened.
    pub claimed_at: DateTime<Utc>,
}

/// Balances on both sides of a completed transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferOutcome {
    /// Sender balance before the debit.
    pub from_before: i64,
    /// Sender balance after the debit.
    pub from_after: i64,
    /// Receiver balance before the credit.
    pub to_before: i64,
    /// Receiver balance after the credit.
    pub to_after: i64,
}

/// One account touched by the month-boundary conversion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conversion {
    /// Converted account.
    pub user_id: UserId,
    /// Spirit Points moved into the balance.
    pub amount: i64,
    /// Balance before the conversion.
    pub balance_before: i64,
    /// Balance after the conversion.
    pub balance_after: i64,
}

impl Store {
    /// Fetch the account for `user_id`, creating it with defaults if absent.
    ///
    /// Concurrent first calls for the same id race on the primary key; the
    /// losers' inserts are no-ops and every caller re-reads the single row.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Sqlite`] on storage failure.
    pub async fn get_or_create_account(&self, user_id: &UserId) -> Result<UserAccount, DbError> {
        if let Some(account) = self.find_account(user_id).await? {
            return Ok(account);
        }

        self.ensure_writable()?;
        let pool = self.pool().await;
        let inserted = sqlx::query(
            "INSERT INTO accounts (user_id, balance, spirit_points, streak, created_at)
             VALUES (?, 0, ?, 0, ?)
             ON CONFLICT(user_id) DO NOTHING",
        )
        .bind(user_id.as_str())
        .bind(spirit_types::STARTING_SPIRIT_POINTS)
        .bind(encode_ts(Utc::now()))
        .execute(&pool)
        .await?
        .rows_affected();

        if inserted > 0 {
            tracing::debug!(user_id = %user_id, "Created account");
        }

        self.find_account(user_id)
            .await?
            .ok_or_else(|| DbError::NotFound(format!("account {user_id}")))
    }

    /// Fetch the account for `user_id` without creating it.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] on storage or decode failure.
    pub async fn find_account(&self, user_id: &UserId) -> Result<Option<UserAccount>, DbError> {
        let pool = self.pool().await;
        let row = sqlx::query_as::<_, AccountRow>(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE user_id = ?"
        ))
        .bind(user_id.as_str())
        .fetch_optional(&pool)
        .await?;
        row.map(UserAccount::try_from).transpose()
    }

    /// Apply a typed partial update in one exclusive transaction.
    ///
    /// Returns `false` when nothing was written: the update was empty, a
    /// currency would be negative, the row does not exist, or the storage
    /// layer failed. Failures are logged here so callers only decide
    /// whether to retry.
    pub async fn update_account(&self, user_id: &UserId, update: &AccountUpdate) -> bool {
        if update.is_empty() {
            return false;
        }
        if update.has_negative_amount() {
            tracing::warn!(user_id = %user_id, ?update, "Refused negative account update");
            return false;
        }
        match self.try_update_account(user_id, update).await {
            Ok(written) => written,
            Err(e) => {
                tracing::error!(user_id = %user_id, error = %e, "Account update failed");
                false
            }
        }
    }

    async fn try_update_account(
        &self,
        user_id: &UserId,
        update: &AccountUpdate,
    ) -> Result<bool, DbError> {
        let mut builder: QueryBuilder<'_, Sqlite> = QueryBuilder::new("UPDATE accounts SET ");
        let mut set = builder.separated(", ");
        if let Some(balance) = update.balance {
            set.push("balance = ").push_bind_unseparated(balance);
        }
        if let Some(points) = update.spirit_points {
            set.push("spirit_points = ").push_bind_unseparated(points);
        }
        if let Some(last_claim_at) = update.last_claim_at {
            set.push("last_claim_at = ")
                .push_bind_unseparated(last_claim_at.map(encode_ts));
        }
        if let Some(streak) = update.streak {
            set.push("streak = ").push_bind_unseparated(streak);
        }
        if let Some(level) = update.level {
            set.push("level = ").push_bind_unseparated(level);
        }
        if let Some(xp) = update.xp {
            set.push("xp = ").push_bind_unseparated(xp);
        }
        builder.push(" WHERE user_id = ").push_bind(user_id.as_str());

        let mut tx = self.begin_write().await?;
        let affected = builder.build().execute(&mut *tx).await?.rows_affected();
        tx.commit().await?;
        Ok(affected > 0)
    }

    /// Add `delta` to both currencies unless either would go negative.
    ///
    /// Returns the post-update account, or `None` if the row is missing or
    /// the change was refused.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] on storage failure or while degraded.
    pub async fn adjust_account(
        &self,
        user_id: &UserId,
        delta: AccountDelta,
    ) -> Result<Option<UserAccount>, DbError> {
        let mut tx = self.begin_write().await?;
        let row = sqlx::query_as::<_, AccountRow>(&format!(
            "UPDATE accounts
             SET balance = balance + ?, spirit_points = spirit_points + ?
             WHERE user_id = ? AND balance + ? >= 0 AND spirit_points + ? >= 0
             RETURNING {ACCOUNT_COLUMNS}"
        ))
        .bind(delta.balance)
        .bind(delta.spirit_points)
        .bind(user_id.as_str())
        .bind(delta.balance)
        .bind(delta.spirit_points)
        .fetch_optional(&mut *tx)
        .await?;
        tx.commit().await?;
        row.map(UserAccount::try_from).transpose()
    }

    /// Record a daily claim: credit the reward and set the claim
    /// timestamp, streak, and progression in one statement.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] on storage failure or while degraded.
    pub async fn record_claim(
        &self,
        user_id: &UserId,
        claim: &ClaimRecord,
    ) -> Result<Option<UserAccount>, DbError> {
        let mut tx = self.begin_write().await?;
        let row = sqlx::query_as::<_, AccountRow>(&format!(
            "UPDATE accounts
             SET spirit_points = spirit_points + ?, streak = ?, last_claim_at = ?, level = ?, xp = ?
             WHERE user_id = ? AND spirit_points + ? >= 0
             RETURNING {ACCOUNT_COLUMNS}"
        ))
        .bind(claim.reward)
        .bind(claim.streak)
        .bind(encode_ts(claim.claimed_at))
        .bind(claim.level)
        .bind(claim.xp)
        .bind(user_id.as_str())
        .bind(claim.reward)
        .fetch_optional(&mut *tx)
        .await?;
        tx.commit().await?;
        row.map(UserAccount::try_from).transpose()
    }

    /// Move `amount` Spirit Stones from `from` to `to` atomically.
    ///
    /// Returns `None` without changing anything when `from` cannot cover the
    /// amount. If the credit fails the transaction is rolled back, so the
    /// debit is never kept on its own.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::NotFound`] if the receiver has no account, or
    /// [`DbError`] on storage failure.
    pub async fn transfer_balance(
        &self,
        from: &UserId,
        to: &UserId,
        amount: i64,
    ) -> Result<Option<TransferOutcome>, DbError> {
        if amount <= 0 {
            return Ok(None);
        }

        let mut tx = self.begin_write().await?;

        let debited: Option<i64> = sqlx::query_scalar(
            "UPDATE accounts SET balance = balance - ?
             WHERE user_id = ? AND balance >= ?
             RETURNING balance",
        )
        .bind(amount)
        .bind(from.as_str())
        .bind(amount)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(from_after) = debited else {
            // Dropping the transaction rolls it back.
            return Ok(None);
        };

        let credited: Option<i64> = sqlx::query_scalar(
            "UPDATE accounts SET balance = balance + ? WHERE user_id = ? RETURNING balance",
        )
        .bind(amount)
        .bind(to.as_str())
        .fetch_optional(&mut *tx)
        .await?;

        let Some(to_after) = credited else {
            return Err(DbError::NotFound(format!("account {to}")));
        };

        tx.commit().await?;

        Ok(Some(TransferOutcome {
            from_before: from_after.saturating_add(amount),
            from_after,
            to_before: to_after.saturating_sub(amount),
            to_after,
        }))
    }

    /// Move every positive Spirit Point balance into the Spirit Stone
    /// balance in one transaction.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] on storage failure; nothing is converted then.
    pub async fn convert_all_spirit_points(&self) -> Result<Vec<Conversion>, DbError> {
        let mut tx = self.begin_write().await?;

        let rows: Vec<(String, i64, i64)> = sqlx::query_as(
            "SELECT user_id, balance, spirit_points FROM accounts WHERE spirit_points > 0",
        )
        .fetch_all(&mut *tx)
        .await?;

        sqlx::query(
            "UPDATE accounts SET balance = balance + spirit_points, spirit_points = 0
             WHERE spirit_points > 0",
        )
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(rows
            .into_iter()
            .map(|(user_id, balance, points)| Conversion {
                user_id: UserId::new(user_id),
                amount: points,
                balance_before: balance,
                balance_after: balance.saturating_add(points),
            })
            .collect())
    }

    /// Top accounts by the given currency, descending.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Sqlite`] on storage failure.
    pub async fn leaderboard(
        &self,
        field: Currency,
        limit: u32,
    ) -> Result<Vec<LeaderboardEntry>, DbError> {
        let pool = self.pool().await;
        // The column name comes from a closed enum, never from user input.
        let column = field.as_db_str();
        let rows: Vec<(String, i64, i64)> = sqlx::query_as(&format!(
            "SELECT user_id, {column}, level FROM accounts WHERE {column} > 0
             ORDER BY {column} DESC LIMIT ?"
        ))
        .bind(i64::from(limit))
        .fetch_all(&pool)
        .await?;

        rows.into_iter().map(leaderboard_entry).collect()
    }

    /// Number of account rows.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Sqlite`] on storage failure.
    pub async fn count_accounts(&self) -> Result<i64, DbError> {
        let pool = self.pool().await;
        Ok(sqlx::query_scalar("SELECT COUNT(*) FROM accounts")
            .fetch_one(&pool)
            .await?)
    }
}

/// Build a leaderboard entry from `(user_id, value, level)`.
pub(crate) fn leaderboard_entry(
    (user_id, value, level): (String, i64, i64),
) -> Result<LeaderboardEntry, DbError> {
    Ok(LeaderboardEntry {
        user_id: UserId::new(user_id),
        value,
        level: i32::try_from(level).map_err(|e| DbError::Decode(format!("level {level}: {e}")))?,
    })
}
