//! Append-only transaction log.
//!
//! Entries document balance mutations for audit. Nothing in the ledger
//! reads them back to recompute a balance.

use spirit_types::{
    Currency, NewTransaction, TransactionId, TransactionLogEntry, TransactionType, UserId,
};
use uuid::Uuid;

use crate::error::DbError;
use crate::sqlite::{Store, decode_ts, encode_ts};

/// Database row representation of a log entry.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TransactionRow {
    /// UUID text.
    pub id: String,
    /// Platform user id.
    pub user_id: String,
    /// Database string of the transaction type.
    pub tx_type: String,
    /// Database string of the currency.
    pub currency: String,
    /// Signed change.
    pub amount: i64,
    /// Balance before.
    pub balance_before: i64,
    /// Balance after.
    pub balance_after: i64,
    /// Free-form description.
    pub description: String,
    /// RFC 3339 text.
    pub created_at: String,
}

impl TryFrom<TransactionRow> for TransactionLogEntry {
    type Error = DbError;

    fn try_from(row: TransactionRow) -> Result<Self, Self::Error> {
        let id = Uuid::parse_str(&row.id)
            .map_err(|e| DbError::Decode(format!("transaction id {}: {e}", row.id)))?;
        let tx_type = TransactionType::from_db_str(&row.tx_type)
            .ok_or_else(|| DbError::Decode(format!("transaction type {}", row.tx_type)))?;
        let currency = Currency::from_db_str(&row.currency)
            .ok_or_else(|| DbError::Decode(format!("currency {}", row.currency)))?;
        Ok(Self {
            id: TransactionId::from(id),
            user_id: UserId::new(row.user_id),
            tx_type,
            currency,
            amount: row.amount,
            balance_before: row.balance_before,
            balance_after: row.balance_after,
            description: row.description,
            created_at: decode_ts(&row.created_at)?,
        })
    }
}

impl Store {
    /// Insert one log entry and return its id.
    ///
    /// The balance row is authoritative: callers log a failure here and
    /// keep the mutation it documents.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] on storage failure or while degraded.
    pub async fn append_transaction(&self, entry: &NewTransaction) -> Result<TransactionId, DbError> {
        self.ensure_writable()?;
        let id = TransactionId::new();
        let pool = self.pool().await;
        sqlx::query(
            "INSERT INTO transactions
                 (id, user_id, tx_type, currency, amount, balance_before, balance_after,
                  description, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(id.to_string())
        .bind(entry.user_id.as_str())
        .bind(entry.tx_type.as_db_str())
        .bind(entry.currency.as_db_str())
        .bind(entry.amount)
        .bind(entry.balance_before)
        .bind(entry.balance_after)
        .bind(&entry.description)
        .bind(encode_ts(entry.created_at))
        .execute(&pool)
        .await?;
        Ok(id)
    }

    /// Most recent entries for a user, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] on storage or decode failure.
    pub async fn recent_transactions(
        &self,
        user_id: &UserId,
        limit: u32,
    ) -> Result<Vec<TransactionLogEntry>, DbError> {
        let pool = self.pool().await;
        let rows = sqlx::query_as::<_, TransactionRow>(
            "SELECT id, user_id, tx_type, currency, amount, balance_before, balance_after,
                    description, created_at
             FROM transactions WHERE user_id = ?
             ORDER BY created_at DESC, id DESC LIMIT ?",
        )
        .bind(user_id.as_str())
        .bind(i64::from(limit))
        .fetch_all(&pool)
        .await?;

        rows.into_iter().map(TransactionLogEntry::try_from).collect()
    }
}
