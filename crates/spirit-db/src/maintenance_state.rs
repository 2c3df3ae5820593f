//! Small key/value table for maintenance bookkeeping that must survive a
//! restart, such as the last month that was converted.

use chrono::Utc;

use crate::error::DbError;
use crate::sqlite::{Store, encode_ts};

/// Key under which the last converted month is stored.
pub const LAST_CONVERSION_MONTH: &str = "last_conversion_month";

impl Store {
    /// Read a maintenance value.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Sqlite`] on storage failure.
    pub async fn maintenance_value(&self, key: &str) -> Result<Option<String>, DbError> {
        let pool = self.pool().await;
        Ok(
            sqlx::query_scalar("SELECT value FROM maintenance_state WHERE key = ?")
                .bind(key)
                .fetch_optional(&pool)
                .await?,
        )
    }

    /// Insert or replace a maintenance value.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] on storage failure or while degraded.
    pub async fn set_maintenance_value(&self, key: &str, value: &str) -> Result<(), DbError> {
        self.ensure_writable()?;
        let pool = self.pool().await;
        sqlx::query(
            "INSERT INTO maintenance_state (key, value, updated_at) VALUES (?, ?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        )
        .bind(key)
        .bind(value)
        .bind(encode_ts(Utc::now()))
        .execute(&pool)
        .await?;
        Ok(())
    }
}
