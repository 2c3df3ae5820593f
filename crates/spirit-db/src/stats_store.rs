//! Monthly gambling stats.
//!
//! Wins and losses are additive magnitudes. The upsert is a single
//! statement so two concurrent bets by the same user both land.

use spirit_types::{LeaderboardEntry, Month, MonthlyStat, STARTING_LEVEL, StatSide, UserId};

use crate::account_store::leaderboard_entry;
use crate::error::DbError;
use crate::sqlite::Store;

impl Store {
    /// Add `win_delta` and `loss_delta` to the (user, month) row, creating it
    /// if needed.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] on storage failure or while degraded.
    pub async fn upsert_monthly_stat(
        &self,
        user_id: &UserId,
        month: &Month,
        win_delta: i64,
        loss_delta: i64,
    ) -> Result<(), DbError> {
        if win_delta < 0 || loss_delta < 0 {
            return Err(DbError::InvalidArgument(format!(
                "monthly stat deltas must be non-negative, got wins={win_delta} losses={loss_delta}"
            )));
        }
        self.ensure_writable()?;
        let pool = self.pool().await;
        sqlx::query(
            "INSERT INTO monthly_stats (user_id, month, wins, losses) VALUES (?, ?, ?, ?)
             ON CONFLICT(user_id, month) DO UPDATE SET
                 wins = wins + excluded.wins,
                 losses = losses + excluded.losses",
        )
        .bind(user_id.as_str())
        .bind(month.as_str())
        .bind(win_delta)
        .bind(loss_delta)
        .execute(&pool)
        .await?;
        Ok(())
    }

    /// Read one (user, month) row.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] on storage or decode failure.
    pub async fn monthly_stat(
        &self,
        user_id: &UserId,
        month: &Month,
    ) -> Result<Option<MonthlyStat>, DbError> {
        let pool = self.pool().await;
        let row: Option<(i64, i64)> = sqlx::query_as(
            "SELECT wins, losses FROM monthly_stats WHERE user_id = ? AND month = ?",
        )
        .bind(user_id.as_str())
        .bind(month.as_str())
        .fetch_optional(&pool)
        .await?;

        Ok(row.map(|(wins, losses)| MonthlyStat {
            user_id: user_id.clone(),
            month: month.clone(),
            wins,
            losses,
        }))
    }

    /// Delete every stat row whose month differs from `keep_month`.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] on storage failure or while degraded.
    pub async fn purge_stats(&self, keep_month: &Month) -> Result<u64, DbError> {
        self.ensure_writable()?;
        let pool = self.pool().await;
        let deleted = sqlx::query("DELETE FROM monthly_stats WHERE month <> ?")
            .bind(keep_month.as_str())
            .execute(&pool)
            .await?
            .rows_affected();
        if deleted > 0 {
            tracing::info!(keep_month = %keep_month, deleted, "Purged old monthly stats");
        }
        Ok(deleted)
    }

    /// Top users of `month` by wins or losses, descending.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Sqlite`] on storage failure.
    pub async fn monthly_top(
        &self,
        month: &Month,
        side: StatSide,
        limit: u32,
    ) -> Result<Vec<LeaderboardEntry>, DbError> {
        let pool = self.pool().await;
        let column = side.column();
        let rows: Vec<(String, i64, i64)> = sqlx::query_as(&format!(
            "SELECT s.user_id, s.{column}, COALESCE(a.level, {STARTING_LEVEL})
             FROM monthly_stats s LEFT JOIN accounts a ON a.user_id = s.user_id
             WHERE s.month = ? AND s.{column} > 0
             ORDER BY s.{column} DESC LIMIT ?"
        ))
        .bind(month.as_str())
        .bind(i64::from(limit))
        .fetch_all(&pool)
        .await?;

        rows.into_iter().map(leaderboard_entry).collect()
    }
}
