//! Time-limited grants and nickname locks.

use chrono::{DateTime, Utc};
use spirit_types::{CardId, GuildId, NameChangeCard, TempAdminGrant, UserId};
use uuid::Uuid;

use crate::error::DbError;
use crate::sqlite::{Store, decode_ts, encode_ts};

#[derive(Debug, sqlx::FromRow)]
struct TempAdminRow {
    user_id: String,
    guild_id: String,
    expires_at: String,
}

impl TryFrom<TempAdminRow> for TempAdminGrant {
    type Error = DbError;

    fn try_from(row: TempAdminRow) -> Result<Self, Self::Error> {
        Ok(Self {
            user_id: UserId::new(row.user_id),
            expires_at: decode_ts(&row.expires_at)?,
            guild_id: GuildId::new(row.guild_id),
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct NameCardRow {
    id: String,
    owner_id: String,
    target_id: String,
    original_nickname: Option<String>,
    new_nickname: String,
    expires_at: String,
    guild_id: String,
}

impl TryFrom<NameCardRow> for NameChangeCard {
    type Error = DbError;

    fn try_from(row: NameCardRow) -> Result<Self, Self::Error> {
        let id = Uuid::parse_str(&row.id)
            .map_err(|e| DbError::Decode(format!("card id {}: {e}", row.id)))?;
        Ok(Self {
            id: CardId::from(id),
            owner_id: UserId::new(row.owner_id),
            target_id: UserId::new(row.target_id),
            original_nickname: row.original_nickname,
            new_nickname: row.new_nickname,
            expires_at: decode_ts(&row.expires_at)?,
            guild_id: GuildId::new(row.guild_id),
        })
    }
}

impl Store {
    // -----------------------------------------------------------------------
    // Temporary admin
    // -----------------------------------------------------------------------

    /// Record a temporary admin grant. A second purchase by the same user
    /// replaces the expiry.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] on storage failure or while degraded.
    pub async fn insert_temp_admin(&self, grant: &TempAdminGrant) -> Result<(), DbError> {
        self.ensure_writable()?;
        let pool = self.pool().await;
        sqlx::query(
            "INSERT INTO temp_admins (user_id, guild_id, expires_at) VALUES (?, ?, ?)
             ON CONFLICT(user_id) DO UPDATE SET
                 guild_id = excluded.guild_id,
                 expires_at = excluded.expires_at",
        )
        .bind(grant.user_id.as_str())
        .bind(grant.guild_id.as_str())
        .bind(encode_ts(grant.expires_at))
        .execute(&pool)
        .await?;
        Ok(())
    }

    /// Grants whose expiry is at or before `now`.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] on storage or decode failure.
    pub async fn expired_temp_admins(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<TempAdminGrant>, DbError> {
        let pool = self.pool().await;
        let rows = sqlx::query_as::<_, TempAdminRow>(
            "SELECT user_id, guild_id, expires_at FROM temp_admins
             WHERE expires_at <= ? ORDER BY expires_at",
        )
        .bind(encode_ts(now))
        .fetch_all(&pool)
        .await?;
        rows.into_iter().map(TempAdminGrant::try_from).collect()
    }

    /// Remove a user's grant row.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] on storage failure or while degraded.
    pub async fn delete_temp_admin(&self, user_id: &UserId) -> Result<bool, DbError> {
        self.ensure_writable()?;
        let pool = self.pool().await;
        let deleted = sqlx::query("DELETE FROM temp_admins WHERE user_id = ?")
            .bind(user_id.as_str())
            .execute(&pool)
            .await?
            .rows_affected();
        Ok(deleted > 0)
    }

    // -----------------------------------------------------------------------
    // Name change cards
    // -----------------------------------------------------------------------

    /// Record a used name change card.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] on storage failure or while degraded.
    pub async fn insert_name_card(&self, card: &NameChangeCard) -> Result<(), DbError> {
        self.ensure_writable()?;
        let pool = self.pool().await;
        sqlx::query(
            "INSERT INTO name_change_cards
                 (id, owner_id, target_id, original_nickname, new_nickname, expires_at, guild_id)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(card.id.to_string())
        .bind(card.owner_id.as_str())
        .bind(card.target_id.as_str())
        .bind(card.original_nickname.as_deref())
        .bind(&card.new_nickname)
        .bind(encode_ts(card.expires_at))
        .bind(card.guild_id.as_str())
        .execute(&pool)
        .await?;
        Ok(())
    }

    /// Cards whose expiry is at or before `now`.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] on storage or decode failure.
    pub async fn expired_name_cards(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<NameChangeCard>, DbError> {
        let pool = self.pool().await;
        let rows = sqlx::query_as::<_, NameCardRow>(
            "SELECT id, owner_id, target_id, original_nickname, new_nickname, expires_at, guild_id
             FROM name_change_cards WHERE expires_at <= ? ORDER BY expires_at",
        )
        .bind(encode_ts(now))
        .fetch_all(&pool)
        .await?;
        rows.into_iter().map(NameChangeCard::try_from).collect()
    }

    /// Remove a card row.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] on storage failure or while degraded.
    pub async fn delete_name_card(&self, id: CardId) -> Result<bool, DbError> {
        self.ensure_writable()?;
        let pool = self.pool().await;
        let deleted = sqlx::query("DELETE FROM name_change_cards WHERE id = ?")
            .bind(id.to_string())
            .execute(&pool)
            .await?
            .rows_affected();
        Ok(deleted > 0)
    }

    // -----------------------------------------------------------------------
    // Nickname locks
    // -----------------------------------------------------------------------

    /// Lock a user's nickname. Returns `false` if it was already locked.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] on storage failure or while degraded.
    pub async fn lock_nickname(&self, user_id: &UserId, at: DateTime<Utc>) -> Result<bool, DbError> {
        self.ensure_writable()?;
        let pool = self.pool().await;
        let inserted = sqlx::query(
            "INSERT INTO nickname_locks (user_id, locked_at) VALUES (?, ?)
             ON CONFLICT(user_id) DO NOTHING",
        )
        .bind(user_id.as_str())
        .bind(encode_ts(at))
        .execute(&pool)
        .await?
        .rows_affected();
        Ok(inserted > 0)
    }

    /// Whether the user holds a nickname lock.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Sqlite`] on storage failure.
    pub async fn is_nickname_locked(&self, user_id: &UserId) -> Result<bool, DbError> {
        let pool = self.pool().await;
        let found: Option<i64> =
            sqlx::query_scalar("SELECT 1 FROM nickname_locks WHERE user_id = ?")
                .bind(user_id.as_str())
                .fetch_optional(&pool)
                .await?;
        Ok(found.is_some())
    }
}
