//! The [`Ledger`]: every balance-changing operation.
//!
//! Operations follow the same shape:
//!
//! 1. take the per-user lock(s);
//! 2. read (lazily creating) the account;
//! 3. validate, returning [`Rejection`] without touching state;
//! 4. apply a conditional write that re-checks non-negativity in the store;
//! 5. append a transaction log entry.
//!
//! A failed log append is logged at `error` but does not undo the write;
//! the log is an audit trail, not the source of truth.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use spirit_db::{ClaimRecord, LAST_CONVERSION_MONTH, Store};
use spirit_resilience::{CooldownTracker, format_wait};
use spirit_types::{
    AccountDelta, CardId, CoinFace, Currency, GuildId, LeaderboardEntry, Month, NameChangeCard,
    NewTransaction, StatSide, TempAdminGrant, TransactionType, UserAccount, UserId,
};

use crate::config::EconomyConfig;
use crate::daily::{MemberTier, award_claim_xp, evaluate_claim};
use crate::locks::UserLocks;
use crate::shop::{ShopItem, ShopItemKind};
use crate::{LedgerError, Rejection};

/// Longest nickname the platform accepts.
pub const MAX_NICKNAME_LEN: usize = 32;

// ---------------------------------------------------------------------------
// Requests and outcomes
// ---------------------------------------------------------------------------

/// An amount argument: an exact number or everything available.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Amount {
    /// Everything available (capped where the operation has a cap).
    All,
    /// An exact amount. May be non-positive, which is rejected.
    Exact(i64),
}

impl Amount {
    /// Parse `all` or an integer.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.eq_ignore_ascii_case("all") {
            return Some(Self::All);
        }
        raw.replace(',', "").parse().ok().map(Self::Exact)
    }
}

/// A granted daily claim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClaimOutcome {
    /// Spirit Points credited.
    pub reward: i64,
    /// Streak position reached, 1..=5.
    pub progress: i32,
    /// Whether the streak bonus was paid.
    pub bonus: bool,
    /// Spirit Points after the claim.
    pub spirit_points: i64,
    /// XP awarded.
    pub xp_gained: i64,
    /// Level after the claim.
    pub level: i32,
    /// XP towards the next level after the claim.
    pub xp: i64,
    /// Whether this claim raised the level.
    pub leveled_up: bool,
}

/// A completed exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExchangeOutcome {
    /// Spirit Points converted.
    pub amount: i64,
    /// Spirit Stones after the exchange.
    pub balance: i64,
    /// Spirit Points after the exchange.
    pub spirit_points: i64,
}

/// A settled coinflip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CoinflipOutcome {
    /// Amount wagered.
    pub bet: i64,
    /// Face the coin landed on.
    pub landed: CoinFace,
    /// Whether the guess matched.
    pub won: bool,
    /// Spirit Points after settlement.
    pub spirit_points: i64,
}

/// A completed gift.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GiftOutcome {
    /// Spirit Stones moved.
    pub amount: i64,
    /// Sender balance after the gift.
    pub sender_balance: i64,
    /// Receiver balance after the gift.
    pub receiver_balance: i64,
}

/// A completed administrative grant or removal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdminOutcome {
    /// Account changed.
    pub target: UserId,
    /// Spirit Stones added (positive) or removed (negative).
    pub amount: i64,
    /// Target balance afterwards.
    pub balance: i64,
}

/// A shop purchase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurchaseRequest {
    /// Buyer.
    pub user_id: UserId,
    /// Item bought.
    pub item: ShopItemKind,
    /// Server the purchase happens in.
    pub guild_id: Option<GuildId>,
    /// Target member, for name change cards.
    pub target: Option<UserId>,
    /// Target's current nickname, restored when a card expires.
    pub target_nickname: Option<String>,
    /// Nickname to apply, for name change cards.
    pub new_nickname: Option<String>,
}

/// Platform side effect owed after a purchase was paid for and recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "effect", rename_all = "snake_case")]
pub enum PurchaseEffect {
    /// Nothing to do on the platform; the lock is enforced locally.
    NicknameLocked,
    /// Grant the temporary admin role until `expires_at`.
    GrantTempAdmin {
        /// Server to grant in.
        guild_id: GuildId,
        /// When the expiry sweep removes the role.
        expires_at: DateTime<Utc>,
    },
    /// Grant the prestige role.
    GrantPrestige {
        /// Server to grant in.
        guild_id: GuildId,
    },
    /// Set the target's nickname until `expires_at`.
    SetNickname {
        /// Server to apply in.
        guild_id: GuildId,
        /// Member renamed.
        target: UserId,
        /// Nickname applied.
        nickname: String,
        /// When the expiry sweep reverts it.
        expires_at: DateTime<Utc>,
    },
}

/// A completed purchase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PurchaseOutcome {
    /// Item bought.
    pub item: &'static ShopItem,
    /// Buyer balance afterwards.
    pub balance: i64,
    /// Platform work the caller still has to do.
    pub effect: PurchaseEffect,
}

/// Result of a monthly conversion check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ConversionReport {
    /// No month was recorded yet; the current one was recorded.
    FirstRun {
        /// Month recorded.
        month: Month,
    },
    /// This month was already converted.
    AlreadyDone {
        /// Current month.
        month: Month,
    },
    /// Spirit Points were converted and old stats purged.
    Converted {
        /// Month recorded.
        month: Month,
        /// Accounts converted.
        accounts: usize,
        /// Total Spirit Points converted.
        total: i64,
        /// Monthly stat rows purged.
        purged_stats: u64,
    },
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

/// Applies economy operations to the store.
#[derive(Debug, Clone)]
pub struct Ledger {
    store: Store,
    economy: EconomyConfig,
    locks: Arc<UserLocks>,
    gift_cooldowns: Arc<CooldownTracker>,
}

impl Ledger {
    /// Create a ledger over `store`.
    pub fn new(store: Store, economy: EconomyConfig) -> Self {
        Self {
            store,
            economy,
            locks: Arc::new(UserLocks::new()),
            gift_cooldowns: Arc::new(CooldownTracker::default()),
        }
    }

    /// The underlying store.
    pub const fn store(&self) -> &Store {
        &self.store
    }

    /// Economy settings.
    pub const fn economy(&self) -> &EconomyConfig {
        &self.economy
    }

    /// Per-user locks, exposed for pruning.
    pub fn locks(&self) -> &UserLocks {
        &self.locks
    }

    /// Gift pair cooldowns, exposed for pruning.
    pub fn gift_cooldowns(&self) -> &CooldownTracker {
        &self.gift_cooldowns
    }

    async fn audit(&self, entry: NewTransaction) {
        if let Err(e) = self.store.append_transaction(&entry).await {
            tracing::error!(
                user_id = %entry.user_id,
                tx_type = entry.tx_type.as_db_str(),
                amount = entry.amount,
                error = %e,
                "Failed to append transaction log entry"
            );
        }
    }

    const fn check_ceiling(&self, amount: i64) -> Result<(), Rejection> {
        if amount > self.economy.max_amount {
            return Err(Rejection::AmountTooLarge {
                max: self.economy.max_amount,
            });
        }
        Ok(())
    }

    const fn check_amount(&self, amount: i64) -> Result<(), Rejection> {
        if amount <= 0 {
            return Err(Rejection::NonPositiveAmount);
        }
        self.check_ceiling(amount)
    }

    // -----------------------------------------------------------------------
    // Earning and converting
    // -----------------------------------------------------------------------

    /// Claim the daily Spirit Points reward.
    pub async fn claim_daily(
        &self,
        user_id: &UserId,
        tier: MemberTier,
        now: DateTime<Utc>,
    ) -> Result<ClaimOutcome, LedgerError> {
        let _guard = self.locks.lock(user_id).await;
        let account = self.store.get_or_create_account(user_id).await?;

        let decision = evaluate_claim(
            account.last_claim_at,
            account.streak,
            now,
            tier.base_reward(&self.economy),
        )
        .map_err(|remaining_hours| Rejection::AlreadyClaimed { remaining_hours })?;
        let progression = award_claim_xp(account.level, account.xp, decision.streak);

        let record = ClaimRecord {
            reward: decision.reward,
            streak: decision.streak,
            level: progression.level,
            xp: progression.xp,
            claimed_at: now,
        };
        let updated = self
            .store
            .record_claim(user_id, &record)
            .await?
            .ok_or_else(|| missing(user_id))?;

        self.audit(NewTransaction {
            user_id: user_id.clone(),
            tx_type: TransactionType::DailyClaim,
            currency: Currency::SpiritPoints,
            amount: decision.reward,
            balance_before: account.spirit_points,
            balance_after: updated.spirit_points,
            description: format!("Daily claim, streak {}/5", decision.progress),
            created_at: now,
        })
        .await;

        tracing::info!(
            user_id = %user_id,
            reward = decision.reward,
            streak = decision.streak,
            bonus = decision.bonus,
            xp_gained = progression.gained,
            level = updated.level,
            "Daily reward claimed"
        );
        if progression.leveled_up {
            tracing::info!(user_id = %user_id, level = updated.level, "Level up");
        }

        Ok(ClaimOutcome {
            reward: decision.reward,
            progress: decision.progress,
            bonus: decision.bonus,
            spirit_points: updated.spirit_points,
            xp_gained: progression.gained,
            level: updated.level,
            xp: updated.xp,
            leveled_up: progression.leveled_up,
        })
    }

    /// Convert Spirit Points into Spirit Stones one to one.
    pub async fn exchange(
        &self,
        user_id: &UserId,
        amount: Amount,
        now: DateTime<Utc>,
    ) -> Result<ExchangeOutcome, LedgerError> {
        let _guard = self.locks.lock(user_id).await;
        let account = self.store.get_or_create_account(user_id).await?;

        let amount = match amount {
            Amount::All => account.spirit_points,
            Amount::Exact(n) => n,
        };
        let insufficient = Rejection::InsufficientSpiritPoints {
            available: account.spirit_points,
            requested: amount,
        };
        if amount <= 0 || amount > account.spirit_points {
            return Err(insufficient.into());
        }
        self.check_ceiling(amount)?;
        credit(account.balance, amount)?;

        let delta = AccountDelta {
            balance: amount,
            spirit_points: amount.saturating_neg(),
        };
        let updated = self
            .store
            .adjust_account(user_id, delta)
            .await?
            .ok_or(insufficient)?;

        self.audit(NewTransaction {
            user_id: user_id.clone(),
            tx_type: TransactionType::Exchange,
            currency: Currency::Balance,
            amount,
            balance_before: account.balance,
            balance_after: updated.balance,
            description: format!("Exchanged {amount} SP for {amount} SS"),
            created_at: now,
        })
        .await;

        Ok(ExchangeOutcome {
            amount,
            balance: updated.balance,
            spirit_points: updated.spirit_points,
        })
    }

    // -----------------------------------------------------------------------
    // Gambling
    // -----------------------------------------------------------------------

    /// Settle a coinflip. The caller supplies the face the coin `landed` on.
    pub async fn coinflip(
        &self,
        user_id: &UserId,
        guess: CoinFace,
        amount: Amount,
        landed: CoinFace,
        now: DateTime<Utc>,
    ) -> Result<CoinflipOutcome, LedgerError> {
        let _guard = self.locks.lock(user_id).await;
        let account = self.store.get_or_create_account(user_id).await?;
        let max = self.economy.max_bet;

        let bet = match amount {
            Amount::All => account.spirit_points.min(max),
            Amount::Exact(n) => n,
        };
        let out_of_range = Rejection::BetOutOfRange {
            max,
            available: account.spirit_points,
        };
        if bet <= 0 || bet > max || bet > account.spirit_points {
            return Err(out_of_range.into());
        }

        let won = guess == landed;
        let signed = if won { bet } else { bet.saturating_neg() };
        let updated = self
            .store
            .adjust_account(user_id, AccountDelta::spirit_points(signed))
            .await?
            .ok_or(out_of_range)?;

        let (wins, losses) = if won { (bet, 0) } else { (0, bet) };
        if let Err(e) = self
            .store
            .upsert_monthly_stat(user_id, &Month::of(now), wins, losses)
            .await
        {
            tracing::error!(user_id = %user_id, bet, won, error = %e, "Failed to record gambling stat");
        }

        self.audit(NewTransaction {
            user_id: user_id.clone(),
            tx_type: if won {
                TransactionType::GamblingWin
            } else {
                TransactionType::GamblingLoss
            },
            currency: Currency::SpiritPoints,
            amount: signed,
            balance_before: account.spirit_points,
            balance_after: updated.spirit_points,
            description: format!("Coinflip: guessed {}, landed {}", guess.name(), landed.name()),
            created_at: now,
        })
        .await;

        Ok(CoinflipOutcome {
            bet,
            landed,
            won,
            spirit_points: updated.spirit_points,
        })
    }

    // -----------------------------------------------------------------------
    // Transfers
    // -----------------------------------------------------------------------

    /// Gift Spirit Stones to another member.
    ///
    /// The same sender may gift the same receiver once per configured
    /// cooldown. A refused or failed transfer does not start the cooldown.
    pub async fn gift(
        &self,
        from: &UserId,
        to: &UserId,
        amount: i64,
        now: DateTime<Utc>,
    ) -> Result<GiftOutcome, LedgerError> {
        if from == to {
            return Err(Rejection::SelfGift.into());
        }
        self.check_amount(amount)?;

        let _guards = self.locks.lock_pair(from, to).await;
        let sender = self.store.get_or_create_account(from).await?;
        let receiver = self.store.get_or_create_account(to).await?;

        let insufficient = Rejection::InsufficientBalance {
            available: sender.balance,
            requested: amount,
        };
        if sender.balance < amount {
            return Err(insufficient.into());
        }
        credit(receiver.balance, amount)?;

        let pair = gift_pair_key(to);
        if let Err(active) = self.gift_cooldowns.check_and_record(
            from.as_str(),
            &pair,
            self.economy.gift_pair_cooldown(),
        ) {
            return Err(Rejection::GiftCooldown {
                remaining: active.remaining,
                wait: format_wait(active.remaining),
            }
            .into());
        }

        let transfer = match self.store.transfer_balance(from, to, amount).await {
            Ok(Some(transfer)) => transfer,
            Ok(None) => {
                self.gift_cooldowns.clear(from.as_str(), &pair);
                return Err(insufficient.into());
            }
            Err(e) => {
                self.gift_cooldowns.clear(from.as_str(), &pair);
                return Err(e.into());
            }
        };

        self.audit(NewTransaction {
            user_id: from.clone(),
            tx_type: TransactionType::Gift,
            currency: Currency::Balance,
            amount: amount.saturating_neg(),
            balance_before: transfer.from_before,
            balance_after: transfer.from_after,
            description: format!("Gift to {to}"),
            created_at: now,
        })
        .await;
        self.audit(NewTransaction {
            user_id: to.clone(),
            tx_type: TransactionType::Gift,
            currency: Currency::Balance,
            amount,
            balance_before: transfer.to_before,
            balance_after: transfer.to_after,
            description: format!("Gift from {from}"),
            created_at: now,
        })
        .await;

        tracing::info!(from = %from, to = %to, amount, "Gift transferred");
        Ok(GiftOutcome {
            amount,
            sender_balance: transfer.from_after,
            receiver_balance: transfer.to_after,
        })
    }

    /// Add Spirit Stones to `target` on an administrator's behalf.
    pub async fn admin_grant(
        &self,
        admin: &UserId,
        target: &UserId,
        amount: i64,
        now: DateTime<Utc>,
    ) -> Result<AdminOutcome, LedgerError> {
        self.check_amount(amount)?;
        let _guard = self.locks.lock(target).await;
        let account = self.store.get_or_create_account(target).await?;
        credit(account.balance, amount)?;
        let updated = self
            .store
            .adjust_account(target, AccountDelta::balance(amount))
            .await?
            .ok_or_else(|| missing(target))?;

        self.audit(NewTransaction {
            user_id: target.clone(),
            tx_type: TransactionType::AdminGrant,
            currency: Currency::Balance,
            amount,
            balance_before: account.balance,
            balance_after: updated.balance,
            description: format!("Granted by {admin}"),
            created_at: now,
        })
        .await;

        tracing::info!(admin = %admin, target = %target, amount, "Admin grant");
        Ok(AdminOutcome {
            target: target.clone(),
            amount,
            balance: updated.balance,
        })
    }

    /// Remove Spirit Stones from `target` on an administrator's behalf.
    /// Removing more than the balance is refused.
    pub async fn admin_remove(
        &self,
        admin: &UserId,
        target: &UserId,
        amount: i64,
        now: DateTime<Utc>,
    ) -> Result<AdminOutcome, LedgerError> {
        self.check_amount(amount)?;
        let _guard = self.locks.lock(target).await;
        let account = self.store.get_or_create_account(target).await?;
        let insufficient = Rejection::InsufficientBalance {
            available: account.balance,
            requested: amount,
        };
        if amount > account.balance {
            return Err(insufficient.into());
        }

        let updated = self
            .store
            .adjust_account(target, AccountDelta::balance(amount.saturating_neg()))
            .await?
            .ok_or(insufficient)?;

        self.audit(NewTransaction {
            user_id: target.clone(),
            tx_type: TransactionType::AdminRemove,
            currency: Currency::Balance,
            amount: amount.saturating_neg(),
            balance_before: account.balance,
            balance_after: updated.balance,
            description: format!("Removed by {admin}"),
            created_at: now,
        })
        .await;

        tracing::info!(admin = %admin, target = %target, amount, "Admin removal");
        Ok(AdminOutcome {
            target: target.clone(),
            amount: amount.saturating_neg(),
            balance: updated.balance,
        })
    }

    // -----------------------------------------------------------------------
    // Shop
    // -----------------------------------------------------------------------

    /// Buy a shop item.
    ///
    /// The price is debited first with a conditional update; the grant row
    /// is written afterwards. If the grant cannot be written the price is
    /// refunded.
    pub async fn purchase(
        &self,
        request: PurchaseRequest,
        now: DateTime<Utc>,
    ) -> Result<PurchaseOutcome, LedgerError> {
        let item = request.item.item();
        let card = self.validate_purchase(&request).await?;

        let _guard = self.locks.lock(&request.user_id).await;
        let account = self.store.get_or_create_account(&request.user_id).await?;
        if account.level < item.level_req {
            return Err(Rejection::LevelTooLow {
                required: item.level_req,
                level: account.level,
            }
            .into());
        }
        let insufficient = Rejection::InsufficientBalance {
            available: account.balance,
            requested: item.price,
        };
        if account.balance < item.price {
            return Err(insufficient.into());
        }

        let debited = self
            .store
            .adjust_account(&request.user_id, AccountDelta::balance(item.price.saturating_neg()))
            .await?
            .ok_or(insufficient)?;

        let effect = match self.write_grant(&request, card, now).await {
            Ok(effect) => effect,
            Err(e) => {
                self.refund(&request.user_id, item).await;
                return Err(e);
            }
        };

        self.audit(NewTransaction {
            user_id: request.user_id.clone(),
            tx_type: if request.item == ShopItemKind::NameChangeCard {
                TransactionType::NameChangeCard
            } else {
                TransactionType::ShopPurchase
            },
            currency: Currency::Balance,
            amount: item.price.saturating_neg(),
            balance_before: account.balance,
            balance_after: debited.balance,
            description: format!("Bought {}", item.name),
            created_at: now,
        })
        .await;

        tracing::info!(user_id = %request.user_id, item = item.kind.key(), price = item.price, "Item purchased");
        Ok(PurchaseOutcome {
            item,
            balance: debited.balance,
            effect,
        })
    }

    /// Checks that need no lock on the buyer. Returns the validated
    /// `(guild, target, nickname)` for name change cards.
    async fn validate_purchase(
        &self,
        request: &PurchaseRequest,
    ) -> Result<Option<(GuildId, UserId, String)>, LedgerError> {
        match request.item {
            ShopItemKind::NicknameLock => {
                if self.store.is_nickname_locked(&request.user_id).await? {
                    return Err(Rejection::NicknameAlreadyLocked.into());
                }
                Ok(None)
            }
            ShopItemKind::TempAdmin | ShopItemKind::HmwRole => {
                if request.guild_id.is_none() {
                    return Err(Rejection::GuildOnly.into());
                }
                Ok(None)
            }
            ShopItemKind::NameChangeCard => {
                let guild = request.guild_id.clone().ok_or(Rejection::GuildOnly)?;
                let (Some(target), Some(nickname)) = (&request.target, &request.new_nickname) else {
                    return Err(Rejection::MissingTarget.into());
                };
                let nickname = nickname.trim();
                let length = nickname.chars().count();
                if length == 0 || length > MAX_NICKNAME_LEN {
                    return Err(Rejection::InvalidNickname {
                        max: MAX_NICKNAME_LEN,
                    }
                    .into());
                }
                if self.store.is_nickname_locked(target).await? {
                    return Err(Rejection::TargetNicknameLocked.into());
                }
                Ok(Some((guild, target.clone(), nickname.to_owned())))
            }
        }
    }

    async fn write_grant(
        &self,
        request: &PurchaseRequest,
        card: Option<(GuildId, UserId, String)>,
        now: DateTime<Utc>,
    ) -> Result<PurchaseEffect, LedgerError> {
        match (request.item, request.guild_id.clone(), card) {
            (ShopItemKind::NicknameLock, _, _) => {
                if self.store.lock_nickname(&request.user_id, now).await? {
                    Ok(PurchaseEffect::NicknameLocked)
                } else {
                    Err(Rejection::NicknameAlreadyLocked.into())
                }
            }
            (ShopItemKind::TempAdmin, Some(guild_id), _) => {
                let expires_at = expiry(now, self.economy.temp_admin_duration());
                self.store
                    .insert_temp_admin(&TempAdminGrant {
                        user_id: request.user_id.clone(),
                        expires_at,
                        guild_id: guild_id.clone(),
                    })
                    .await?;
                Ok(PurchaseEffect::GrantTempAdmin {
                    guild_id,
                    expires_at,
                })
            }
            (ShopItemKind::HmwRole, Some(guild_id), _) => {
                Ok(PurchaseEffect::GrantPrestige { guild_id })
            }
            (ShopItemKind::NameChangeCard, _, Some((guild_id, target, nickname))) => {
                let expires_at = expiry(now, self.economy.name_card_duration());
                self.store
                    .insert_name_card(&NameChangeCard {
                        id: CardId::new(),
                        owner_id: request.user_id.clone(),
                        target_id: target.clone(),
                        original_nickname: request.target_nickname.clone(),
                        new_nickname: nickname.clone(),
                        expires_at,
                        guild_id: guild_id.clone(),
                    })
                    .await?;
                Ok(PurchaseEffect::SetNickname {
                    guild_id,
                    target,
                    nickname,
                    expires_at,
                })
            }
            (ShopItemKind::TempAdmin | ShopItemKind::HmwRole, None, _) => {
                Err(Rejection::GuildOnly.into())
            }
            (ShopItemKind::NameChangeCard, _, None) => Err(Rejection::MissingTarget.into()),
        }
    }

    async fn refund(&self, user_id: &UserId, item: &ShopItem) {
        match self
            .store
            .adjust_account(user_id, AccountDelta::balance(item.price))
            .await
        {
            Ok(Some(_)) => {
                tracing::warn!(user_id = %user_id, item = item.kind.key(), price = item.price, "Purchase refunded");
            }
            Ok(None) => {
                tracing::error!(user_id = %user_id, item = item.kind.key(), price = item.price, "Refund target vanished");
            }
            Err(e) => {
                tracing::error!(
                    user_id = %user_id,
                    item = item.kind.key(),
                    price = item.price,
                    error = %e,
                    "Refund failed, manual correction required"
                );
            }
        }
    }

    // -----------------------------------------------------------------------
    // Month boundary
    // -----------------------------------------------------------------------

    /// Convert every account's Spirit Points into Spirit Stones once per
    /// calendar month and purge other months' gambling stats.
    pub async fn monthly_conversion(&self, now: DateTime<Utc>) -> Result<ConversionReport, LedgerError> {
        let month = Month::of(now);
        let recorded = self.store.maintenance_value(LAST_CONVERSION_MONTH).await?;

        let Some(recorded) = recorded else {
            self.store
                .set_maintenance_value(LAST_CONVERSION_MONTH, month.as_str())
                .await?;
            tracing::info!(month = %month, "Recorded first conversion month");
            return Ok(ConversionReport::FirstRun { month });
        };
        if recorded == month.as_str() {
            return Ok(ConversionReport::AlreadyDone { month });
        }

        let conversions = self.store.convert_all_spirit_points().await?;
        let mut total: i64 = 0;
        for conversion in &conversions {
            total = total.saturating_add(conversion.amount);
            self.audit(NewTransaction {
                user_id: conversion.user_id.clone(),
                tx_type: TransactionType::MonthlyConversion,
                currency: Currency::Balance,
                amount: conversion.amount,
                balance_before: conversion.balance_before,
                balance_after: conversion.balance_after,
                description: format!("Monthly conversion into {month}"),
                created_at: now,
            })
            .await;
        }

        let purged_stats = self.store.purge_stats(&month).await?;
        self.store
            .set_maintenance_value(LAST_CONVERSION_MONTH, month.as_str())
            .await?;

        tracing::info!(
            month = %month,
            previous = %recorded,
            accounts = conversions.len(),
            total,
            purged_stats,
            "Monthly conversion completed"
        );
        Ok(ConversionReport::Converted {
            month,
            accounts: conversions.len(),
            total,
            purged_stats,
        })
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// The caller's account, created on first access.
    pub async fn balance_of(&self, user_id: &UserId) -> Result<UserAccount, LedgerError> {
        Ok(self.store.get_or_create_account(user_id).await?)
    }

    /// Richest accounts by `currency`.
    pub async fn leaderboard(&self, currency: Currency) -> Result<Vec<LeaderboardEntry>, LedgerError> {
        Ok(self
            .store
            .leaderboard(currency, self.economy.leaderboard_size)
            .await?)
    }

    /// Biggest gambling winners of `month`.
    pub async fn lucky(&self, month: &Month) -> Result<Vec<LeaderboardEntry>, LedgerError> {
        Ok(self
            .store
            .monthly_top(month, StatSide::Wins, self.economy.leaderboard_size)
            .await?)
    }

    /// Biggest gambling losers of `month`.
    pub async fn unlucky(&self, month: &Month) -> Result<Vec<LeaderboardEntry>, LedgerError> {
        Ok(self
            .store
            .monthly_top(month, StatSide::Losses, self.economy.leaderboard_size)
            .await?)
    }
}

fn expiry(now: DateTime<Utc>, lifetime: Duration) -> DateTime<Utc> {
    chrono::TimeDelta::from_std(lifetime)
        .ok()
        .and_then(|lifetime| now.checked_add_signed(lifetime))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Balance after crediting `amount`, refused if it would overflow.
const fn credit(balance: i64, amount: i64) -> Result<i64, Rejection> {
    match balance.checked_add(amount) {
        Some(total) => Ok(total),
        None => Err(Rejection::BalanceLimit),
    }
}

fn gift_pair_key(receiver: &UserId) -> String {
    format!("gift:{receiver}")
}

fn missing(user_id: &UserId) -> LedgerError {
    LedgerError::Store(spirit_db::DbError::NotFound(format!("account {user_id}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn amounts_parse() {
        assert_eq!(Amount::parse("ALL"), Some(Amount::All));
        assert_eq!(Amount::parse(" 1,500 "), Some(Amount::Exact(1_500)));
        assert_eq!(Amount::parse("-5"), Some(Amount::Exact(-5)));
        assert_eq!(Amount::parse("lots"), None);
    }

    #[test]
    fn credit_refuses_overflow() {
        assert_eq!(credit(5, 10), Ok(15));
        assert_eq!(credit(i64::MAX, 0), Ok(i64::MAX));
        assert_eq!(credit(i64::MAX, 1), Err(Rejection::BalanceLimit));
    }
}
