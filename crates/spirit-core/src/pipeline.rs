//! The command pipeline.
//!
//! Every inbound command runs through the same fixed stages:
//!
//! ```text
//! parse --> cooldown check --> execute (isolated task) --> error capture --> Reply
//! ```
//!
//! Every path ends in a [`Reply`]. Rejections are expected and logged at
//! `debug`; an unavailable dependency is logged at `warn`; anything else is
//! logged at `error` with the full context and replaced by a generic notice.
//! Execution runs in its own task so a panicking handler fails only its
//! own command.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use spirit_db::DbError;
use spirit_ledger::{
    Ledger, LedgerError, MemberTier, PurchaseEffect, PurchaseRequest, ShopItemKind,
};
use spirit_resilience::{CooldownTracker, format_wait};
use spirit_types::{ChannelId, CoinFace, Currency, GuildId, Month, RoleId, UserId};

use crate::command::{self, Command, ParseError};
use crate::config::{BotConfig, CooldownSection, RolesSection};
use crate::replies;
use crate::resilient::{CallClass, PlatformFailure, ResilientPlatform};

/// Shown when a command fails unexpectedly.
pub const GENERIC_FAILURE: &str =
    "Something went wrong while running that command. The error has been logged.";

/// Shown while the store is degraded.
pub const MAINTENANCE_NOTICE: &str =
    "The economy is under maintenance right now. Please try again in a few minutes.";

// ---------------------------------------------------------------------------
// Inputs and outputs
// ---------------------------------------------------------------------------

/// Who sent a command and where.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandContext {
    /// Author.
    pub user_id: UserId,
    /// Server, absent in direct messages.
    #[serde(default)]
    pub guild_id: Option<GuildId>,
    /// Channel the reply goes to.
    pub channel_id: ChannelId,
    /// Author's roles in the server.
    #[serde(default)]
    pub roles: Vec<RoleId>,
}

/// How a command ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyStatus {
    /// The command ran.
    Ok,
    /// The request was refused; nothing changed.
    Rejected,
    /// The command is on cooldown for this user.
    Cooldown,
    /// A dependency is unavailable.
    Unavailable,
    /// The command failed unexpectedly.
    Failed,
    /// The message was not a command; nothing is sent.
    Ignored,
}

/// Text to send back, with how the command ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reply {
    /// Outcome.
    pub status: ReplyStatus,
    /// Message body. Empty when ignored.
    pub text: String,
}

impl Reply {
    fn new(status: ReplyStatus, text: impl Into<String>) -> Self {
        Self {
            status,
            text: text.into(),
        }
    }

    const fn ignored() -> Self {
        Self {
            status: ReplyStatus::Ignored,
            text: String::new(),
        }
    }
}

/// Supplies coin faces for coinflips.
pub trait CoinSource: Send + Sync {
    /// Flip the coin.
    fn flip(&self) -> CoinFace;
}

/// Fair coin backed by the thread-local RNG.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomCoin;

impl CoinSource for RandomCoin {
    fn flip(&self) -> CoinFace {
        CoinFace::from_bool(rand::random::<bool>())
    }
}

/// The part of [`BotConfig`] the pipeline reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineSettings {
    /// Command prefix.
    pub prefix: String,
    /// Per-command cooldowns.
    pub cooldowns: CooldownSection,
    /// Role ids.
    pub roles: RolesSection,
}

impl From<&BotConfig> for PipelineSettings {
    fn from(config: &BotConfig) -> Self {
        Self {
            prefix: config.bot.prefix.clone(),
            cooldowns: config.bot.cooldowns.clone(),
            roles: config.roles.clone(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
enum CommandError {
    #[error("{0}")]
    Rejected(String),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Platform(#[from] PlatformFailure),
    #[error("command task crashed: {0}")]
    Crashed(String),
}

fn has_role(ctx: &CommandContext, role: Option<&RoleId>) -> bool {
    role.is_some_and(|role| ctx.roles.contains(role))
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Parses, rate-limits, runs, and answers commands.
#[derive(Clone)]
pub struct CommandPipeline {
    ledger: Ledger,
    platform: ResilientPlatform,
    cooldowns: Arc<CooldownTracker>,
    settings: Arc<PipelineSettings>,
    coin: Arc<dyn CoinSource>,
}

impl std::fmt::Debug for CommandPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandPipeline")
            .field("settings", &self.settings)
            .field("tracked_users", &self.cooldowns.tracked_users())
            .finish_non_exhaustive()
    }
}

impl CommandPipeline {
    /// Build a pipeline with a fair coin.
    pub fn new(
        ledger: Ledger,
        platform: ResilientPlatform,
        cooldowns: Arc<CooldownTracker>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            ledger,
            platform,
            cooldowns,
            settings: Arc::new(settings),
            coin: Arc::new(RandomCoin),
        }
    }

    /// Replace the coin.
    #[must_use]
    pub fn with_coin(mut self, coin: Arc<dyn CoinSource>) -> Self {
        self.coin = coin;
        self
    }

    fn cooldown_for(&self, name: &str) -> Duration {
        let c = &self.settings.cooldowns;
        let secs = match name {
            "daily" => c.daily_secs,
            "coinflip" => c.coinflip_secs,
            "gift" => c.gift_secs,
            "buy" => c.buy_secs,
            "exchange" => c.exchange_secs,
            _ => c.default_secs,
        };
        Duration::from_secs(secs)
    }

    /// Run `text` as a command from `ctx` and produce the reply.
    pub async fn handle(&self, ctx: &CommandContext, text: &str) -> Reply {
        let prefix = self.settings.prefix.as_str();
        let command = match command::parse(prefix, text) {
            Ok(command) => command,
            Err(ParseError::NotACommand) => return Reply::ignored(),
            Err(e @ ParseError::Unknown(_)) => {
                tracing::debug!(user_id = %ctx.user_id, error = %e, "Unknown command");
                return Reply::new(ReplyStatus::Rejected, format!("{e} Try `{prefix}help`."));
            }
            Err(e) => {
                tracing::debug!(user_id = %ctx.user_id, error = %e, "Malformed command");
                return Reply::new(ReplyStatus::Rejected, e.to_string());
            }
        };
        let name = command.name();

        let cooldown = self.cooldown_for(name);
        if !cooldown.is_zero() {
            if let Err(active) =
                self.cooldowns
                    .check_and_record(ctx.user_id.as_str(), name, cooldown)
            {
                tracing::debug!(
                    user_id = %ctx.user_id,
                    command = name,
                    remaining_secs = active.remaining.as_secs(),
                    "Command on cooldown"
                );
                return Reply::new(
                    ReplyStatus::Cooldown,
                    format!(
                        "Slow down! `{prefix}{name}` is available again in {}.",
                        format_wait(active.remaining)
                    ),
                );
            }
        }

        let this = self.clone();
        let task_ctx = ctx.clone();
        let result = tokio::spawn(async move { this.execute(&task_ctx, command).await })
            .await
            .unwrap_or_else(|e| Err(CommandError::Crashed(e.to_string())));

        let reply = capture(ctx, name, result);
        if reply.status != ReplyStatus::Ok {
            self.cooldowns.clear(ctx.user_id.as_str(), name);
        }
        reply
    }

    /// Send `reply` to the context's channel through the critical breaker.
    /// Ignored replies are not sent.
    pub async fn deliver(&self, ctx: &CommandContext, reply: &Reply) -> Result<(), PlatformFailure> {
        if reply.status == ReplyStatus::Ignored || reply.text.is_empty() {
            return Ok(());
        }
        let sent = self
            .platform
            .send_message(CallClass::Critical, &ctx.channel_id, &reply.text)
            .await;
        if let Err(e) = &sent {
            tracing::warn!(
                user_id = %ctx.user_id,
                channel_id = %ctx.channel_id,
                error = %e,
                "Reply not delivered"
            );
        }
        sent
    }

    // -----------------------------------------------------------------------
    // Execution
    // -----------------------------------------------------------------------

    fn tier(&self, ctx: &CommandContext) -> MemberTier {
        let roles = &self.settings.roles;
        if has_role(ctx, roles.admin.as_ref()) {
            MemberTier::Admin
        } else if has_role(ctx, roles.booster.as_ref()) {
            MemberTier::Booster
        } else {
            MemberTier::Member
        }
    }

    fn require_admin(&self, ctx: &CommandContext) -> Result<(), CommandError> {
        if has_role(ctx, self.settings.roles.admin.as_ref()) {
            Ok(())
        } else {
            Err(CommandError::Rejected(
                "Only administrators can use this command.".to_owned(),
            ))
        }
    }

    async fn execute(&self, ctx: &CommandContext, command: Command) -> Result<String, CommandError> {
        let now = Utc::now();
        let user = &ctx.user_id;
        let text = match command {
            Command::Daily => {
                let outcome = self.ledger.claim_daily(user, self.tier(ctx), now).await?;
                replies::daily(&outcome)
            }
            Command::StoneBalance { member } => {
                let owner = member.unwrap_or_else(|| user.clone());
                let account = self.ledger.balance_of(&owner).await?;
                replies::balance(&owner, Currency::Balance, &account)
            }
            Command::PointBalance { member } => {
                let owner = member.unwrap_or_else(|| user.clone());
                let account = self.ledger.balance_of(&owner).await?;
                replies::balance(&owner, Currency::SpiritPoints, &account)
            }
            Command::Exchange { amount } => {
                replies::exchange(&self.ledger.exchange(user, amount, now).await?)
            }
            Command::Coinflip { guess, amount } => {
                let landed = self.coin.flip();
                replies::coinflip(&self.ledger.coinflip(user, guess, amount, landed, now).await?)
            }
            Command::Shop => replies::shop(&self.settings.prefix),
            Command::Buy {
                item,
                target,
                nickname,
            } => self.buy(ctx, item, target, nickname, now).await?,
            Command::Gift { to, amount } => {
                let outcome = self.ledger.gift(user, &to, amount, now).await?;
                replies::gift(user, &to, &outcome)
            }
            Command::Transfer { to, amount } => {
                self.require_admin(ctx)?;
                replies::admin(&self.ledger.admin_grant(user, &to, amount, now).await?)
            }
            Command::Remove { from, amount } => {
                self.require_admin(ctx)?;
                replies::admin(&self.ledger.admin_remove(user, &from, amount, now).await?)
            }
            Command::Top { currency } => {
                let entries = self.ledger.leaderboard(currency).await?;
                let title = match currency {
                    Currency::Balance => "Richest members by Spirit Stones",
                    Currency::SpiritPoints => "Richest members by Spirit Points",
                };
                replies::leaderboard(title, currency.symbol(), &entries, "Nobody has any yet.")
            }
            Command::Lucky => {
                let entries = self.ledger.lucky(&Month::of(now)).await?;
                replies::leaderboard(
                    "Luckiest gamblers this month",
                    "SP won",
                    &entries,
                    "Nobody has won a coinflip this month.",
                )
            }
            Command::Unlucky => {
                let entries = self.ledger.unlucky(&Month::of(now)).await?;
                replies::leaderboard(
                    "Unluckiest gamblers this month",
                    "SP lost",
                    &entries,
                    "Nobody has lost a coinflip this month.",
                )
            }
            Command::Help => replies::help(&self.settings.prefix),
        };
        Ok(text)
    }

    async fn buy(
        &self,
        ctx: &CommandContext,
        item: ShopItemKind,
        target: Option<UserId>,
        nickname: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<String, CommandError> {
        let roles = &self.settings.roles;
        let role = match item {
            ShopItemKind::TempAdmin => Some(roles.temp_admin.clone()),
            ShopItemKind::HmwRole => Some(roles.hmw.clone()),
            ShopItemKind::NicknameLock | ShopItemKind::NameChangeCard => None,
        };
        if matches!(role, Some(None)) {
            return Err(CommandError::Rejected(
                "That item is not available on this server.".to_owned(),
            ));
        }
        let touches_platform = item != ShopItemKind::NicknameLock;
        if touches_platform && !self.platform.is_connected() {
            return Err(PlatformFailure::Disconnected.into());
        }

        let target_nickname = match (item, &ctx.guild_id, &target) {
            (ShopItemKind::NameChangeCard, Some(guild), Some(target)) => {
                match self
                    .platform
                    .member_nickname(CallClass::Critical, guild, target)
                    .await
                {
                    Ok(current) => current,
                    Err(e) => {
                        tracing::warn!(
                            guild_id = %guild,
                            target_id = %target,
                            error = %e,
                            "Could not read current nickname, expiry will reset it"
                        );
                        None
                    }
                }
            }
            _ => None,
        };

        let outcome = self
            .ledger
            .purchase(
                PurchaseRequest {
                    user_id: ctx.user_id.clone(),
                    item,
                    guild_id: ctx.guild_id.clone(),
                    target,
                    target_nickname,
                    new_nickname: nickname,
                },
                now,
            )
            .await?;

        let applied = match &outcome.effect {
            PurchaseEffect::NicknameLocked => Ok("Your nickname is now locked.".to_owned()),
            PurchaseEffect::GrantTempAdmin {
                guild_id,
                expires_at,
            } => self
                .grant_role(guild_id, &ctx.user_id, role.flatten().as_ref())
                .await
                .map(|()| format!("Temporary admin granted until {}.", replies::expires(*expires_at))),
            PurchaseEffect::GrantPrestige { guild_id } => self
                .grant_role(guild_id, &ctx.user_id, role.flatten().as_ref())
                .await
                .map(|()| "The HMW role is yours.".to_owned()),
            PurchaseEffect::SetNickname {
                guild_id,
                target,
                nickname,
                expires_at,
            } => self
                .platform
                .set_nickname(CallClass::Critical, guild_id, target, Some(nickname.as_str()))
                .await
                .map(|()| {
                    format!(
                        "<@{target}> is now called {nickname} until {}.",
                        replies::expires(*expires_at)
                    )
                }),
        };

        let effect_line = applied.unwrap_or_else(|failure| {
            tracing::error!(
                user_id = %ctx.user_id,
                item = item.key(),
                error = %failure,
                "Purchase paid but platform effect not applied"
            );
            format!(
                "{} The purchase is recorded; an administrator can apply it manually.",
                failure.user_message()
            )
        });

        Ok(format!(
            "Bought {} for {} SS. Balance: {} SS.\n{effect_line}",
            outcome.item.name,
            replies::amount(outcome.item.price),
            replies::amount(outcome.balance),
        ))
    }

    async fn grant_role(
        &self,
        guild: &GuildId,
        user: &UserId,
        role: Option<&RoleId>,
    ) -> Result<(), PlatformFailure> {
        match role {
            Some(role) => {
                self.platform
                    .add_role(CallClass::Critical, guild, user, role)
                    .await
            }
            None => Ok(()),
        }
    }
}

fn capture(ctx: &CommandContext, name: &str, result: Result<String, CommandError>) -> Reply {
    let error = match result {
        Ok(text) => return Reply::new(ReplyStatus::Ok, text),
        Err(e) => e,
    };
    match error {
        CommandError::Rejected(text) => {
            tracing::debug!(user_id = %ctx.user_id, command = name, reason = %text, "Command rejected");
            Reply::new(ReplyStatus::Rejected, text)
        }
        CommandError::Ledger(LedgerError::Validation(rejection)) => {
            tracing::debug!(user_id = %ctx.user_id, command = name, reason = %rejection, "Command rejected");
            Reply::new(ReplyStatus::Rejected, rejection.to_string())
        }
        CommandError::Ledger(LedgerError::Store(DbError::Degraded)) => {
            tracing::warn!(user_id = %ctx.user_id, command = name, "Command refused while store is degraded");
            Reply::new(ReplyStatus::Unavailable, MAINTENANCE_NOTICE)
        }
        CommandError::Platform(failure) => {
            tracing::warn!(user_id = %ctx.user_id, command = name, error = %failure, "Platform call failed");
            let status = if matches!(failure, PlatformFailure::Unavailable(_)) {
                ReplyStatus::Unavailable
            } else {
                ReplyStatus::Failed
            };
            Reply::new(status, failure.user_message())
        }
        unexpected @ (CommandError::Ledger(LedgerError::Store(_)) | CommandError::Crashed(_)) => {
            tracing::error!(
                user_id = %ctx.user_id,
                guild_id = ?ctx.guild_id,
                channel_id = %ctx.channel_id,
                command = name,
                error = %unexpected,
                "Command failed"
            );
            Reply::new(ReplyStatus::Failed, GENERIC_FAILURE)
        }
    }
}
