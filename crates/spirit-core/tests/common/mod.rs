//! Shared fixtures: an in-memory chat platform and a context over a
//! temporary store.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use spirit_core::config::BotConfig;
use spirit_core::{BotContext, BotIdentity, ChatPlatform, CommandContext, PlatformError};
use spirit_db::Store;
use spirit_types::{AccountUpdate, ChannelId, GuildId, RoleId, UserId};
use tempfile::TempDir;

pub const GUILD: &str = "10";
pub const CHANNEL: &str = "20";
pub const ADMIN_ROLE: &str = "900";
pub const TEMP_ADMIN_ROLE: &str = "901";
pub const HMW_ROLE: &str = "902";

/// Records every call; fails all of them with a permission error when
/// `fail` is set.
#[derive(Debug, Default)]
pub struct FakePlatform {
    calls: Mutex<Vec<String>>,
    fail: AtomicBool,
    nickname: Mutex<Option<String>>,
}

impl FakePlatform {
    pub fn failing() -> Self {
        let platform = Self::default();
        platform.set_failing(true);
        platform
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn set_member_nickname(&self, nickname: &str) {
        *self.nickname.lock().unwrap() = Some(nickname.to_owned());
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) -> Result<(), PlatformError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(PlatformError::Permission("Missing Permissions".to_owned()));
        }
        self.calls.lock().unwrap().push(call);
        Ok(())
    }
}

#[async_trait]
impl ChatPlatform for FakePlatform {
    async fn verify_credentials(&self) -> Result<BotIdentity, PlatformError> {
        self.record("verify".to_owned())?;
        Ok(BotIdentity {
            id: UserId::new("1000"),
            username: "spirit".to_owned(),
        })
    }

    async fn send_message(&self, channel: &ChannelId, content: &str) -> Result<(), PlatformError> {
        self.record(format!("send {channel} {content}"))
    }

    async fn add_role(&self, guild: &GuildId, user: &UserId, role: &RoleId) -> Result<(), PlatformError> {
        self.record(format!("add_role {guild} {user} {role}"))
    }

    async fn remove_role(
        &self,
        guild: &GuildId,
        user: &UserId,
        role: &RoleId,
    ) -> Result<(), PlatformError> {
        self.record(format!("remove_role {guild} {user} {role}"))
    }

    async fn set_nickname(
        &self,
        guild: &GuildId,
        user: &UserId,
        nickname: Option<&str>,
    ) -> Result<(), PlatformError> {
        self.record(format!("set_nickname {guild} {user} {}", nickname.unwrap_or("<reset>")))
    }

    async fn member_nickname(
        &self,
        _guild: &GuildId,
        _user: &UserId,
    ) -> Result<Option<String>, PlatformError> {
        self.record("member_nickname".to_owned())?;
        Ok(self.nickname.lock().unwrap().clone())
    }
}

/// Config with roles set, short cooldowns off, and backups under `dir`.
pub fn test_config(dir: &TempDir) -> BotConfig {
    let mut config = BotConfig::default();
    config.database.path = dir.path().join("spirit.db");
    config.backup.dir = dir.path().join("backups");
    config.roles.admin = Some(RoleId::new(ADMIN_ROLE));
    config.roles.temp_admin = Some(RoleId::new(TEMP_ADMIN_ROLE));
    config.roles.hmw = Some(RoleId::new(HMW_ROLE));
    config.bot.cooldowns.daily_secs = 0;
    config.bot.cooldowns.default_secs = 0;
    config.bot.cooldowns.buy_secs = 0;
    config.resilience.retry_base_delay_ms = 1;
    config.resilience.retry_max_delay_ms = 5;
    config
}

pub async fn context_with(
    config: BotConfig,
    platform: Option<Arc<FakePlatform>>,
) -> BotContext {
    let store = Store::connect(config.store_config()).await.expect("open store");
    let platform = platform.map(|p| p as Arc<dyn ChatPlatform>);
    BotContext::new(config, store, platform, None)
}

pub async fn context(platform: Option<Arc<FakePlatform>>) -> (TempDir, BotContext) {
    let dir = tempfile::tempdir().expect("tempdir");
    let ctx = context_with(test_config(&dir), platform).await;
    (dir, ctx)
}

pub fn member(id: &str) -> CommandContext {
    CommandContext {
        user_id: UserId::new(id),
        guild_id: Some(GuildId::new(GUILD)),
        channel_id: ChannelId::new(CHANNEL),
        roles: Vec::new(),
    }
}

pub fn admin(id: &str) -> CommandContext {
    CommandContext {
        roles: vec![RoleId::new(ADMIN_ROLE)],
        ..member(id)
    }
}

pub async fn set_balance(ctx: &BotContext, id: &str, balance: i64) {
    let user = UserId::new(id);
    ctx.store.get_or_create_account(&user).await.unwrap();
    assert!(
        ctx.store
            .update_account(
                &user,
                &AccountUpdate {
                    balance: Some(balance),
                    ..AccountUpdate::default()
                },
            )
            .await
    );
}

pub async fn set_level(ctx: &BotContext, id: &str, level: i32) {
    let user = UserId::new(id);
    ctx.store.get_or_create_account(&user).await.unwrap();
    assert!(
        ctx.store
            .update_account(
                &user,
                &AccountUpdate {
                    level: Some(level),
                    ..AccountUpdate::default()
                },
            )
            .await
    );
}
