//! Configuration loading and typed config structures for the Spirit bot.
//!
//! The canonical configuration lives in `config/spirit-bot.yaml`. Every
//! section and field has a default, so a missing file or a partial file is
//! valid. Secrets never live in the YAML: the Discord token and the GitHub
//! credentials come from the environment (optionally via a `.env` file).
//!
//! Environment overrides:
//!
//! | Variable | Field |
//! |----------|-------|
//! | `DISCORD_BOT_TOKEN` | `bot.token` |
//! | `DATABASE_PATH` | `database.path` |
//! | `GITHUB_TOKEN` | `backup.github_token` |
//! | `GITHUB_REPO` | `backup.github_repo` |
//! | `GITHUB_BRANCH` | `backup.github_branch` |
//! | `OBSERVER_PORT` | `observer.port` |
//! | `SPIRIT_CONFIG` | path of the YAML file itself |

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use spirit_backup::{BackupConfig, GitHubConfig};
use spirit_db::StoreConfig;
use spirit_ledger::EconomyConfig;
use spirit_resilience::{BreakerConfig, RetryPolicy};
use spirit_types::RoleId;

/// Default location of the configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "config/spirit-bot.yaml";

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },

    /// An environment override held an unusable value.
    #[error("invalid value for {name}: {reason}")]
    InvalidEnv {
        /// Variable name.
        name: &'static str,
        /// Why it was rejected.
        reason: String,
    },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

// ---------------------------------------------------------------------------
// Top level
// ---------------------------------------------------------------------------

/// Top-level bot configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    /// Command surface and platform connection.
    pub bot: BotSection,
    /// Embedded store.
    pub database: DatabaseSection,
    /// Snapshots and the remote repository.
    pub backup: BackupSection,
    /// Breakers, rate limit, retry.
    pub resilience: ResilienceSection,
    /// Background loop periods.
    pub maintenance: MaintenanceSection,
    /// Rewards, limits, grant lifetimes.
    pub economy: EconomyConfig,
    /// Platform role ids.
    pub roles: RolesSection,
    /// HTTP status surface.
    pub observer: ObserverSection,
}

impl BotConfig {
    /// Load `.env`, read the YAML file named by `SPIRIT_CONFIG` (or
    /// [`DEFAULT_CONFIG_PATH`]) if it exists, and apply environment
    /// overrides.
    pub fn load() -> Result<Self, ConfigError> {
        if let Ok(path) = dotenvy::dotenv() {
            tracing::debug!(path = %path.display(), "Loaded .env file");
        }
        let path = std::env::var("SPIRIT_CONFIG")
            .map_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH), PathBuf::from);

        let mut config = if path.exists() {
            Self::from_file(&path)?
        } else {
            tracing::info!(path = %path.display(), "Config file not found, using defaults");
            Self::default()
        };
        config.apply_overrides(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    /// Load configuration from a YAML file without environment overrides.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse configuration from a YAML string.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yml::from_str(yaml)?)
    }

    /// Apply overrides from `lookup`, which maps a variable name to its
    /// value. Empty values are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(token) = get("DISCORD_BOT_TOKEN") {
            self.bot.token = Some(token);
        }
        if let Some(path) = get("DATABASE_PATH") {
            self.database.path = PathBuf::from(path);
        }
        if let Some(token) = get("GITHUB_TOKEN") {
            self.backup.github_token = Some(token);
        }
        if let Some(repo) = get("GITHUB_REPO") {
            self.backup.github_repo = Some(repo);
        }
        if let Some(branch) = get("GITHUB_BRANCH") {
            self.backup.github_branch = branch;
        }
        if let Some(port) = get("OBSERVER_PORT") {
            self.observer.port = port.trim().parse().map_err(|e| ConfigError::InvalidEnv {
                name: "OBSERVER_PORT",
                reason: format!("{e}"),
            })?;
        }
        Ok(())
    }

    /// Store settings.
    pub fn store_config(&self) -> StoreConfig {
        StoreConfig::new(&self.database.path)
            .with_max_connections(self.database.max_connections)
            .with_acquire_timeout(Duration::from_secs(self.database.acquire_timeout_secs))
            .with_busy_timeout(Duration::from_secs(self.database.busy_timeout_secs))
    }

    /// Backup manager settings.
    pub fn backup_config(&self) -> BackupConfig {
        BackupConfig::new(&self.backup.dir)
            .with_remote_prefix(self.backup.remote_prefix.clone())
            .with_retention(self.backup.keep_local, self.backup.keep_remote)
            .with_retry(self.resilience.retry_policy())
    }

    /// GitHub repository settings, or `None` when remote backup is
    /// disabled because a token or repository is missing.
    pub fn github(&self) -> Option<GitHubConfig> {
        let token = self.backup.github_token.as_deref()?;
        let repo = self.backup.github_repo.as_deref()?;
        Some(GitHubConfig::new(token, repo, self.backup.github_branch.as_str()))
    }
}

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

/// Command surface and platform connection.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BotSection {
    /// Prefix that marks a message as a command.
    pub prefix: String,
    /// Platform bot token. Only ever set from the environment in practice.
    pub token: Option<String>,
    /// Platform REST root.
    pub api_url: String,
    /// Per-request timeout for platform calls, in seconds.
    pub request_timeout_secs: u64,
    /// Per-command cooldowns.
    pub cooldowns: CooldownSection,
}

impl std::fmt::Debug for BotSection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BotSection")
            .field("prefix", &self.prefix)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("api_url", &self.api_url)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("cooldowns", &self.cooldowns)
            .finish()
    }
}

impl Default for BotSection {
    fn default() -> Self {
        Self {
            prefix: "!".to_owned(),
            token: None,
            api_url: crate::discord::DEFAULT_API_URL.to_owned(),
            request_timeout_secs: 10,
            cooldowns: CooldownSection::default(),
        }
    }
}

/// Per-command cooldowns, in seconds. Zero disables the cooldown.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CooldownSection {
    /// Applied to every command without a specific entry.
    pub default_secs: u64,
    /// `daily`.
    pub daily_secs: u64,
    /// `coinflip`.
    pub coinflip_secs: u64,
    /// `gift`.
    pub gift_secs: u64,
    /// `buy`.
    pub buy_secs: u64,
    /// `exchange`.
    pub exchange_secs: u64,
}

impl Default for CooldownSection {
    fn default() -> Self {
        Self {
            default_secs: 3,
            daily_secs: 5,
            coinflip_secs: 60,
            gift_secs: 10,
            buy_secs: 10,
            exchange_secs: 5,
        }
    }
}

/// Embedded store.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DatabaseSection {
    /// Live database file.
    pub path: PathBuf,
    /// Pool size, clamped by the store to `1..=5`.
    pub max_connections: u32,
    /// Wait for a pooled connection, in seconds.
    pub acquire_timeout_secs: u64,
    /// `SQLite` busy timeout, in seconds.
    pub busy_timeout_secs: u64,
}

impl Default for DatabaseSection {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/spirit.db"),
            max_connections: 5,
            acquire_timeout_secs: 10,
            busy_timeout_secs: 5,
        }
    }
}

/// Snapshots and the remote repository.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BackupSection {
    /// Local snapshot directory.
    pub dir: PathBuf,
    /// Snapshots kept locally.
    pub keep_local: usize,
    /// Snapshots kept remotely.
    pub keep_remote: usize,
    /// Directory inside the remote repository.
    pub remote_prefix: String,
    /// Remote repository token.
    pub github_token: Option<String>,
    /// Remote repository, `owner/name`.
    pub github_repo: Option<String>,
    /// Branch holding the snapshots.
    pub github_branch: String,
}

impl std::fmt::Debug for BackupSection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackupSection")
            .field("dir", &self.dir)
            .field("keep_local", &self.keep_local)
            .field("keep_remote", &self.keep_remote)
            .field("remote_prefix", &self.remote_prefix)
            .field("github_token", &self.github_token.as_ref().map(|_| "<redacted>"))
            .field("github_repo", &self.github_repo)
            .field("github_branch", &self.github_branch)
            .finish()
    }
}

impl Default for BackupSection {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("backups"),
            keep_local: spirit_backup::manager::DEFAULT_KEEP_LOCAL,
            keep_remote: spirit_backup::manager::DEFAULT_KEEP_REMOTE,
            remote_prefix: spirit_backup::manager::DEFAULT_REMOTE_PREFIX.to_owned(),
            github_token: None,
            github_repo: None,
            github_branch: "main".to_owned(),
        }
    }
}

/// Breakers, rate limit, retry, timeouts.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ResilienceSection {
    /// Consecutive failures that open the critical breaker.
    pub critical_failure_threshold: u32,
    /// Critical breaker cooldown, in seconds.
    pub critical_cooldown_secs: u64,
    /// Consecutive failures that open the notifications breaker.
    pub notifications_failure_threshold: u32,
    /// Notifications breaker cooldown, in seconds.
    pub notifications_cooldown_secs: u64,
    /// Outbound platform calls allowed per window.
    pub rate_limit_calls: usize,
    /// Rate-limit window, in milliseconds.
    pub rate_limit_window_ms: u64,
    /// Attempts per guarded call, including the first.
    pub retry_attempts: u32,
    /// Delay before the first retry, in milliseconds.
    pub retry_base_delay_ms: u64,
    /// Upper bound on a single retry delay, in milliseconds.
    pub retry_max_delay_ms: u64,
    /// Per-attempt timeout, in seconds.
    pub attempt_timeout_secs: u64,
    /// Users tracked by the command cooldown map before eviction.
    pub cooldown_max_users: usize,
}

impl Default for ResilienceSection {
    fn default() -> Self {
        Self {
            critical_failure_threshold: 5,
            critical_cooldown_secs: 30,
            notifications_failure_threshold: 3,
            notifications_cooldown_secs: 120,
            rate_limit_calls: 45,
            rate_limit_window_ms: 1_000,
            retry_attempts: 3,
            retry_base_delay_ms: 500,
            retry_max_delay_ms: 10_000,
            attempt_timeout_secs: 10,
            cooldown_max_users: spirit_resilience::cooldown::DEFAULT_MAX_USERS,
        }
    }
}

impl ResilienceSection {
    /// Critical breaker tuning.
    pub const fn critical_breaker(&self) -> BreakerConfig {
        BreakerConfig {
            failure_threshold: self.critical_failure_threshold,
            cooldown: Duration::from_secs(self.critical_cooldown_secs),
        }
    }

    /// Notifications breaker tuning.
    pub const fn notifications_breaker(&self) -> BreakerConfig {
        BreakerConfig {
            failure_threshold: self.notifications_failure_threshold,
            cooldown: Duration::from_secs(self.notifications_cooldown_secs),
        }
    }

    /// Retry policy shared by platform and remote calls.
    pub const fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry_attempts,
            Duration::from_millis(self.retry_base_delay_ms),
            Duration::from_millis(self.retry_max_delay_ms),
        )
    }

    /// Rate-limit window.
    pub const fn rate_limit_window(&self) -> Duration {
        Duration::from_millis(self.rate_limit_window_ms)
    }

    /// Per-attempt timeout.
    pub const fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.attempt_timeout_secs)
    }
}

/// Background loop periods, in seconds.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct MaintenanceSection {
    /// Expired grant sweep.
    pub sweep_interval_secs: u64,
    /// Snapshot, upload, prune.
    pub backup_interval_secs: u64,
    /// Monthly conversion check.
    pub conversion_interval_secs: u64,
    /// Integrity check and recovery.
    pub health_interval_secs: u64,
    /// Cooldown and lock pruning.
    pub prune_interval_secs: u64,
    /// Supervisor watchdog.
    pub watchdog_interval_secs: u64,
}

impl Default for MaintenanceSection {
    fn default() -> Self {
        Self {
            sweep_interval_secs: 300,
            backup_interval_secs: 6 * 3_600,
            conversion_interval_secs: 3_600,
            health_interval_secs: 600,
            prune_interval_secs: 3_600,
            watchdog_interval_secs: 30,
        }
    }
}

/// Platform role ids. A missing role disables whatever depends on it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RolesSection {
    /// Administrators: admin daily tier and the `transfer`/`remove` commands.
    pub admin: Option<RoleId>,
    /// Server boosters: booster daily tier.
    pub booster: Option<RoleId>,
    /// Granted by the temporary admin item.
    pub temp_admin: Option<RoleId>,
    /// Granted by the prestige item.
    pub hmw: Option<RoleId>,
}

/// HTTP status surface.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ObserverSection {
    /// Bind address.
    pub host: String,
    /// Bind port.
    pub port: u16,
}

impl Default for ObserverSection {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_owned(),
            port: 8080,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn empty_yaml_gives_defaults() {
        let config = BotConfig::parse("").unwrap_or_default();
        assert_eq!(config, BotConfig::default());
        assert_eq!(config.bot.prefix, "!");
        assert_eq!(config.maintenance.sweep_interval_secs, 300);
        assert_eq!(config.economy.max_bet, 20_000);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let yaml = "bot:\n  prefix: \"?\"\nroles:\n  admin: \"42\"\neconomy:\n  daily_reward: 500\n";
        let config = BotConfig::parse(yaml).unwrap_or_default();
        assert_eq!(config.bot.prefix, "?");
        assert_eq!(config.bot.cooldowns.coinflip_secs, 60);
        assert_eq!(config.roles.admin, Some(RoleId::new("42")));
        assert_eq!(config.roles.hmw, None);
        assert_eq!(config.economy.daily_reward, 500);
        assert_eq!(config.economy.booster_daily_reward, 350);
    }

    #[test]
    fn malformed_yaml_is_an_error() {
        assert!(matches!(
            BotConfig::parse("bot: [unclosed"),
            Err(ConfigError::Yaml { .. })
        ));
    }

    #[test]
    fn environment_overrides_apply() {
        let env: HashMap<&str, &str> = [
            ("DISCORD_BOT_TOKEN", "secret"),
            ("DATABASE_PATH", "/tmp/x.db"),
            ("GITHUB_TOKEN", "gh"),
            ("GITHUB_REPO", "owner/backups"),
            ("OBSERVER_PORT", "9090"),
            ("GITHUB_BRANCH", ""),
        ]
        .into_iter()
        .collect();
        let mut config = BotConfig::default();
        let applied = config.apply_overrides(|name| env.get(name).map(|v| (*v).to_owned()));

        assert!(applied.is_ok());
        assert_eq!(config.bot.token.as_deref(), Some("secret"));
        assert_eq!(config.database.path, PathBuf::from("/tmp/x.db"));
        assert_eq!(config.observer.port, 9090);
        assert_eq!(config.backup.github_branch, "main");
        let github = config.github();
        assert_eq!(github.map(|g| g.repo), Some("owner/backups".to_owned()));
    }

    #[test]
    fn missing_github_credentials_disable_remote() {
        let mut config = BotConfig::default();
        config.backup.github_repo = Some("owner/backups".to_owned());
        assert!(config.github().is_none());
    }

    #[test]
    fn bad_port_is_rejected() {
        let mut config = BotConfig::default();
        let result = config.apply_overrides(|name| (name == "OBSERVER_PORT").then(|| "http".to_owned()));
        assert!(matches!(
            result,
            Err(ConfigError::InvalidEnv {
                name: "OBSERVER_PORT",
                ..
            })
        ));
    }

    #[test]
    fn debug_redacts_secrets() {
        let mut config = BotConfig::default();
        config.bot.token = Some("hunter2".to_owned());
        config.backup.github_token = Some("ghp_secret".to_owned());
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(!rendered.contains("ghp_secret"));
    }
}
