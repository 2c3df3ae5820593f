//! Spirit economy bot binary.
//!
//! # Startup Sequence
//!
//! 1. Initialize structured logging (tracing)
//! 2. Load configuration from `config/spirit-bot.yaml` and the environment
//! 3. Open the store, salvaging from a local snapshot if it cannot open
//! 4. Run the integrity check and recovery chain once
//! 5. Connect the chat platform and verify the token (fatal if rejected)
//! 6. Configure the remote backup repository, if credentials are present
//! 7. Run the monthly conversion check once
//! 8. Start the maintenance supervisor and the HTTP server
//! 9. Wait for Ctrl-C, then shut both down and close the store

mod error;

use std::sync::Arc;
use std::time::Duration;

use spirit_backup::{GitHubRepository, RemoteRepository, salvage_unopenable_store};
use spirit_core::config::BotConfig;
use spirit_core::discord::DiscordRest;
use spirit_core::{BotContext, ChatPlatform, PlatformError, PlatformFailure};
use spirit_db::Store;
use spirit_observer::{AppState, ServerConfig};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::error::BotError;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();
    info!(version = env!("CARGO_PKG_VERSION"), "spirit-bot starting");

    let config = BotConfig::load().map_err(BotError::from)?;
    info!(
        database = %config.database.path.display(),
        backup_dir = %config.backup.dir.display(),
        prefix = %config.bot.prefix,
        platform = config.bot.token.is_some(),
        remote_backup = config.github().is_some(),
        "Configuration loaded"
    );

    let store = open_store(&config).await?;
    let platform = connect_platform(&config)?;
    let remote = remote_repository(&config);

    let bot = BotContext::new(config, store, platform, remote);

    let recovery = bot.maintenance().health_check().await;
    info!(outcome = ?recovery, "Startup integrity check finished");

    if bot.platform.is_connected() {
        match bot.platform.verify_credentials().await {
            Ok(identity) => info!(bot_id = %identity.id, username = %identity.username, "Platform credentials verified"),
            Err(PlatformFailure::Rejected(PlatformError::Auth)) => {
                error!("Platform rejected the bot token");
                return Err(BotError::InvalidToken.into());
            }
            Err(e) => warn!(error = %e, "Could not verify platform credentials, continuing"),
        }
    } else {
        warn!("DISCORD_BOT_TOKEN not set, platform disconnected");
    }

    if let Some(report) = bot.startup_conversion().await {
        info!(report = ?report, "Startup conversion check finished");
    }

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let supervisor = bot.supervisor().spawn(shutdown_rx.clone());

    let server_config = ServerConfig {
        host: bot.config.observer.host.clone(),
        port: bot.config.observer.port,
    };
    let server = spirit_observer::spawn_server(
        &server_config,
        Arc::new(AppState::new(bot.clone())),
        shutdown_rx,
    )
    .await
    .map_err(BotError::from)?;

    info!("spirit-bot running, press Ctrl-C to stop");
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for Ctrl-C, shutting down");
    }

    info!("Shutdown requested");
    let _ = shutdown_tx.send(true);
    if let Err(e) = supervisor.await {
        error!(error = %e, "Supervisor task failed");
    }
    match server.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "HTTP server failed"),
        Err(e) => error!(error = %e, "HTTP server task failed"),
    }
    bot.store.close().await;
    info!("spirit-bot shutdown complete");
    Ok(())
}

/// `LOG_FORMAT=json` switches to JSON lines.
fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    }
}

/// Open the store. If it cannot even be opened, quarantine it, restore
/// the newest usable local snapshot, and try once more.
async fn open_store(config: &BotConfig) -> Result<Store, BotError> {
    match Store::connect(config.store_config()).await {
        Ok(store) => Ok(store),
        Err(e) => {
            error!(path = %config.database.path.display(), error = %e, "Store failed to open, salvaging");
            match salvage_unopenable_store(&config.database.path, &config.backup.dir).await? {
                Some(name) => warn!(snapshot = %name, "Store restored from local snapshot"),
                None => error!("No usable snapshot, starting with an empty store"),
            }
            Ok(Store::connect(config.store_config()).await?)
        }
    }
}

fn connect_platform(config: &BotConfig) -> Result<Option<Arc<dyn ChatPlatform>>, BotError> {
    let Some(token) = config.bot.token.as_deref() else {
        return Ok(None);
    };
    let adapter = DiscordRest::new(
        config.bot.api_url.as_str(),
        token,
        Duration::from_secs(config.bot.request_timeout_secs),
    )?;
    Ok(Some(Arc::new(adapter)))
}

fn remote_repository(config: &BotConfig) -> Option<Arc<dyn RemoteRepository>> {
    let github = config.github()?;
    match GitHubRepository::new(github) {
        Ok(repo) => Some(Arc::new(repo)),
        Err(e) => {
            warn!(error = %e, "Remote backup client could not be built, running local-only");
            None
        }
    }
}
