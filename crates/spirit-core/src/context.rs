//! Wiring of the bot's long-lived components.
//!
//! [`BotContext`] is built once at startup and cloned into the HTTP
//! surface. [`BotContext::supervisor`] builds the maintenance loops over
//! the same components.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use spirit_backup::{BackupManager, RemoteRepository};
use spirit_db::Store;
use spirit_ledger::{ConversionReport, Ledger};
use spirit_resilience::CooldownTracker;

use crate::config::BotConfig;
use crate::health::{self, HealthReport};
use crate::maintenance::Maintenance;
use crate::pipeline::{CommandContext, CommandPipeline, PipelineSettings, Reply};
use crate::platform::ChatPlatform;
use crate::resilient::ResilientPlatform;
use crate::supervisor::{Supervisor, SupervisorStatus};

/// Shared handles to every component.
#[derive(Debug, Clone)]
pub struct BotContext {
    /// Loaded configuration.
    pub config: Arc<BotConfig>,
    /// The store.
    pub store: Store,
    /// Economy operations.
    pub ledger: Ledger,
    /// Backups and recovery.
    pub backups: Arc<BackupManager>,
    /// Guarded platform access.
    pub platform: ResilientPlatform,
    /// Command handling.
    pub pipeline: CommandPipeline,
    /// Maintenance loop states.
    pub tasks: SupervisorStatus,
    cooldowns: Arc<CooldownTracker>,
}

impl BotContext {
    /// Wire components over an open store. `None` for `platform` leaves
    /// the bot disconnected; `None` for `remote` keeps backups local.
    pub fn new(
        config: BotConfig,
        store: Store,
        platform: Option<Arc<dyn ChatPlatform>>,
        remote: Option<Arc<dyn RemoteRepository>>,
    ) -> Self {
        let ledger = Ledger::new(store.clone(), config.economy.clone());
        let backups = Arc::new(BackupManager::new(
            store.clone(),
            config.backup_config(),
            remote,
        ));
        let platform = ResilientPlatform::new(platform, &config.resilience);
        let cooldowns = Arc::new(CooldownTracker::new(config.resilience.cooldown_max_users));
        let pipeline = CommandPipeline::new(
            ledger.clone(),
            platform.clone(),
            Arc::clone(&cooldowns),
            PipelineSettings::from(&config),
        );
        Self {
            config: Arc::new(config),
            store,
            ledger,
            backups,
            platform,
            pipeline,
            tasks: SupervisorStatus::default(),
            cooldowns,
        }
    }

    /// Maintenance jobs over this context's components.
    pub fn maintenance(&self) -> Maintenance {
        Maintenance::new(
            self.ledger.clone(),
            Arc::clone(&self.backups),
            self.platform.clone(),
            Arc::clone(&self.cooldowns),
            self.config.roles.temp_admin.clone(),
        )
    }

    /// Build the supervisor with every maintenance loop registered. Its
    /// task states are reported through [`BotContext::tasks`].
    pub fn supervisor(&self) -> Supervisor {
        let periods = &self.config.maintenance;
        let secs = Duration::from_secs;
        let mut supervisor =
            Supervisor::new(secs(periods.watchdog_interval_secs)).with_status(self.tasks.clone());
        let jobs = self.maintenance();

        let sweep = jobs.clone();
        supervisor.every("grant_sweep", secs(periods.sweep_interval_secs), move || {
            let jobs = sweep.clone();
            async move {
                if let Err(e) = jobs.sweep_grants(Utc::now()).await {
                    tracing::error!(error = %e, "Grant sweep failed");
                }
            }
        });

        let backup = jobs.clone();
        supervisor.every("backup", secs(periods.backup_interval_secs), move || {
            let jobs = backup.clone();
            async move { jobs.backup().await }
        });

        let conversion = jobs.clone();
        supervisor.every(
            "monthly_conversion",
            secs(periods.conversion_interval_secs),
            move || {
                let jobs = conversion.clone();
                async move {
                    jobs.monthly_conversion(Utc::now()).await;
                }
            },
        );

        let health = jobs.clone();
        supervisor.every("health_check", secs(periods.health_interval_secs), move || {
            let jobs = health.clone();
            async move {
                jobs.health_check().await;
            }
        });

        supervisor.every("prune", secs(periods.prune_interval_secs), move || {
            let jobs = jobs.clone();
            async move {
                jobs.prune();
            }
        });

        supervisor
    }

    /// Run the conversion check once, outside the loop.
    pub async fn startup_conversion(&self) -> Option<ConversionReport> {
        self.maintenance().monthly_conversion(Utc::now()).await
    }

    /// Run a command and optionally deliver the reply to its channel.
    pub async fn run_command(&self, ctx: &CommandContext, text: &str, deliver: bool) -> Reply {
        let reply = self.pipeline.handle(ctx, text).await;
        if deliver {
            // Failures are logged by the pipeline; the caller still gets the text.
            let _ = self.pipeline.deliver(ctx, &reply).await;
        }
        reply
    }

    /// Current health report.
    pub async fn health(&self) -> HealthReport {
        health::collect(
            &self.store,
            &self.platform,
            &self.tasks,
            self.backups.has_remote(),
        )
        .await
    }
}
