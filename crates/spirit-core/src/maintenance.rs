//! Scheduled maintenance jobs.
//!
//! Each job is a single pass; the [`supervisor`](crate::supervisor) runs
//! them on their intervals. A job never returns an error to its loop:
//! failures are logged and the next tick tries again.
//!
//! | Job | Default interval |
//! |-----|------------------|
//! | [`Maintenance::sweep_grants`] | 5 min |
//! | [`Maintenance::backup`] | 6 h |
//! | [`Maintenance::monthly_conversion`] | 1 h |
//! | [`Maintenance::health_check`] | 10 min |
//! | [`Maintenance::prune`] | 1 h |

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use spirit_backup::{BackupManager, RecoveryOutcome};
use spirit_db::DbError;
use spirit_ledger::{ConversionReport, Ledger};
use spirit_resilience::CooldownTracker;
use spirit_types::{NameChangeCard, RoleId, TempAdminGrant};

use crate::resilient::{CallClass, ResilientPlatform};

/// Result of one grant sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Expired temporary admin rows deleted.
    pub temp_admins_expired: usize,
    /// Expired name change card rows deleted.
    pub name_cards_expired: usize,
    /// Platform calls that failed. Their rows were deleted anyway.
    pub platform_failures: usize,
}

/// Entries dropped by one prune pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PruneReport {
    /// Command cooldown users dropped.
    pub command_cooldowns: usize,
    /// Gift pair cooldown entries dropped.
    pub gift_cooldowns: usize,
    /// Idle per-user locks dropped.
    pub locks: usize,
}

/// Everything the maintenance jobs touch.
#[derive(Debug, Clone)]
pub struct Maintenance {
    ledger: Ledger,
    backups: Arc<BackupManager>,
    platform: ResilientPlatform,
    cooldowns: Arc<CooldownTracker>,
    temp_admin_role: Option<RoleId>,
}

impl Maintenance {
    /// Bundle the jobs' dependencies.
    pub const fn new(
        ledger: Ledger,
        backups: Arc<BackupManager>,
        platform: ResilientPlatform,
        cooldowns: Arc<CooldownTracker>,
        temp_admin_role: Option<RoleId>,
    ) -> Self {
        Self {
            ledger,
            backups,
            platform,
            cooldowns,
            temp_admin_role,
        }
    }

    // -----------------------------------------------------------------------
    // Grant sweep
    // -----------------------------------------------------------------------

    /// Revoke every grant that expired at or before `now`.
    ///
    /// Rows are deleted even when the platform call fails so an
    /// unreachable member cannot make the sweep retry forever.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the expired rows cannot be read.
    pub async fn sweep_grants(&self, now: DateTime<Utc>) -> Result<SweepReport, DbError> {
        let store = self.ledger.store();
        let mut report = SweepReport::default();

        for grant in store.expired_temp_admins(now).await? {
            if !self.revoke_temp_admin(&grant).await {
                report.platform_failures = report.platform_failures.saturating_add(1);
            }
            match store.delete_temp_admin(&grant.user_id).await {
                Ok(_) => report.temp_admins_expired = report.temp_admins_expired.saturating_add(1),
                Err(e) => tracing::error!(
                    user_id = %grant.user_id,
                    error = %e,
                    "Failed to delete expired temp admin row"
                ),
            }
        }

        for card in store.expired_name_cards(now).await? {
            if !self.revert_nickname(&card).await {
                report.platform_failures = report.platform_failures.saturating_add(1);
            }
            match store.delete_name_card(card.id).await {
                Ok(_) => report.name_cards_expired = report.name_cards_expired.saturating_add(1),
                Err(e) => tracing::error!(
                    card_id = %card.id,
                    error = %e,
                    "Failed to delete expired name card row"
                ),
            }
        }

        if report != SweepReport::default() {
            tracing::info!(
                temp_admins = report.temp_admins_expired,
                name_cards = report.name_cards_expired,
                platform_failures = report.platform_failures,
                "Grant sweep completed"
            );
        }
        Ok(report)
    }

    async fn revoke_temp_admin(&self, grant: &TempAdminGrant) -> bool {
        let Some(role) = &self.temp_admin_role else {
            tracing::warn!(user_id = %grant.user_id, "No temp admin role configured, dropping grant");
            return true;
        };
        match self
            .platform
            .remove_role(CallClass::Notifications, &grant.guild_id, &grant.user_id, role)
            .await
        {
            Ok(()) => {
                tracing::info!(user_id = %grant.user_id, guild_id = %grant.guild_id, "Temp admin expired");
                true
            }
            Err(e) => {
                tracing::warn!(
                    user_id = %grant.user_id,
                    guild_id = %grant.guild_id,
                    error = %e,
                    "Could not remove expired temp admin role"
                );
                false
            }
        }
    }

    async fn revert_nickname(&self, card: &NameChangeCard) -> bool {
        match self
            .platform
            .set_nickname(
                CallClass::Notifications,
                &card.guild_id,
                &card.target_id,
                card.original_nickname.as_deref(),
            )
            .await
        {
            Ok(()) => {
                tracing::info!(card_id = %card.id, target_id = %card.target_id, "Name change card expired");
                true
            }
            Err(e) => {
                tracing::warn!(
                    card_id = %card.id,
                    target_id = %card.target_id,
                    error = %e,
                    "Could not revert nickname"
                );
                false
            }
        }
    }

    // -----------------------------------------------------------------------
    // Other jobs
    // -----------------------------------------------------------------------

    /// Snapshot, upload, and prune.
    pub async fn backup(&self) {
        match self.backups.run_backup_cycle().await {
            Ok(report) => tracing::info!(
                name = %report.artifact.name,
                uploaded = report.uploaded.is_some(),
                remote_error = report.remote_error.as_deref().unwrap_or(""),
                pruned_local = report.pruned_local,
                pruned_remote = report.pruned_remote,
                "Backup cycle completed"
            ),
            Err(e) => tracing::error!(error = %e, "Backup cycle failed"),
        }
    }

    /// Convert Spirit Points if the month changed.
    pub async fn monthly_conversion(&self, now: DateTime<Utc>) -> Option<ConversionReport> {
        match self.ledger.monthly_conversion(now).await {
            Ok(report) => Some(report),
            Err(e) => {
                tracing::error!(error = %e, "Monthly conversion failed");
                None
            }
        }
    }

    /// Integrity check, recovering on corruption.
    pub async fn health_check(&self) -> RecoveryOutcome {
        let outcome = self.backups.check_and_recover().await;
        match &outcome {
            RecoveryOutcome::Healthy => tracing::debug!("Store integrity check passed"),
            RecoveryOutcome::Failed(reason) => {
                tracing::error!(reason = %reason, "Store recovery failed, staying degraded");
            }
            recovered => tracing::warn!(outcome = ?recovered, "Store recovered"),
        }
        outcome
    }

    /// Drop idle cooldown and lock entries.
    pub fn prune(&self) -> PruneReport {
        let report = PruneReport {
            command_cooldowns: self.cooldowns.prune(),
            gift_cooldowns: self.ledger.gift_cooldowns().prune(),
            locks: self.ledger.locks().prune(),
        };
        tracing::debug!(
            command_cooldowns = report.command_cooldowns,
            gift_cooldowns = report.gift_cooldowns,
            locks = report.locks,
            "Pruned idle entries"
        );
        report
    }
}
