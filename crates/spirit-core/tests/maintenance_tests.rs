//! Grant sweep, pruning, health, and supervisor tests.

// Integration tests use expect/unwrap extensively for clarity -- panicking
// on failure is the correct behavior in test code.
#![allow(
    clippy::expect_used,
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    clippy::indexing_slicing,
    clippy::arithmetic_side_effects,
    clippy::panic
)]

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::{Duration, Utc};
use common::{FakePlatform, GUILD, context, member};
use spirit_core::maintenance::SweepReport;
use spirit_core::supervisor::TaskFuture;
use spirit_core::{HealthStatus, Supervisor};
use spirit_resilience::BreakerState;
use spirit_types::{CardId, GuildId, NameChangeCard, TempAdminGrant, UserId};

async fn seed_expired_grants(ctx: &spirit_core::BotContext) {
    let past = Utc::now() - Duration::minutes(5);
    ctx.store
        .insert_temp_admin(&TempAdminGrant {
            user_id: UserId::new("42"),
            expires_at: past,
            guild_id: GuildId::new(GUILD),
        })
        .await
        .unwrap();
    ctx.store
        .insert_name_card(&NameChangeCard {
            id: CardId::new(),
            owner_id: UserId::new("42"),
            target_id: UserId::new("43"),
            original_nickname: None,
            new_nickname: "Renamed".to_owned(),
            expires_at: past,
            guild_id: GuildId::new(GUILD),
        })
        .await
        .unwrap();
}

// =============================================================================
// Grant sweep
// =============================================================================

#[tokio::test]
async fn sweep_revokes_expired_grants() {
    let platform = Arc::new(FakePlatform::default());
    let (_dir, ctx) = context(Some(Arc::clone(&platform))).await;
    seed_expired_grants(&ctx).await;

    let report = ctx.maintenance().sweep_grants(Utc::now()).await.unwrap();
    assert_eq!(
        report,
        SweepReport {
            temp_admins_expired: 1,
            name_cards_expired: 1,
            platform_failures: 0,
        }
    );
    assert_eq!(
        platform.calls(),
        vec![
            "remove_role 10 42 901".to_owned(),
            "set_nickname 10 43 <reset>".to_owned()
        ]
    );

    let again = ctx.maintenance().sweep_grants(Utc::now()).await.unwrap();
    assert_eq!(again, SweepReport::default());
}

#[tokio::test]
async fn sweep_deletes_rows_even_when_platform_fails() {
    let platform = Arc::new(FakePlatform::failing());
    let (_dir, ctx) = context(Some(Arc::clone(&platform))).await;
    seed_expired_grants(&ctx).await;

    let report = ctx.maintenance().sweep_grants(Utc::now()).await.unwrap();
    assert_eq!(report.platform_failures, 2);
    assert_eq!(report.temp_admins_expired, 1);
    assert_eq!(report.name_cards_expired, 1);

    let later = Utc::now() + Duration::days(1);
    assert!(ctx.store.expired_temp_admins(later).await.unwrap().is_empty());
    assert!(ctx.store.expired_name_cards(later).await.unwrap().is_empty());
}

#[tokio::test]
async fn sweep_leaves_unexpired_grants() {
    let (_dir, ctx) = context(Some(Arc::new(FakePlatform::default()))).await;
    ctx.store
        .insert_temp_admin(&TempAdminGrant {
            user_id: UserId::new("42"),
            expires_at: Utc::now() + Duration::minutes(30),
            guild_id: GuildId::new(GUILD),
        })
        .await
        .unwrap();

    let report = ctx.maintenance().sweep_grants(Utc::now()).await.unwrap();
    assert_eq!(report, SweepReport::default());
    let later = Utc::now() + Duration::hours(1);
    assert_eq!(ctx.store.expired_temp_admins(later).await.unwrap().len(), 1);
}

// =============================================================================
// Prune and health
// =============================================================================

#[tokio::test]
async fn prune_keeps_recent_cooldowns() {
    let (_dir, ctx) = context(None).await;
    let reply = ctx.pipeline.handle(&member("1"), "!coinflip heads 10").await;
    assert_ne!(reply.status, spirit_core::ReplyStatus::Ignored);

    let report = ctx.maintenance().prune();
    assert_eq!(report.command_cooldowns, 0);
}

#[tokio::test]
async fn health_reports_degraded_store() {
    let (_dir, ctx) = context(None).await;

    let healthy = ctx.health().await;
    assert_eq!(healthy.status, HealthStatus::Ok);
    assert!(healthy.store.reachable);
    assert!(!healthy.platform.connected);
    assert_eq!(healthy.platform.critical.state, BreakerState::Closed);
    assert!(!healthy.remote_backup);

    ctx.store.mark_degraded();
    let degraded = ctx.health().await;
    assert_eq!(degraded.status, HealthStatus::Degraded);
    assert!(degraded.store.degraded);
}

#[tokio::test]
async fn supervisor_registers_every_loop() {
    let (_dir, ctx) = context(None).await;
    let _supervisor = ctx.supervisor();
    let names: Vec<String> = ctx.tasks.snapshot().into_iter().map(|t| t.name).collect();
    assert_eq!(
        names,
        ["grant_sweep", "backup", "monthly_conversion", "health_check", "prune"]
    );
}

// =============================================================================
// Supervisor
// =============================================================================

#[tokio::test(start_paused = true)]
async fn watchdog_restarts_a_panicked_task() {
    let starts = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&starts);

    let mut supervisor = Supervisor::new(std::time::Duration::from_secs(30));
    supervisor.register("flaky", move || {
        let counter = Arc::clone(&counter);
        let body: TaskFuture = Box::pin(async move {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                panic!("first run fails");
            }
            std::future::pending::<()>().await;
        });
        body
    });
    let status = supervisor.status();
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let handle = supervisor.spawn(shutdown_rx);

    tokio::time::sleep(std::time::Duration::from_secs(31)).await;

    assert_eq!(starts.load(Ordering::SeqCst), 2);
    let task = status.snapshot().into_iter().next().unwrap();
    assert_eq!(task.restarts, 1);
    assert!(task.running);
    assert!(task.last_failure.unwrap().contains("first run fails"));

    shutdown_tx.send(true).unwrap();
    handle.await.unwrap();
    assert!(!status.snapshot()[0].running);
}

#[tokio::test(start_paused = true)]
async fn healthy_task_is_left_alone() {
    let mut supervisor = Supervisor::new(std::time::Duration::from_secs(30));
    supervisor.register("steady", || -> TaskFuture { Box::pin(std::future::pending::<()>()) });
    let status = supervisor.status();
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let handle = supervisor.spawn(shutdown_rx);

    tokio::time::sleep(std::time::Duration::from_secs(95)).await;
    assert_eq!(status.snapshot()[0].restarts, 0);

    drop(shutdown_tx);
    handle.await.unwrap();
}
