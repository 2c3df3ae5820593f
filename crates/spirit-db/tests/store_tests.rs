//! Integration tests for the `spirit-db` store.
//!
//! Each test opens a fresh `SQLite` file inside a temporary directory, so
//! no external services are needed.

// Integration tests use expect/unwrap extensively for clarity -- panicking
// on failure is the correct behavior in test code.
#![allow(
    clippy::expect_used,
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    clippy::indexing_slicing,
    clippy::arithmetic_side_effects
)]

use chrono::{Duration, Utc};
use spirit_db::{ClaimRecord, DbError, IntegrityStatus, LAST_CONVERSION_MONTH, Store, StoreConfig};
use spirit_types::{
    AccountDelta, AccountUpdate, CardId, Currency, GuildId, Month, NameChangeCard,
    NewTransaction, StatSide, TempAdminGrant, TransactionType, UserId,
};
use tempfile::TempDir;

// =============================================================================
// Helpers
// =============================================================================

async fn open_store() -> (TempDir, Store) {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = Store::connect(StoreConfig::new(dir.path().join("spirit.db")))
        .await
        .expect("open store");
    (dir, store)
}

async fn funded(store: &Store, id: &str, balance: i64) -> UserId {
    let user = UserId::new(id);
    store.get_or_create_account(&user).await.expect("create");
    assert!(
        store
            .update_account(
                &user,
                &AccountUpdate {
                    balance: Some(balance),
                    ..AccountUpdate::default()
                },
            )
            .await
    );
    user
}

// =============================================================================
// Accounts
// =============================================================================

#[tokio::test]
async fn new_account_has_defaults() {
    let (_dir, store) = open_store().await;
    let account = store
        .get_or_create_account(&UserId::new("u1"))
        .await
        .expect("create");
    assert_eq!(account.balance, 0);
    assert_eq!(account.spirit_points, 100);
    assert_eq!(account.streak, 0);
    assert_eq!(account.level, 1);
    assert_eq!(account.xp, 0);
    assert!(account.last_claim_at.is_none());
}

#[tokio::test]
async fn claim_record_writes_reward_and_progression_together() {
    let (_dir, store) = open_store().await;
    let user = UserId::new("u1");
    store.get_or_create_account(&user).await.expect("create");
    let now = Utc::now();

    let account = store
        .record_claim(
            &user,
            &ClaimRecord {
                reward: 300,
                streak: 1,
                level: 2,
                xp: 30,
                claimed_at: now,
            },
        )
        .await
        .expect("record")
        .expect("row exists");
    assert_eq!(account.spirit_points, 400);
    assert_eq!(account.streak, 1);
    assert_eq!(account.level, 2);
    assert_eq!(account.xp, 30);
    assert!(account.last_claim_at.is_some());

    let demote = AccountUpdate {
        level: Some(0),
        ..AccountUpdate::default()
    };
    assert!(!store.update_account(&user, &demote).await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_first_access_creates_exactly_one_row() {
    let (_dir, store) = open_store().await;
    let user = UserId::new("brand-new");

    let mut handles = Vec::new();
    for _ in 0..16 {
        let store = store.clone();
        let user = user.clone();
        handles.push(tokio::spawn(async move {
            store.get_or_create_account(&user).await
        }));
    }
    for handle in handles {
        let account = handle.await.expect("join").expect("get_or_create");
        assert_eq!(account.spirit_points, 100);
        assert_eq!(account.balance, 0);
    }

    assert_eq!(store.count_accounts().await.expect("count"), 1);
}

#[tokio::test]
async fn update_account_writes_only_set_fields() {
    let (_dir, store) = open_store().await;
    let user = UserId::new("u1");
    store.get_or_create_account(&user).await.expect("create");

    let claimed = Utc::now();
    let written = store
        .update_account(
            &user,
            &AccountUpdate {
                streak: Some(3),
                last_claim_at: Some(Some(claimed)),
                ..AccountUpdate::default()
            },
        )
        .await;
    assert!(written);

    let account = store.find_account(&user).await.expect("read").expect("row");
    assert_eq!(account.streak, 3);
    assert_eq!(account.spirit_points, 100);
    assert_eq!(
        account.last_claim_at.map(|t| t.timestamp_millis()),
        Some(claimed.timestamp_millis())
    );
}

#[tokio::test]
async fn update_account_refuses_negative_and_missing_rows() {
    let (_dir, store) = open_store().await;
    let user = UserId::new("u1");
    store.get_or_create_account(&user).await.expect("create");

    let negative = AccountUpdate {
        balance: Some(-5),
        ..AccountUpdate::default()
    };
    assert!(!store.update_account(&user, &negative).await);

    let ghost = AccountUpdate {
        balance: Some(5),
        ..AccountUpdate::default()
    };
    assert!(!store.update_account(&UserId::new("ghost"), &ghost).await);
}

#[tokio::test]
async fn adjust_account_never_goes_negative() {
    let (_dir, store) = open_store().await;
    let user = UserId::new("u1");
    store.get_or_create_account(&user).await.expect("create");

    let refused = store
        .adjust_account(&user, AccountDelta::spirit_points(-101))
        .await
        .expect("adjust");
    assert!(refused.is_none());

    let after = store
        .adjust_account(
            &user,
            AccountDelta {
                balance: 100,
                spirit_points: -100,
            },
        )
        .await
        .expect("adjust")
        .expect("applied");
    assert_eq!(after.balance, 100);
    assert_eq!(after.spirit_points, 0);
}

#[tokio::test]
async fn transfer_moves_balance_atomically() {
    let (_dir, store) = open_store().await;
    let alice = funded(&store, "alice", 500).await;
    let bob = funded(&store, "bob", 10).await;

    let outcome = store
        .transfer_balance(&alice, &bob, 200)
        .await
        .expect("transfer")
        .expect("applied");
    assert_eq!(outcome.from_before, 500);
    assert_eq!(outcome.from_after, 300);
    assert_eq!(outcome.to_before, 10);
    assert_eq!(outcome.to_after, 210);

    let insufficient = store
        .transfer_balance(&alice, &bob, 10_000)
        .await
        .expect("transfer");
    assert!(insufficient.is_none());
    let alice_now = store.find_account(&alice).await.expect("read").expect("row");
    assert_eq!(alice_now.balance, 300);
}

#[tokio::test]
async fn failed_credit_rolls_back_debit() {
    let (_dir, store) = open_store().await;
    let alice = funded(&store, "alice", 500).await;

    let result = store
        .transfer_balance(&alice, &UserId::new("nobody"), 100)
        .await;
    assert!(matches!(result, Err(DbError::NotFound(_))));

    let alice_now = store.find_account(&alice).await.expect("read").expect("row");
    assert_eq!(alice_now.balance, 500);
}

#[tokio::test]
async fn leaderboard_sorts_descending() {
    let (_dir, store) = open_store().await;
    funded(&store, "a", 10).await;
    funded(&store, "b", 30).await;
    funded(&store, "c", 20).await;

    let top = store
        .leaderboard(Currency::Balance, 2)
        .await
        .expect("leaderboard");
    let ids: Vec<&str> = top.iter().map(|e| e.user_id.as_str()).collect();
    assert_eq!(ids, vec!["b", "c"]);
    assert_eq!(top[0].value, 30);
    assert_eq!(top[0].level, 1);
}

#[tokio::test]
async fn conversion_moves_all_spirit_points() {
    let (_dir, store) = open_store().await;
    let a = funded(&store, "a", 50).await;
    let b = UserId::new("b");
    store.get_or_create_account(&b).await.expect("create");
    store
        .adjust_account(&b, AccountDelta::spirit_points(-100))
        .await
        .expect("adjust");

    let conversions = store.convert_all_spirit_points().await.expect("convert");
    assert_eq!(conversions.len(), 1);
    assert_eq!(conversions[0].user_id, a);
    assert_eq!(conversions[0].balance_after, 150);

    let a_now = store.find_account(&a).await.expect("read").expect("row");
    assert_eq!(a_now.balance, 150);
    assert_eq!(a_now.spirit_points, 0);
}

// =============================================================================
// Monthly stats
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn monthly_stats_sum_concurrent_deltas() {
    let (_dir, store) = open_store().await;
    let user = UserId::new("gambler");
    let month = Month::parse("2026-10").expect("month");

    let deltas: Vec<(i64, i64)> = (1..=20).map(|i| if i % 2 == 0 { (i, 0) } else { (0, i) }).collect();
    let expected_wins: i64 = deltas.iter().map(|d| d.0).sum();
    let expected_losses: i64 = deltas.iter().map(|d| d.1).sum();

    let mut handles = Vec::new();
    for (win, loss) in deltas {
        let store = store.clone();
        let user = user.clone();
        let month = month.clone();
        handles.push(tokio::spawn(async move {
            store.upsert_monthly_stat(&user, &month, win, loss).await
        }));
    }
    for handle in handles {
        handle.await.expect("join").expect("upsert");
    }

    let stat = store
        .monthly_stat(&user, &month)
        .await
        .expect("read")
        .expect("row");
    assert_eq!(stat.wins, expected_wins);
    assert_eq!(stat.losses, expected_losses);
}

#[tokio::test]
async fn purge_keeps_only_current_month() {
    let (_dir, store) = open_store().await;
    let user = UserId::new("u");
    let old = Month::parse("2026-09").expect("month");
    let current = Month::parse("2026-10").expect("month");
    store.upsert_monthly_stat(&user, &old, 5, 0).await.expect("upsert");
    store.upsert_monthly_stat(&user, &current, 7, 0).await.expect("upsert");

    assert_eq!(store.purge_stats(&current).await.expect("purge"), 1);
    assert!(store.monthly_stat(&user, &old).await.expect("read").is_none());

    let lucky = store
        .monthly_top(&current, StatSide::Wins, 10)
        .await
        .expect("top");
    assert_eq!(lucky.len(), 1);
    assert_eq!(lucky[0].value, 7);
    // No account row for `u`: the level falls back to the starting level.
    assert_eq!(lucky[0].level, 1);
}

// =============================================================================
// Log, grants, bookkeeping
// =============================================================================

#[tokio::test]
async fn transaction_log_is_readable_newest_first() {
    let (_dir, store) = open_store().await;
    let user = UserId::new("u");
    let now = Utc::now();
    for (offset, amount) in [(0_i64, 10_i64), (1, -4)] {
        store
            .append_transaction(&NewTransaction {
                user_id: user.clone(),
                tx_type: TransactionType::Exchange,
                currency: Currency::Balance,
                amount,
                balance_before: 0,
                balance_after: amount,
                description: "test".to_owned(),
                created_at: now + Duration::seconds(offset),
            })
            .await
            .expect("append");
    }

    let entries = store.recent_transactions(&user, 10).await.expect("read");
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].amount, -4);
    assert_eq!(entries[1].tx_type, TransactionType::Exchange);
}

#[tokio::test]
async fn grants_expire_by_timestamp() {
    let (_dir, store) = open_store().await;
    let now = Utc::now();
    let guild = GuildId::new("g");

    store
        .insert_temp_admin(&TempAdminGrant {
            user_id: UserId::new("early"),
            expires_at: now - Duration::minutes(1),
            guild_id: guild.clone(),
        })
        .await
        .expect("insert");
    store
        .insert_temp_admin(&TempAdminGrant {
            user_id: UserId::new("late"),
            expires_at: now + Duration::hours(1),
            guild_id: guild.clone(),
        })
        .await
        .expect("insert");

    let expired = store.expired_temp_admins(now).await.expect("expired");
    assert_eq!(expired.len(), 1);
    assert_eq!(expired[0].user_id.as_str(), "early");
    assert!(store.delete_temp_admin(&expired[0].user_id).await.expect("delete"));

    let card = NameChangeCard {
        id: CardId::new(),
        owner_id: UserId::new("owner"),
        target_id: UserId::new("target"),
        original_nickname: None,
        new_nickname: "Dumpling".to_owned(),
        expires_at: now - Duration::seconds(1),
        guild_id: guild,
    };
    store.insert_name_card(&card).await.expect("insert card");
    let cards = store.expired_name_cards(now).await.expect("expired cards");
    assert_eq!(cards, vec![card.clone()]);
    assert!(store.delete_name_card(card.id).await.expect("delete card"));
}

#[tokio::test]
async fn nickname_lock_is_permanent_flag() {
    let (_dir, store) = open_store().await;
    let user = UserId::new("u");
    assert!(!store.is_nickname_locked(&user).await.expect("read"));
    assert!(store.lock_nickname(&user, Utc::now()).await.expect("lock"));
    assert!(!store.lock_nickname(&user, Utc::now()).await.expect("relock"));
    assert!(store.is_nickname_locked(&user).await.expect("read"));
}

#[tokio::test]
async fn maintenance_values_round_trip() {
    let (_dir, store) = open_store().await;
    assert!(
        store
            .maintenance_value(LAST_CONVERSION_MONTH)
            .await
            .expect("read")
            .is_none()
    );
    store
        .set_maintenance_value(LAST_CONVERSION_MONTH, "2026-09")
        .await
        .expect("set");
    store
        .set_maintenance_value(LAST_CONVERSION_MONTH, "2026-10")
        .await
        .expect("set");
    assert_eq!(
        store
            .maintenance_value(LAST_CONVERSION_MONTH)
            .await
            .expect("read")
            .as_deref(),
        Some("2026-10")
    );
}

// =============================================================================
// Integrity and degraded state
// =============================================================================

#[tokio::test]
async fn degraded_store_refuses_writes_but_serves_reads() {
    let (_dir, store) = open_store().await;
    let user = UserId::new("u");
    store.get_or_create_account(&user).await.expect("create");

    store.mark_degraded();
    let result = store
        .adjust_account(&user, AccountDelta::balance(1))
        .await;
    assert!(matches!(result, Err(DbError::Degraded)));
    assert!(store.find_account(&user).await.expect("read").is_some());

    store.clear_degraded();
    assert!(
        store
            .adjust_account(&user, AccountDelta::balance(1))
            .await
            .expect("adjust")
            .is_some()
    );
}

#[tokio::test]
async fn fresh_store_passes_integrity_check_and_vacuums() {
    let (dir, store) = open_store().await;
    assert_eq!(store.integrity_check().await, IntegrityStatus::Ok);
    assert!(store.ping().await);

    let copy = dir.path().join("copy.db");
    store.vacuum_into(&copy).await.expect("vacuum into");
    assert!(copy.metadata().expect("metadata").len() > 0);
    assert!(spirit_db::integrity_check_file(&copy).await.is_ok());
}

#[tokio::test]
async fn garbage_file_fails_integrity_check() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("garbage.db");
    std::fs::write(&path, vec![0xAB_u8; 8192]).expect("write");
    assert!(!spirit_db::integrity_check_file(&path).await.is_ok());
}

#[tokio::test]
async fn reopen_serves_same_rows() {
    let (_dir, store) = open_store().await;
    let user = funded(&store, "u", 42).await;
    store.close().await;
    store.reopen().await.expect("reopen");
    let account = store.find_account(&user).await.expect("read").expect("row");
    assert_eq!(account.balance, 42);
}
