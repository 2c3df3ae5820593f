//! Integration tests for the HTTP endpoints.
//!
//! Tests use Axum's `Router` directly via `tower::ServiceExt` without
//! starting a TCP server.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::Value;
use spirit_core::BotContext;
use spirit_core::config::BotConfig;
use spirit_db::Store;
use spirit_observer::router::build_router;
use spirit_observer::state::AppState;
use spirit_types::UserId;
use tempfile::TempDir;
use tower::ServiceExt;

async fn make_state() -> (TempDir, Arc<AppState>) {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut config = BotConfig::default();
    config.database.path = dir.path().join("spirit.db");
    config.backup.dir = dir.path().join("backups");
    let store = Store::connect(config.store_config()).await.expect("open store");
    let bot = BotContext::new(config, store, None, None);
    (dir, Arc::new(AppState::new(bot)))
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_command(body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/commands")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

// =============================================================================
// Probes
// =============================================================================

#[tokio::test]
async fn health_is_ok_with_a_working_store() {
    let (_dir, state) = make_state().await;
    let response = build_router(state).oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, serde_json::json!({"status": "ok"}));
}

#[tokio::test]
async fn health_is_503_when_store_degraded() {
    let (_dir, state) = make_state().await;
    state.bot.store.mark_degraded();
    let response = build_router(state).oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body_json(response).await["status"], "degraded");
}

#[tokio::test]
async fn status_reports_breakers_and_store() {
    let (_dir, state) = make_state().await;
    let response = build_router(state).oneshot(get("/api/status")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["status"], "ok");
    assert_eq!(json["store"]["reachable"], true);
    assert_eq!(json["store"]["degraded"], false);
    assert_eq!(json["platform"]["connected"], false);
    assert_eq!(json["platform"]["critical"]["name"], "critical");
    assert_eq!(json["platform"]["critical"]["state"], "closed");
    assert_eq!(json["platform"]["notifications"]["consecutive_failures"], 0);
    assert_eq!(json["platform"]["rate_limit_max"], 45);
    assert_eq!(json["remote_backup"], false);
}

#[tokio::test]
async fn status_has_no_side_effects() {
    let (_dir, state) = make_state().await;
    let router = build_router(Arc::clone(&state));
    for _ in 0..3 {
        let response = router.clone().oneshot(get("/api/status")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
    assert_eq!(state.bot.store.count_accounts().await.unwrap(), 0);
}

#[tokio::test]
async fn unknown_route_returns_404() {
    let (_dir, state) = make_state().await;
    let response = build_router(state).oneshot(get("/api/nope")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

// =============================================================================
// Commands
// =============================================================================

#[tokio::test]
async fn command_runs_through_pipeline() {
    let (_dir, state) = make_state().await;
    let request = serde_json::json!({
        "user_id": "111",
        "guild_id": "10",
        "channel_id": "20",
        "roles": [],
        "content": "!daily",
    });
    let response = build_router(Arc::clone(&state))
        .oneshot(post_command(&request))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["status"], "ok");
    assert!(json["text"].as_str().unwrap().contains("+300 SP"));

    let account = state.bot.ledger.balance_of(&UserId::new("111")).await.unwrap();
    assert_eq!(account.spirit_points, 400);
}

#[tokio::test]
async fn plain_chat_is_ignored() {
    let (_dir, state) = make_state().await;
    let request = serde_json::json!({
        "user_id": "111",
        "channel_id": "20",
        "content": "good morning",
    });
    let response = build_router(state).oneshot(post_command(&request)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        body_json(response).await,
        serde_json::json!({"status": "ignored", "text": ""})
    );
}

#[tokio::test]
async fn empty_content_is_rejected() {
    let (_dir, state) = make_state().await;
    let request = serde_json::json!({
        "user_id": "111",
        "channel_id": "20",
        "content": "   ",
    });
    let response = build_router(state).oneshot(post_command(&request)).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["status"], 400);
    assert_eq!(json["error"], "content is empty");
}

#[tokio::test]
async fn missing_fields_are_rejected_by_extractor() {
    let (_dir, state) = make_state().await;
    let request = serde_json::json!({ "content": "!daily" });
    let response = build_router(state).oneshot(post_command(&request)).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}
