//! Endpoint handlers.
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET` | `/health` | `ok` or `degraded`; 503 when degraded |
//! | `GET` | `/api/status` | Full health report |
//! | `POST` | `/api/commands` | Run one command through the pipeline |
//!
//! The two `GET` handlers have no side effects.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::{Deserialize, Serialize};
use spirit_core::{CommandContext, HealthReport, HealthStatus, Reply};

use crate::error::ObserverError;
use crate::state::AppState;

/// Longest command text accepted, in bytes.
const MAX_CONTENT_BYTES: usize = 4_000;

// ---------------------------------------------------------------------------
// GET /health
// ---------------------------------------------------------------------------

/// Body of `GET /health`.
#[derive(Debug, Serialize)]
pub struct HealthBody {
    /// Overall verdict.
    pub status: HealthStatus,
}

/// Liveness and degradation probe.
pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let report = state.bot.health().await;
    let code = match report.status {
        HealthStatus::Ok => StatusCode::OK,
        HealthStatus::Degraded => StatusCode::SERVICE_UNAVAILABLE,
    };
    (code, Json(HealthBody { status: report.status }))
}

// ---------------------------------------------------------------------------
// GET /api/status
// ---------------------------------------------------------------------------

/// Store, platform, breaker, rate-limit, and task state.
pub async fn status(State(state): State<Arc<AppState>>) -> Json<HealthReport> {
    Json(state.bot.health().await)
}

// ---------------------------------------------------------------------------
// POST /api/commands
// ---------------------------------------------------------------------------

/// An inbound command relayed from the chat gateway.
#[derive(Debug, Deserialize)]
pub struct CommandRequest {
    /// Who sent it and where.
    #[serde(flatten)]
    pub context: CommandContext,
    /// Raw message text.
    pub content: String,
    /// Also post the reply to the channel.
    #[serde(default)]
    pub deliver: bool,
}

/// Run a command and return its reply.
pub async fn run_command(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CommandRequest>,
) -> Result<Json<Reply>, ObserverError> {
    if request.content.trim().is_empty() {
        return Err(ObserverError::InvalidRequest("content is empty".to_owned()));
    }
    if request.content.len() > MAX_CONTENT_BYTES {
        return Err(ObserverError::InvalidRequest(format!(
            "content exceeds {MAX_CONTENT_BYTES} bytes"
        )));
    }
    let reply = state
        .bot
        .run_command(&request.context, &request.content, request.deliver)
        .await;
    Ok(Json(reply))
}
