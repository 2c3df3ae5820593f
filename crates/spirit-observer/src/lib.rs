//! HTTP surface for the Spirit economy bot.
//!
//! An Axum server exposing health and status probes plus an endpoint that
//! runs relayed commands through the bot's pipeline.
//!
//! # Modules
//!
//! - [`handlers`] -- Endpoint handlers
//! - [`router`] -- Route table, CORS, and request tracing
//! - [`server`] -- Bind and serve with graceful shutdown
//! - [`state`] -- Shared handler state
//! - [`error`] -- JSON error responses

pub mod error;
pub mod handlers;
pub mod router;
pub mod server;
pub mod state;

pub use router::build_router;
pub use server::{ServerConfig, ServerError, spawn_server};
pub use state::AppState;
