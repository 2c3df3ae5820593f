//! Configuration, chat platform access, command handling, and maintenance
//! loops for the Spirit economy bot.
//!
//! ```text
//!  inbound command ──► CommandPipeline ──► Ledger ──► Store
//!                            │
//!                            └──► ResilientPlatform ──► ChatPlatform (Discord REST)
//!
//!  Supervisor ──► grant sweep / backup / conversion / health / prune
//! ```
//!
//! # Modules
//!
//! - [`config`] -- Loading `config/spirit-bot.yaml` and environment overrides
//! - [`platform`] -- The [`ChatPlatform`] port and its error type
//! - [`discord`] -- Discord REST adapter
//! - [`resilient`] -- Breakers, retries, and rate limiting around the platform
//! - [`command`] -- Command parsing
//! - [`replies`] -- Plain-text reply rendering
//! - [`pipeline`] -- Cooldown, execution, and error capture for commands
//! - [`maintenance`] -- Grant sweep, backup, conversion, health, prune jobs
//! - [`supervisor`] -- Named tasks restarted by a watchdog
//! - [`health`] -- Health report
//! - [`context`] -- Wiring of the long-lived components
//!
//! [`ChatPlatform`]: platform::ChatPlatform

pub mod command;
pub mod config;
pub mod context;
pub mod discord;
pub mod health;
pub mod maintenance;
pub mod pipeline;
pub mod platform;
pub mod replies;
pub mod resilient;
pub mod supervisor;

pub use config::{BotConfig, ConfigError};
pub use context::BotContext;
pub use health::{HealthReport, HealthStatus};
pub use pipeline::{CommandContext, CommandPipeline, Reply, ReplyStatus};
pub use platform::{BotIdentity, ChatPlatform, PlatformError};
pub use resilient::{CallClass, PlatformFailure, ResilientPlatform};
pub use supervisor::{Supervisor, SupervisorStatus, TaskStatus};
