//! Point-in-time health report.

use chrono::{DateTime, Utc};
use serde::Serialize;
use spirit_db::Store;
use spirit_resilience::BreakerState;

use crate::resilient::{PlatformStatus, ResilientPlatform};
use crate::supervisor::{SupervisorStatus, TaskStatus};

/// Overall verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// Everything is reachable.
    Ok,
    /// The store or the critical platform path is impaired.
    Degraded,
}

/// Store reachability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoreHealth {
    /// A trivial query succeeded.
    pub reachable: bool,
    /// Writes are refused while recovery runs.
    pub degraded: bool,
    /// Database file.
    pub path: String,
}

/// Everything `/api/status` reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    /// Overall verdict.
    pub status: HealthStatus,
    /// Store state.
    pub store: StoreHealth,
    /// Platform breakers and rate-limit budget.
    pub platform: PlatformStatus,
    /// Supervised maintenance loops.
    pub tasks: Vec<TaskStatus>,
    /// Whether remote backups are configured.
    pub remote_backup: bool,
    /// When the report was produced.
    pub checked_at: DateTime<Utc>,
}

/// Collect a report. Runs one `SELECT 1` against the store and nothing else.
pub async fn collect(
    store: &Store,
    platform: &ResilientPlatform,
    tasks: &SupervisorStatus,
    remote_backup: bool,
) -> HealthReport {
    let store = StoreHealth {
        reachable: store.ping().await,
        degraded: store.is_degraded(),
        path: store.path().display().to_string(),
    };
    let platform = platform.status();
    let status = verdict(&store, &platform);
    HealthReport {
        status,
        store,
        platform,
        tasks: tasks.snapshot(),
        remote_backup,
        checked_at: Utc::now(),
    }
}

fn verdict(store: &StoreHealth, platform: &PlatformStatus) -> HealthStatus {
    if !store.reachable || store.degraded || platform.critical.state != BreakerState::Closed {
        HealthStatus::Degraded
    } else {
        HealthStatus::Ok
    }
}
