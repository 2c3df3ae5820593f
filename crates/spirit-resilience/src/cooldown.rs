//! Per-user, per-command cooldowns.
//!
//! Entries older than [`ENTRY_TTL`] are dropped by [`CooldownTracker::prune`],
//! which also caps the number of tracked users by evicting the least
//! recently active ones.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;

/// Entries older than this are forgotten on prune.
pub const ENTRY_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Default cap on tracked users.
pub const DEFAULT_MAX_USERS: usize = 10_000;

/// A command was used again before its cooldown elapsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("command on cooldown, {remaining:?} left")]
pub struct CooldownActive {
    /// Time left, rounded up to whole seconds.
    pub remaining: Duration,
}

#[derive(Debug, Default)]
struct UserEntry {
    commands: HashMap<String, Instant>,
    last_seen: Option<Instant>,
}

/// Tracks the last use of each (user, command) pair.
#[derive(Debug)]
pub struct CooldownTracker {
    users: Mutex<HashMap<String, UserEntry>>,
    max_users: usize,
}

impl Default for CooldownTracker {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_USERS)
    }
}

impl CooldownTracker {
    /// Create a tracker holding at most `max_users` users after pruning.
    pub fn new(max_users: usize) -> Self {
        Self {
            users: Mutex::new(HashMap::new()),
            max_users: max_users.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, UserEntry>> {
        self.users.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Admit the command and record its use, or report the remaining wait.
    pub fn check_and_record(
        &self,
        user: &str,
        command: &str,
        cooldown: Duration,
    ) -> Result<(), CooldownActive> {
        let now = Instant::now();
        let mut users = self.lock();
        let entry = users.entry(user.to_owned()).or_default();

        if let Some(last) = entry.commands.get(command) {
            let elapsed = now.saturating_duration_since(*last);
            if elapsed < cooldown {
                return Err(CooldownActive {
                    remaining: round_up_to_secs(cooldown.saturating_sub(elapsed)),
                });
            }
        }

        entry.commands.insert(command.to_owned(), now);
        entry.last_seen = Some(now);
        Ok(())
    }

    /// Forget a recorded use, for commands rejected after admission.
    pub fn clear(&self, user: &str, command: &str) {
        let mut users = self.lock();
        if let Some(entry) = users.get_mut(user) {
            entry.commands.remove(command);
            if entry.commands.is_empty() {
                users.remove(user);
            }
        }
    }

    /// Drop expired entries and enforce the user cap. Returns how many
    /// users were removed.
    pub fn prune(&self) -> usize {
        let now = Instant::now();
        let mut users = self.lock();
        let before = users.len();

        users.retain(|_, entry| {
            entry
                .commands
                .retain(|_, last| now.saturating_duration_since(*last) < ENTRY_TTL);
            !entry.commands.is_empty()
        });

        if users.len() > self.max_users {
            let mut by_age: Vec<(String, Option<Instant>)> = users
                .iter()
                .map(|(user, entry)| (user.clone(), entry.last_seen))
                .collect();
            by_age.sort_by_key(|(_, seen)| *seen);
            let excess = users.len().saturating_sub(self.max_users);
            for (user, _) in by_age.into_iter().take(excess) {
                users.remove(&user);
            }
        }

        let removed = before.saturating_sub(users.len());
        if removed > 0 {
            tracing::debug!(removed, tracked = users.len(), "Pruned cooldown entries");
        }
        removed
    }

    /// Number of users currently tracked.
    pub fn tracked_users(&self) -> usize {
        self.lock().len()
    }
}

fn round_up_to_secs(d: Duration) -> Duration {
    let secs = if d.subsec_nanos() > 0 {
        d.as_secs().saturating_add(1)
    } else {
        d.as_secs()
    };
    Duration::from_secs(secs)
}

/// Render a wait as `1h 2m 3s`, omitting leading zero units.
pub fn format_wait(wait: Duration) -> String {
    let total = round_up_to_secs(wait).as_secs();
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;
    if hours > 0 {
        format!("{hours}h {minutes}m {seconds}s")
    } else if minutes > 0 {
        format!("{minutes}m {seconds}s")
    } else {
        format!("{seconds}s")
    }
}
