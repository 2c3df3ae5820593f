//! Per-user async locks.
//!
//! Every ledger operation holds the lock of each account it touches for its
//! whole read-compute-write span. Two operations on the same user therefore
//! never interleave, while operations on different users run concurrently.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use spirit_types::UserId;
use tokio::sync::OwnedMutexGuard;

/// Guard for one user's lock.
pub type UserGuard = OwnedMutexGuard<()>;

/// Registry of per-user mutexes, created on first use.
#[derive(Debug, Default)]
pub struct UserLocks {
    locks: Mutex<HashMap<UserId, Arc<tokio::sync::Mutex<()>>>>,
}

impl UserLocks {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    fn handle(&self, user_id: &UserId) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(user_id.clone()).or_default())
    }

    /// Wait for and hold `user_id`'s lock.
    pub async fn lock(&self, user_id: &UserId) -> UserGuard {
        self.handle(user_id).lock_owned().await
    }

    /// Hold the locks of two distinct users.
    ///
    /// Locks are always taken in id order, so two concurrent calls on the
    /// same pair cannot deadlock whichever side each names first.
    pub async fn lock_pair(&self, a: &UserId, b: &UserId) -> (UserGuard, Option<UserGuard>) {
        if a == b {
            return (self.lock(a).await, None);
        }
        let (first, second) = if a < b { (a, b) } else { (b, a) };
        let first = self.lock(first).await;
        let second = self.lock(second).await;
        (first, Some(second))
    }

    /// Drop locks nobody holds or waits on. Returns how many were dropped.
    pub fn prune(&self) -> usize {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        let before = locks.len();
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        before.saturating_sub(locks.len())
    }

    /// Number of users with a registered lock.
    pub fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Whether no lock is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
