//! Sliding-window rate limiter shared by every outbound platform call.
//!
//! Timestamps of recent calls are kept in a deque. Before a call is
//! admitted, timestamps older than the window are evicted from the front;
//! if the window is still full the caller sleeps until the oldest
//! timestamp leaves it and checks again.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;

/// Sliding-window limiter: at most `max_calls` per `window`.
#[derive(Debug)]
pub struct SlidingWindowLimiter {
    max_calls: usize,
    window: Duration,
    calls: Mutex<VecDeque<Instant>>,
}

impl SlidingWindowLimiter {
    /// Create a limiter. A `max_calls` of zero is treated as one.
    pub fn new(max_calls: usize, window: Duration) -> Self {
        let max_calls = max_calls.max(1);
        Self {
            max_calls,
            window,
            calls: Mutex::new(VecDeque::with_capacity(max_calls)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Instant>> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn evict(&self, calls: &mut VecDeque<Instant>, now: Instant) {
        while calls
            .front()
            .is_some_and(|oldest| now.saturating_duration_since(*oldest) >= self.window)
        {
            calls.pop_front();
        }
    }

    /// Wait until a call is admitted, then record it.
    ///
    /// Returns how long the caller waited.
    pub async fn acquire(&self) -> Duration {
        let started = Instant::now();
        loop {
            let wait = {
                let mut calls = self.lock();
                let now = Instant::now();
                self.evict(&mut calls, now);
                if calls.len() < self.max_calls {
                    calls.push_back(now);
                    None
                } else {
                    calls
                        .front()
                        .map(|oldest| (*oldest + self.window).saturating_duration_since(now))
                }
            };
            match wait {
                None => break,
                Some(wait) => {
                    tracing::debug!(wait_ms = wait.as_millis(), "Rate limit reached, waiting");
                    tokio::time::sleep(wait).await;
                }
            }
        }
        started.elapsed()
    }

    /// Calls still available in the current window.
    pub fn remaining(&self) -> usize {
        let mut calls = self.lock();
        self.evict(&mut calls, Instant::now());
        self.max_calls.saturating_sub(calls.len())
    }

    /// Configured ceiling.
    pub const fn max_calls(&self) -> usize {
        self.max_calls
    }

    /// Configured window.
    pub const fn window(&self) -> Duration {
        self.window
    }
}
