//! Task supervision for the maintenance loops.
//!
//! Every loop is a named task built by a factory. A watchdog ticks on a
//! fixed interval, finds tasks that have finished (a loop never finishes
//! on its own, so a finished task has panicked or bailed out), logs the
//! failure, and spawns a fresh copy from the factory.
//!
//! ```text
//!   watchdog tick ──► is_finished? ──no──► next task
//!                           │
//!                          yes ──► log error ──► factory() ──► tokio::spawn
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Default watchdog interval.
pub const DEFAULT_WATCHDOG_INTERVAL: Duration = Duration::from_secs(30);

/// Shortest period a loop may run at.
const MIN_PERIOD: Duration = Duration::from_secs(1);

/// A boxed task body.
pub type TaskFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Builds a fresh task body each time the task is (re)started.
pub type TaskFactory = Arc<dyn Fn() -> TaskFuture + Send + Sync>;

/// Observable state of one supervised task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskStatus {
    /// Task name.
    pub name: String,
    /// Whether the task is currently running.
    pub running: bool,
    /// Times the watchdog restarted the task.
    pub restarts: u64,
    /// Why the task last stopped.
    pub last_failure: Option<String>,
}

/// Shared view of the supervised tasks.
#[derive(Debug, Clone, Default)]
pub struct SupervisorStatus {
    tasks: Arc<Mutex<Vec<TaskStatus>>>,
}

impl SupervisorStatus {
    fn lock(&self) -> MutexGuard<'_, Vec<TaskStatus>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current state of every task, in registration order.
    pub fn snapshot(&self) -> Vec<TaskStatus> {
        self.lock().clone()
    }

    fn update(&self, name: &str, apply: impl FnOnce(&mut TaskStatus)) {
        if let Some(task) = self.lock().iter_mut().find(|t| t.name == name) {
            apply(task);
        }
    }
}

struct SupervisedTask {
    name: String,
    factory: TaskFactory,
    handle: Option<JoinHandle<()>>,
}

/// Runs named tasks and restarts them when they stop.
pub struct Supervisor {
    tasks: Vec<SupervisedTask>,
    watchdog_interval: Duration,
    status: SupervisorStatus,
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("tasks", &self.tasks.iter().map(|t| t.name.as_str()).collect::<Vec<_>>())
            .field("watchdog_interval", &self.watchdog_interval)
            .finish_non_exhaustive()
    }
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new(DEFAULT_WATCHDOG_INTERVAL)
    }
}

impl Supervisor {
    /// Create an empty supervisor.
    pub fn new(watchdog_interval: Duration) -> Self {
        Self {
            tasks: Vec::new(),
            watchdog_interval,
            status: SupervisorStatus::default(),
        }
    }

    /// Report into an existing status handle, replacing whatever it held.
    #[must_use]
    pub fn with_status(mut self, status: SupervisorStatus) -> Self {
        status.lock().clear();
        self.status = status;
        self
    }

    /// Shared status handle; stays valid after [`Supervisor::spawn`].
    pub fn status(&self) -> SupervisorStatus {
        self.status.clone()
    }

    /// Register a task built by `factory`.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn() -> TaskFuture + Send + Sync + 'static,
    {
        let name = name.into();
        self.status.lock().push(TaskStatus {
            name: name.clone(),
            running: false,
            restarts: 0,
            last_failure: None,
        });
        self.tasks.push(SupervisedTask {
            name,
            factory: Arc::new(factory),
            handle: None,
        });
        self
    }

    /// Register a task that runs `job` every `period`, first after one
    /// full period.
    pub fn every<F, Fut>(&mut self, name: impl Into<String>, period: Duration, job: F) -> &mut Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let job = Arc::new(job);
        self.register(name, move || {
            let job = Arc::clone(&job);
            let body: TaskFuture = Box::pin(run_every(period, move || job()));
            body
        })
    }

    /// Start every task and the watchdog. The watchdog runs until
    /// `shutdown` turns `true` or its sender is dropped, then aborts the
    /// tasks.
    pub fn spawn(mut self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            for task in &mut self.tasks {
                task.handle = Some(tokio::spawn((task.factory)()));
                self.status.update(&task.name, |s| s.running = true);
                tracing::info!(task = %task.name, "Supervised task started");
            }

            let mut watchdog = tokio::time::interval(self.watchdog_interval.max(MIN_PERIOD));
            watchdog.set_missed_tick_behavior(MissedTickBehavior::Skip);
            watchdog.reset();

            loop {
                tokio::select! {
                    _ = watchdog.tick() => self.check_tasks().await,
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }

            for task in &mut self.tasks {
                if let Some(handle) = task.handle.take() {
                    handle.abort();
                }
                self.status.update(&task.name, |s| s.running = false);
            }
            tracing::info!("Supervisor stopped");
        })
    }

    async fn check_tasks(&mut self) {
        for task in &mut self.tasks {
            let finished = task.handle.as_ref().is_none_or(JoinHandle::is_finished);
            if !finished {
                continue;
            }
            let failure = match task.handle.take() {
                Some(handle) => match handle.await {
                    Ok(()) => "task exited".to_owned(),
                    Err(e) if e.is_panic() => format!("task panicked: {}", panic_message(e)),
                    Err(e) => e.to_string(),
                },
                None => "task was not running".to_owned(),
            };
            tracing::error!(task = %task.name, reason = %failure, "Supervised task stopped, restarting");

            task.handle = Some(tokio::spawn((task.factory)()));
            self.status.update(&task.name, |s| {
                s.running = true;
                s.restarts = s.restarts.saturating_add(1);
                s.last_failure = Some(failure);
            });
        }
    }
}

fn panic_message(e: tokio::task::JoinError) -> String {
    let payload = e.into_panic();
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_owned())
}

/// Run `job` every `period`, starting one period from now. Ticks missed
/// while a slow run is in progress are delayed, not bunched.
pub async fn run_every<F, Fut>(period: Duration, mut job: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    let mut interval = tokio::time::interval(period.max(MIN_PERIOD));
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval.reset();
    loop {
        interval.tick().await;
        job().await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn periodic_job_waits_one_period_before_first_run() {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        let task = tokio::spawn(run_every(Duration::from_secs(10), move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        }));

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        tokio::time::sleep(Duration::from_secs(26)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 3);
        task.abort();
    }

    #[tokio::test]
    async fn registration_is_visible_in_status() {
        let mut supervisor = Supervisor::default();
        supervisor.register("idle", || -> TaskFuture { Box::pin(std::future::pending::<()>()) });
        let status = supervisor.status().snapshot();
        assert_eq!(status.len(), 1);
        assert_eq!(status.first().map(|s| s.name.as_str()), Some("idle"));
        assert_eq!(status.first().map(|s| s.running), Some(false));
    }
}
