//! Background sweeper lifecycle
//!
//! In-process stores expire entries lazily on access. A sweeper bounds the
//! memory held by keys that are never touched again.

use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Explicit lifecycle for stores that own a background sweep task
pub trait Lifecycle {
    /// Start the sweeper. Calling it twice replaces the previous task.
    fn init(&self, sweep_every: Duration);

    /// Stop the sweeper. Stored entries are kept.
    fn teardown(&self);
}

/// Handle to a periodic task, aborted on [`SweeperHandle::stop`] or drop
#[derive(Debug)]
pub struct SweeperHandle {
    name: &'static str,
    task: JoinHandle<()>,
}

impl SweeperHandle {
    /// Spawn `tick` every `period`. The first run happens one period after
    /// spawning; a slow tick delays the next one instead of bursting.
    pub fn spawn<F, Fut>(name: &'static str, period: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval.tick().await;
            loop {
                interval.tick().await;
                tick().await;
            }
        });
        tracing::debug!(sweeper = name, period_ms = period.as_millis() as u64, "Sweeper started");
        Self { name, task }
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    pub fn stop(self) {
        // Drop aborts
    }
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        self.task.abort();
        tracing::debug!(sweeper = self.name, "Sweeper stopped");
    }
}

/// Slot holding at most one running sweeper
#[derive(Debug, Default)]
pub struct SweeperSlot(Mutex<Option<SweeperHandle>>);

impl SweeperSlot {
    pub fn replace(&self, handle: Option<SweeperHandle>) {
        let mut slot = self.0.lock().unwrap_or_else(|e| e.into_inner());
        *slot = handle;
    }

    pub fn is_running(&self) -> bool {
        let slot = self.0.lock().unwrap_or_else(|e| e.into_inner());
        slot.as_ref().is_some_and(SweeperHandle::is_running)
    }
}
