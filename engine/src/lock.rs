//! Global Execution Lock (§4.5, C5): a single process-wide mutex held for
//! the entire duration of one `RunOnce` call plus the surrounding
//! credential hooks and status transitions. Not re-entrant, never held
//! across the wait between dispatch cycles.

use std::time::Duration;

use scheduler_types::SchedulerError;
use tokio::sync::{Mutex, MutexGuard};

pub struct GlobalLock {
    inner: Mutex<()>,
}

impl GlobalLock {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(()),
        }
    }

    /// Acquire unconditionally — used by the dispatch loop, which is
    /// willing to wait indefinitely for its turn.
    pub async fn acquire(&self) -> MutexGuard<'_, ()> {
        self.inner.lock().await
    }

    /// Acquire with a bounded wait — used by `ExecuteNow` (§4.7), which
    /// reports `Busy` rather than blocking the caller forever.
    pub async fn try_acquire_timeout(
        &self,
        timeout: Duration,
    ) -> Result<MutexGuard<'_, ()>, SchedulerError> {
        tokio::time::timeout(timeout, self.inner.lock())
            .await
            .map_err(|_| SchedulerError::Busy)
    }
}

impl Default for GlobalLock {
    fn default() -> Self {
        Self::new()
    }
}
