//! Cancellable background timers owned by the cart store.

use std::future::Future;
use std::time::Duration;

use tokio::task::AbortHandle;

/// Forces `loading` off if a reconciliation outlives its ceiling.
///
/// Dropping the timer cancels it, so replacing or clearing the slot it lives
/// in is enough to keep a stale timer from firing later.
#[derive(Debug)]
pub(crate) struct SafetyTimer {
    seq: u64,
    handle: AbortHandle,
}

impl SafetyTimer {
    /// Run `on_fire` after `ceiling` unless dropped first.
    pub(crate) fn start<F>(seq: u64, ceiling: Duration, on_fire: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            tokio::time::sleep(ceiling).await;
            on_fire();
        })
        .abort_handle();
        Self { seq, handle }
    }

    /// The reconciliation this timer guards.
    pub(crate) const fn seq(&self) -> u64 {
        self.seq
    }
}

impl Drop for SafetyTimer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// A detached background loop that stops when the handle is dropped.
#[derive(Debug)]
#[must_use = "the background task stops as soon as the handle is dropped"]
pub struct BackgroundTask {
    handle: AbortHandle,
}

impl BackgroundTask {
    pub(crate) fn spawn<F>(future: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Self {
            handle: tokio::spawn(future).abort_handle(),
        }
    }

    /// Whether the task has stopped.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for BackgroundTask {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
