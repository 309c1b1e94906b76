//! Single-slot debounce timer.
//!
//! [`TaskSlot`] holds at most one pending delay. Scheduling while a delay
//! is still counting down replaces it, so a burst of calls collapses into
//! one firing after the last call's quiet period.
//!
//! The slot owns only the delay. Once the delay elapses the task is
//! spawned detached, so neither [`TaskSlot::cancel`] nor a later
//! [`TaskSlot::schedule`] can kill work that has already started.

use std::future::Future;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;

#[derive(Debug, Default)]
pub struct TaskSlot {
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl TaskSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `task` after `delay`, cancelling any previously scheduled
    /// task whose delay has not yet elapsed.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn schedule<F>(&self, delay: Duration, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        // Created before the spawn so the delay is anchored at this
        // call, not at the spawned task's first poll.
        let sleep = tokio::time::sleep(delay);
        let handle = tokio::spawn(async move {
            sleep.await;
            tokio::spawn(task);
        });
        let mut slot = self.pending.lock();
        if let Some(previous) = slot.replace(handle) {
            previous.abort();
        }
    }

    /// Cancels the pending delay, if one has not yet elapsed.
    pub fn cancel(&self) {
        if let Some(handle) = self.pending.lock().take() {
            handle.abort();
        }
    }

    /// Whether a delay is currently counting down.
    pub fn is_scheduled(&self) -> bool {
        self.pending
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

impl Drop for TaskSlot {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn fires_after_delay() {
        let slot = TaskSlot::new();
        let fired = Arc::new(AtomicU32::new(0));

        let counter = Arc::clone(&fired);
        slot.schedule(Duration::from_millis(500), async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(slot.is_scheduled());
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!slot.is_scheduled());
    }

    #[tokio::test(start_paused = true)]
    async fn rescheduling_replaces_the_pending_task() {
        let slot = TaskSlot::new();
        let fired = Arc::new(AtomicU32::new(0));

        for marker in [10, 100] {
            let counter = Arc::clone(&fired);
            slot.schedule(Duration::from_millis(500), async move {
                counter.fetch_add(marker, Ordering::SeqCst);
            });
        }

        tokio::time::sleep(Duration::from_millis(600)).await;
        // Only the second task ran.
        assert_eq!(fired.load(Ordering::SeqCst), 100);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_prevents_firing() {
        let slot = TaskSlot::new();
        let fired = Arc::new(AtomicU32::new(0));

        let counter = Arc::clone(&fired);
        slot.schedule(Duration::from_millis(500), async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        slot.cancel();

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert!(!slot.is_scheduled());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_after_firing_is_a_no_op() {
        let slot = TaskSlot::new();
        let fired = Arc::new(AtomicU32::new(0));

        let counter = Arc::clone(&fired);
        slot.schedule(Duration::from_millis(10), async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        slot.cancel();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }
}
