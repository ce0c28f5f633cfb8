//! Cancellable one-shot scheduled tasks
//!
//! Retries and credential refreshes are deferred work that must be
//! cancellable at any time. A `ScheduledTask` owns the spawned timer task:
//! cancelling it (or dropping it) aborts the task, so a cancelled timer never
//! fires. The deadline is kept so callers can report when the work is due.

use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// A one-shot task that runs `work` after a delay unless cancelled first.
#[derive(Debug)]
pub struct ScheduledTask {
    handle: Option<JoinHandle<()>>,
    deadline: Instant,
}

impl ScheduledTask {
    /// Spawn `work` to run once `delay` has elapsed.
    ///
    /// Must be called from within a tokio runtime.
    pub fn after<F>(delay: Duration, work: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let deadline = Instant::now() + delay;
        let handle = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            work.await;
        });

        Self {
            handle: Some(handle),
            deadline,
        }
    }

    /// When the task is due to run.
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Time left until the task runs (zero once due).
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// Whether the task has neither run to completion nor been cancelled.
    pub fn is_pending(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Abort the task. Safe to call repeatedly.
    pub fn cancel(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }

    /// Give up ownership without aborting.
    ///
    /// Used by the task itself when it replaces its own slot, so that dropping
    /// the old handle cannot cancel the work that is currently running.
    pub fn detach(mut self) {
        self.handle.take();
    }
}

impl Drop for ScheduledTask {
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
    async fn test_runs_after_delay() {
        let fired = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&fired);
        let task = ScheduledTask::after(Duration::from_secs(5), async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(task.remaining(), Duration::from_secs(5));
        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert!(task.is_pending());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!task.is_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_prevents_run() {
        let fired = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&fired);
        let mut task = ScheduledTask::after(Duration::from_secs(1), async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        task.cancel();
        task.cancel();
        assert!(!task.is_pending());

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_cancels() {
        let fired = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&fired);
        drop(ScheduledTask::after(Duration::from_secs(1), async move {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_detach_keeps_running() {
        let fired = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&fired);
        ScheduledTask::after(Duration::from_secs(1), async move {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .detach();

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }
}
