//! Serial delivery context for callbacks and deferred work.
//!
//! Completion fan-out must happen on one designated context so callers
//! observe responses in a consistent serial order regardless of which
//! thread produced the result. The context is a single worker spawned on a
//! tokio runtime, draining an unbounded channel of jobs in FIFO order.
//!
//! Deferred execution (`execute_after`) backs the preheat scheduler's
//! debounce; it uses a tokio timer raced against the manager's
//! invalidation token, never a blocking sleep. The worker itself ignores
//! the token: completions already in flight at invalidation time are still
//! delivered.

use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// A unit of work executed on the delivery context.
pub(crate) type DeliveryJob = Box<dyn FnOnce() + Send + 'static>;

/// Handle to the delivery worker.
///
/// Dropping the last handle (together with any pending timers holding a
/// sender clone) shuts the worker down.
pub(crate) struct DeliveryQueue {
    tx: mpsc::UnboundedSender<DeliveryJob>,
    runtime: Handle,
    cancelled: CancellationToken,
}

impl DeliveryQueue {
    /// Spawns the worker on the given runtime.
    pub(crate) fn start(runtime: Handle, cancelled: CancellationToken) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<DeliveryJob>();
        runtime.spawn(async move {
            while let Some(job) = rx.recv().await {
                job();
            }
            trace!("delivery context shut down");
        });
        Self {
            tx,
            runtime,
            cancelled,
        }
    }

    /// Enqueues a job; jobs run in enqueue order.
    pub(crate) fn execute(&self, job: DeliveryJob) {
        // Send fails only once the worker is gone, which means the manager
        // itself is being torn down.
        let _ = self.tx.send(job);
    }

    /// Enqueues a job after a delay, unless the token fires first.
    pub(crate) fn execute_after(&self, delay: Duration, job: DeliveryJob) {
        let tx = self.tx.clone();
        let cancelled = self.cancelled.clone();
        self.runtime.spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {
                    let _ = tx.send(job);
                }
                _ = cancelled.cancelled() => {}
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    async fn drain() {
        // Yield enough times for the worker to run everything queued.
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_jobs_run_in_fifo_order() {
        let queue = DeliveryQueue::start(Handle::current(), CancellationToken::new());
        let order = Arc::new(Mutex::new(Vec::new()));

        for i in 0..5 {
            let order = Arc::clone(&order);
            queue.execute(Box::new(move || order.lock().push(i)));
        }
        drain().await;

        assert_eq!(*order.lock(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_after_fires_once_delay_elapses() {
        let queue = DeliveryQueue::start(Handle::current(), CancellationToken::new());
        let fired = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&fired);
        queue.execute_after(
            Duration::from_millis(150),
            Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(200)).await;
        drain().await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_after_is_suppressed_by_cancellation() {
        let token = CancellationToken::new();
        let queue = DeliveryQueue::start(Handle::current(), token.clone());
        let fired = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&fired);
        queue.execute_after(
            Duration::from_millis(150),
            Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        token.cancel();
        tokio::time::sleep(Duration::from_millis(300)).await;
        drain().await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_immediate_jobs_ignore_cancellation() {
        let token = CancellationToken::new();
        let queue = DeliveryQueue::start(Handle::current(), token.clone());
        token.cancel();

        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        queue.execute(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        drain().await;

        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }
}
