//! Flow-controlled handler executor (C7): a single worker task draining a
//! bounded queue, grounded on the teacher's `gcp::Credential::spawn` /
//! `sink::RowEventSink::spawn` single-consumer `mpsc` pattern. Submitting to
//! a full queue backpressures the caller rather than growing unbounded.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{Error, Result};

pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

type Job = Box<dyn FnOnce() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send>;

/// A single-worker executor with a bounded queue. Replication handlers are
/// submitted here so a slow handler backpressures the WAL reader instead of
/// buffering unboundedly in memory.
pub struct FlowControlledExecutor {
    sender: mpsc::Sender<Job>,
    backpressure_timeout: Option<Duration>,
    worker: JoinHandle<()>,
}

/// A cheaply-`Clone`d handle to a running executor's queue. Exists so callers
/// holding a lock on the owning `FlowControlledExecutor` (e.g. to check it's
/// still alive before using it) can clone this out and drop the lock before
/// awaiting `submit` — submitting to a full queue can block indefinitely, and
/// that must never happen while a shutdown path is waiting on the same lock.
#[derive(Clone)]
pub struct ExecutorHandle {
    sender: mpsc::Sender<Job>,
    backpressure_timeout: Option<Duration>,
}

impl ExecutorHandle {
    pub async fn submit<F, Fut>(&self, job: F) -> Result<()>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let job: Job = Box::new(move || Box::pin(job()));
        let send = self.sender.send(job);

        let result = match self.backpressure_timeout {
            Some(timeout) => tokio::time::timeout(timeout, send)
                .await
                .map_err(|_| Error::unavailable("timed out due to backpressure"))?,
            None => send.await,
        };

        result.map_err(|_| Error::unavailable("handler executor worker has stopped"))
    }
}

impl FlowControlledExecutor {
    pub fn spawn(capacity: usize) -> Self {
        Self::spawn_with_timeout(capacity, None)
    }

    pub fn spawn_with_timeout(capacity: usize, backpressure_timeout: Option<Duration>) -> Self {
        let (sender, mut receiver) = mpsc::channel::<Job>(capacity.max(1));
        let worker = tokio::task::spawn(async move {
            while let Some(job) = receiver.recv().await {
                job().await;
            }
        });
        Self {
            sender,
            backpressure_timeout,
            worker,
        }
    }

    /// Clones a handle that can be used to `submit` after this executor's
    /// owning lock has been released.
    pub fn handle(&self) -> ExecutorHandle {
        ExecutorHandle {
            sender: self.sender.clone(),
            backpressure_timeout: self.backpressure_timeout,
        }
    }

    /// Enqueues `job`, blocking until the queue has room. If a backpressure
    /// timeout is configured and it elapses first, returns **Unavailable**
    /// ("timed out due to backpressure") and the job is dropped.
    pub async fn submit<F, Fut>(&self, job: F) -> Result<()>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.handle().submit(job).await
    }

    /// Stops accepting new work and waits for the queue to drain.
    pub async fn close(self) {
        drop(self.sender);
        let _ = self.worker.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn runs_submitted_jobs_in_order() {
        let executor = FlowControlledExecutor::spawn(DEFAULT_QUEUE_CAPACITY);
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        for i in 0..5 {
            let seen = seen.clone();
            executor.submit(move || async move { seen.lock().unwrap().push(i) }).await.unwrap();
        }
        executor.close().await;
        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn backpressure_timeout_surfaces_unavailable_on_a_full_queue() {
        let executor = FlowControlledExecutor::spawn_with_timeout(1, Some(Duration::from_millis(20)));
        let blocker = Arc::new(tokio::sync::Notify::new());
        let blocker_task = blocker.clone();
        executor.submit(move || async move { blocker_task.notified().await }).await.unwrap();

        let counter = Arc::new(AtomicUsize::new(0));
        let counter_task = counter.clone();
        // The worker is stuck on the first job, so this fills the one queue slot...
        executor
            .submit(move || async move { counter_task.fetch_add(1, Ordering::SeqCst); })
            .await
            .unwrap();
        // ...and this one has nowhere to go until the timeout fires.
        let err = executor.submit(|| async {}).await.unwrap_err();
        assert!(matches!(err, Error::Unavailable(_)));

        blocker.notify_one();
        executor.close().await;
    }
}
