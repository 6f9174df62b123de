//! Task scheduling for blocking native calls.
//!
//! Two pieces cooperate here:
//!
//! - [`WorkerPool`]: a semaphore bounding how many blocking calls run on
//!   `spawn_blocking` threads at once, shared across all sessions.
//! - [`SessionQueue`]: a per-session command queue whose consumer task
//!   owns the [`DecoderHandle`]. Jobs execute strictly in submission
//!   order, one at a time, so the non-reentrant engine sees at most one
//!   in-flight call per session while independent sessions run in
//!   parallel.
//!
//! Callers interact only through futures; a dropped future does not
//! cancel the dispatched work, which still runs to completion and still
//! releases whatever it allocated.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, Semaphore};

use crate::error::{Result, SessionError};
use crate::handle::{DecoderHandle, HandleState};

/// Bounded pool for blocking native calls, shared across sessions.
#[derive(Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
}

impl WorkerPool {
    /// Create a pool with the given number of concurrent slots.
    /// Zero means one slot per available hardware thread.
    pub fn new(workers: usize) -> Self {
        let workers = if workers == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        } else {
            workers
        };
        Self {
            permits: Arc::new(Semaphore::new(workers)),
        }
    }

    /// Run one blocking job on the pool and await its result.
    ///
    /// Used directly by encode tasks, which read only the immutable
    /// snapshot and are exempt from the per-session single-flight rule.
    pub async fn run<T, F>(&self, job: F) -> Result<T>
    where
        F: FnOnce() -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| SessionError::Resource("worker pool shut down".into()))?;
        let result = tokio::task::spawn_blocking(job).await;
        drop(permit);
        result.map_err(|e| SessionError::Internal {
            code: 0,
            message: format!("worker task failed: {}", e),
        })?
    }

    fn permits(&self) -> Arc<Semaphore> {
        Arc::clone(&self.permits)
    }
}

type Job = Box<dyn FnOnce(&mut DecoderHandle) + Send>;

/// FIFO command queue for one session's handle-mutating operations.
pub struct SessionQueue {
    tx: mpsc::Sender<Job>,
    closed: Arc<AtomicBool>,
}

impl SessionQueue {
    /// Spawn the consumer task that takes ownership of the handle.
    ///
    /// `depth` bounds how many operations may wait; submissions past the
    /// bound suspend the caller (backpressure), they are never rejected.
    pub fn spawn(handle: DecoderHandle, pool: &WorkerPool, depth: usize) -> Self {
        let (tx, mut rx) = mpsc::channel::<Job>(depth.max(1));
        let closed = Arc::new(AtomicBool::new(false));
        let closed_flag = Arc::clone(&closed);
        let permits = pool.permits();

        tokio::spawn(async move {
            let mut handle = handle;
            while let Some(job) = rx.recv().await {
                // A close request releases the engine before any job that
                // was still queued behind it runs; those jobs then observe
                // the closed state instead of touching freed resources.
                if closed_flag.load(Ordering::Acquire) {
                    handle.close();
                }
                let permit = match permits.clone().acquire_owned().await {
                    Ok(p) => p,
                    Err(_) => break,
                };
                let joined = tokio::task::spawn_blocking(move || {
                    let mut h = handle;
                    job(&mut h);
                    h
                })
                .await;
                drop(permit);
                match joined {
                    Ok(h) => handle = h,
                    Err(e) => {
                        // The job panicked; the handle was dropped (and
                        // closed) on the worker thread. Pending futures see
                        // their oneshot senders dropped.
                        tracing::error!("session worker panicked: {}", e);
                        return;
                    }
                }
            }
            handle.close();
        });

        Self { tx, closed }
    }

    /// Submit one operation against the handle; resolves with the
    /// operation's result in strict submission order.
    pub async fn submit<T, F>(&self, operation: &'static str, op: F) -> Result<T>
    where
        F: FnOnce(&mut DecoderHandle) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let job: Job = Box::new(move |handle| {
            let _ = tx.send(op(handle));
        });
        self.tx
            .send(job)
            .await
            .map_err(|_| SessionError::InvalidState {
                operation,
                required: HandleState::Loaded,
                actual: HandleState::Closed,
            })?;
        rx.await.map_err(|_| SessionError::InvalidState {
            operation,
            required: HandleState::Loaded,
            actual: HandleState::Closed,
        })?
    }

    /// Request close: flips the closed flag so queued jobs observe the
    /// closed handle, then waits for the release itself. Never fails.
    pub async fn close(&self) {
        self.closed.store(true, Ordering::Release);
        // The job body is a no-op: by the time it runs, the consumer loop
        // has already closed the handle via the flag.
        let _ = self.submit("close", |handle| {
            handle.close();
            Ok(())
        })
        .await;
    }

    /// Whether close has been requested.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}
