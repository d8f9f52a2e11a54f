//! Bounded download queue.
//!
//! Jobs are detached tokio tasks. A semaphore caps how many run at once, a
//! watch channel tracks how many are queued or running so callers can wait
//! for room (`on_size_less_than`) or for the queue to drain (`on_idle`).

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use thiserror::Error;
use tokio::sync::{watch, Semaphore};
use tracing::{debug, error, warn, Instrument};

use crate::config::QueueConfig;

/// A unit of background work.
pub type Job = BoxFuture<'static, ()>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueueError {
    #[error("download queue is closed")]
    Closed,
}

/// Admission-controlled job queue.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Wait until fewer than `size` jobs are queued or running.
    async fn on_size_less_than(&self, size: usize) -> Result<(), QueueError>;

    /// Enqueue a job and return immediately.
    fn schedule_job(&self, job: Job) -> Result<(), QueueError>;

    /// Jobs queued or running.
    fn size(&self) -> usize;

    /// Wait until every scheduled job has finished.
    async fn on_idle(&self);
}

#[derive(Debug, Clone, Copy, Default)]
struct QueueState {
    size: usize,
    closed: bool,
}

/// [`JobQueue`] on the tokio runtime.
#[derive(Clone)]
pub struct TokioJobQueue {
    permits: Arc<Semaphore>,
    state: Arc<watch::Sender<QueueState>>,
    job_timeout: Duration,
}

impl TokioJobQueue {
    pub fn new(config: QueueConfig) -> Self {
        let (state, _) = watch::channel(QueueState::default());
        Self {
            permits: Arc::new(Semaphore::new(config.concurrency.max(1))),
            state: Arc::new(state),
            job_timeout: config.job_timeout,
        }
    }

    /// Stop admitting jobs. Jobs already scheduled still run.
    pub fn close(&self) {
        self.state.send_modify(|state| state.closed = true);
    }

    pub fn is_closed(&self) -> bool {
        self.state.borrow().closed
    }
}

impl std::fmt::Debug for TokioJobQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = *self.state.borrow();
        f.debug_struct("TokioJobQueue")
            .field("size", &state.size)
            .field("closed", &state.closed)
            .field("available_permits", &self.permits.available_permits())
            .finish()
    }
}

#[async_trait]
impl JobQueue for TokioJobQueue {
    async fn on_size_less_than(&self, size: usize) -> Result<(), QueueError> {
        let mut rx = self.state.subscribe();
        let state = rx
            .wait_for(|state| state.closed || state.size < size)
            .await
            .map_err(|_| QueueError::Closed)?;
        if state.closed {
            return Err(QueueError::Closed);
        }
        Ok(())
    }

    fn schedule_job(&self, job: Job) -> Result<(), QueueError> {
        let mut admitted = false;
        self.state.send_if_modified(|state| {
            if state.closed {
                return false;
            }
            state.size += 1;
            admitted = true;
            true
        });
        if !admitted {
            return Err(QueueError::Closed);
        }

        let permits = Arc::clone(&self.permits);
        let state = Arc::clone(&self.state);
        let job_timeout = self.job_timeout;
        let job_id = uuid::Uuid::new_v4();
        let span = tracing::info_span!("download_job", %job_id);

        tokio::spawn(
            async move {
                // The semaphore is never closed, so acquire only fails on shutdown.
                if let Ok(_permit) = permits.acquire_owned().await {
                    match tokio::time::timeout(job_timeout, AssertUnwindSafe(job).catch_unwind())
                        .await
                    {
                        Ok(Ok(())) => debug!("job finished"),
                        Ok(Err(_)) => error!("job panicked"),
                        Err(_) => warn!(timeout_ms = job_timeout.as_millis() as u64, "job timed out"),
                    }
                }
                state.send_modify(|state| state.size -= 1);
            }
            .instrument(span),
        );
        Ok(())
    }

    fn size(&self) -> usize {
        self.state.borrow().size
    }

    async fn on_idle(&self) {
        let mut rx = self.state.subscribe();
        let _ = rx.wait_for(|state| state.size == 0).await;
    }
}
