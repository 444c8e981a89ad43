//! Fixed-size worker pool.
//!
//! Jobs are queued on a bounded channel sized to the job count and consumed
//! by at most `workers` tasks. Once the cancellation token fires, workers
//! stop taking new jobs; jobs already running observe the token on their
//! own. A failing job never stops its siblings.

use crate::error::{CoreError, Result};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Default number of concurrent workers.
pub const DEFAULT_WORKERS: usize = 3;

/// A unit of work identified by a key.
pub trait WorkItem: Send + 'static {
    /// Key used to report failures.
    fn key(&self) -> &str;
}

/// A job that returned an error.
#[derive(Debug)]
pub struct WorkerFailure {
    /// Key of the failed job.
    pub key: String,
    /// The error it returned.
    pub error: CoreError,
}

/// Outcome of a pool run.
#[derive(Debug, Default)]
pub struct PoolReport {
    /// Jobs that ran to completion, successfully or not.
    pub completed: usize,
    /// Jobs never started because the run was cancelled.
    pub skipped: usize,
    /// Jobs that returned an error.
    pub failures: Vec<WorkerFailure>,
}

impl PoolReport {
    fn record(&mut self, event: WorkerEvent) {
        match event {
            WorkerEvent::Completed => self.completed += 1,
            WorkerEvent::Skipped => self.skipped += 1,
            WorkerEvent::Failed(failure) => {
                self.completed += 1;
                self.failures.push(failure);
            }
        }
    }
}

/// Progress shared by the workers of one run.
///
/// Events land here as they happen, so a worker that dies keeps what it
/// already reported.
#[derive(Default)]
struct Tally {
    report: PoolReport,
    in_flight: HashMap<usize, String>,
}

impl Tally {
    fn start(&mut self, worker: usize, key: String) {
        self.in_flight.insert(worker, key);
    }

    fn finish(&mut self, worker: usize, event: WorkerEvent) {
        self.in_flight.remove(&worker);
        self.report.record(event);
    }
}

fn lock(tally: &StdMutex<Tally>) -> MutexGuard<'_, Tally> {
    tally.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Worker pool.
#[derive(Debug, Clone, Copy)]
pub struct WorkerPool {
    workers: usize,
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new(DEFAULT_WORKERS)
    }
}

#[derive(Debug)]
enum WorkerEvent {
    Completed,
    Skipped,
    Failed(WorkerFailure),
}

impl WorkerPool {
    /// Creates a pool running at most `workers` jobs at once.
    #[must_use]
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
        }
    }

    /// Returns the configured width.
    #[must_use]
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Runs `job` once per item and waits for all of them.
    pub async fn run<T, F, Fut>(
        &self,
        cancel: &CancellationToken,
        items: Vec<T>,
        job: F,
    ) -> PoolReport
    where
        T: WorkItem,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        if items.is_empty() {
            return PoolReport::default();
        }

        let width = self.workers.min(items.len());
        let (queue_tx, queue_rx) = mpsc::channel(items.len());
        for item in items {
            // Capacity equals the item count, so this cannot fail.
            if queue_tx.try_send(item).is_err() {
                tracing::error!("Work queue rejected a job");
            }
        }
        drop(queue_tx);

        let queue = Arc::new(Mutex::new(queue_rx));
        let tally = Arc::new(StdMutex::new(Tally::default()));
        let job = Arc::new(job);
        let mut tasks = JoinSet::new();

        for worker in 0..width {
            let queue = Arc::clone(&queue);
            let tally = Arc::clone(&tally);
            let job = Arc::clone(&job);
            let cancel = cancel.clone();
            tasks.spawn(async move {
                loop {
                    let Some(item) = queue.lock().await.recv().await else {
                        break;
                    };
                    let key = item.key().to_string();
                    if cancel.is_cancelled() {
                        tracing::debug!(worker, job = %key, "Skipping job, run cancelled");
                        lock(&tally).report.record(WorkerEvent::Skipped);
                        continue;
                    }

                    lock(&tally).start(worker, key.clone());
                    let handle = tokio::spawn(job(item));
                    let event = match handle.await {
                        Ok(Ok(())) => WorkerEvent::Completed,
                        Ok(Err(error)) => WorkerEvent::Failed(WorkerFailure { key, error }),
                        Err(e) => {
                            tracing::error!(worker, job = %key, error = %e, "Job panicked");
                            WorkerEvent::Failed(WorkerFailure {
                                key,
                                error: CoreError::worker(format!("job aborted: {e}")),
                            })
                        }
                    };
                    lock(&tally).finish(worker, event);
                }
            });
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "Worker task failed");
            }
        }

        let mut tally = std::mem::take(&mut *lock(&tally));
        for (_, key) in tally.in_flight.drain() {
            tally.report.record(WorkerEvent::Failed(WorkerFailure {
                key,
                error: CoreError::worker("worker stopped while running the job"),
            }));
        }
        let mut queue = queue.lock().await;
        while let Ok(item) = queue.try_recv() {
            tally.report.failures.push(WorkerFailure {
                key: item.key().to_string(),
                error: CoreError::worker("job not run, no worker left"),
            });
        }
        tally.report
    }
}
