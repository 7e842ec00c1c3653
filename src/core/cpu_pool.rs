//! Dedicated OS threads for CPU-bound work offloaded by operations.
//!
//! Jobs are boxed closures sent through a bounded crossbeam channel. Each worker
//! blocks on `recv` and exits once the sender is dropped. Results travel back to
//! the awaiting task over a tokio oneshot, so the async runtime never blocks.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::config::CpuConfig;
use crate::core::{OperationError, OrchestratorError};

type Job = Box<dyn FnOnce() -> bool + Send + 'static>;

#[derive(Debug, Default)]
struct CpuCounters {
    submitted: AtomicU64,
    completed: AtomicU64,
    rejected: AtomicU64,
    panicked: AtomicU64,
    active: AtomicU64,
}

/// Snapshot of CPU pool counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CpuPoolStats {
    /// Worker threads spawned.
    pub workers: usize,
    /// Jobs accepted onto the queue.
    pub submitted: u64,
    /// Jobs that ran to completion, panicked or not.
    pub completed: u64,
    /// Jobs refused because the queue was full or the pool stopped.
    pub rejected: u64,
    /// Jobs that panicked.
    pub panicked: u64,
    /// Jobs currently executing.
    pub active: u64,
}

/// Fixed set of worker threads fed by a bounded job queue.
pub struct CpuPool {
    config: CpuConfig,
    job_tx: Mutex<Option<Sender<Job>>>,
    counters: Arc<CpuCounters>,
    shutdown: AtomicBool,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for CpuPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CpuPool")
            .field("config", &self.config)
            .field("shutdown", &self.shutdown.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl CpuPool {
    /// Spawn `config.worker_count` threads.
    ///
    /// # Errors
    ///
    /// - [`OrchestratorError::InvalidConfig`] if the configuration is invalid
    /// - [`OrchestratorError::Internal`] if a worker thread cannot be spawned
    pub fn new(config: CpuConfig) -> Result<Self, OrchestratorError> {
        config.validate().map_err(OrchestratorError::InvalidConfig)?;

        let (job_tx, job_rx) = bounded::<Job>(config.max_queue_depth);
        let counters = Arc::new(CpuCounters::default());

        let mut workers = Vec::with_capacity(config.worker_count);
        for worker_id in 0..config.worker_count {
            let handle = spawn_worker(
                worker_id,
                job_rx.clone(),
                Arc::clone(&counters),
                config.thread_stack_size,
            )
            .map_err(|e| OrchestratorError::Internal(format!("spawn cpu worker {worker_id}: {e}")))?;
            workers.push(handle);
        }

        info!(
            worker_count = config.worker_count,
            max_queue_depth = config.max_queue_depth,
            "cpu pool started"
        );

        Ok(Self {
            config,
            job_tx: Mutex::new(Some(job_tx)),
            counters,
            shutdown: AtomicBool::new(false),
            workers: Mutex::new(workers),
        })
    }

    /// Run `f` on a worker thread and await its result.
    ///
    /// # Errors
    ///
    /// Returns a server-class [`OperationError`] when the queue is full, the pool has
    /// stopped, or `f` panicked.
    pub async fn run<T, F>(&self, f: F) -> Result<T, OperationError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let job: Job = Box::new(move || {
            let result = catch_unwind(AssertUnwindSafe(f));
            let ok = result.is_ok();
            // Receiver may be gone if the awaiting task was cancelled.
            let _ = tx.send(result);
            ok
        });

        self.submit(job)?;

        match rx.await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_panic)) => Err(OperationError::server("offloaded job panicked")),
            Err(_dropped) => Err(OperationError::server("cpu worker dropped the job")),
        }
    }

    fn submit(&self, job: Job) -> Result<(), OperationError> {
        if self.shutdown.load(Ordering::Acquire) {
            self.counters.rejected.fetch_add(1, Ordering::Relaxed);
            return Err(OperationError::server("cpu pool is shut down"));
        }
        let guard = self.job_tx.lock();
        let Some(tx) = guard.as_ref() else {
            self.counters.rejected.fetch_add(1, Ordering::Relaxed);
            return Err(OperationError::server("cpu pool is shut down"));
        };
        match tx.try_send(job) {
            Ok(()) => {
                self.counters.submitted.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(TrySendError::Full(_)) => {
                self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                warn!(max_queue_depth = self.config.max_queue_depth, "cpu pool queue is full");
                Err(OperationError::server("cpu pool queue is full"))
            }
            Err(TrySendError::Disconnected(_)) => {
                self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                Err(OperationError::server("cpu pool is shut down"))
            }
        }
    }

    /// Current counters.
    #[must_use]
    pub fn stats(&self) -> CpuPoolStats {
        CpuPoolStats {
            workers: self.config.worker_count,
            submitted: self.counters.submitted.load(Ordering::Relaxed),
            completed: self.counters.completed.load(Ordering::Relaxed),
            rejected: self.counters.rejected.load(Ordering::Relaxed),
            panicked: self.counters.panicked.load(Ordering::Relaxed),
            active: self.counters.active.load(Ordering::Relaxed),
        }
    }

    /// Stop accepting jobs and join the workers.
    ///
    /// Blocks the calling thread. Each worker gets `config.join_timeout` to finish
    /// its current job; a worker that overruns is detached.
    pub fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        // Dropping the sender wakes every idle worker with a disconnect.
        self.job_tx.lock().take();

        let mut workers = self.workers.lock();
        let worker_count = workers.len();
        for (idx, worker) in workers.drain(..).enumerate() {
            let (tx, rx) = std::sync::mpsc::channel();
            let joiner = thread::spawn(move || {
                let _ = tx.send(worker.join().is_ok());
            });
            match rx.recv_timeout(self.config.join_timeout) {
                Ok(true) => debug!(worker_id = idx, "cpu worker joined"),
                Ok(false) => warn!(worker_id = idx, "cpu worker panicked"),
                Err(_) => {
                    warn!(worker_id = idx, "cpu worker did not exit in time, detaching");
                    continue;
                }
            }
            let _ = joiner.join();
        }
        info!(worker_count, "cpu pool shut down");
    }

    /// Whether [`shutdown`](Self::shutdown) has been called.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }
}

impl Drop for CpuPool {
    fn drop(&mut self) {
        // Never join here; explicit shutdown() is the graceful path.
        if !self.shutdown.swap(true, Ordering::AcqRel) {
            self.job_tx.lock().take();
            debug!("cpu pool dropped without shutdown, detaching workers");
        }
    }
}

fn spawn_worker(
    worker_id: usize,
    job_rx: Receiver<Job>,
    counters: Arc<CpuCounters>,
    stack_size: usize,
) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name(format!("orch-cpu-{worker_id}"))
        .stack_size(stack_size)
        .spawn(move || {
            debug!(worker_id, "cpu worker started");
            while let Ok(job) = job_rx.recv() {
                counters.active.fetch_add(1, Ordering::Relaxed);
                let ok = job();
                counters.active.fetch_sub(1, Ordering::Relaxed);
                counters.completed.fetch_add(1, Ordering::Relaxed);
                if !ok {
                    counters.panicked.fetch_add(1, Ordering::Relaxed);
                    warn!(worker_id, "offloaded job panicked");
                }
            }
            debug!(worker_id, "cpu worker exiting");
        })
}
