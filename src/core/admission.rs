//! Process-wide gate on how many memory-intensive tasks run at once.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::core::{Deadline, OrchestratorError};

/// Largest accepted capacity. [`AdmissionController::drain`] reclaims every
/// permit with a single `u32` request, and tokio caps a semaphore at
/// [`Semaphore::MAX_PERMITS`].
#[allow(clippy::cast_possible_truncation)]
pub const MAX_ADMISSION_CAPACITY: usize = if (u32::MAX as usize) < Semaphore::MAX_PERMITS {
    u32::MAX as usize
} else {
    Semaphore::MAX_PERMITS
};

/// Snapshot of admission counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AdmissionStats {
    /// Configured concurrency ceiling.
    pub capacity: usize,
    /// Permits currently held.
    pub in_flight: usize,
    /// Highest number of permits held at the same time.
    pub high_water: usize,
    /// Permits granted since construction.
    pub admitted: u64,
    /// Admission attempts that hit their deadline.
    pub timed_out: u64,
}

#[derive(Debug, Default)]
struct Counters {
    in_flight: AtomicUsize,
    high_water: AtomicUsize,
    admitted: std::sync::atomic::AtomicU64,
    timed_out: std::sync::atomic::AtomicU64,
}

/// Counting gate backed by a FIFO semaphore.
///
/// A [`Permit`] is returned for every successful admission and gives its slot back
/// when dropped, whatever path the owning task leaves by.
#[derive(Debug)]
pub struct AdmissionController {
    capacity: usize,
    semaphore: Arc<Semaphore>,
    closing: AtomicBool,
    counters: Arc<Counters>,
}

impl AdmissionController {
    /// Create a controller allowing `capacity` concurrent permits.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::InvalidConfig`] when `capacity` is zero or
    /// above [`MAX_ADMISSION_CAPACITY`].
    pub fn new(capacity: usize) -> Result<Self, OrchestratorError> {
        if capacity == 0 {
            return Err(OrchestratorError::InvalidConfig(
                "admission.max_concurrent must be greater than 0".into(),
            ));
        }
        if capacity > MAX_ADMISSION_CAPACITY {
            return Err(OrchestratorError::InvalidConfig(format!(
                "admission.max_concurrent must be at most {MAX_ADMISSION_CAPACITY}"
            )));
        }
        Ok(Self {
            capacity,
            semaphore: Arc::new(Semaphore::new(capacity)),
            closing: AtomicBool::new(false),
            counters: Arc::new(Counters::default()),
        })
    }

    /// Wait for a slot until `deadline`.
    ///
    /// # Errors
    ///
    /// - [`OrchestratorError::AdmissionTimeout`] if no slot freed in time
    /// - [`OrchestratorError::ShuttingDown`] once [`drain`](Self::drain) has begun
    pub async fn try_admit(&self, deadline: Deadline) -> Result<Permit, OrchestratorError> {
        if self.closing.load(Ordering::Acquire) {
            return Err(OrchestratorError::ShuttingDown);
        }
        let started = Instant::now();
        if deadline.is_elapsed() {
            return Err(self.timed_out(started));
        }

        let acquired = tokio::time::timeout_at(
            deadline.instant(),
            Arc::clone(&self.semaphore).acquire_owned(),
        )
        .await;

        match acquired {
            // Waiters queued ahead of a drain may still be granted a slot.
            Ok(Ok(_permit)) if self.closing.load(Ordering::Acquire) => {
                Err(OrchestratorError::ShuttingDown)
            }
            Ok(Ok(permit)) => Ok(self.issue(permit)),
            Ok(Err(_closed)) => Err(OrchestratorError::ShuttingDown),
            Err(_elapsed) => Err(self.timed_out(started)),
        }
    }

    /// Take a slot only if one is free right now.
    #[must_use]
    pub fn admit_now(&self) -> Option<Permit> {
        if self.closing.load(Ordering::Acquire) {
            return None;
        }
        Arc::clone(&self.semaphore)
            .try_acquire_owned()
            .ok()
            .map(|permit| self.issue(permit))
    }

    /// Stop admitting and wait until every outstanding permit is returned.
    ///
    /// Returns `true` when all permits came back within `timeout`; the gate is
    /// then closed for good. On `false` admission stays stopped and `drain` may be
    /// called again, for example after cancelling the work still in flight.
    pub async fn drain(&self, timeout: Duration) -> bool {
        self.closing.store(true, Ordering::Release);
        let Ok(permits) = u32::try_from(self.capacity) else {
            unreachable!("capacity is bounded by MAX_ADMISSION_CAPACITY at construction");
        };
        let drained = tokio::time::timeout(timeout, self.semaphore.acquire_many(permits)).await;
        match drained {
            Ok(Ok(all)) => {
                all.forget();
                self.semaphore.close();
                info!(capacity = self.capacity, "admission drained");
                true
            }
            Ok(Err(_closed)) => true,
            Err(_elapsed) => {
                warn!(
                    in_flight = self.counters.in_flight.load(Ordering::Acquire),
                    timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                    "admission drain timed out with permits outstanding"
                );
                false
            }
        }
    }

    /// Whether [`drain`](Self::drain) has started.
    #[must_use]
    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::Acquire)
    }

    /// Configured concurrency ceiling.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Current counters.
    #[must_use]
    pub fn stats(&self) -> AdmissionStats {
        AdmissionStats {
            capacity: self.capacity,
            in_flight: self.counters.in_flight.load(Ordering::Acquire),
            high_water: self.counters.high_water.load(Ordering::Acquire),
            admitted: self.counters.admitted.load(Ordering::Relaxed),
            timed_out: self.counters.timed_out.load(Ordering::Relaxed),
        }
    }

    fn issue(&self, permit: OwnedSemaphorePermit) -> Permit {
        let now = self.counters.in_flight.fetch_add(1, Ordering::AcqRel) + 1;
        self.counters.high_water.fetch_max(now, Ordering::AcqRel);
        self.counters.admitted.fetch_add(1, Ordering::Relaxed);
        debug!(in_flight = now, capacity = self.capacity, "permit granted");
        Permit {
            _slot: permit,
            counters: Arc::clone(&self.counters),
        }
    }

    fn timed_out(&self, started: Instant) -> OrchestratorError {
        self.counters.timed_out.fetch_add(1, Ordering::Relaxed);
        OrchestratorError::AdmissionTimeout {
            waited: started.elapsed(),
        }
    }
}

/// A concurrency slot. Released exactly once, when dropped.
#[derive(Debug)]
pub struct Permit {
    _slot: OwnedSemaphorePermit,
    counters: Arc<Counters>,
}

impl Drop for Permit {
    fn drop(&mut self) {
        self.counters.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}
