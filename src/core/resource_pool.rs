//! Bounded pools of external resources, one per [`ResourceKind`].
//!
//! Capacity is enforced with a tokio semaphore per kind. The permit travels
//! inside the [`Lease`], so the slot comes back exactly once, when the lease is
//! dropped. Idle resources are kept in a LIFO stack and reused before the
//! factory is asked to open a new one.
//!
//! Shutdown closes the semaphores first, waits for outstanding leases and for
//! resources still being opened up to a timeout, then closes every idle resource
//! through the factory. A resource whose open finishes after shutdown began is
//! never lent: it goes to the idle stack, or straight back to the factory once
//! teardown is over. Leases still out after the timeout are forfeited: a warning
//! is logged and the resource is discarded whenever its holder finally lets go.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::core::{Deadline, OrchestratorError, ResourceFactory};
use crate::util::serde::ResourceKind;

static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

/// Largest capacity accepted for a single kind.
pub const MAX_KIND_CAPACITY: usize = Semaphore::MAX_PERMITS;

/// Identifier of a single lease, unique within its pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct LeaseId(u64);

impl fmt::Display for LeaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "lease-{}", self.0)
    }
}

/// Per-kind counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct KindStats {
    /// Configured maximum of simultaneous leases.
    pub capacity: usize,
    /// Leases currently held.
    pub leased: usize,
    /// Opened resources waiting for reuse.
    pub idle: usize,
}

/// Snapshot of pool counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// Counters per configured kind.
    pub kinds: HashMap<ResourceKind, KindStats>,
    /// Resources opened through the factory.
    pub opened: u64,
    /// Acquisitions served from the idle stack.
    pub reused: u64,
    /// Leases issued since construction.
    pub issued: u64,
    /// Leases forfeited at shutdown and not yet returned.
    pub forfeited: u64,
    /// Whether shutdown has begun.
    pub closed: bool,
}

impl PoolStats {
    /// Leases currently held across all kinds.
    #[must_use]
    pub fn leased(&self) -> usize {
        self.kinds.values().map(|k| k.leased).sum()
    }
}

/// Result of [`ResourcePool::shutdown`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolShutdownReport {
    /// Every lease came back before the timeout.
    pub drained: bool,
    /// Leases still held when the timeout elapsed.
    pub leaked: usize,
    /// Idle resources closed through the factory.
    pub closed_resources: usize,
}

#[derive(Debug)]
struct KindSlot {
    capacity: usize,
    semaphore: Arc<Semaphore>,
}

struct LedgerState<R> {
    idle: HashMap<ResourceKind, Vec<R>>,
    outstanding: HashMap<LeaseId, ResourceKind>,
    forfeited: HashSet<LeaseId>,
    /// Checkouts holding a permit whose resource is not yet in hand.
    opening: usize,
    torn_down: bool,
    next_lease: u64,
    opened: u64,
    reused: u64,
}

/// Book-keeping shared between the pool and its leases.
struct Ledger<R> {
    pool_id: u64,
    slots: HashMap<ResourceKind, KindSlot>,
    state: Mutex<LedgerState<R>>,
    closed: AtomicBool,
    released: Notify,
}

impl<R> LedgerState<R> {
    fn pending(&self) -> usize {
        self.outstanding.len() + self.opening
    }
}

/// Why a checkout could not become a lease.
enum Refused<R> {
    /// Shutdown is waiting; the resource was parked on the idle stack.
    Parked,
    /// Teardown already ran; the caller must close the resource.
    TornDown(R),
}

impl<R> Ledger<R> {
    /// Count a checkout as pending so shutdown waits for it.
    fn reserve(&self, kind: ResourceKind) -> Result<Reservation<'_, R>, OrchestratorError> {
        let mut state = self.state.lock();
        if state.torn_down || self.closed.load(Ordering::Acquire) {
            return Err(OrchestratorError::PoolClosed { kind });
        }
        state.opening += 1;
        Ok(Reservation {
            ledger: self,
            armed: true,
        })
    }

    fn register(
        &self,
        mut reservation: Reservation<'_, R>,
        kind: ResourceKind,
        resource: R,
        reused: bool,
    ) -> Result<(LeaseId, R), Refused<R>> {
        let mut state = self.state.lock();
        reservation.armed = false;
        state.opening -= 1;
        if state.torn_down {
            return Err(Refused::TornDown(resource));
        }
        if self.closed.load(Ordering::Acquire) {
            state.idle.entry(kind).or_default().push(resource);
            let idle = state.pending() == 0;
            drop(state);
            if idle {
                self.released.notify_waiters();
            }
            return Err(Refused::Parked);
        }
        state.next_lease += 1;
        let id = LeaseId(state.next_lease);
        state.outstanding.insert(id, kind);
        if reused {
            state.reused += 1;
        } else {
            state.opened += 1;
        }
        Ok((id, resource))
    }

    /// Take a resource back. Runs before the lease's permit is dropped.
    fn check_in(&self, id: LeaseId, kind: ResourceKind, resource: Option<R>) {
        let mut state = self.state.lock();
        if state.forfeited.remove(&id) {
            drop(state);
            warn!(lease = %id, kind = %kind, "forfeited lease returned after pool shutdown, discarding");
            return;
        }
        if state.outstanding.remove(&id).is_none() {
            drop(state);
            warn!(lease = %id, kind = %kind, "unknown lease returned to pool, discarding");
            return;
        }
        if let Some(resource) = resource {
            if !state.torn_down {
                state.idle.entry(kind).or_default().push(resource);
            }
        }
        let idle = state.pending() == 0;
        drop(state);
        if idle {
            self.released.notify_waiters();
        }
    }

    fn pending(&self) -> usize {
        self.state.lock().pending()
    }
}

/// A checkout in progress. Dropping it unregistered, on a failed or
/// abandoned open, releases the reservation.
struct Reservation<'a, R> {
    ledger: &'a Ledger<R>,
    armed: bool,
}

impl<R> Drop for Reservation<'_, R> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut state = self.ledger.state.lock();
        state.opening -= 1;
        let idle = state.pending() == 0;
        drop(state);
        if idle {
            self.ledger.released.notify_waiters();
        }
    }
}

/// Exclusive, time-bounded hold on one pooled resource.
///
/// Dereferences to the resource. Dropping the lease returns the resource and its
/// capacity slot to the pool on every exit path.
pub struct Lease<R> {
    id: LeaseId,
    kind: ResourceKind,
    resource: Option<R>,
    permit: Option<OwnedSemaphorePermit>,
    ledger: Arc<Ledger<R>>,
}

impl<R> Lease<R> {
    /// Identifier of this lease.
    #[must_use]
    pub const fn id(&self) -> LeaseId {
        self.id
    }

    /// Kind of the leased resource.
    #[must_use]
    pub const fn kind(&self) -> ResourceKind {
        self.kind
    }

    /// Whether this lease was issued by the pool with `pool_id`.
    fn belongs_to(&self, pool_id: u64) -> bool {
        self.ledger.pool_id == pool_id
    }
}

impl<R> Deref for Lease<R> {
    type Target = R;

    fn deref(&self) -> &R {
        self.resource
            .as_ref()
            .unwrap_or_else(|| unreachable!("lease resource is present until drop"))
    }
}

impl<R> DerefMut for Lease<R> {
    fn deref_mut(&mut self) -> &mut R {
        self.resource
            .as_mut()
            .unwrap_or_else(|| unreachable!("lease resource is present until drop"))
    }
}

impl<R> Drop for Lease<R> {
    fn drop(&mut self) {
        self.ledger.check_in(self.id, self.kind, self.resource.take());
        // Slot is handed back only after the resource is on the idle stack.
        drop(self.permit.take());
    }
}

impl<R> fmt::Debug for Lease<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lease")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

/// Bounded set of reusable resources keyed by kind.
pub struct ResourcePool<F: ResourceFactory> {
    factory: Arc<F>,
    ledger: Arc<Ledger<F::Resource>>,
}

impl<F: ResourceFactory> Clone for ResourcePool<F> {
    fn clone(&self) -> Self {
        Self {
            factory: Arc::clone(&self.factory),
            ledger: Arc::clone(&self.ledger),
        }
    }
}

impl<F: ResourceFactory> fmt::Debug for ResourcePool<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourcePool")
            .field("pool_id", &self.ledger.pool_id)
            .field("slots", &self.ledger.slots)
            .finish_non_exhaustive()
    }
}

impl<F: ResourceFactory> ResourcePool<F> {
    /// Create a pool with a capacity per kind. Kinds not listed cannot be leased.
    ///
    /// # Errors
    ///
    /// [`OrchestratorError::InvalidConfig`] when a capacity exceeds [`MAX_KIND_CAPACITY`].
    pub fn new(
        factory: F,
        capacities: impl IntoIterator<Item = (ResourceKind, usize)>,
    ) -> Result<Self, OrchestratorError> {
        let slots = capacities
            .into_iter()
            .map(|(kind, capacity)| {
                if capacity > MAX_KIND_CAPACITY {
                    return Err(OrchestratorError::InvalidConfig(format!(
                        "pool.capacity.{kind} must be at most {MAX_KIND_CAPACITY}"
                    )));
                }
                Ok((
                    kind,
                    KindSlot {
                        capacity,
                        semaphore: Arc::new(Semaphore::new(capacity)),
                    },
                ))
            })
            .collect::<Result<HashMap<ResourceKind, KindSlot>, _>>()?;
        let ledger = Ledger {
            pool_id: NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed),
            slots,
            state: Mutex::new(LedgerState {
                idle: HashMap::new(),
                outstanding: HashMap::new(),
                forfeited: HashSet::new(),
                opening: 0,
                torn_down: false,
                next_lease: 0,
                opened: 0,
                reused: 0,
            }),
            closed: AtomicBool::new(false),
            released: Notify::new(),
        };
        Ok(Self {
            factory: Arc::new(factory),
            ledger: Arc::new(ledger),
        })
    }

    /// Wait for a lease of `kind` until `deadline`.
    ///
    /// # Errors
    ///
    /// - [`OrchestratorError::PoolClosed`] after shutdown began
    /// - [`OrchestratorError::PoolExhausted`] when the kind has no capacity at all
    /// - [`OrchestratorError::PoolTimeout`] when nothing freed before `deadline`
    /// - [`OrchestratorError::OperationFailure`] when the factory fails to open
    pub async fn acquire(
        &self,
        kind: ResourceKind,
        deadline: Deadline,
    ) -> Result<Lease<F::Resource>, OrchestratorError> {
        let slot = self.slot(kind)?;
        let started = Instant::now();
        if deadline.is_elapsed() {
            return Err(OrchestratorError::PoolTimeout {
                kind,
                waited: Duration::ZERO,
            });
        }

        let permit =
            match tokio::time::timeout_at(deadline.instant(), Arc::clone(&slot.semaphore).acquire_owned())
                .await
            {
                Ok(Ok(permit)) => permit,
                Ok(Err(_closed)) => return Err(OrchestratorError::PoolClosed { kind }),
                Err(_elapsed) => {
                    debug!(kind = %kind, "lease wait timed out");
                    return Err(OrchestratorError::PoolTimeout {
                        kind,
                        waited: started.elapsed(),
                    });
                }
            };

        self.check_out(kind, permit, deadline, started).await
    }

    /// Take a lease of `kind` only if a slot is free right now.
    ///
    /// Never waits for a slot. Opening a new resource through the factory is
    /// still bounded by `deadline`.
    ///
    /// # Errors
    ///
    /// [`OrchestratorError::PoolExhausted`] when every slot is leased, otherwise as
    /// for [`acquire`](Self::acquire).
    pub async fn try_acquire(
        &self,
        kind: ResourceKind,
        deadline: Deadline,
    ) -> Result<Lease<F::Resource>, OrchestratorError> {
        let slot = self.slot(kind)?;
        let started = Instant::now();
        if deadline.is_elapsed() {
            return Err(OrchestratorError::PoolTimeout {
                kind,
                waited: Duration::ZERO,
            });
        }
        let permit = match Arc::clone(&slot.semaphore).try_acquire_owned() {
            Ok(permit) => permit,
            Err(TryAcquireError::NoPermits) => return Err(OrchestratorError::PoolExhausted { kind }),
            Err(TryAcquireError::Closed) => return Err(OrchestratorError::PoolClosed { kind }),
        };
        self.check_out(kind, permit, deadline, started).await
    }

    /// Return a lease explicitly. Equivalent to dropping it.
    ///
    /// # Panics
    ///
    /// Panics if the lease was issued by another pool. Handing a lease to the
    /// wrong pool is a broken ownership invariant, not a recoverable error.
    pub fn release(&self, lease: Lease<F::Resource>) {
        assert!(
            lease.belongs_to(self.ledger.pool_id),
            "{} was not issued by this pool",
            lease.id()
        );
        drop(lease);
    }

    /// Stop lending, wait up to `timeout` for outstanding leases, close idle resources.
    ///
    /// Calling it again after the first shutdown returns an empty report.
    pub async fn shutdown(&self, timeout: Duration) -> PoolShutdownReport {
        if self.ledger.closed.swap(true, Ordering::AcqRel) {
            return PoolShutdownReport {
                drained: self.ledger.pending() == 0,
                ..PoolShutdownReport::default()
            };
        }
        for slot in self.ledger.slots.values() {
            slot.semaphore.close();
        }

        let drained = self.wait_for_returns(timeout).await;

        let (leaked, opening, idle) = {
            let mut state = self.ledger.state.lock();
            let leaked: Vec<(LeaseId, ResourceKind)> = state.outstanding.drain().collect();
            for (id, _) in &leaked {
                state.forfeited.insert(*id);
            }
            state.torn_down = true;
            let idle: Vec<(ResourceKind, Vec<F::Resource>)> = state.idle.drain().collect();
            (leaked, state.opening, idle)
        };

        for (id, kind) in &leaked {
            warn!(
                lease = %id,
                kind = %kind,
                timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                "lease leak: still held at pool shutdown, forfeiting"
            );
        }

        let mut closed_resources = 0;
        for (kind, resources) in idle {
            for resource in resources {
                self.factory.close(kind, resource).await;
                closed_resources += 1;
            }
        }

        if opening > 0 {
            warn!(opening, "resources still opening at pool teardown, they will be closed on arrival");
        }
        info!(
            drained,
            leaked = leaked.len(),
            closed_resources,
            "resource pool shut down"
        );
        PoolShutdownReport {
            drained,
            leaked: leaked.len(),
            closed_resources,
        }
    }

    /// Current counters.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        let state = self.ledger.state.lock();
        let mut kinds: HashMap<ResourceKind, KindStats> = self
            .ledger
            .slots
            .iter()
            .map(|(kind, slot)| {
                (
                    *kind,
                    KindStats {
                        capacity: slot.capacity,
                        leased: 0,
                        idle: state.idle.get(kind).map_or(0, Vec::len),
                    },
                )
            })
            .collect();
        for kind in state.outstanding.values() {
            if let Some(entry) = kinds.get_mut(kind) {
                entry.leased += 1;
            }
        }
        PoolStats {
            kinds,
            opened: state.opened,
            reused: state.reused,
            issued: state.next_lease,
            forfeited: state.forfeited.len() as u64,
            closed: self.ledger.closed.load(Ordering::Acquire),
        }
    }

    /// Whether shutdown has begun.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.ledger.closed.load(Ordering::Acquire)
    }

    /// Configured capacity for `kind`, zero when the kind is not pooled.
    #[must_use]
    pub fn capacity(&self, kind: ResourceKind) -> usize {
        self.ledger.slots.get(&kind).map_or(0, |slot| slot.capacity)
    }

    fn slot(&self, kind: ResourceKind) -> Result<&KindSlot, OrchestratorError> {
        if self.ledger.closed.load(Ordering::Acquire) {
            return Err(OrchestratorError::PoolClosed { kind });
        }
        match self.ledger.slots.get(&kind) {
            Some(slot) if slot.capacity > 0 => Ok(slot),
            _ => Err(OrchestratorError::PoolExhausted { kind }),
        }
    }

    async fn check_out(
        &self,
        kind: ResourceKind,
        permit: OwnedSemaphorePermit,
        deadline: Deadline,
        started: Instant,
    ) -> Result<Lease<F::Resource>, OrchestratorError> {
        let reservation = self.ledger.reserve(kind)?;

        let idle = self
            .ledger
            .state
            .lock()
            .idle
            .get_mut(&kind)
            .and_then(Vec::pop);

        let (resource, reused) = match idle {
            Some(resource) => (resource, true),
            None => {
                let opened = tokio::time::timeout_at(deadline.instant(), self.factory.open(kind))
                    .await
                    .map_err(|_| OrchestratorError::PoolTimeout {
                        kind,
                        waited: started.elapsed(),
                    })?;
                (opened?, false)
            }
        };

        let (id, resource) = match self.ledger.register(reservation, kind, resource, reused) {
            Ok(pair) => pair,
            Err(Refused::Parked) => return Err(OrchestratorError::PoolClosed { kind }),
            Err(Refused::TornDown(resource)) => {
                debug!(kind = %kind, "resource opened after pool teardown, closing");
                self.factory.close(kind, resource).await;
                return Err(OrchestratorError::PoolClosed { kind });
            }
        };
        debug!(lease = %id, kind = %kind, reused, "lease issued");
        Ok(Lease {
            id,
            kind,
            resource: Some(resource),
            permit: Some(permit),
            ledger: Arc::clone(&self.ledger),
        })
    }

    async fn wait_for_returns(&self, timeout: Duration) -> bool {
        let until = Instant::now() + timeout;
        loop {
            let notified = self.ledger.released.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.ledger.pending() == 0 {
                return true;
            }
            if tokio::time::timeout_at(until, notified).await.is_err() {
                return self.ledger.pending() == 0;
            }
        }
    }
}
