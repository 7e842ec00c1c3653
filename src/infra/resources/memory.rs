//! Resource factory producing in-process stand-ins for sessions and connections.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::core::{OperationError, ResourceFactory};
use crate::util::serde::ResourceKind;

/// Stand-in for a database session or HTTP connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryResource {
    /// Kind this resource was opened for.
    pub kind: ResourceKind,
    /// Sequence number assigned at open.
    pub serial: u64,
    /// Times the resource was handed out.
    pub uses: u64,
}

/// Open/close counters shared with tests after the factory moves into a pool.
#[derive(Debug, Default)]
pub struct FactoryCounters {
    opened: AtomicU64,
    closed: AtomicU64,
    fail_opens: AtomicBool,
}

impl FactoryCounters {
    /// Resources opened.
    #[must_use]
    pub fn opened(&self) -> u64 {
        self.opened.load(Ordering::SeqCst)
    }

    /// Resources closed through the factory.
    #[must_use]
    pub fn closed(&self) -> u64 {
        self.closed.load(Ordering::SeqCst)
    }

    /// Make subsequent opens fail (or succeed again).
    pub fn set_fail_opens(&self, fail: bool) {
        self.fail_opens.store(fail, Ordering::SeqCst);
    }
}

/// Factory for [`MemoryResource`]s with optional open latency.
#[derive(Debug, Default, Clone)]
pub struct InMemoryResourceFactory {
    counters: Arc<FactoryCounters>,
    open_latency: Duration,
}

impl InMemoryResourceFactory {
    /// Factory that opens instantly.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every open by `latency`.
    #[must_use]
    pub const fn with_open_latency(mut self, latency: Duration) -> Self {
        self.open_latency = latency;
        self
    }

    /// Shared counters.
    #[must_use]
    pub fn counters(&self) -> Arc<FactoryCounters> {
        Arc::clone(&self.counters)
    }
}

#[async_trait]
impl ResourceFactory for InMemoryResourceFactory {
    type Resource = MemoryResource;

    async fn open(&self, kind: ResourceKind) -> Result<MemoryResource, OperationError> {
        if !self.open_latency.is_zero() {
            tokio::time::sleep(self.open_latency).await;
        }
        if self.counters.fail_opens.load(Ordering::SeqCst) {
            return Err(OperationError::server(format!("cannot open {kind}")));
        }
        let serial = self.counters.opened.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(kind = %kind, serial, "resource opened");
        Ok(MemoryResource {
            kind,
            serial,
            uses: 0,
        })
    }

    async fn close(&self, kind: ResourceKind, resource: MemoryResource) {
        self.counters.closed.fetch_add(1, Ordering::SeqCst);
        debug!(kind = %kind, serial = resource.serial, "resource closed");
    }
}
