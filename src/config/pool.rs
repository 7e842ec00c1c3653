//! Admission, pool, task and CPU pool configuration structures.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::{MAX_ADMISSION_CAPACITY, MAX_KIND_CAPACITY};
use crate::util::serde::{duration_millis, ResourceKind};

/// Admission controller configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AdmissionConfig {
    /// Maximum number of tasks admitted at the same time.
    pub max_concurrent: usize,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self { max_concurrent: 4 }
    }
}

impl AdmissionConfig {
    /// Validate admission values.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_concurrent == 0 {
            return Err("admission.max_concurrent must be greater than 0".into());
        }
        if self.max_concurrent > MAX_ADMISSION_CAPACITY {
            return Err(format!(
                "admission.max_concurrent must be at most {MAX_ADMISSION_CAPACITY}"
            ));
        }
        Ok(())
    }
}

/// Resource pool configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PoolConfig {
    /// Maximum simultaneous leases per resource kind.
    pub capacity: HashMap<ResourceKind, usize>,
    /// Hard limit on waiting for outstanding leases at shutdown.
    #[serde(with = "duration_millis")]
    pub shutdown_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            capacity: HashMap::from([
                (ResourceKind::DbSession, 4),
                (ResourceKind::HttpConnection, 8),
            ]),
            shutdown_timeout: Duration::from_secs(10),
        }
    }
}

impl PoolConfig {
    /// Validate pool values. A capacity of zero disables a kind.
    pub fn validate(&self) -> Result<(), String> {
        if self.capacity.values().all(|&c| c == 0) {
            return Err("pool.capacity must provision at least one resource kind".into());
        }
        if let Some((kind, _)) = self.capacity.iter().find(|(_, c)| **c > MAX_KIND_CAPACITY) {
            return Err(format!(
                "pool.capacity.{kind} must be at most {MAX_KIND_CAPACITY}"
            ));
        }
        if self.shutdown_timeout.is_zero() {
            return Err("pool.shutdown_timeout must be greater than 0".into());
        }
        Ok(())
    }
}

/// Per-task execution configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TaskConfig {
    /// Deadline applied to submissions that do not carry their own.
    #[serde(with = "duration_millis")]
    pub default_deadline: Duration,
    /// Share of the remaining budget spent waiting for leases.
    pub lease_budget_ratio: f64,
    /// How long an interrupted operation may take to stop before it is dropped.
    #[serde(with = "duration_millis")]
    pub cancel_grace: Duration,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            default_deadline: Duration::from_secs(30),
            lease_budget_ratio: 0.5,
            cancel_grace: Duration::from_millis(100),
        }
    }
}

impl TaskConfig {
    /// Validate task values.
    pub fn validate(&self) -> Result<(), String> {
        if self.default_deadline.is_zero() {
            return Err("task.default_deadline must be greater than 0".into());
        }
        if !(self.lease_budget_ratio > 0.0 && self.lease_budget_ratio <= 1.0) {
            return Err("task.lease_budget_ratio must be in (0, 1]".into());
        }
        Ok(())
    }
}

/// CPU offload pool configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CpuConfig {
    /// Number of worker threads.
    pub worker_count: usize,
    /// Jobs that may wait in the queue before submissions are refused.
    pub max_queue_depth: usize,
    /// Stack size for each worker thread in bytes.
    pub thread_stack_size: usize,
    /// Time granted to each worker to exit at shutdown.
    #[serde(with = "duration_millis")]
    pub join_timeout: Duration,
}

impl Default for CpuConfig {
    fn default() -> Self {
        Self {
            worker_count: num_cpus::get().max(1),
            max_queue_depth: 256,
            thread_stack_size: 2 * 1024 * 1024,
            join_timeout: Duration::from_secs(2),
        }
    }
}

impl CpuConfig {
    /// Set the number of worker threads.
    #[must_use]
    pub const fn with_worker_count(mut self, count: usize) -> Self {
        self.worker_count = count;
        self
    }

    /// Set the queue depth.
    #[must_use]
    pub const fn with_max_queue_depth(mut self, depth: usize) -> Self {
        self.max_queue_depth = depth;
        self
    }

    /// Set the per-worker join timeout used at shutdown.
    #[must_use]
    pub const fn with_join_timeout(mut self, timeout: Duration) -> Self {
        self.join_timeout = timeout;
        self
    }

    /// Validate CPU pool values.
    pub fn validate(&self) -> Result<(), String> {
        if self.worker_count == 0 {
            return Err("cpu.worker_count must be greater than 0".into());
        }
        if self.max_queue_depth == 0 {
            return Err("cpu.max_queue_depth must be greater than 0".into());
        }
        if self.thread_stack_size < 64 * 1024 {
            return Err("cpu.thread_stack_size must be at least 64 KiB".into());
        }
        Ok(())
    }
}
