//! Orchestration core: admission, resource leasing, timed execution and batches.

pub mod admission;
pub mod context;
pub mod cpu_pool;
pub mod deadline;
pub mod error;
pub mod executor;
pub mod orchestrator;
pub mod outcome;
pub mod resource_pool;
pub mod runner;

pub use admission::{AdmissionController, AdmissionStats, Permit, MAX_ADMISSION_CAPACITY};
pub use context::{ErrorCause, ErrorContext, ErrorReport, Trace};
pub use cpu_pool::{CpuPool, CpuPoolStats};
pub use deadline::Deadline;
pub use error::{AppResult, FailureClass, OperationError, OrchestratorError};
pub use executor::{OperationExecutor, ResourceFactory};
pub use orchestrator::{TaskOrchestrator, DEFAULT_LEASE_BUDGET_RATIO};
pub use outcome::{BatchResult, BatchSummary, OutcomeKind, TaskOutcome, WorkItem};
pub use resource_pool::{
    KindStats, Lease, LeaseId, PoolShutdownReport, PoolStats, ResourcePool, MAX_KIND_CAPACITY,
};
pub use runner::{TaskContext, TimedRunner};
