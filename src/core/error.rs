//! Error types for orchestration operations.

use std::time::Duration;

use thiserror::Error;

use crate::util::serde::{ResourceKind, WorkItemId};

/// Which side of the service boundary a failure is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    /// Caused by the request: bad input, missing permissions, unknown signal.
    Client,
    /// Caused by infrastructure or the external library.
    Server,
    /// The operation stopped because it observed cancellation or its deadline.
    Interrupted,
}

/// Error returned by a dispatched operation.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct OperationError {
    /// Attribution of the failure.
    pub class: FailureClass,
    /// Human-readable description.
    pub message: String,
    /// Optional structured context for logs and reports.
    pub payload: Option<serde_json::Value>,
    /// Underlying error, if any.
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl OperationError {
    fn new(class: FailureClass, message: impl Into<String>) -> Self {
        Self {
            class,
            message: message.into(),
            payload: None,
            source: None,
        }
    }

    /// Failure caused by the request (validation, authorization, missing signal).
    pub fn client(message: impl Into<String>) -> Self {
        Self::new(FailureClass::Client, message)
    }

    /// Failure inside the infrastructure or the external data library.
    pub fn server(message: impl Into<String>) -> Self {
        Self::new(FailureClass::Server, message)
    }

    /// The operation noticed cancellation or deadline expiry and stopped.
    #[must_use]
    pub fn interrupted() -> Self {
        Self::new(FailureClass::Interrupted, "operation interrupted")
    }

    /// Attach a structured payload.
    #[must_use]
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Attach the underlying error.
    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }
}

/// Errors produced by the orchestration core.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// No concurrency slot freed before the deadline.
    #[error("admission timed out after {waited:?}")]
    AdmissionTimeout {
        /// Time spent waiting for a slot.
        waited: Duration,
    },
    /// The pool cannot provide this kind right now and waiting would not help.
    #[error("pool exhausted for {kind}")]
    PoolExhausted {
        /// Requested resource kind.
        kind: ResourceKind,
    },
    /// No resource of the kind freed before the deadline.
    #[error("timed out waiting {waited:?} for a {kind} lease")]
    PoolTimeout {
        /// Requested resource kind.
        kind: ResourceKind,
        /// Time spent waiting for a lease.
        waited: Duration,
    },
    /// Acquire attempted after pool shutdown began.
    #[error("pool closed for {kind}")]
    PoolClosed {
        /// Requested resource kind.
        kind: ResourceKind,
    },
    /// The dispatched work itself failed.
    #[error("operation failed: {0}")]
    OperationFailure(#[from] OperationError),
    /// The operation exceeded its deadline.
    #[error("operation timed out after {after:?}")]
    TimedOut {
        /// Time the operation ran before it was stopped.
        after: Duration,
    },
    /// The caller cancelled the work.
    #[error("cancelled")]
    Cancelled,
    /// The orchestrator no longer accepts work.
    #[error("shutting down")]
    ShuttingDown,
    /// A batch contained the same work item id twice.
    #[error("duplicate work item id `{0}` in batch")]
    DuplicateWorkItem(WorkItemId),
    /// A call arrived without a usable deadline.
    #[error("invalid deadline: {0}")]
    InvalidDeadline(String),
    /// Configuration failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// Internal failure (worker thread spawn, channel closed, ...).
    #[error("internal error: {0}")]
    Internal(String),
}

impl OrchestratorError {
    /// True when the failure is attributed to the caller's request.
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        match self {
            Self::OperationFailure(err) => err.class == FailureClass::Client,
            Self::DuplicateWorkItem(_) | Self::InvalidDeadline(_) => true,
            _ => false,
        }
    }

    /// True when the failure means a deadline elapsed while the item waited or ran.
    #[must_use]
    pub const fn is_deadline_expiry(&self) -> bool {
        matches!(self, Self::AdmissionTimeout { .. } | Self::TimedOut { .. })
    }

    /// Stable short name used in logs and reports.
    #[must_use]
    pub const fn kind_name(&self) -> &'static str {
        match self {
            Self::AdmissionTimeout { .. } => "admission_timeout",
            Self::PoolExhausted { .. } => "pool_exhausted",
            Self::PoolTimeout { .. } => "pool_timeout",
            Self::PoolClosed { .. } => "pool_closed",
            Self::OperationFailure(_) => "operation_failure",
            Self::TimedOut { .. } => "timed_out",
            Self::Cancelled => "cancelled",
            Self::ShuttingDown => "shutting_down",
            Self::DuplicateWorkItem(_) => "duplicate_work_item",
            Self::InvalidDeadline(_) => "invalid_deadline",
            Self::InvalidConfig(_) => "invalid_config",
            Self::Internal(_) => "internal",
        }
    }
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;
