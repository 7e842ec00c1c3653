//! Boundary request/response models and the functions that serve them.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::{
    BatchResult, BatchSummary, CpuPool, CpuPoolStats, Deadline, ErrorReport, OperationExecutor,
    OrchestratorError, OutcomeKind, ResourceFactory, TaskOrchestrator, WorkItem,
};
use crate::util::serde::{CorrelationId, ResourceKind, WorkItemId};

/// One item of a batch request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemSubmission<P> {
    /// Caller-chosen id, unique within the batch.
    pub id: WorkItemId,
    /// Operation descriptor.
    pub operation: P,
    /// Resource kinds to lease before running.
    #[serde(default)]
    pub requires: Vec<ResourceKind>,
    /// Deadline budget in milliseconds; the configured default when absent.
    #[serde(default)]
    pub deadline_ms: Option<u64>,
    /// Upstream request id threaded through logs and error chains.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<CorrelationId>,
}

/// Batch request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSubmission<P> {
    /// Items in submission order.
    pub items: Vec<ItemSubmission<P>>,
}

impl<P> BatchSubmission<P> {
    /// Convert to work items, starting every deadline now.
    ///
    /// # Errors
    ///
    /// [`OrchestratorError::InvalidDeadline`] for a zero budget, whether explicit or
    /// the default.
    pub fn into_work_items(self, default_deadline: Duration) -> Result<Vec<WorkItem<P>>, OrchestratorError> {
        self.items
            .into_iter()
            .map(|item| {
                let budget = item
                    .deadline_ms
                    .map_or(default_deadline, Duration::from_millis);
                let deadline = Deadline::from_budget(budget).map_err(|_| {
                    OrchestratorError::InvalidDeadline(format!(
                        "work item `{}` has an empty deadline budget",
                        item.id
                    ))
                })?;
                let mut work = WorkItem::new(item.id, item.operation, deadline);
                if let Some(correlation_id) = item.correlation_id {
                    work = work.with_correlation_id(correlation_id);
                }
                Ok(item.requires.into_iter().fold(work, WorkItem::requiring))
            })
            .collect()
    }
}

/// Outcome of one item in a [`BatchReport`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemReport<T> {
    /// Item id.
    pub id: WorkItemId,
    /// Outcome variant.
    pub outcome: OutcomeKind,
    /// Value on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<T>,
    /// Error chain otherwise.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorReport>,
}

/// Serialisable view of a [`BatchResult`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport<T> {
    /// Items in submission order.
    pub items: Vec<ItemReport<T>>,
    /// Counts per outcome.
    pub summary: BatchSummary,
}

impl<T> From<BatchResult<T>> for BatchReport<T> {
    fn from(result: BatchResult<T>) -> Self {
        let summary = result.summary();
        let items = result
            .into_iter()
            .map(|(id, outcome)| {
                let kind = outcome.kind();
                let error = outcome.error().map(crate::core::ErrorContext::report);
                ItemReport {
                    id,
                    outcome: kind,
                    value: outcome.into_result().ok(),
                    error,
                }
            })
            .collect();
        Self { items, summary }
    }
}

/// Health snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Health {
    /// Accepting work.
    pub ok: bool,
    /// Shutdown has begun.
    pub shutting_down: bool,
    /// Admitted tasks currently running.
    pub in_flight: usize,
    /// Highest number of tasks admitted at once.
    pub high_water: usize,
    /// Resource leases currently held.
    pub leased: usize,
    /// CPU pool counters, when a pool is running.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<CpuPoolStats>,
}

/// Convert `submission` and run it as one batch.
///
/// # Errors
///
/// Batch-level rejections only: invalid deadlines, duplicate ids, shutdown.
pub async fn submit_batch<F, E>(
    orchestrator: &TaskOrchestrator<F, E>,
    submission: BatchSubmission<E::Operation>,
    default_deadline: Duration,
) -> Result<BatchReport<E::Output>, OrchestratorError>
where
    F: ResourceFactory,
    E: OperationExecutor<Resource = F::Resource>,
{
    let items = submission.into_work_items(default_deadline)?;
    orchestrator.run_batch(items).await.map(BatchReport::from)
}

/// Report in-flight and leased counts.
pub fn health<F, E>(orchestrator: &TaskOrchestrator<F, E>, cpu: Option<&CpuPool>) -> Health
where
    F: ResourceFactory,
    E: OperationExecutor<Resource = F::Resource>,
{
    let admission = orchestrator.admission().stats();
    let shutting_down = orchestrator.is_shutting_down();
    Health {
        ok: !shutting_down,
        shutting_down,
        in_flight: admission.in_flight,
        high_water: admission.high_water,
        leased: orchestrator.pool().stats().leased(),
        cpu: cpu.map(CpuPool::stats),
    }
}
