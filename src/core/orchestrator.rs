//! Batch fan-out: admission, leases, timed execution and ordered collection.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::core::{
    AdmissionController, BatchResult, ErrorContext, OperationExecutor, OrchestratorError, Permit,
    ResourceFactory, ResourcePool, TaskOutcome, TimedRunner, WorkItem,
};
use crate::util::serde::{CorrelationId, WorkItemId};

/// Share of an item's remaining budget spent waiting for leases by default.
pub const DEFAULT_LEASE_BUDGET_RATIO: f64 = 0.5;

/// Runs batches of work items with bounded concurrency.
///
/// Every item is admitted against its own deadline in submission order, leases
/// the resource kinds it requires under a sub-deadline, then runs through the
/// [`TimedRunner`]. Leases and the admission permit are owned by the item's task
/// and released on every exit path. One item's failure never affects another.
pub struct TaskOrchestrator<F, E>
where
    F: ResourceFactory,
    E: OperationExecutor<Resource = F::Resource>,
{
    admission: Arc<AdmissionController>,
    pool: ResourcePool<F>,
    runner: TimedRunner,
    executor: E,
    lease_budget_ratio: f64,
    shutdown: CancellationToken,
}

impl<F, E> std::fmt::Debug for TaskOrchestrator<F, E>
where
    F: ResourceFactory,
    E: OperationExecutor<Resource = F::Resource>,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskOrchestrator")
            .field("admission", &self.admission)
            .field("pool", &self.pool)
            .field("lease_budget_ratio", &self.lease_budget_ratio)
            .finish_non_exhaustive()
    }
}

impl<F, E> TaskOrchestrator<F, E>
where
    F: ResourceFactory,
    E: OperationExecutor<Resource = F::Resource>,
{
    /// Assemble an orchestrator from its parts.
    pub fn new(
        admission: Arc<AdmissionController>,
        pool: ResourcePool<F>,
        runner: TimedRunner,
        executor: E,
    ) -> Self {
        Self {
            admission,
            pool,
            runner,
            executor,
            lease_budget_ratio: DEFAULT_LEASE_BUDGET_RATIO,
            shutdown: CancellationToken::new(),
        }
    }

    /// Share of the remaining budget an item may spend acquiring leases.
    #[must_use]
    pub fn with_lease_budget_ratio(mut self, ratio: f64) -> Self {
        self.lease_budget_ratio = ratio.clamp(0.0, 1.0);
        self
    }

    /// Run `items` concurrently and return their outcomes in submission order.
    ///
    /// # Errors
    ///
    /// Only batch-level rejections are errors:
    /// - [`OrchestratorError::ShuttingDown`] once shutdown has begun
    /// - [`OrchestratorError::DuplicateWorkItem`] if two items share an id
    ///
    /// # Panics
    ///
    /// Re-raises a panic from any item's task.
    pub async fn run_batch(
        &self,
        items: Vec<WorkItem<E::Operation>>,
    ) -> Result<BatchResult<E::Output>, OrchestratorError> {
        self.dispatch(items, None).await
    }

    /// Like [`run_batch`](Self::run_batch), also stopping when `cancel` fires.
    ///
    /// Items not yet finished when `cancel` fires end as `Cancelled`.
    ///
    /// # Errors
    ///
    /// As for [`run_batch`](Self::run_batch).
    pub async fn run_batch_with_cancel(
        &self,
        items: Vec<WorkItem<E::Operation>>,
        cancel: &CancellationToken,
    ) -> Result<BatchResult<E::Output>, OrchestratorError> {
        self.dispatch(items, Some(cancel)).await
    }

    /// Cancel every running batch. New batches are rejected afterwards.
    pub fn cancel_all(&self) {
        self.shutdown.cancel();
    }

    /// Whether [`cancel_all`](Self::cancel_all) was called or admission is draining.
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled() || self.admission.is_closing()
    }

    /// Admission controller shared with the runtime.
    #[must_use]
    pub const fn admission(&self) -> &Arc<AdmissionController> {
        &self.admission
    }

    /// Resource pool used for leases.
    #[must_use]
    pub const fn pool(&self) -> &ResourcePool<F> {
        &self.pool
    }

    async fn dispatch(
        &self,
        items: Vec<WorkItem<E::Operation>>,
        external: Option<&CancellationToken>,
    ) -> Result<BatchResult<E::Output>, OrchestratorError> {
        if self.is_shutting_down() {
            return Err(OrchestratorError::ShuttingDown);
        }
        let mut seen = HashSet::with_capacity(items.len());
        for item in &items {
            if !seen.insert(item.id()) {
                return Err(OrchestratorError::DuplicateWorkItem(item.id().clone()));
            }
        }

        let batch_token = self.shutdown.child_token();
        // Dropping the batch future cancels its items; JoinSet aborts their tasks.
        let _batch_guard = batch_token.clone().drop_guard();
        if let Some(external) = external {
            link(external.clone(), batch_token.clone());
        }

        let ids: Vec<WorkItemId> = items.iter().map(|item| item.id().clone()).collect();
        let correlations: Vec<CorrelationId> = items
            .iter()
            .map(|item| item.correlation_id().unwrap_or_default())
            .collect();
        let mut slots: Vec<Option<TaskOutcome<E::Output>>> = ids.iter().map(|_| None).collect();
        let mut tasks = JoinSet::new();

        info!(items = ids.len(), "batch started");

        for (index, item) in items.into_iter().enumerate() {
            let correlation_id = correlations[index];
            let span = info_span!(
                "work_item",
                item_id = %item.id(),
                correlation_id = %correlation_id,
                index
            );

            let admitted = tokio::select! {
                biased;
                () = batch_token.cancelled() => Err(OrchestratorError::Cancelled),
                result = self.admission.try_admit(item.deadline()) => result,
            };

            match admitted {
                Ok(permit) => {
                    let job = ItemJob {
                        item,
                        permit,
                        pool: self.pool.clone(),
                        runner: self.runner.clone(),
                        executor: self.executor.clone(),
                        token: batch_token.clone(),
                        lease_budget_ratio: self.lease_budget_ratio,
                        correlation_id,
                    };
                    tasks.spawn(async move { (index, job.run().await) }.instrument(span));
                }
                Err(err) => {
                    let _entered = span.enter();
                    let outcome = TaskOutcome::from_error(ErrorContext::wrap(
                        err,
                        "waiting for admission",
                        correlation_id,
                    ))
                    .context(format!("work item `{}`", item.id()));
                    report(&outcome);
                    slots[index] = Some(outcome);
                }
            }
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, outcome)) => slots[index] = Some(outcome),
                Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
                Err(err) => warn!(error = %err, "work item task aborted"),
            }
        }

        let entries = ids
            .into_iter()
            .zip(slots)
            .zip(correlations)
            .map(|((id, slot), correlation_id)| {
                let outcome = slot.unwrap_or_else(|| {
                    TaskOutcome::Cancelled(ErrorContext::wrap(
                        OrchestratorError::Cancelled,
                        format!("work item `{id}` never reported"),
                        correlation_id,
                    ))
                });
                (id, outcome)
            })
            .collect();
        let result = BatchResult::new(entries);
        let summary = result.summary();
        info!(
            succeeded = summary.succeeded,
            failed = summary.failed,
            timed_out = summary.timed_out,
            cancelled = summary.cancelled,
            "batch finished"
        );
        Ok(result)
    }
}

/// Forward `external` cancellation into `batch` until the batch ends.
fn link(external: CancellationToken, batch: CancellationToken) {
    if external.is_cancelled() {
        batch.cancel();
        return;
    }
    tokio::spawn(async move {
        tokio::select! {
            () = external.cancelled() => batch.cancel(),
            () = batch.cancelled() => {}
        }
    });
}

/// Everything one spawned item owns.
struct ItemJob<F, E>
where
    F: ResourceFactory,
    E: OperationExecutor<Resource = F::Resource>,
{
    item: WorkItem<E::Operation>,
    permit: Permit,
    pool: ResourcePool<F>,
    runner: TimedRunner,
    executor: E,
    token: CancellationToken,
    lease_budget_ratio: f64,
    correlation_id: CorrelationId,
}

impl<F, E> ItemJob<F, E>
where
    F: ResourceFactory,
    E: OperationExecutor<Resource = F::Resource>,
{
    async fn run(self) -> TaskOutcome<E::Output> {
        let Self {
            item,
            permit,
            pool,
            runner,
            executor,
            token,
            lease_budget_ratio,
            correlation_id,
        } = self;

        let lease_deadline = item.deadline().carve(lease_budget_ratio);
        let mut leases = Vec::with_capacity(item.requires().len());
        let mut failed = None;
        for &kind in item.requires() {
            let acquired = tokio::select! {
                biased;
                () = token.cancelled() => Err(OrchestratorError::Cancelled),
                result = pool.acquire(kind, lease_deadline) => result,
            };
            match acquired {
                Ok(lease) => leases.push(lease),
                Err(err) => {
                    failed = Some(TaskOutcome::from_error(ErrorContext::wrap(
                        err,
                        format!("acquiring {kind} lease"),
                        correlation_id,
                    )));
                    break;
                }
            }
        }

        let outcome = match failed {
            Some(outcome) => outcome,
            None => {
                debug!(leases = leases.len(), "running operation");
                let operation = item.operation();
                let leased = &mut leases;
                let executor = &executor;
                runner
                    .run(
                        move |ctx| executor.execute(operation, leased, ctx),
                        item.deadline(),
                        &token,
                        correlation_id,
                    )
                    .await
            }
        };

        drop(leases);
        drop(permit);

        let outcome = outcome.context(format!("work item `{}`", item.id()));
        report(&outcome);
        outcome
    }
}

fn report<T>(outcome: &TaskOutcome<T>) {
    match outcome.error() {
        None => info!(outcome = outcome.kind().as_str(), "work item finished"),
        Some(chain) => warn!(
            outcome = outcome.kind().as_str(),
            class = ?chain.class(),
            error = %chain.render(),
            "work item finished"
        ),
    }
}
