//! Work items, per-item outcomes and ordered batch results.

use serde::{Deserialize, Serialize};

use crate::core::{Deadline, ErrorContext};
use crate::util::serde::{CorrelationId, ResourceKind, WorkItemId};

/// One unit of requested work. Immutable once built.
#[derive(Debug, Clone)]
pub struct WorkItem<P> {
    id: WorkItemId,
    operation: P,
    requires: Vec<ResourceKind>,
    deadline: Deadline,
    correlation_id: Option<CorrelationId>,
}

impl<P> WorkItem<P> {
    /// Create a work item that needs no pooled resources.
    pub fn new(id: impl Into<WorkItemId>, operation: P, deadline: Deadline) -> Self {
        Self {
            id: id.into(),
            operation,
            requires: Vec::new(),
            deadline,
            correlation_id: None,
        }
    }

    /// Carry an upstream request id instead of a freshly generated one.
    #[must_use]
    pub fn with_correlation_id(mut self, correlation_id: CorrelationId) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    /// Require a lease of `kind` while the operation runs.
    #[must_use]
    pub fn requiring(mut self, kind: ResourceKind) -> Self {
        self.requires.push(kind);
        self
    }

    /// Identifier supplied by the caller.
    #[must_use]
    pub const fn id(&self) -> &WorkItemId {
        &self.id
    }

    /// Operation descriptor.
    #[must_use]
    pub const fn operation(&self) -> &P {
        &self.operation
    }

    /// Resource kinds leased before the operation runs, in acquisition order.
    #[must_use]
    pub fn requires(&self) -> &[ResourceKind] {
        &self.requires
    }

    /// Absolute deadline for the whole item.
    #[must_use]
    pub const fn deadline(&self) -> Deadline {
        self.deadline
    }

    /// Correlation id supplied by the caller, if any.
    #[must_use]
    pub const fn correlation_id(&self) -> Option<CorrelationId> {
        self.correlation_id
    }
}

/// Final result of one work item. Exactly one variant per item.
#[derive(Debug, Clone)]
pub enum TaskOutcome<T> {
    /// The operation finished and produced a value.
    Success(T),
    /// The operation or one of its prerequisites failed.
    Failure(ErrorContext),
    /// The item's deadline elapsed while waiting or running.
    TimedOut(ErrorContext),
    /// The caller cancelled the item.
    Cancelled(ErrorContext),
}

/// Discriminant of a [`TaskOutcome`] without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    /// See [`TaskOutcome::Success`].
    Success,
    /// See [`TaskOutcome::Failure`].
    Failure,
    /// See [`TaskOutcome::TimedOut`].
    TimedOut,
    /// See [`TaskOutcome::Cancelled`].
    Cancelled,
}

impl OutcomeKind {
    /// Lowercase label used in logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::TimedOut => "timed_out",
            Self::Cancelled => "cancelled",
        }
    }
}

impl<T> TaskOutcome<T> {
    /// Classify an error chain by its root cause.
    ///
    /// Deadline expiries become `TimedOut`, cancellation becomes `Cancelled`,
    /// everything else is a `Failure`.
    #[must_use]
    pub fn from_error(context: ErrorContext) -> Self {
        let root = context.root_cause();
        if root.is_deadline_expiry() {
            Self::TimedOut(context)
        } else if matches!(root, crate::core::OrchestratorError::Cancelled) {
            Self::Cancelled(context)
        } else {
            Self::Failure(context)
        }
    }

    /// Which variant this is.
    #[must_use]
    pub const fn kind(&self) -> OutcomeKind {
        match self {
            Self::Success(_) => OutcomeKind::Success,
            Self::Failure(_) => OutcomeKind::Failure,
            Self::TimedOut(_) => OutcomeKind::TimedOut,
            Self::Cancelled(_) => OutcomeKind::Cancelled,
        }
    }

    /// True for `Success`.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// True for `TimedOut`.
    #[must_use]
    pub const fn is_timed_out(&self) -> bool {
        matches!(self, Self::TimedOut(_))
    }

    /// True for `Cancelled`.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }

    /// True for `Failure`.
    #[must_use]
    pub const fn is_failure(&self) -> bool {
        matches!(self, Self::Failure(_))
    }

    /// The success value, if any.
    #[must_use]
    pub const fn value(&self) -> Option<&T> {
        match self {
            Self::Success(value) => Some(value),
            _ => None,
        }
    }

    /// The error chain for every non-success variant.
    #[must_use]
    pub const fn error(&self) -> Option<&ErrorContext> {
        match self {
            Self::Success(_) => None,
            Self::Failure(ctx) | Self::TimedOut(ctx) | Self::Cancelled(ctx) => Some(ctx),
        }
    }

    /// Convert into a `Result`, keeping the error chain.
    ///
    /// # Errors
    ///
    /// Returns the chain for every non-success variant.
    pub fn into_result(self) -> Result<T, ErrorContext> {
        match self {
            Self::Success(value) => Ok(value),
            Self::Failure(ctx) | Self::TimedOut(ctx) | Self::Cancelled(ctx) => Err(ctx),
        }
    }

    /// Add a layer to the error chain of a non-success outcome.
    #[must_use]
    pub fn context(self, message: impl Into<String>) -> Self {
        match self {
            Self::Success(value) => Self::Success(value),
            Self::Failure(ctx) => Self::Failure(ctx.context(message)),
            Self::TimedOut(ctx) => Self::TimedOut(ctx.context(message)),
            Self::Cancelled(ctx) => Self::Cancelled(ctx.context(message)),
        }
    }

    /// Map the success value.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> TaskOutcome<U> {
        match self {
            Self::Success(value) => TaskOutcome::Success(f(value)),
            Self::Failure(ctx) => TaskOutcome::Failure(ctx),
            Self::TimedOut(ctx) => TaskOutcome::TimedOut(ctx),
            Self::Cancelled(ctx) => TaskOutcome::Cancelled(ctx),
        }
    }
}

/// Outcome counts for a batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    /// Items that succeeded.
    pub succeeded: usize,
    /// Items that failed.
    pub failed: usize,
    /// Items that timed out.
    pub timed_out: usize,
    /// Items that were cancelled.
    pub cancelled: usize,
}

/// Outcomes of a batch in submission order.
#[derive(Debug, Clone)]
pub struct BatchResult<T> {
    entries: Vec<(WorkItemId, TaskOutcome<T>)>,
}

impl<T> BatchResult<T> {
    /// Build from entries already in submission order.
    #[must_use]
    pub const fn new(entries: Vec<(WorkItemId, TaskOutcome<T>)>) -> Self {
        Self { entries }
    }

    /// Number of items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the batch was empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate entries in submission order.
    pub fn iter(&self) -> impl Iterator<Item = &(WorkItemId, TaskOutcome<T>)> {
        self.entries.iter()
    }

    /// Outcome of the item with `id`.
    #[must_use]
    pub fn get(&self, id: &WorkItemId) -> Option<&TaskOutcome<T>> {
        self.entries
            .iter()
            .find(|(entry_id, _)| entry_id == id)
            .map(|(_, outcome)| outcome)
    }

    /// Ids in submission order.
    #[must_use]
    pub fn ids(&self) -> Vec<&WorkItemId> {
        self.entries.iter().map(|(id, _)| id).collect()
    }

    /// Count outcomes per variant.
    #[must_use]
    pub fn summary(&self) -> BatchSummary {
        self.entries
            .iter()
            .fold(BatchSummary::default(), |mut summary, (_, outcome)| {
                match outcome.kind() {
                    OutcomeKind::Success => summary.succeeded += 1,
                    OutcomeKind::Failure => summary.failed += 1,
                    OutcomeKind::TimedOut => summary.timed_out += 1,
                    OutcomeKind::Cancelled => summary.cancelled += 1,
                }
                summary
            })
    }

    /// Consume into the ordered entries.
    #[must_use]
    pub fn into_entries(self) -> Vec<(WorkItemId, TaskOutcome<T>)> {
        self.entries
    }
}

impl<T> IntoIterator for BatchResult<T> {
    type Item = (WorkItemId, TaskOutcome<T>);
    type IntoIter = std::vec::IntoIter<Self::Item>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{OperationError, OrchestratorError};
    use crate::util::serde::CorrelationId;
    use std::time::Duration;

    #[test]
    fn classifies_by_root_cause() {
        let id = CorrelationId::new();
        let timed_out: TaskOutcome<()> = TaskOutcome::from_error(ErrorContext::wrap(
            OrchestratorError::AdmissionTimeout {
                waited: Duration::from_millis(5),
            },
            "not admitted",
            id,
        ));
        assert!(timed_out.is_timed_out());

        let cancelled: TaskOutcome<()> =
            TaskOutcome::from_error(ErrorContext::wrap(OrchestratorError::Cancelled, "stop", id));
        assert!(cancelled.is_cancelled());

        let failed: TaskOutcome<()> = TaskOutcome::from_error(ErrorContext::wrap(
            OperationError::server("read error"),
            "load",
            id,
        ));
        assert!(failed.is_failure());
        assert!(failed.error().is_some());
    }

    #[test]
    fn summary_counts_each_variant() {
        let id = CorrelationId::new();
        let result = BatchResult::new(vec![
            (WorkItemId::from("a"), TaskOutcome::Success(1)),
            (WorkItemId::from("b"), TaskOutcome::Success(2)),
            (
                WorkItemId::from("c"),
                TaskOutcome::Cancelled(ErrorContext::wrap(OrchestratorError::Cancelled, "x", id)),
            ),
        ]);
        let summary = result.summary();
        assert_eq!(summary.succeeded, 2);
        assert_eq!(summary.cancelled, 1);
        assert_eq!(result.get(&WorkItemId::from("b")).and_then(TaskOutcome::value), Some(&2));
    }
}
