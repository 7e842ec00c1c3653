//! Deadline and cancellation enforcement around a single operation.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::core::{
    CpuPool, Deadline, ErrorContext, FailureClass, OperationError, OrchestratorError, TaskOutcome,
};
use crate::util::serde::CorrelationId;

/// Handle given to a running operation.
///
/// Carries the item's deadline and a cancellation token that fires when the
/// caller cancels or the runner gives up on the deadline. Operations check it at
/// their suspension points.
#[derive(Debug, Clone)]
pub struct TaskContext {
    deadline: Deadline,
    token: CancellationToken,
    correlation_id: CorrelationId,
    cpu: Option<Arc<CpuPool>>,
}

impl TaskContext {
    /// Build a context. Normally done by [`TimedRunner`].
    #[must_use]
    pub const fn new(deadline: Deadline, token: CancellationToken, correlation_id: CorrelationId) -> Self {
        Self {
            deadline,
            token,
            correlation_id,
            cpu: None,
        }
    }

    /// Route [`offload`](Self::offload) through `pool`.
    #[must_use]
    pub fn with_cpu_pool(mut self, pool: Arc<CpuPool>) -> Self {
        self.cpu = Some(pool);
        self
    }

    /// Deadline of the work item.
    #[must_use]
    pub const fn deadline(&self) -> Deadline {
        self.deadline
    }

    /// Time left before the deadline.
    #[must_use]
    pub fn remaining(&self) -> Duration {
        self.deadline.remaining()
    }

    /// Correlation id of the work item.
    #[must_use]
    pub const fn correlation_id(&self) -> CorrelationId {
        self.correlation_id
    }

    /// The cancellation token observed by this operation.
    #[must_use]
    pub const fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// True once cancellation was requested or the deadline passed.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled() || self.deadline.is_elapsed()
    }

    /// Resolves when cancellation is requested.
    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }

    /// Fail fast if the operation should stop.
    ///
    /// # Errors
    ///
    /// [`OperationError::interrupted`] after cancellation or deadline expiry.
    pub fn checkpoint(&self) -> Result<(), OperationError> {
        if self.is_cancelled() {
            Err(OperationError::interrupted())
        } else {
            Ok(())
        }
    }

    /// Await one I/O step, racing it against cancellation and the deadline.
    ///
    /// # Errors
    ///
    /// [`OperationError::interrupted`] if cancellation or the deadline wins. The step
    /// future is dropped in that case.
    pub async fn suspend<T>(&self, step: impl Future<Output = T>) -> Result<T, OperationError> {
        tokio::select! {
            biased;
            () = self.token.cancelled() => Err(OperationError::interrupted()),
            () = tokio::time::sleep_until(self.deadline.instant()) => Err(OperationError::interrupted()),
            value = step => Ok(value),
        }
    }

    /// Run a CPU-bound closure off the async workers.
    ///
    /// Uses the CPU pool when one is configured and tokio's blocking pool otherwise.
    /// The closure itself cannot be interrupted; only the wait for it is.
    ///
    /// # Errors
    ///
    /// [`OperationError::interrupted`] on cancellation or deadline, a server error if
    /// the job could not run or panicked.
    pub async fn offload<T, F>(&self, f: F) -> Result<T, OperationError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let job = async {
            match &self.cpu {
                Some(pool) => pool.run(f).await,
                None => tokio::task::spawn_blocking(f)
                    .await
                    .map_err(|e| OperationError::server("blocking job failed").with_source(e)),
            }
        };
        self.suspend(job).await?
    }
}

enum Step<T> {
    Finished(Result<T, OperationError>),
    Cancelled,
    Expired,
}

/// Runs one operation against its deadline and a cancellation signal.
#[derive(Debug, Clone)]
pub struct TimedRunner {
    grace: Duration,
    cpu: Option<Arc<CpuPool>>,
}

impl TimedRunner {
    /// Runner that waits up to `grace` for an interrupted operation to unwind.
    #[must_use]
    pub const fn new(grace: Duration) -> Self {
        Self { grace, cpu: None }
    }

    /// Offload CPU work of every operation to `pool`.
    #[must_use]
    pub fn with_cpu_pool(mut self, pool: Arc<CpuPool>) -> Self {
        self.cpu = Some(pool);
        self
    }

    /// Grace period granted after an interrupt.
    #[must_use]
    pub const fn grace(&self) -> Duration {
        self.grace
    }

    /// Context for an operation running under `token` until `deadline`.
    #[must_use]
    pub fn context(
        &self,
        deadline: Deadline,
        token: CancellationToken,
        correlation_id: CorrelationId,
    ) -> TaskContext {
        let ctx = TaskContext::new(deadline, token, correlation_id);
        match &self.cpu {
            Some(pool) => ctx.with_cpu_pool(Arc::clone(pool)),
            None => ctx,
        }
    }

    /// Run `operation` until it finishes, `deadline` elapses, or `cancel` fires.
    ///
    /// Cancellation wins over the deadline, and the deadline wins over a result
    /// that becomes ready in the same instant. On interrupt the operation's token
    /// is cancelled and it gets the grace period to stop; the outcome is returned
    /// only after that.
    pub async fn run<T, Op, Fut>(
        &self,
        operation: Op,
        deadline: Deadline,
        cancel: &CancellationToken,
        correlation_id: CorrelationId,
    ) -> TaskOutcome<T>
    where
        Op: FnOnce(TaskContext) -> Fut,
        Fut: Future<Output = Result<T, OperationError>>,
    {
        let started = Instant::now();
        if cancel.is_cancelled() {
            return TaskOutcome::Cancelled(ErrorContext::wrap(
                OrchestratorError::Cancelled,
                "cancelled before the operation started",
                correlation_id,
            ));
        }
        if deadline.is_elapsed() {
            return TaskOutcome::TimedOut(ErrorContext::wrap(
                OrchestratorError::TimedOut {
                    after: Duration::ZERO,
                },
                "deadline elapsed before the operation started",
                correlation_id,
            ));
        }

        let token = cancel.child_token();
        let fut = operation(self.context(deadline, token.clone(), correlation_id));
        tokio::pin!(fut);

        let step = tokio::select! {
            biased;
            () = cancel.cancelled() => Step::Cancelled,
            () = tokio::time::sleep_until(deadline.instant()) => Step::Expired,
            result = &mut fut => Step::Finished(result),
        };

        match step {
            Step::Finished(Ok(value)) => TaskOutcome::Success(value),
            Step::Finished(Err(err)) if err.class == FailureClass::Interrupted => {
                if cancel.is_cancelled() {
                    TaskOutcome::Cancelled(ErrorContext::wrap(
                        OrchestratorError::Cancelled,
                        "operation stopped on cancellation",
                        correlation_id,
                    ))
                } else if deadline.is_elapsed() {
                    TaskOutcome::TimedOut(ErrorContext::wrap(
                        OrchestratorError::TimedOut {
                            after: started.elapsed(),
                        },
                        "operation stopped at its deadline",
                        correlation_id,
                    ))
                } else {
                    TaskOutcome::Failure(ErrorContext::wrap(err, "operation interrupted", correlation_id))
                }
            }
            Step::Finished(Err(err)) => {
                TaskOutcome::Failure(ErrorContext::wrap(err, "operation failed", correlation_id))
            }
            Step::Cancelled => {
                self.interrupt(&token, fut).await;
                TaskOutcome::Cancelled(ErrorContext::wrap(
                    OrchestratorError::Cancelled,
                    "operation cancelled",
                    correlation_id,
                ))
            }
            Step::Expired => {
                let after = started.elapsed();
                self.interrupt(&token, fut).await;
                TaskOutcome::TimedOut(ErrorContext::wrap(
                    OrchestratorError::TimedOut { after },
                    "operation exceeded its deadline",
                    correlation_id,
                ))
            }
        }
    }

    /// Signal the operation and wait for it to stop, at most for the grace period.
    async fn interrupt<F: Future>(&self, token: &CancellationToken, fut: std::pin::Pin<&mut F>) {
        token.cancel();
        if tokio::time::timeout(self.grace, fut).await.is_ok() {
            debug!("operation unwound after interrupt");
        } else {
            warn!(
                grace_ms = u64::try_from(self.grace.as_millis()).unwrap_or(u64::MAX),
                "operation ignored cancellation for the grace period, dropping it"
            );
        }
    }
}
