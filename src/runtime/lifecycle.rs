//! Process lifecycle: ordered startup and teardown of every component.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use serde::Serialize;
use tracing::{info, warn};

use crate::builders::{build_cpu_pool, build_orchestrator};
use crate::config::OrchestratorConfig;
use crate::core::{
    AppResult, CpuPool, OperationExecutor, OrchestratorError, PoolShutdownReport,
    ResourceFactory, TaskOrchestrator,
};
use crate::runtime::api::{self, BatchReport, BatchSubmission, Health};
use crate::telemetry::{self, LogSink};

/// What happened during [`Runtime::shutdown`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ShutdownReport {
    /// In-flight batches finished within `pool.shutdown_timeout`.
    pub drained: bool,
    /// Stragglers had to be cancelled.
    pub cancelled_stragglers: bool,
    /// Resource pool teardown.
    pub pool: PoolShutdownReport,
}

/// A running orchestrator with its CPU pool and log sink.
pub struct Runtime<F, E>
where
    F: ResourceFactory,
    E: OperationExecutor<Resource = F::Resource>,
{
    config: OrchestratorConfig,
    orchestrator: TaskOrchestrator<F, E>,
    cpu: Arc<CpuPool>,
    sink: Arc<LogSink>,
    stopped: AtomicBool,
}

impl<F, E> std::fmt::Debug for Runtime<F, E>
where
    F: ResourceFactory,
    E: OperationExecutor<Resource = F::Resource>,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("orchestrator", &self.orchestrator)
            .field("cpu", &self.cpu)
            .field("stopped", &self.stopped.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl<F, E> Runtime<F, E>
where
    F: ResourceFactory,
    E: OperationExecutor<Resource = F::Resource>,
{
    /// Initialise the global log sink, then the CPU pool, pool and admission.
    ///
    /// # Errors
    ///
    /// Fails on invalid configuration or when a component cannot start.
    pub fn startup(config: OrchestratorConfig, factory: F, executor: E) -> AppResult<Self> {
        config
            .validate()
            .map_err(OrchestratorError::InvalidConfig)
            .context("validating configuration")?;
        let sink = telemetry::init_global(&config.log).context("initialising log sink")?;
        Self::startup_with_sink(config, factory, executor, sink)
    }

    /// Like [`startup`](Self::startup) with a caller-provided sink instead of the global one.
    ///
    /// # Errors
    ///
    /// Fails on invalid configuration or when a component cannot start.
    pub fn startup_with_sink(
        config: OrchestratorConfig,
        factory: F,
        executor: E,
        sink: Arc<LogSink>,
    ) -> AppResult<Self> {
        let cpu = build_cpu_pool(&config.cpu).context("starting cpu pool")?;
        let orchestrator = build_orchestrator(&config, factory, executor, Some(Arc::clone(&cpu)))
            .context("building orchestrator")?;
        info!(
            max_concurrent = config.admission.max_concurrent,
            cpu_workers = config.cpu.worker_count,
            "runtime started"
        );
        Ok(Self {
            config,
            orchestrator,
            cpu,
            sink,
            stopped: AtomicBool::new(false),
        })
    }

    /// The orchestrator.
    #[must_use]
    pub const fn orchestrator(&self) -> &TaskOrchestrator<F, E> {
        &self.orchestrator
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// The log sink this runtime closes on shutdown.
    #[must_use]
    pub const fn sink(&self) -> &Arc<LogSink> {
        &self.sink
    }

    /// Run a boundary submission, applying `task.default_deadline`.
    ///
    /// # Errors
    ///
    /// Batch-level rejections only.
    pub async fn submit(
        &self,
        submission: BatchSubmission<E::Operation>,
    ) -> Result<BatchReport<E::Output>, OrchestratorError> {
        api::submit_batch(&self.orchestrator, submission, self.config.task.default_deadline).await
    }

    /// Current health.
    #[must_use]
    pub fn health(&self) -> Health {
        api::health(&self.orchestrator, Some(&self.cpu))
    }

    /// Drain in-flight work, then close the pool, the CPU pool and the sink, in that order.
    ///
    /// Work still running after `pool.shutdown_timeout` is cancelled. Calling
    /// `shutdown` twice returns an error the second time.
    ///
    /// # Errors
    ///
    /// [`OrchestratorError::ShuttingDown`] on a repeated call, or a failure joining
    /// the CPU pool.
    pub async fn shutdown(&self) -> AppResult<ShutdownReport> {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return Err(OrchestratorError::ShuttingDown.into());
        }
        let timeout = self.config.pool.shutdown_timeout;
        info!(timeout_ms = millis(timeout), "runtime shutting down");

        let admission = self.orchestrator.admission();
        let drained = admission.drain(timeout).await;
        let mut cancelled_stragglers = false;
        if !drained {
            warn!("in-flight work outlived the shutdown timeout, cancelling it");
            self.orchestrator.cancel_all();
            cancelled_stragglers = true;
            let grace = self
                .config
                .task
                .cancel_grace
                .saturating_mul(2)
                .max(Duration::from_millis(50));
            if !admission.drain(grace).await {
                warn!("cancelled work did not release its permits in time");
            }
        }

        let pool = self.orchestrator.pool().shutdown(timeout).await;

        let cpu = Arc::clone(&self.cpu);
        tokio::task::spawn_blocking(move || cpu.shutdown())
            .await
            .context("joining cpu pool")?;

        info!(drained, cancelled_stragglers, "runtime stopped");
        self.sink.close();

        Ok(ShutdownReport {
            drained,
            cancelled_stragglers,
            pool,
        })
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
