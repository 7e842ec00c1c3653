//! Builders to construct orchestration components from configuration.

use std::sync::Arc;

use crate::config::{AdmissionConfig, CpuConfig, OrchestratorConfig, PoolConfig, TaskConfig};
use crate::core::{
    AdmissionController, CpuPool, OperationExecutor, OrchestratorError, ResourceFactory,
    ResourcePool, TaskOrchestrator, TimedRunner,
};

/// Build a resource pool with the configured capacity per kind.
pub fn build_resource_pool<F: ResourceFactory>(
    cfg: &PoolConfig,
    factory: F,
) -> Result<ResourcePool<F>, OrchestratorError> {
    cfg.validate().map_err(OrchestratorError::InvalidConfig)?;
    ResourcePool::new(
        factory,
        cfg.capacity.iter().map(|(kind, capacity)| (*kind, *capacity)),
    )
}

/// Build the shared admission controller.
pub fn build_admission(cfg: &AdmissionConfig) -> Result<Arc<AdmissionController>, OrchestratorError> {
    cfg.validate().map_err(OrchestratorError::InvalidConfig)?;
    AdmissionController::new(cfg.max_concurrent).map(Arc::new)
}

/// Build the CPU offload pool and start its threads.
pub fn build_cpu_pool(cfg: &CpuConfig) -> Result<Arc<CpuPool>, OrchestratorError> {
    CpuPool::new(cfg.clone()).map(Arc::new)
}

/// Build a runner using the configured grace period.
#[must_use]
pub fn build_runner(cfg: &TaskConfig, cpu: Option<Arc<CpuPool>>) -> TimedRunner {
    let runner = TimedRunner::new(cfg.cancel_grace);
    match cpu {
        Some(pool) => runner.with_cpu_pool(pool),
        None => runner,
    }
}

/// Build a complete orchestrator from the root configuration.
///
/// The admission controller is shared with the caller so the runtime can drain it.
pub fn build_orchestrator<F, E>(
    cfg: &OrchestratorConfig,
    factory: F,
    executor: E,
    cpu: Option<Arc<CpuPool>>,
) -> Result<TaskOrchestrator<F, E>, OrchestratorError>
where
    F: ResourceFactory,
    E: OperationExecutor<Resource = F::Resource>,
{
    cfg.validate().map_err(OrchestratorError::InvalidConfig)?;
    let admission = build_admission(&cfg.admission)?;
    let pool = build_resource_pool(&cfg.pool, factory)?;
    let runner = build_runner(&cfg.task, cpu);
    Ok(TaskOrchestrator::new(admission, pool, runner, executor)
        .with_lease_budget_ratio(cfg.task.lease_budget_ratio))
}
