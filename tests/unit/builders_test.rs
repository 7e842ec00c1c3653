//! Tests for builder modules

use std::sync::Arc;
use std::time::Duration;

use measurement_orchestrator::builders::{
    build_admission, build_orchestrator, build_resource_pool, build_runner,
};
use measurement_orchestrator::config::{AdmissionConfig, OrchestratorConfig, PoolConfig, TaskConfig};
use measurement_orchestrator::core::OrchestratorError;
use measurement_orchestrator::infra::{DatasetExecutor, InMemoryDatasetProvider, InMemoryResourceFactory};
use measurement_orchestrator::util::ResourceKind;

#[test]
fn test_build_resource_pool_capacities() {
    let pool = build_resource_pool(&PoolConfig::default(), InMemoryResourceFactory::new()).unwrap();
    assert_eq!(pool.capacity(ResourceKind::DbSession), 4);
    assert_eq!(pool.capacity(ResourceKind::HttpConnection), 8);
    assert!(!pool.is_closed());
}

#[test]
fn test_build_admission_rejects_zero() {
    let err = build_admission(&AdmissionConfig { max_concurrent: 0 }).unwrap_err();
    assert!(matches!(err, OrchestratorError::InvalidConfig(_)));
}

#[test]
fn test_build_admission_rejects_capacity_beyond_semaphore() {
    let err = build_admission(&AdmissionConfig {
        max_concurrent: usize::MAX,
    })
    .unwrap_err();
    assert!(matches!(err, OrchestratorError::InvalidConfig(_)));
}

#[test]
fn test_build_resource_pool_rejects_capacity_beyond_semaphore() {
    let mut cfg = PoolConfig::default();
    cfg.capacity.insert(ResourceKind::DbSession, usize::MAX);
    let err = build_resource_pool(&cfg, InMemoryResourceFactory::new()).unwrap_err();
    assert!(matches!(err, OrchestratorError::InvalidConfig(_)));
}

#[test]
fn test_build_runner_uses_grace() {
    let cfg = TaskConfig {
        cancel_grace: Duration::from_millis(42),
        ..TaskConfig::default()
    };
    assert_eq!(build_runner(&cfg, None).grace(), Duration::from_millis(42));
}

#[test]
fn test_build_orchestrator_from_defaults() {
    let provider = Arc::new(InMemoryDatasetProvider::new());
    let orchestrator = build_orchestrator(
        &OrchestratorConfig::default(),
        InMemoryResourceFactory::new(),
        DatasetExecutor::new(provider),
        None,
    )
    .unwrap();
    assert_eq!(orchestrator.admission().capacity(), 4);
    assert!(!orchestrator.is_shutting_down());
}

#[test]
fn test_build_orchestrator_rejects_invalid_config() {
    let mut cfg = OrchestratorConfig::default();
    cfg.task.lease_budget_ratio = 0.0;
    let provider = Arc::new(InMemoryDatasetProvider::new());
    let result = build_orchestrator(
        &cfg,
        InMemoryResourceFactory::new(),
        DatasetExecutor::new(provider),
        None,
    );
    assert!(matches!(result, Err(OrchestratorError::InvalidConfig(_))));
}
