//! Integration tests for runtime startup and ordered shutdown

use std::sync::Arc;
use std::time::Duration;

use measurement_orchestrator::config::{LogLevel, OrchestratorConfig};
use measurement_orchestrator::core::OrchestratorError;
use measurement_orchestrator::infra::{
    DatasetExecutor, DatasetOperation, InMemoryDatasetProvider, InMemoryResourceFactory,
    MemoryResource,
};
use measurement_orchestrator::runtime::{BatchSubmission, ItemSubmission, Runtime};
use measurement_orchestrator::telemetry::{self, LogSink};
use measurement_orchestrator::util::{ResourceKind, WorkItemId};

type TestRuntime =
    Runtime<InMemoryResourceFactory, DatasetExecutor<InMemoryDatasetProvider, MemoryResource>>;

fn config() -> OrchestratorConfig {
    OrchestratorConfig::from_pairs([
        ("admission.max_concurrent", "2"),
        ("pool.capacity.db_session", "2"),
        ("pool.shutdown_timeout", "100ms"),
        ("task.default_deadline", "10s"),
        ("task.cancel_grace", "20ms"),
        ("cpu.worker_count", "1"),
    ])
    .unwrap()
}

fn start(provider: InMemoryDatasetProvider, sink: Arc<LogSink>) -> (TestRuntime, InMemoryResourceFactory) {
    let factory = InMemoryResourceFactory::new();
    let runtime = Runtime::startup_with_sink(
        config(),
        factory.clone(),
        DatasetExecutor::new(Arc::new(provider)),
        sink,
    )
    .unwrap();
    (runtime, factory)
}

fn load(id: &str, signal: &str) -> ItemSubmission<DatasetOperation> {
    ItemSubmission {
        id: WorkItemId::new(id),
        operation: DatasetOperation::LoadValues {
            measurement: "run-1".into(),
            signal: signal.into(),
        },
        requires: vec![ResourceKind::DbSession],
        deadline_ms: None,
        correlation_id: None,
    }
}

#[tokio::test]
async fn test_submit_then_clean_shutdown() {
    let sink = Arc::new(LogSink::in_memory(LogLevel::Info));
    let _guard = telemetry::scoped(Arc::clone(&sink));
    let provider = InMemoryDatasetProvider::new().with_signal("run-1", "speed", vec![1.0, 3.0]);
    let (runtime, factory) = start(provider, Arc::clone(&sink));

    let report = runtime
        .submit(BatchSubmission {
            items: vec![load("a", "speed"), load("b", "speed")],
        })
        .await
        .unwrap();
    assert_eq!(report.summary.succeeded, 2);

    let health = runtime.health();
    assert!(health.ok);
    assert_eq!(health.in_flight, 0);
    assert_eq!(health.leased, 0);
    assert_eq!(health.cpu.unwrap().workers, 1);

    let shutdown = runtime.shutdown().await.unwrap();
    assert!(shutdown.drained);
    assert!(!shutdown.cancelled_stragglers);
    assert_eq!(shutdown.pool.leaked, 0);
    assert_eq!(shutdown.pool.closed_resources as u64, factory.counters().opened());

    assert!(sink.is_closed());
    assert!(runtime.orchestrator().pool().is_closed());
    assert!(!runtime.health().ok);
    assert!(sink.records().iter().any(|r| r.message == "runtime stopped"));
}

#[tokio::test]
async fn test_shutdown_is_not_repeatable() {
    let sink = Arc::new(LogSink::in_memory(LogLevel::Info));
    let (runtime, _) = start(InMemoryDatasetProvider::new(), sink);

    runtime.shutdown().await.unwrap();
    let err = runtime.shutdown().await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<OrchestratorError>(),
        Some(OrchestratorError::ShuttingDown)
    ));
}

#[tokio::test]
async fn test_submit_after_shutdown_is_rejected() {
    let sink = Arc::new(LogSink::in_memory(LogLevel::Info));
    let provider = InMemoryDatasetProvider::new().with_signal("run-1", "speed", vec![1.0]);
    let (runtime, _) = start(provider, sink);
    runtime.shutdown().await.unwrap();

    let err = runtime
        .submit(BatchSubmission {
            items: vec![load("late", "speed")],
        })
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::ShuttingDown));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_shutdown_cancels_stragglers() {
    let sink = Arc::new(LogSink::in_memory(LogLevel::Info));
    let provider = InMemoryDatasetProvider::new()
        .with_signal("run-1", "speed", vec![1.0])
        .with_latency(Duration::ZERO, Duration::from_secs(30));
    let (runtime, _) = start(provider, sink);
    let runtime = Arc::new(runtime);

    let batch = {
        let runtime = Arc::clone(&runtime);
        tokio::spawn(async move {
            runtime
                .submit(BatchSubmission {
                    items: vec![load("a", "speed"), load("b", "speed")],
                })
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(runtime.health().in_flight, 2);

    let started = std::time::Instant::now();
    let shutdown = runtime.shutdown().await.unwrap();
    assert!(!shutdown.drained);
    assert!(shutdown.cancelled_stragglers);
    assert_eq!(shutdown.pool.leaked, 0);
    assert!(started.elapsed() < Duration::from_secs(5));

    let report = batch.await.unwrap().unwrap();
    assert_eq!(report.summary.cancelled, 2);
}
