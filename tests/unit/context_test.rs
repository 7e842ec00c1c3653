//! Tests for error context chains

use std::error::Error as _;
use std::time::Duration;

use measurement_orchestrator::core::{ErrorContext, FailureClass, OperationError, OrchestratorError};
use measurement_orchestrator::util::{CorrelationId, ResourceKind};

fn pool_timeout() -> OrchestratorError {
    OrchestratorError::PoolTimeout {
        kind: ResourceKind::DbSession,
        waited: Duration::from_millis(5),
    }
}

#[test]
fn test_root_cause_survives_three_layers() {
    let id = CorrelationId::new();
    let chain = ErrorContext::wrap(pool_timeout(), "leasing session", id)
        .context("opening handle for `temp`")
        .context("work item `a`");

    assert_eq!(chain.depth(), 3);
    assert!(matches!(chain.root_cause(), OrchestratorError::PoolTimeout { .. }));
    assert_eq!(chain.message(), "work item `a`");
    assert!(chain.trace().all(|node| node.correlation_id() == id));
}

#[test]
fn test_trace_is_newest_first() {
    let chain = ErrorContext::wrap(OrchestratorError::Cancelled, "inner", CorrelationId::new())
        .context("middle")
        .context("outer");
    let messages: Vec<&str> = chain.trace().map(ErrorContext::message).collect();
    assert_eq!(messages, vec!["outer", "middle", "inner"]);
    assert_eq!(chain.render(), "outer: middle: inner: cancelled");
}

#[test]
fn test_source_chain_reaches_root() {
    let chain = ErrorContext::wrap(
        OperationError::client("signal `rpm` not found"),
        "opening handle",
        CorrelationId::new(),
    )
    .context("work item `b`");

    let mut sources = Vec::new();
    let mut current = chain.source();
    while let Some(err) = current {
        sources.push(err.to_string());
        current = err.source();
    }
    assert_eq!(
        sources,
        vec![
            "opening handle".to_string(),
            "operation failed: signal `rpm` not found".to_string(),
            "signal `rpm` not found".to_string(),
        ]
    );
}

#[test]
fn test_class_follows_root() {
    let id = CorrelationId::new();
    let client = ErrorContext::wrap(OperationError::client("bad signal"), "x", id);
    let server = ErrorContext::wrap(OperationError::server("corrupt"), "x", id);
    let expired = ErrorContext::wrap(OrchestratorError::TimedOut { after: Duration::ZERO }, "x", id);
    let exhausted = ErrorContext::wrap(pool_timeout(), "x", id);

    assert_eq!(client.class(), FailureClass::Client);
    assert_eq!(server.class(), FailureClass::Server);
    assert_eq!(expired.class(), FailureClass::Interrupted);
    assert_eq!(exhausted.class(), FailureClass::Server);
}

#[test]
fn test_report_serialises_chain() {
    let chain = ErrorContext::wrap(pool_timeout(), "leasing session", CorrelationId::new())
        .context("work item `c`");
    let report = chain.report();
    assert_eq!(report.messages, vec!["work item `c`", "leasing session"]);
    assert_eq!(report.root_kind, "pool_timeout");

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["root_kind"], "pool_timeout");
    assert_eq!(json["class"], serde_json::to_value(FailureClass::Server).unwrap());
}

#[test]
fn test_root_cause_arc_is_shared() {
    let chain = ErrorContext::wrap(OrchestratorError::ShuttingDown, "submit", CorrelationId::new());
    let cloned = chain.clone().context("outer");
    assert!(std::sync::Arc::ptr_eq(&chain.root_cause_arc(), &cloned.root_cause_arc()));
}
