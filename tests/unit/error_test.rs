//! Tests for error types

use std::time::Duration;

use measurement_orchestrator::core::{FailureClass, OperationError, OrchestratorError};
use measurement_orchestrator::util::{ResourceKind, WorkItemId};
use serde_json::json;

#[test]
fn test_pool_timeout_error() {
    let err = OrchestratorError::PoolTimeout {
        kind: ResourceKind::DbSession,
        waited: Duration::from_millis(10),
    };
    assert_eq!(format!("{err}"), "timed out waiting 10ms for a db_session lease");
    assert_eq!(err.kind_name(), "pool_timeout");
    assert!(!err.is_deadline_expiry());
}

#[test]
fn test_pool_closed_error() {
    let err = OrchestratorError::PoolClosed {
        kind: ResourceKind::HttpConnection,
    };
    assert_eq!(format!("{err}"), "pool closed for http_connection");
}

#[test]
fn test_duplicate_work_item_error() {
    let err = OrchestratorError::DuplicateWorkItem(WorkItemId::new("a"));
    assert_eq!(format!("{err}"), "duplicate work item id `a` in batch");
    assert!(err.is_client_error());
}

#[test]
fn test_deadline_expiry_variants() {
    assert!(OrchestratorError::AdmissionTimeout { waited: Duration::ZERO }.is_deadline_expiry());
    assert!(OrchestratorError::TimedOut { after: Duration::ZERO }.is_deadline_expiry());
    assert!(!OrchestratorError::Cancelled.is_deadline_expiry());
}

#[test]
fn test_operation_failure_classification() {
    let client: OrchestratorError = OperationError::client("signal not found").into();
    let server: OrchestratorError = OperationError::server("corrupt file").into();
    assert!(client.is_client_error());
    assert!(!server.is_client_error());
    assert_eq!(format!("{client}"), "operation failed: signal not found");
}

#[test]
fn test_operation_error_carries_payload_and_source() {
    let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing.mf4");
    let err = OperationError::server("cannot open measurement")
        .with_payload(json!({ "measurement": "m1" }))
        .with_source(io);
    assert_eq!(err.class, FailureClass::Server);
    assert_eq!(err.payload, Some(json!({ "measurement": "m1" })));
    let source = std::error::Error::source(&err).map(ToString::to_string);
    assert_eq!(source.as_deref(), Some("missing.mf4"));
}
