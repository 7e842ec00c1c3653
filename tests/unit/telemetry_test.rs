//! Tests for the structured log sink and its tracing layer

use std::sync::Arc;

use measurement_orchestrator::config::{LogConfig, LogDestination, LogLevel};
use measurement_orchestrator::core::{ErrorContext, OperationError};
use measurement_orchestrator::telemetry::{self, LogFields, LogRecord, LogSink, REDACTED};
use measurement_orchestrator::util::CorrelationId;

#[test]
fn test_tracing_events_reach_scoped_sink() {
    let sink = Arc::new(LogSink::in_memory(LogLevel::Debug));
    {
        let _guard = telemetry::scoped(Arc::clone(&sink));
        tracing::info!(kind = "db_session", leased = 3_u64, "lease granted");
        tracing::trace!("too verbose");
    }
    tracing::info!("after the guard dropped");

    let records = sink.records();
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.level, LogLevel::Info);
    assert_eq!(record.message, "lease granted");
    assert_eq!(record.fields["kind"], "db_session");
    assert_eq!(record.fields["leased"], 3);
}

#[test]
fn test_correlation_id_lifted_from_span() {
    let sink = Arc::new(LogSink::in_memory(LogLevel::Info));
    let id = CorrelationId::new();
    {
        let _guard = telemetry::scoped(Arc::clone(&sink));
        let span = tracing::info_span!("work_item", correlation_id = %id, item_id = "a");
        let _entered = span.enter();
        tracing::warn!("slow provider");
    }

    let records = sink.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].correlation_id.as_deref(), Some(id.to_string().as_str()));
    assert_eq!(records[0].fields["item_id"], "a");
    assert!(!records[0].fields.contains_key("correlation_id"));
}

#[test]
fn test_sensitive_event_fields_are_redacted() {
    let sink = Arc::new(LogSink::in_memory(LogLevel::Info));
    {
        let _guard = telemetry::scoped(Arc::clone(&sink));
        tracing::info!(db_password = "hunter2", host = "db.local", "connecting");
    }
    let record = &sink.records()[0];
    assert_eq!(record.fields["db_password"], REDACTED);
    assert_eq!(record.fields["host"], "db.local");
    assert_eq!(sink.stats().redacted, 1);
}

#[test]
fn test_with_context_records_chain() {
    let sink = LogSink::in_memory(LogLevel::Info);
    let chain = ErrorContext::wrap(OperationError::client("signal missing"), "open handle", CorrelationId::new())
        .context("work item `x`");
    sink.emit(LogLevel::Error, LogFields::new("item failed").with_context(&chain));

    let record = &sink.records()[0];
    assert_eq!(record.correlation_id, Some(chain.correlation_id().to_string()));
    assert_eq!(
        record.fields["error"],
        "work item `x`: open handle: operation failed: signal missing"
    );
    assert_eq!(record.fields["root_kind"], "operation_failure");
}

#[test]
fn test_records_after_close_are_dropped() {
    let sink = LogSink::in_memory(LogLevel::Info);
    sink.emit(LogLevel::Info, LogFields::new("before"));
    assert!(sink.close());
    assert!(!sink.close());
    sink.emit(LogLevel::Info, LogFields::new("after"));

    assert_eq!(sink.records().len(), 1);
    assert_eq!(sink.stats().emitted, 1);
    assert_eq!(sink.stats().dropped, 1);
}

#[test]
fn test_file_destination_writes_json_lines() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("orchestrator.jsonl");
    let cfg = LogConfig {
        destination: LogDestination::File,
        file_path: path.clone(),
        ..LogConfig::default()
    };
    let sink = LogSink::from_config(&cfg).unwrap();
    sink.emit(LogLevel::Warn, LogFields::new("pool near capacity").with("leased", 7));
    sink.close();

    let contents = std::fs::read_to_string(&path).unwrap();
    let records: Vec<LogRecord> = contents
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].message, "pool near capacity");
    assert_eq!(records[0].fields["leased"], 7);
}

#[test]
fn test_syslog_destination_sends_datagrams() {
    let collector = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
    collector
        .set_read_timeout(Some(std::time::Duration::from_secs(2)))
        .unwrap();
    let port = collector.local_addr().unwrap().port().to_string();
    let cfg = measurement_orchestrator::config::OrchestratorConfig::from_pairs([
        ("log.destination", "syslog"),
        ("log.syslog_host", "127.0.0.1"),
        ("log.syslog_port", port.as_str()),
        ("log.syslog_facility", "16"),
    ])
    .unwrap();
    let sink = LogSink::from_config(&cfg.log).unwrap();

    sink.emit(
        LogLevel::Info,
        LogFields::new("batch finished").correlated(CorrelationId::new()),
    );
    sink.close();

    let mut buf = [0u8; 2048];
    let len = collector.recv(&mut buf).unwrap();
    let datagram = std::str::from_utf8(&buf[..len]).unwrap();
    // local0.info
    assert!(datagram.starts_with("<134>1 "), "{datagram}");
    let record: LogRecord = serde_json::from_str(&datagram[datagram.find('{').unwrap()..]).unwrap();
    assert_eq!(record.message, "batch finished");
    assert!(record.correlation_id.is_some());
    assert_eq!(sink.stats().emitted, 1);
}

#[test]
fn test_syslog_destination_requires_host() {
    let cfg = LogConfig {
        destination: LogDestination::Syslog,
        syslog_host: String::new(),
        ..LogConfig::default()
    };
    assert!(LogSink::from_config(&cfg).is_err());
}
