//! Tests for configuration loading and validation

use std::time::Duration;

use measurement_orchestrator::config::{
    env_pairs, AdmissionConfig, CpuConfig, LogDestination, LogLevel, OrchestratorConfig,
    PoolConfig, TaskConfig,
};
use measurement_orchestrator::util::ResourceKind;

#[test]
fn test_defaults_are_valid() {
    let cfg = OrchestratorConfig::default();
    assert!(cfg.validate().is_ok());
    assert_eq!(cfg.admission.max_concurrent, 4);
    assert_eq!(cfg.pool.capacity[&ResourceKind::DbSession], 4);
    assert_eq!(cfg.pool.capacity[&ResourceKind::HttpConnection], 8);
    assert_eq!(cfg.task.default_deadline, Duration::from_secs(30));
    assert_eq!(cfg.log.min_level, LogLevel::Info);
}

#[test]
fn test_admission_config_invalid_capacity() {
    let invalid = AdmissionConfig { max_concurrent: 0 };
    assert!(invalid.validate().is_err());
}

#[test]
fn test_pool_config_requires_one_kind() {
    let mut invalid = PoolConfig::default();
    for capacity in invalid.capacity.values_mut() {
        *capacity = 0;
    }
    assert!(invalid.validate().is_err());

    let mut partial = PoolConfig::default();
    partial.capacity.insert(ResourceKind::HttpConnection, 0);
    assert!(partial.validate().is_ok());
}

#[test]
fn test_task_config_ratio_bounds() {
    for ratio in [0.0, 1.5, -0.1] {
        let invalid = TaskConfig {
            lease_budget_ratio: ratio,
            ..TaskConfig::default()
        };
        assert!(invalid.validate().is_err(), "ratio {ratio} should be rejected");
    }
    let full = TaskConfig {
        lease_budget_ratio: 1.0,
        ..TaskConfig::default()
    };
    assert!(full.validate().is_ok());
}

#[test]
fn test_cpu_config_invalid_values() {
    assert!(CpuConfig::default().with_worker_count(0).validate().is_err());
    assert!(CpuConfig::default().with_max_queue_depth(0).validate().is_err());
}

#[test]
fn test_from_pairs_overrides_defaults() {
    let cfg = OrchestratorConfig::from_pairs([
        ("admission.max_concurrent", "2"),
        ("pool.capacity.db_session", "1"),
        ("task.default_deadline", "5s"),
        ("task.cancel_grace", "250ms"),
        ("log.min_level", "debug"),
        ("log.destination", "memory"),
    ])
    .unwrap();
    assert_eq!(cfg.admission.max_concurrent, 2);
    assert_eq!(cfg.pool.capacity[&ResourceKind::DbSession], 1);
    assert_eq!(cfg.task.default_deadline, Duration::from_secs(5));
    assert_eq!(cfg.task.cancel_grace, Duration::from_millis(250));
    assert_eq!(cfg.log.min_level, LogLevel::Debug);
    assert_eq!(cfg.log.destination, LogDestination::Memory);
}

#[test]
fn test_from_pairs_rejects_unknown_key() {
    let err = OrchestratorConfig::from_pairs([("pool.max_units", "3")]).unwrap_err();
    assert!(err.contains("pool.max_units"), "{err}");
}

#[test]
fn test_from_pairs_rejects_bad_number() {
    let err = OrchestratorConfig::from_pairs([("admission.max_concurrent", "many")]).unwrap_err();
    assert!(err.contains("expects a number"), "{err}");
}

#[test]
fn test_from_pairs_validates_result() {
    assert!(OrchestratorConfig::from_pairs([("admission.max_concurrent", "0")]).is_err());
}

#[test]
fn test_env_pairs_mapping() {
    let vars = vec![
        ("ORCH_POOL_CAPACITY_DB_SESSION".to_string(), "6".to_string()),
        ("ORCH_TASK_LEASE_BUDGET_RATIO".to_string(), "0.25".to_string()),
        ("ORCH_ADMISSION_MAX_CONCURRENT".to_string(), "3".to_string()),
        ("PATH".to_string(), "/usr/bin".to_string()),
    ];
    let pairs = env_pairs(vars);
    assert_eq!(
        pairs,
        vec![
            ("pool.capacity.db_session".to_string(), "6".to_string()),
            ("task.lease_budget_ratio".to_string(), "0.25".to_string()),
            ("admission.max_concurrent".to_string(), "3".to_string()),
        ]
    );

    let cfg = OrchestratorConfig::from_pairs(pairs).unwrap();
    assert_eq!(cfg.pool.capacity[&ResourceKind::DbSession], 6);
    assert!((cfg.task.lease_budget_ratio - 0.25).abs() < f64::EPSILON);
    assert_eq!(cfg.admission.max_concurrent, 3);
}

#[test]
fn test_from_json_partial_document() {
    let cfg = OrchestratorConfig::from_json_str(
        r#"{
            "admission": { "max_concurrent": 8 },
            "pool": { "capacity": { "db_session": 2 }, "shutdown_timeout": "3s" },
            "task": { "default_deadline": 1500 }
        }"#,
    )
    .unwrap();
    assert_eq!(cfg.admission.max_concurrent, 8);
    assert_eq!(cfg.pool.capacity.get(&ResourceKind::DbSession), Some(&2));
    assert_eq!(cfg.pool.shutdown_timeout, Duration::from_secs(3));
    assert_eq!(cfg.task.default_deadline, Duration::from_millis(1500));
    assert_eq!(cfg.task.cancel_grace, TaskConfig::default().cancel_grace);
}

#[test]
fn test_from_json_rejects_invalid() {
    assert!(OrchestratorConfig::from_json_str(r#"{ "admission": { "max_concurrent": 0 } }"#).is_err());
    assert!(OrchestratorConfig::from_json_str("not json").is_err());
}

#[test]
fn test_capacity_above_semaphore_limit_is_rejected() {
    let err = OrchestratorConfig::from_pairs([("admission.max_concurrent", "18446744073709551615")])
        .unwrap_err();
    assert!(err.contains("admission.max_concurrent must be at most"), "{err}");

    let err = OrchestratorConfig::from_pairs([("pool.capacity.db_session", "18446744073709551615")])
        .unwrap_err();
    assert!(err.contains("pool.capacity.db_session must be at most"), "{err}");
}

#[test]
fn test_from_json_rejects_unknown_fields() {
    let err = OrchestratorConfig::from_json_str(r#"{ "pool": { "max_units": 3 } }"#).unwrap_err();
    assert!(err.contains("max_units"), "{err}");
    assert!(OrchestratorConfig::from_json_str(r#"{ "telemetry": {} }"#).is_err());
}

#[test]
fn test_syslog_settings() {
    let cfg = OrchestratorConfig::from_pairs(env_pairs(vec![
        ("ORCH_LOG_DESTINATION".to_string(), "syslog".to_string()),
        ("ORCH_LOG_SYSLOG_HOST".to_string(), "collector.local".to_string()),
        ("ORCH_LOG_SYSLOG_PORT".to_string(), "5514".to_string()),
    ]))
    .unwrap();
    assert_eq!(cfg.log.destination, LogDestination::Syslog);
    assert_eq!(cfg.log.syslog_host, "collector.local");
    assert_eq!(cfg.log.syslog_port, 5514);
    assert_eq!(cfg.log.syslog_facility, 1);

    assert!(OrchestratorConfig::from_pairs([("log.syslog_facility", "24")]).is_err());
    assert!(OrchestratorConfig::from_pairs([
        ("log.destination", "syslog"),
        ("log.syslog_port", "0"),
    ])
    .is_err());
}
