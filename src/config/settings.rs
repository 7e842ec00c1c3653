//! Root configuration and its loaders.
//!
//! Three sources are supported, all producing the same validated
//! [`OrchestratorConfig`]:
//!
//! - a JSON document (`from_json_str`)
//! - dotted key/value pairs such as `pool.capacity.db_session=4` (`from_pairs`)
//! - the process environment with the `ORCH_` prefix, after loading `.env` (`from_env`)

use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::config::{AdmissionConfig, CpuConfig, LogConfig, PoolConfig, TaskConfig};
use crate::util::serde::{parse_duration, ResourceKind};

/// Prefix of environment variables read by [`OrchestratorConfig::from_env`].
pub const ENV_PREFIX: &str = "ORCH_";

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OrchestratorConfig {
    /// Admission controller settings.
    pub admission: AdmissionConfig,
    /// Resource pool settings.
    pub pool: PoolConfig,
    /// Per-task settings.
    pub task: TaskConfig,
    /// Log sink settings.
    pub log: LogConfig,
    /// CPU offload pool settings.
    pub cpu: CpuConfig,
}

impl OrchestratorConfig {
    /// Validate every section.
    pub fn validate(&self) -> Result<(), String> {
        self.admission.validate()?;
        self.pool.validate()?;
        self.task.validate()?;
        self.log.validate()?;
        self.cpu
            .validate()
            .map_err(|e| format!("cpu pool invalid: {e}"))?;
        Ok(())
    }

    /// Parse configuration from a JSON string and validate. Missing fields take defaults.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Apply dotted `key=value` pairs over the defaults and validate.
    pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self, String>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut cfg = Self::default();
        for (key, value) in pairs {
            cfg.apply(key.as_ref(), value.as_ref())?;
        }
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load `.env` if present, then read every `ORCH_*` variable.
    pub fn from_env() -> Result<Self, String> {
        // A missing .env file is normal outside development.
        let _ = dotenvy::dotenv();
        Self::from_pairs(env_pairs(std::env::vars()))
    }

    /// Set one dotted key.
    pub fn apply(&mut self, key: &str, value: &str) -> Result<(), String> {
        let value = value.trim();
        match key {
            "admission.max_concurrent" => self.admission.max_concurrent = number(key, value)?,
            "pool.shutdown_timeout" => self.pool.shutdown_timeout = duration(key, value)?,
            "task.default_deadline" => self.task.default_deadline = duration(key, value)?,
            "task.lease_budget_ratio" => self.task.lease_budget_ratio = number(key, value)?,
            "task.cancel_grace" => self.task.cancel_grace = duration(key, value)?,
            "log.min_level" => self.log.min_level = value.parse()?,
            "log.destination" => self.log.destination = value.parse()?,
            "log.file_path" => self.log.file_path = PathBuf::from(value),
            "log.file_max_bytes" => self.log.file_max_bytes = number(key, value)?,
            "log.file_backups" => self.log.file_backups = number(key, value)?,
            "log.syslog_host" => self.log.syslog_host = value.to_string(),
            "log.syslog_port" => self.log.syslog_port = number(key, value)?,
            "log.syslog_facility" => self.log.syslog_facility = number(key, value)?,
            "cpu.worker_count" => self.cpu.worker_count = number(key, value)?,
            "cpu.max_queue_depth" => self.cpu.max_queue_depth = number(key, value)?,
            "cpu.thread_stack_size" => self.cpu.thread_stack_size = number(key, value)?,
            "cpu.join_timeout" => self.cpu.join_timeout = duration(key, value)?,
            _ => {
                let Some(kind) = key.strip_prefix("pool.capacity.") else {
                    return Err(format!("unknown configuration key `{key}`"));
                };
                let kind: ResourceKind = kind.parse()?;
                self.pool.capacity.insert(kind, number(key, value)?);
            }
        }
        Ok(())
    }
}

/// Turn `ORCH_*` environment variables into dotted configuration pairs.
///
/// `ORCH_POOL_CAPACITY_DB_SESSION=4` becomes `pool.capacity.db_session=4` and
/// `ORCH_TASK_LEASE_BUDGET_RATIO=0.3` becomes `task.lease_budget_ratio=0.3`.
/// Variables without the prefix are skipped.
pub fn env_pairs(vars: impl IntoIterator<Item = (String, String)>) -> Vec<(String, String)> {
    vars.into_iter()
        .filter_map(|(name, value)| {
            let rest = name.strip_prefix(ENV_PREFIX)?.to_ascii_lowercase();
            let key = if let Some(kind) = rest.strip_prefix("pool_capacity_") {
                format!("pool.capacity.{kind}")
            } else {
                let (section, field) = rest.split_once('_')?;
                format!("{section}.{field}")
            };
            Some((key, value))
        })
        .collect()
}

fn number<T: FromStr>(key: &str, value: &str) -> Result<T, String> {
    value
        .parse()
        .map_err(|_| format!("`{key}` expects a number, got `{value}`"))
}

fn duration(key: &str, value: &str) -> Result<std::time::Duration, String> {
    parse_duration(value).map_err(|e| format!("`{key}`: {e}"))
}
