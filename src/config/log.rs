//! Log sink configuration.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Severity of a log record, ordered from most to least verbose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Very fine-grained diagnostics.
    Trace,
    /// Diagnostics.
    Debug,
    /// Normal operation.
    Info,
    /// Something unexpected that did not stop the service.
    Warn,
    /// A failure.
    Error,
}

impl LogLevel {
    /// Lowercase name as written in records and filters.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

impl From<&tracing::Level> for LogLevel {
    fn from(level: &tracing::Level) -> Self {
        match *level {
            tracing::Level::TRACE => Self::Trace,
            tracing::Level::DEBUG => Self::Debug,
            tracing::Level::INFO => Self::Info,
            tracing::Level::WARN => Self::Warn,
            _ => Self::Error,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "trace" => Ok(Self::Trace),
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warn),
            "error" | "critical" => Ok(Self::Error),
            other => Err(format!("unknown log level `{other}`")),
        }
    }
}

/// Where records are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogDestination {
    /// Standard error.
    Stderr,
    /// Standard output.
    Stdout,
    /// Size-rotated file at `log.file_path`.
    File,
    /// UDP datagrams to the collector at `log.syslog_host:log.syslog_port`.
    Syslog,
    /// In-memory buffer, for tests.
    Memory,
}

impl FromStr for LogDestination {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "stderr" => Ok(Self::Stderr),
            "stdout" => Ok(Self::Stdout),
            "file" => Ok(Self::File),
            "syslog" => Ok(Self::Syslog),
            "memory" => Ok(Self::Memory),
            other => Err(format!("unknown log destination `{other}`")),
        }
    }
}

/// Log sink configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogConfig {
    /// Records below this level are discarded.
    pub min_level: LogLevel,
    /// Output destination.
    pub destination: LogDestination,
    /// File written when `destination` is `file`.
    pub file_path: PathBuf,
    /// Size at which the file is rotated.
    pub file_max_bytes: u64,
    /// Rotated files kept next to the active one.
    pub file_backups: usize,
    /// Syslog collector host when `destination` is `syslog`.
    pub syslog_host: String,
    /// Syslog collector UDP port.
    pub syslog_port: u16,
    /// Syslog facility code, 0 to 23 (`user` is 1, `local0` is 16).
    pub syslog_facility: u8,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            min_level: LogLevel::Info,
            destination: LogDestination::Stderr,
            file_path: PathBuf::from("logs/orchestrator.jsonl"),
            file_max_bytes: 10 * 1024 * 1024,
            file_backups: 5,
            syslog_host: "127.0.0.1".into(),
            syslog_port: 514,
            syslog_facility: 1,
        }
    }
}

impl LogConfig {
    /// Validate log values.
    pub fn validate(&self) -> Result<(), String> {
        if self.destination == LogDestination::File {
            if self.file_path.as_os_str().is_empty() {
                return Err("log.file_path is required for the file destination".into());
            }
            if self.file_max_bytes == 0 {
                return Err("log.file_max_bytes must be greater than 0".into());
            }
        }
        if self.destination == LogDestination::Syslog {
            if self.syslog_host.trim().is_empty() {
                return Err("log.syslog_host is required for the syslog destination".into());
            }
            if self.syslog_port == 0 {
                return Err("log.syslog_port must be greater than 0".into());
            }
        }
        if self.syslog_facility > 23 {
            return Err("log.syslog_facility must be between 0 and 23".into());
        }
        Ok(())
    }
}
