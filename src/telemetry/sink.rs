//! Append-only structured log sink writing JSON lines.
//!
//! `emit` never fails: write errors and records emitted after `close` are
//! counted as dropped instead of surfacing to the caller. Sensitive values are
//! replaced before a record is serialised.

use std::fmt;
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::{LogConfig, LogDestination, LogLevel};
use crate::core::{ErrorContext, OrchestratorError};
use crate::telemetry::writer::{MemoryWriter, RotatingFileWriter, SyslogWriter};
use crate::util::clock::now_ms;

/// Replacement written in place of sensitive values.
pub const REDACTED: &str = "[REDACTED]";

/// Field names whose values are always redacted (matched case-insensitively as substrings).
pub const SENSITIVE_KEYS: [&str; 6] = [
    "password",
    "secret",
    "token",
    "api_key",
    "authorization",
    "credential",
];

/// One serialised log line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    /// Milliseconds since the epoch.
    pub timestamp_ms: u128,
    /// Severity.
    pub level: LogLevel,
    /// Emitting module or component.
    pub target: String,
    /// Human-readable message.
    pub message: String,
    /// Correlation id of the work the record belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    /// Structured fields.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub fields: Map<String, Value>,
}

/// Builder for the payload of one record.
#[derive(Debug, Clone, Default)]
pub struct LogFields {
    message: String,
    target: String,
    correlation_id: Option<String>,
    fields: Vec<(String, Value, bool)>,
}

impl LogFields {
    /// Start a record with `message`.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            target: env!("CARGO_PKG_NAME").to_string(),
            ..Self::default()
        }
    }

    /// Override the target.
    #[must_use]
    pub fn target(mut self, target: impl Into<String>) -> Self {
        self.target = target.into();
        self
    }

    /// Add a field.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.push((key.into(), value.into(), false));
        self
    }

    /// Add a field whose value must never reach the output.
    #[must_use]
    pub fn secret(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.push((key.into(), value.into(), true));
        self
    }

    /// Attach a correlation id.
    #[must_use]
    pub fn correlated(mut self, correlation_id: impl fmt::Display) -> Self {
        self.correlation_id = Some(correlation_id.to_string());
        self
    }

    /// Attach an error chain: its correlation id, rendering and classification.
    #[must_use]
    pub fn with_context(self, context: &ErrorContext) -> Self {
        let report = context.report();
        self.correlated(report.correlation_id)
            .with("error", context.render())
            .with("root_kind", report.root_kind)
            .with(
                "class",
                serde_json::to_value(report.class).unwrap_or(Value::Null),
            )
    }
}

/// Sink counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SinkStats {
    /// Records written.
    pub emitted: u64,
    /// Records lost to write failures or emitted after close.
    pub dropped: u64,
    /// Field values replaced with [`REDACTED`].
    pub redacted: u64,
}

enum Output {
    Stream(Box<dyn Write + Send>),
    Syslog(SyslogWriter),
}

impl Output {
    fn write_record(&mut self, level: LogLevel, line: &[u8]) -> io::Result<()> {
        match self {
            Self::Stream(writer) => writer.write_all(line),
            Self::Syslog(syslog) => syslog.send(level, line),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Stream(writer) => writer.flush(),
            Self::Syslog(_) => Ok(()),
        }
    }
}

/// Structured log sink.
pub struct LogSink {
    min_level: LogLevel,
    output: Mutex<Output>,
    memory: Option<MemoryWriter>,
    closed: AtomicBool,
    emitted: AtomicU64,
    dropped: AtomicU64,
    redacted: AtomicU64,
}

impl fmt::Debug for LogSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogSink")
            .field("min_level", &self.min_level)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl LogSink {
    /// Build the sink described by `cfg`.
    ///
    /// # Errors
    ///
    /// [`OrchestratorError::InvalidConfig`] for invalid settings or a log file that
    /// cannot be opened.
    pub fn from_config(cfg: &LogConfig) -> Result<Self, OrchestratorError> {
        cfg.validate().map_err(OrchestratorError::InvalidConfig)?;
        let sink = match cfg.destination {
            LogDestination::Stderr => Self::with_writer(cfg.min_level, io::stderr()),
            LogDestination::Stdout => Self::with_writer(cfg.min_level, io::stdout()),
            LogDestination::Memory => Self::in_memory(cfg.min_level),
            LogDestination::File => {
                let writer = RotatingFileWriter::open(
                    &cfg.file_path,
                    cfg.file_max_bytes,
                    cfg.file_backups,
                )
                .map_err(|e| {
                    OrchestratorError::InvalidConfig(format!(
                        "cannot open log file {}: {e}",
                        cfg.file_path.display()
                    ))
                })?;
                Self::with_writer(cfg.min_level, writer)
            }
            LogDestination::Syslog => {
                let writer =
                    SyslogWriter::connect(&cfg.syslog_host, cfg.syslog_port, cfg.syslog_facility)
                        .map_err(|e| {
                            OrchestratorError::InvalidConfig(format!(
                                "cannot reach syslog collector {}:{}: {e}",
                                cfg.syslog_host, cfg.syslog_port
                            ))
                        })?;
                Self::with_syslog(cfg.min_level, writer)
            }
        };
        Ok(sink)
    }

    /// Sink writing to `writer`.
    pub fn with_writer(min_level: LogLevel, writer: impl Write + Send + 'static) -> Self {
        Self::build(min_level, Output::Stream(Box::new(writer)), None)
    }

    /// Sink sending every record as a datagram through `writer`.
    #[must_use]
    pub fn with_syslog(min_level: LogLevel, writer: SyslogWriter) -> Self {
        Self::build(min_level, Output::Syslog(writer), None)
    }

    /// Sink keeping records in memory, readable through [`records`](Self::records).
    #[must_use]
    pub fn in_memory(min_level: LogLevel) -> Self {
        let memory = MemoryWriter::new();
        Self::build(min_level, Output::Stream(Box::new(memory.clone())), Some(memory))
    }

    fn build(min_level: LogLevel, output: Output, memory: Option<MemoryWriter>) -> Self {
        Self {
            min_level,
            output: Mutex::new(output),
            memory,
            closed: AtomicBool::new(false),
            emitted: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            redacted: AtomicU64::new(0),
        }
    }

    /// Lowest level written.
    #[must_use]
    pub const fn min_level(&self) -> LogLevel {
        self.min_level
    }

    /// Whether a record at `level` would be written.
    #[must_use]
    pub fn enabled(&self, level: LogLevel) -> bool {
        level >= self.min_level
    }

    /// Write one record. Never fails.
    pub fn emit(&self, level: LogLevel, fields: LogFields) {
        if !self.enabled(level) {
            return;
        }
        if self.closed.load(Ordering::Acquire) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return;
        }

        let mut map = Map::with_capacity(fields.fields.len());
        for (key, value, sensitive) in fields.fields {
            if sensitive || is_sensitive_key(&key) {
                self.redacted.fetch_add(1, Ordering::Relaxed);
                map.insert(key, Value::String(REDACTED.into()));
            } else {
                map.insert(key, value);
            }
        }
        let record = LogRecord {
            timestamp_ms: now_ms(),
            level,
            target: fields.target,
            message: fields.message,
            correlation_id: fields.correlation_id,
            fields: map,
        };

        let Ok(mut line) = serde_json::to_vec(&record) else {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return;
        };
        line.push(b'\n');
        if self.output.lock().write_record(level, &line).is_ok() {
            self.emitted.fetch_add(1, Ordering::Relaxed);
        } else {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Flush buffered output. Errors are ignored.
    pub fn flush(&self) {
        let _ = self.output.lock().flush();
    }

    /// Flush and stop writing. Returns `true` only for the call that closed the sink.
    pub fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.flush();
        true
    }

    /// Whether [`close`](Self::close) has run.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Current counters.
    #[must_use]
    pub fn stats(&self) -> SinkStats {
        SinkStats {
            emitted: self.emitted.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            redacted: self.redacted.load(Ordering::Relaxed),
        }
    }

    /// Records written so far. Empty unless built with [`in_memory`](Self::in_memory).
    #[must_use]
    pub fn records(&self) -> Vec<LogRecord> {
        self.memory.as_ref().map_or_else(Vec::new, |memory| {
            memory
                .lines()
                .iter()
                .filter_map(|line| serde_json::from_str(line).ok())
                .collect()
        })
    }
}

fn is_sensitive_key(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    SENSITIVE_KEYS.iter().any(|needle| key.contains(needle))
}
