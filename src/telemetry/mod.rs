//! Structured logging: the process-wide sink and its `tracing` integration.
//!
//! Components log through the `tracing` macros. [`init_global`] installs a
//! subscriber whose [`SinkLayer`] turns every event into a JSON record in the
//! global [`LogSink`]. Tests build their own sink and install it for the current
//! thread with [`scoped`].

pub mod layer;
pub mod sink;
pub mod writer;

use std::sync::{Arc, OnceLock};

use tracing::subscriber::DefaultGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::LogConfig;
use crate::core::OrchestratorError;

pub use self::layer::SinkLayer;
pub use self::sink::{LogFields, LogRecord, LogSink, SinkStats, REDACTED, SENSITIVE_KEYS};
pub use self::writer::{MemoryWriter, RotatingFileWriter, SyslogWriter};

static GLOBAL_SINK: OnceLock<Arc<LogSink>> = OnceLock::new();

/// Initialise the process-wide sink once and install it as the global subscriber.
///
/// Later calls return the sink created by the first one. If another global
/// subscriber is already installed the sink is still created and usable
/// directly, but `tracing` events will not reach it.
///
/// # Errors
///
/// [`OrchestratorError::InvalidConfig`] if the sink cannot be built.
pub fn init_global(cfg: &LogConfig) -> Result<Arc<LogSink>, OrchestratorError> {
    if let Some(sink) = GLOBAL_SINK.get() {
        return Ok(Arc::clone(sink));
    }
    let sink = Arc::new(LogSink::from_config(cfg)?);
    let sink = Arc::clone(GLOBAL_SINK.get_or_init(|| sink));

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cfg.min_level.as_str()));
    if tracing_subscriber::registry()
        .with(filter)
        .with(SinkLayer::new(Arc::clone(&sink)))
        .try_init()
        .is_err()
    {
        tracing::debug!("global subscriber already set, log sink not installed");
    }
    Ok(sink)
}

/// The process-wide sink, if initialised.
#[must_use]
pub fn global() -> Option<Arc<LogSink>> {
    GLOBAL_SINK.get().cloned()
}

/// Flush and close the process-wide sink. Returns `true` only for the first call.
pub fn shutdown_global() -> bool {
    GLOBAL_SINK.get().is_some_and(|sink| sink.close())
}

/// Install `sink` as the subscriber for the current thread until the guard drops.
#[must_use = "the sink is uninstalled when the guard is dropped"]
pub fn scoped(sink: Arc<LogSink>) -> DefaultGuard {
    let filter = EnvFilter::new(sink.min_level().as_str());
    tracing_subscriber::registry()
        .with(filter)
        .with(SinkLayer::new(sink))
        .set_default()
}
