//! In-memory dataset provider with configurable latency and injected failures.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::json;

use crate::core::{OperationError, TaskContext};
use crate::infra::dataset::{DatasetHandle, DatasetProvider};

/// Provider backed by a map of measurement -> signal -> samples.
///
/// Every call waits for the configured latency through [`TaskContext::suspend`],
/// so deadlines and cancellation interrupt it like real I/O.
#[derive(Debug, Default)]
pub struct InMemoryDatasetProvider {
    measurements: RwLock<HashMap<String, HashMap<String, Vec<f64>>>>,
    unreadable: RwLock<HashSet<String>>,
    open_latency: Duration,
    load_latency: Duration,
    opens: AtomicU64,
    loads: AtomicU64,
}

impl InMemoryDatasetProvider {
    /// Empty provider with no latency.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a signal.
    #[must_use]
    pub fn with_signal(self, measurement: &str, signal: &str, values: Vec<f64>) -> Self {
        self.insert_signal(measurement, signal, values);
        self
    }

    /// Delay applied to `open_handle` and `load_values`.
    #[must_use]
    pub const fn with_latency(mut self, open: Duration, load: Duration) -> Self {
        self.open_latency = open;
        self.load_latency = load;
        self
    }

    /// Add or replace a signal on a shared provider.
    pub fn insert_signal(&self, measurement: &str, signal: &str, values: Vec<f64>) {
        self.measurements
            .write()
            .entry(measurement.to_string())
            .or_default()
            .insert(signal.to_string(), values);
    }

    /// Make every read of `measurement` fail as a corrupt file.
    pub fn fail_reads(&self, measurement: &str) {
        self.unreadable.write().insert(measurement.to_string());
    }

    /// Number of `open_handle` calls that reached the provider.
    #[must_use]
    pub fn opens(&self) -> u64 {
        self.opens.load(Ordering::Relaxed)
    }

    /// Number of `load_values` calls that reached the provider.
    #[must_use]
    pub fn loads(&self) -> u64 {
        self.loads.load(Ordering::Relaxed)
    }

    fn check_readable(&self, measurement: &str) -> Result<(), OperationError> {
        if self.unreadable.read().contains(measurement) {
            return Err(
                OperationError::server(format!("measurement `{measurement}` could not be read"))
                    .with_payload(json!({ "measurement": measurement })),
            );
        }
        Ok(())
    }
}

#[async_trait]
impl DatasetProvider for InMemoryDatasetProvider {
    async fn open_handle(
        &self,
        measurement: &str,
        signal: &str,
        ctx: &TaskContext,
    ) -> Result<DatasetHandle, OperationError> {
        ctx.checkpoint()?;
        self.opens.fetch_add(1, Ordering::Relaxed);
        ctx.suspend(tokio::time::sleep(self.open_latency)).await?;
        self.check_readable(measurement)?;

        let measurements = self.measurements.read();
        let signals = measurements.get(measurement).ok_or_else(|| {
            OperationError::client(format!("measurement `{measurement}` not found"))
                .with_payload(json!({ "measurement": measurement }))
        })?;
        let values = signals.get(signal).ok_or_else(|| {
            OperationError::client(format!("signal `{signal}` not found in `{measurement}`"))
                .with_payload(json!({ "measurement": measurement, "signal": signal }))
        })?;
        Ok(DatasetHandle {
            measurement: measurement.to_string(),
            signal: signal.to_string(),
            samples: values.len(),
        })
    }

    async fn load_values(
        &self,
        handle: &DatasetHandle,
        ctx: &TaskContext,
    ) -> Result<Vec<f64>, OperationError> {
        ctx.checkpoint()?;
        self.loads.fetch_add(1, Ordering::Relaxed);
        ctx.suspend(tokio::time::sleep(self.load_latency)).await?;
        self.check_readable(&handle.measurement)?;

        self.measurements
            .read()
            .get(&handle.measurement)
            .and_then(|signals| signals.get(&handle.signal))
            .cloned()
            .ok_or_else(|| {
                OperationError::server(format!(
                    "signal `{}` disappeared from `{}`",
                    handle.signal, handle.measurement
                ))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Deadline, FailureClass};
    use crate::util::serde::CorrelationId;
    use tokio_util::sync::CancellationToken;

    fn ctx() -> TaskContext {
        TaskContext::new(
            Deadline::after(Duration::from_secs(1)),
            CancellationToken::new(),
            CorrelationId::new(),
        )
    }

    #[tokio::test]
    async fn missing_signal_is_client_error() {
        let provider = InMemoryDatasetProvider::new().with_signal("m1", "speed", vec![1.0]);
        let err = provider.open_handle("m1", "torque", &ctx()).await.unwrap_err();
        assert_eq!(err.class, FailureClass::Client);
        assert!(err.payload.is_some());
    }

    #[tokio::test]
    async fn unreadable_measurement_is_server_error() {
        let provider = InMemoryDatasetProvider::new().with_signal("m1", "speed", vec![1.0]);
        provider.fail_reads("m1");
        let err = provider.open_handle("m1", "speed", &ctx()).await.unwrap_err();
        assert_eq!(err.class, FailureClass::Server);
    }

    #[tokio::test]
    async fn handle_carries_sample_count_only() {
        let provider = InMemoryDatasetProvider::new().with_signal("m1", "speed", vec![1.0, 2.0, 3.0]);
        let handle = provider.open_handle("m1", "speed", &ctx()).await.unwrap();
        assert_eq!(handle.samples, 3);
        assert_eq!(provider.loads(), 0);
    }
}
