//! Measurement dataset provider seam and its executor adapter.
//!
//! A provider exposes two operations: `open_handle` returns lightweight
//! metadata without touching bulk data, `load_values` reads the samples. The
//! [`DatasetExecutor`] dispatches [`DatasetOperation`]s to a provider so both run
//! as ordinary deadline-bound work items.

pub mod memory;

use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::{Lease, OperationError, OperationExecutor, TaskContext};

pub use memory::InMemoryDatasetProvider;

/// Metadata of one signal inside a measurement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetHandle {
    /// Measurement identifier.
    pub measurement: String,
    /// Signal name within the measurement.
    pub signal: String,
    /// Number of samples available.
    pub samples: usize,
}

/// Basic statistics over loaded values.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValueSummary {
    /// Smallest sample.
    pub min: f64,
    /// Largest sample.
    pub max: f64,
    /// Arithmetic mean.
    pub mean: f64,
}

impl ValueSummary {
    /// Summarise `values`; `None` when empty.
    #[must_use]
    pub fn of(values: &[f64]) -> Option<Self> {
        let (&first, rest) = values.split_first()?;
        let (min, max, sum) = rest
            .iter()
            .fold((first, first, first), |(min, max, sum), &v| (min.min(v), max.max(v), sum + v));
        #[allow(clippy::cast_precision_loss)]
        let mean = sum / values.len() as f64;
        Some(Self { min, max, mean })
    }
}

/// Samples of one signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetValues {
    /// Handle the values were read through.
    pub handle: DatasetHandle,
    /// The samples.
    pub values: Vec<f64>,
    /// Statistics, absent for an empty signal.
    pub summary: Option<ValueSummary>,
}

/// Operation descriptor carried by dataset work items.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum DatasetOperation {
    /// Resolve a signal's metadata only.
    OpenHandle {
        /// Measurement identifier.
        measurement: String,
        /// Signal name.
        signal: String,
    },
    /// Resolve a signal and read all its samples.
    LoadValues {
        /// Measurement identifier.
        measurement: String,
        /// Signal name.
        signal: String,
    },
}

/// Result of a [`DatasetOperation`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DatasetOutput {
    /// Output of `open_handle`.
    Handle(DatasetHandle),
    /// Output of `load_values`.
    Values(DatasetValues),
}

/// External measurement-data library.
///
/// Implementations should check `ctx` around every blocking step.
#[async_trait]
pub trait DatasetProvider: Send + Sync + 'static {
    /// Resolve `signal` in `measurement` without loading samples.
    ///
    /// A missing signal is a client error; an unreadable measurement a server error.
    async fn open_handle(
        &self,
        measurement: &str,
        signal: &str,
        ctx: &TaskContext,
    ) -> Result<DatasetHandle, OperationError>;

    /// Read every sample behind `handle`.
    async fn load_values(
        &self,
        handle: &DatasetHandle,
        ctx: &TaskContext,
    ) -> Result<Vec<f64>, OperationError>;
}

/// Runs [`DatasetOperation`]s against a provider.
///
/// Generic over the pooled resource type so it can be paired with any factory;
/// the dataset library manages its own file access and ignores the leases.
pub struct DatasetExecutor<P, R> {
    provider: Arc<P>,
    _resource: PhantomData<fn() -> R>,
}

impl<P, R> Clone for DatasetExecutor<P, R> {
    fn clone(&self) -> Self {
        Self {
            provider: Arc::clone(&self.provider),
            _resource: PhantomData,
        }
    }
}

impl<P, R> DatasetExecutor<P, R> {
    /// Wrap `provider`.
    pub fn new(provider: Arc<P>) -> Self {
        Self {
            provider,
            _resource: PhantomData,
        }
    }

    /// The wrapped provider.
    #[must_use]
    pub const fn provider(&self) -> &Arc<P> {
        &self.provider
    }
}

#[async_trait]
impl<P, R> OperationExecutor for DatasetExecutor<P, R>
where
    P: DatasetProvider,
    R: Send + 'static,
{
    type Operation = DatasetOperation;
    type Resource = R;
    type Output = DatasetOutput;

    async fn execute(
        &self,
        operation: &DatasetOperation,
        _leases: &mut [Lease<R>],
        ctx: TaskContext,
    ) -> Result<DatasetOutput, OperationError> {
        match operation {
            DatasetOperation::OpenHandle {
                measurement,
                signal,
            } => {
                let handle = self.provider.open_handle(measurement, signal, &ctx).await?;
                Ok(DatasetOutput::Handle(handle))
            }
            DatasetOperation::LoadValues {
                measurement,
                signal,
            } => {
                let handle = self.provider.open_handle(measurement, signal, &ctx).await?;
                ctx.checkpoint()?;
                let values = self.provider.load_values(&handle, &ctx).await?;
                let (values, summary) = ctx
                    .offload(move || {
                        let summary = ValueSummary::of(&values);
                        (values, summary)
                    })
                    .await?;
                Ok(DatasetOutput::Values(DatasetValues {
                    handle,
                    values,
                    summary,
                }))
            }
        }
    }
}
