//! Infrastructure adapters: dataset providers and resource factories.

pub mod dataset;
pub mod resources;

pub use dataset::{
    DatasetExecutor, DatasetHandle, DatasetOperation, DatasetOutput, DatasetProvider,
    DatasetValues, InMemoryDatasetProvider, ValueSummary,
};
pub use resources::{FactoryCounters, InMemoryResourceFactory, MemoryResource};
