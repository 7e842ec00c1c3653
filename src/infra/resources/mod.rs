//! Resource factories for the pool.

pub mod memory;

pub use memory::{FactoryCounters, InMemoryResourceFactory, MemoryResource};
