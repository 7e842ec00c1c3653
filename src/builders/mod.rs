//! Builders to construct orchestration components from configuration.

pub mod pool_builder;

pub use pool_builder::{
    build_admission, build_cpu_pool, build_orchestrator, build_resource_pool, build_runner,
};
