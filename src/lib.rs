//! # Measurement Orchestrator
//!
//! A bounded-concurrency task orchestration core for measurement dataset retrieval.
//!
//! Callers submit batches of work items. Each item names an operation, the
//! resource kinds it needs (database sessions, HTTP connections) and a deadline.
//! The orchestrator admits items against a global concurrency limit, leases
//! their resources from per-kind pools, runs them under their deadline with
//! cooperative cancellation, and returns every outcome in submission order.
//!
//! ## Key Features
//!
//! - **Admission Control**: at most `max_concurrent` items run at once; waiting
//!   for admission counts against the item's own deadline
//! - **Resource Pools**: bounded per-kind pools with reuse, leak detection and
//!   ordered shutdown
//! - **Timed Runner**: deadline and cancellation enforcement at every suspension
//!   point, with a grace period for cooperative stop
//! - **Error Context Chains**: layered human context over a preserved root cause,
//!   classified as client or server failures
//! - **Structured Logging**: JSON-lines records with redaction of sensitive fields
//!   and correlation ids lifted from spans
//! - **CPU Offload**: dedicated OS threads for CPU-bound post-processing
//!
//! ## Running a batch
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//! use measurement_orchestrator::builders::build_orchestrator;
//! use measurement_orchestrator::config::OrchestratorConfig;
//! use measurement_orchestrator::core::{Deadline, WorkItem};
//! use measurement_orchestrator::infra::{
//!     DatasetExecutor, DatasetOperation, InMemoryDatasetProvider, InMemoryResourceFactory,
//! };
//! use measurement_orchestrator::util::ResourceKind;
//!
//! let provider = Arc::new(InMemoryDatasetProvider::new().with_signal("m1", "temp", vec![1.0, 2.0]));
//! let orchestrator = build_orchestrator(
//!     &OrchestratorConfig::default(),
//!     InMemoryResourceFactory::new(),
//!     DatasetExecutor::new(provider),
//!     None,
//! )?;
//!
//! let item = WorkItem::new(
//!     "open-temp",
//!     DatasetOperation::OpenHandle { measurement: "m1".into(), signal: "temp".into() },
//!     Deadline::after(Duration::from_secs(2)),
//! )
//! .requiring(ResourceKind::DbSession);
//!
//! let results = orchestrator.run_batch(vec![item]).await?;
//! assert_eq!(results.summary().succeeded, 1);
//! ```
//!
//! For a full process lifecycle with configuration from the environment and a
//! global log sink, see [`runtime::Runtime`].

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Admission, resource pools, timed execution, orchestration and error chains.
pub mod core;
/// Configuration models and environment loading.
pub mod config;
/// Builders to construct orchestration components from configuration.
pub mod builders;
/// Dataset providers, executors and in-memory resource factories.
pub mod infra;
/// Process lifecycle and boundary API surface.
pub mod runtime;
/// Structured log sink and its `tracing` layer.
pub mod telemetry;
/// Shared utilities.
pub mod util;
