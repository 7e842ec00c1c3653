//! Process lifecycle and boundary API surface.

pub mod api;
pub mod lifecycle;

pub use api::{
    health, submit_batch, BatchReport, BatchSubmission, Health, ItemReport, ItemSubmission,
};
pub use lifecycle::{Runtime, ShutdownReport};
