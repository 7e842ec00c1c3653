//! Configuration models for admission, pools, tasks, logging and CPU offload.

pub mod log;
pub mod pool;
pub mod settings;

pub use self::log::{LogConfig, LogDestination, LogLevel};
pub use self::pool::{AdmissionConfig, CpuConfig, PoolConfig, TaskConfig};
pub use self::settings::{env_pairs, OrchestratorConfig, ENV_PREFIX};
