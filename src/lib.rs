pub mod backend;
pub mod common;
pub mod config;
pub mod detection;
pub mod error;
pub mod metrics;
pub mod pool;
pub mod render;
pub mod scheduler;
pub mod source;

pub use error::{AppError, BackendError};
pub use scheduler::{RunSummary, Scheduler, SchedulerBuilder, StopReason};
