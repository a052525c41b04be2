use thiserror::Error;

use crate::common::SequenceId;
use crate::pool::{PoolTag, WorkerId};

// Main Application Error Type

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Failed to load settings: {0}")]
    Settings(#[from] config::ConfigError),
    #[error("Source error: {0}")]
    Source(String),
    #[error("Model shape error: {0}")]
    ModelShape(String),
    #[error("Completion of frame #{sequence} failed: {reason}")]
    CallbackFault { sequence: SequenceId, reason: String },
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),
    #[error("Renderer error: {0}")]
    Render(String),
}

// Inference Backend Error Type
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BackendError {
    #[error("Inference failed: {0}")]
    Inference(String),
    #[error("Submission on worker {0} was dropped before it completed")]
    Abandoned(WorkerId),
    #[error("Detection buffer holds {actual} values, expected {expected}")]
    MalformedOutput { expected: usize, actual: usize },
    #[error("Failed to configure the {0} pool: {1}")]
    Configure(PoolTag, String),
}
