pub mod completion;
pub mod simulated;

pub use completion::{Completion, CompletionEvent, Ticket};
pub use simulated::SimulatedBackend;

use crate::common::Frame;
use crate::config::ExecutionProfile;
use crate::detection::ModelShape;
use crate::error::BackendError;
use crate::pool::{PoolTag, WorkerId};

/// One frame sent to one worker.
#[derive(Debug)]
pub struct Submission {
    pub worker: WorkerId,
    pub frame: Frame,
    pub completion: Completion,
}

/// The engine that runs inference for the scheduler.
///
/// `submit` must not block. The backend finishes every submission by calling
/// [`Completion::complete`] exactly once, from whichever thread it likes.
pub trait InferenceBackend: Send {
    fn model_shape(&self) -> ModelShape;

    /// Called once per pool at startup, before any submission.
    fn configure(&mut self, pool: PoolTag, profile: &ExecutionProfile) -> Result<(), BackendError>;

    fn submit(&self, submission: Submission);

    /// Per-pool performance counters, if the backend keeps any.
    fn performance_report(&self, _pool: PoolTag) -> Option<String> {
        None
    }
}
