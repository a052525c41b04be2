use std::time::Instant;
use tokio::sync::mpsc;
use tracing::debug;

use crate::common::{Frame, SequenceId};
use crate::detection::{DetectionBuffer, OutputLayout};
use crate::error::{AppError, BackendError};
use crate::pool::{PoolTag, WorkerId};
use crate::scheduler::fault::FaultSlot;

/// What the dispatcher knew about a submission when it sent it.
#[derive(Debug, Clone)]
pub struct Ticket {
    pub sequence: SequenceId,
    pub worker: WorkerId,
    /// Pool that was active at dispatch time.
    pub origin: PoolTag,
    pub frame: Frame,
    pub dispatched_at: Instant,
}

/// Posted to the control loop once per submission.
#[derive(Debug)]
pub struct CompletionEvent {
    pub ticket: Ticket,
    /// `None` when the completion faulted; the worker is still freed.
    pub detections: Option<DetectionBuffer>,
    pub completed_at: Instant,
}

/// Continuation handed to the backend with each submission.
///
/// Consumed by [`Completion::complete`], so a submission completes at most
/// once. Dropping it unfinished completes it with [`BackendError::Abandoned`].
#[derive(Debug)]
pub struct Completion {
    sequence: SequenceId,
    worker: WorkerId,
    inner: Option<Pending>,
}

#[derive(Debug)]
struct Pending {
    ticket: Ticket,
    layout: OutputLayout,
    events: mpsc::UnboundedSender<CompletionEvent>,
    faults: FaultSlot,
}

impl Completion {
    pub(crate) fn new(
        ticket: Ticket,
        layout: OutputLayout,
        events: mpsc::UnboundedSender<CompletionEvent>,
        faults: FaultSlot,
    ) -> Self {
        Self {
            sequence: ticket.sequence,
            worker: ticket.worker,
            inner: Some(Pending {
                ticket,
                layout,
                events,
                faults,
            }),
        }
    }

    pub fn sequence(&self) -> SequenceId {
        self.sequence
    }

    pub fn worker(&self) -> WorkerId {
        self.worker
    }

    /// Safe to call from any thread.
    pub fn complete(mut self, outcome: Result<Vec<f32>, BackendError>) {
        if let Some(pending) = self.inner.take() {
            pending.finish(outcome);
        }
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        if let Some(pending) = self.inner.take() {
            pending.finish(Err(BackendError::Abandoned(self.worker)));
        }
    }
}

impl Pending {
    fn finish(self, outcome: Result<Vec<f32>, BackendError>) {
        let sequence = self.ticket.sequence;
        debug!("Got completion for #{} on {}", sequence, self.ticket.worker);

        let detections = match outcome.and_then(|raw| DetectionBuffer::new(raw, self.layout)) {
            Ok(buffer) => Some(buffer),
            Err(e) => {
                self.faults.raise(AppError::CallbackFault {
                    sequence,
                    reason: e.to_string(),
                });
                None
            }
        };

        let event = CompletionEvent {
            ticket: self.ticket,
            detections,
            completed_at: Instant::now(),
        };
        if self.events.send(event).is_err() {
            debug!("Control loop is gone, dropping completion #{}", sequence);
        }
    }
}
