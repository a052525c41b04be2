use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::error::AppError;

/// Write side of the single fault slot. Only the first raised fault reaches
/// the control loop; later ones are dropped.
#[derive(Debug, Clone)]
pub struct FaultSlot {
    tx: Arc<Mutex<Option<oneshot::Sender<AppError>>>>,
}

/// Read side, owned by the control loop.
#[derive(Debug)]
pub struct FaultWatch {
    rx: Option<oneshot::Receiver<AppError>>,
}

pub fn fault_slot() -> (FaultSlot, FaultWatch) {
    let (tx, rx) = oneshot::channel();
    (
        FaultSlot {
            tx: Arc::new(Mutex::new(Some(tx))),
        },
        FaultWatch { rx: Some(rx) },
    )
}

impl FaultSlot {
    /// Returns whether this fault was the one retained.
    pub fn raise(&self, fault: AppError) -> bool {
        let sender = self
            .tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match sender {
            Some(tx) => {
                warn!("Captured fault: {}", fault);
                // a closed receiver means the loop is already gone
                let _ = tx.send(fault);
                true
            }
            None => {
                debug!("Dropping fault after the first: {}", fault);
                false
            }
        }
    }

    pub fn is_raised(&self) -> bool {
        self.tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }
}

impl FaultWatch {
    pub fn try_take(&mut self) -> Option<AppError> {
        let fault = self.rx.as_mut()?.try_recv().ok()?;
        self.rx = None;
        Some(fault)
    }

    /// Resolves with the first fault. Pends forever once the fault has been
    /// taken or every slot handle is gone.
    pub async fn raised(&mut self) -> Option<AppError> {
        let Some(rx) = self.rx.as_mut() else {
            return std::future::pending().await;
        };
        let fault = rx.await.ok();
        self.rx = None;
        match fault {
            Some(fault) => Some(fault),
            None => std::future::pending().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::SequenceId;

    fn fault(sequence: u64) -> AppError {
        AppError::CallbackFault {
            sequence: SequenceId::new(sequence),
            reason: "boom".to_string(),
        }
    }

    #[test]
    fn keeps_only_the_first_fault() {
        let (slot, mut watch) = fault_slot();
        assert!(watch.try_take().is_none());

        assert!(slot.raise(fault(3)));
        assert!(!slot.clone().raise(fault(4)));
        assert!(slot.is_raised());

        match watch.try_take() {
            Some(AppError::CallbackFault { sequence, .. }) => {
                assert_eq!(sequence, SequenceId::new(3))
            }
            other => panic!("unexpected fault: {:?}", other),
        }
        assert!(watch.try_take().is_none());
    }

    #[tokio::test]
    async fn raised_wakes_on_fault_from_another_thread() {
        let (slot, mut watch) = fault_slot();
        let raiser = std::thread::spawn(move || slot.raise(fault(9)));

        let fault = watch.raised().await;
        assert!(raiser.join().unwrap());
        assert!(matches!(fault, Some(AppError::CallbackFault { .. })));
    }
}
