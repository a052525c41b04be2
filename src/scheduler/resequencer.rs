use std::collections::BTreeMap;
use std::time::Instant;

use crate::common::{Frame, SequenceId};
use crate::detection::DetectionBuffer;
use crate::pool::PoolTag;

#[derive(Debug)]
pub struct PendingResult {
    pub sequence: SequenceId,
    pub frame: Frame,
    pub detections: DetectionBuffer,
    pub origin: PoolTag,
    pub dispatched_at: Instant,
}

/// Completed results waiting for their turn, released strictly in
/// sequence order.
#[derive(Debug, Default)]
pub struct Resequencer {
    pending: BTreeMap<SequenceId, PendingResult>,
    next_expected: SequenceId,
}

impl Resequencer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false and keeps the stored entry if the id is already pending
    /// or was already released.
    pub fn insert(&mut self, result: PendingResult) -> bool {
        if result.sequence < self.next_expected || self.pending.contains_key(&result.sequence) {
            return false;
        }
        self.pending.insert(result.sequence, result);
        true
    }

    /// Removes the result for `next_expected`, if it has arrived.
    pub fn pop_ready(&mut self) -> Option<PendingResult> {
        let result = self.pending.remove(&self.next_expected)?;
        self.next_expected = self.next_expected.next();
        Some(result)
    }

    pub fn next_expected(&self) -> SequenceId {
        self.next_expected
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::{OutputLayout, OBJECT_SIZE};
    use image::DynamicImage;

    fn result(sequence: u64) -> PendingResult {
        let layout = OutputLayout {
            max_proposals: 1,
            object_size: OBJECT_SIZE,
        };
        PendingResult {
            sequence: SequenceId::new(sequence),
            frame: Frame::captured_now(DynamicImage::new_rgb8(2, 2)),
            detections: DetectionBuffer::new(vec![-1.0; OBJECT_SIZE], layout).unwrap(),
            origin: PoolTag::Primary,
            dispatched_at: Instant::now(),
        }
    }

    #[test]
    fn holds_results_until_gap_is_filled() {
        let mut reseq = Resequencer::new();
        assert!(reseq.insert(result(1)));
        assert!(reseq.insert(result(2)));
        assert!(reseq.pop_ready().is_none());

        assert!(reseq.insert(result(0)));
        let released: Vec<u64> = std::iter::from_fn(|| reseq.pop_ready())
            .map(|r| r.sequence.value())
            .collect();
        assert_eq!(released, vec![0, 1, 2]);
        assert_eq!(reseq.next_expected(), SequenceId::new(3));
        assert!(reseq.is_empty());
    }

    #[test]
    fn rejects_duplicates_and_released_ids() {
        let mut reseq = Resequencer::new();
        assert!(reseq.insert(result(0)));
        assert!(!reseq.insert(result(0)));
        assert_eq!(reseq.len(), 1);

        reseq.pop_ready().unwrap();
        assert!(!reseq.insert(result(0)));
        assert!(reseq.is_empty());
    }
}
