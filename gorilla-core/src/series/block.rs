//! Compressed snapshot of one past window, resident in a ring slot

use crate::compression::{decode_points, is_empty_payload};
use crate::{BlockId, Point, TimeRange, Timestamp};
use bytes::Bytes;
use crossbeam_channel::Sender;
use tracing::warn;

/// Result of querying one ring slot
#[derive(Debug)]
pub struct SlotResult {
    /// Ring slot the points came from
    pub slot: usize,
    /// Points within the queried range, ascending
    pub points: Vec<Point>,
}

/// Immutable compressed block
#[derive(Debug, Clone)]
pub struct Block {
    id: BlockId,
    start: Timestamp,
    end: Timestamp,
    count: usize,
    payload: Bytes,
}

impl Default for Block {
    fn default() -> Self {
        Self::empty()
    }
}

impl Block {
    /// Id carried by a slot that never held a block
    pub const EMPTY_ID: BlockId = BlockId::MIN;

    /// Create a block
    pub fn new(id: BlockId, start: Timestamp, end: Timestamp, count: usize, payload: Bytes) -> Self {
        Self {
            id,
            start,
            end,
            count,
            payload,
        }
    }

    /// A slot with no materialized data
    pub fn empty() -> Self {
        Self::new(Self::EMPTY_ID, 0, -1, 0, Bytes::new())
    }

    pub fn id(&self) -> BlockId {
        self.id
    }

    pub fn start(&self) -> Timestamp {
        self.start
    }

    pub fn end(&self) -> Timestamp {
        self.end
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Check if the payload carries no points
    pub fn is_empty(&self) -> bool {
        is_empty_payload(&self.payload)
    }

    /// Check if the block may hold points in `range`
    pub fn overlaps(&self, range: TimeRange) -> bool {
        !self.is_empty() && self.start <= range.end && self.end >= range.start
    }

    /// Decode the points in `range` and send them tagged with `slot`
    ///
    /// Exactly one result is sent per call; a decode failure is logged and
    /// reported as an empty result.
    pub fn range_points(&self, slot: usize, range: TimeRange, tx: &Sender<SlotResult>) {
        let points = if self.is_empty() {
            Vec::new()
        } else {
            match decode_points(&self.payload) {
                Ok(points) => points.into_iter().filter(|p| range.contains(p.timestamp)).collect(),
                Err(e) => {
                    warn!(block_id = self.id, slot, error = %e, "Failed to decode block");
                    Vec::new()
                }
            }
        };

        // The collector may have given up on this read
        let _ = tx.send(SlotResult { slot, points });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compression::encode_points;
    use crossbeam_channel::unbounded;

    fn block_with(points: &[Point]) -> Block {
        let payload = encode_points(0, points.iter().copied()).unwrap();
        Block::new(0, 0, 59, points.len(), payload)
    }

    #[test]
    fn test_range_points_filters() {
        let block = block_with(&[Point::new(0, 1.0), Point::new(10, 2.0), Point::new(59, 3.0)]);
        let (tx, rx) = unbounded();

        block.range_points(3, TimeRange::new(5, 59), &tx);
        let result = rx.recv().unwrap();
        assert_eq!(result.slot, 3);
        assert_eq!(result.points, vec![Point::new(10, 2.0), Point::new(59, 3.0)]);
    }

    #[test]
    fn test_empty_block_sends_once() {
        let block = Block::empty();
        assert!(block.is_empty());
        assert!(!block.overlaps(TimeRange::new(i64::MIN, i64::MAX)));

        let (tx, rx) = unbounded();
        block.range_points(1, TimeRange::new(0, 100), &tx);
        drop(tx);

        let results: Vec<_> = rx.iter().collect();
        assert_eq!(results.len(), 1);
        assert!(results[0].points.is_empty());
    }

    #[test]
    fn test_corrupt_block_sends_empty() {
        let good = block_with(&[Point::new(0, 1.0), Point::new(1, 2.0), Point::new(2, 3.0)]);
        let truncated = good.payload().slice(..good.payload().len() - 4);
        let block = Block::new(0, 0, 59, 3, truncated);

        let (tx, rx) = unbounded();
        block.range_points(0, TimeRange::new(0, 59), &tx);
        assert!(rx.recv().unwrap().points.is_empty());
    }
}
