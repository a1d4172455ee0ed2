//! Hot, uncompressed window of a series

use crate::{BlockId, Point, TimeRange, Timestamp};
use thiserror::Error;

/// Why a point could not be placed in the hot bucket
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BucketError {
    /// The bucket must be rotated before the point can be stored
    #[error("bucket overflow, age {age}s")]
    Overflow { age: i64 },

    /// The point is older than the bucket but still within tolerance
    #[error("out-of-order point, bucket age {age}s")]
    OutOfOrder { age: i64 },
}

/// Dense accumulator for one bucket-width window
///
/// Slot `i` holds the value written at `start + i`; `None` means nothing
/// was written at that second.
#[derive(Debug, Clone)]
pub struct Bucket {
    created: BlockId,
    count: usize,
    values: Box<[Option<f32>]>,
}

impl Bucket {
    /// Create an empty bucket covering `[created, created + width)`
    pub fn new(created: BlockId, width: i64) -> Self {
        Self {
            created,
            count: 0,
            values: vec![None; width as usize].into_boxed_slice(),
        }
    }

    /// Block id this bucket will be stored under
    pub fn created(&self) -> BlockId {
        self.created
    }

    /// First second of the window
    pub fn start(&self) -> Timestamp {
        self.created
    }

    /// Last second of the window (inclusive)
    pub fn end(&self) -> Timestamp {
        self.created + self.values.len() as i64 - 1
    }

    /// Number of occupied seconds
    pub fn len(&self) -> usize {
        self.count
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Add a point arriving at wall-clock `now`
    ///
    /// Points past the window overflow. Points before the window overflow
    /// once the window is `retention` seconds old, otherwise they are
    /// reported out of order for the caller to repair elsewhere.
    pub fn add(
        &mut self,
        timestamp: Timestamp,
        value: f32,
        now: Timestamp,
        retention: i64,
    ) -> Result<(), BucketError> {
        if timestamp < self.start() {
            let age = now - self.start();
            if age >= retention {
                return Err(BucketError::Overflow { age });
            }
            return Err(BucketError::OutOfOrder { age });
        }

        self.put(timestamp, value)
            .map_err(|offset| BucketError::Overflow { age: offset })
    }

    /// Store a point by offset, last write wins
    ///
    /// Returns the offending offset when the point is outside the window.
    pub fn put(&mut self, timestamp: Timestamp, value: f32) -> Result<(), i64> {
        let offset = timestamp - self.created;
        if offset < 0 || offset >= self.values.len() as i64 {
            return Err(offset);
        }

        let slot = &mut self.values[offset as usize];
        if slot.is_none() {
            self.count += 1;
        }
        *slot = Some(value);
        Ok(())
    }

    /// Check if a second already holds a value
    pub fn contains(&self, timestamp: Timestamp) -> bool {
        let offset = timestamp - self.created;
        offset >= 0
            && (offset as usize) < self.values.len()
            && self.values[offset as usize].is_some()
    }

    /// Occupied seconds in ascending order
    pub fn dump_points(&self) -> impl Iterator<Item = Point> + '_ {
        let created = self.created;
        self.values
            .iter()
            .enumerate()
            .filter_map(move |(offset, v)| v.map(|value| Point::new(created + offset as i64, value)))
    }

    /// Timestamp of the first occupied second
    pub fn first_timestamp(&self) -> Option<Timestamp> {
        self.dump_points().next().map(|p| p.timestamp)
    }

    /// Points within `range`, ascending
    pub fn range_points(&self, range: TimeRange) -> Vec<Point> {
        if range.end < self.start() || range.start > self.end() {
            return Vec::new();
        }
        let lo = (range.start.max(self.start()) - self.created) as usize;
        let hi = (range.end.min(self.end()) - self.created) as usize;
        let created = self.created;
        self.values[lo..=hi]
            .iter()
            .enumerate()
            .filter_map(|(i, v)| v.map(|value| Point::new(created + (lo + i) as i64, value)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_add_in_window() {
        let mut bucket = Bucket::new(7200, 7200);
        bucket.add(7200, 1.0, 7300, 7200).unwrap();
        bucket.add(14399, 2.0, 7300, 7200).unwrap();

        assert_eq!(bucket.len(), 2);
        assert_eq!(bucket.end(), 14399);
        let points: Vec<_> = bucket.dump_points().collect();
        assert_eq!(points, vec![Point::new(7200, 1.0), Point::new(14399, 2.0)]);
    }

    #[test]
    fn test_bucket_last_write_wins() {
        let mut bucket = Bucket::new(0, 60);
        bucket.add(10, 1.0, 10, 60).unwrap();
        bucket.add(10, 5.0, 10, 60).unwrap();

        assert_eq!(bucket.len(), 1);
        assert_eq!(bucket.dump_points().collect::<Vec<_>>(), vec![Point::new(10, 5.0)]);
    }

    #[test]
    fn test_bucket_signals() {
        let mut bucket = Bucket::new(7200, 7200);

        // Older point while the bucket is young
        assert_eq!(
            bucket.add(7000, 1.0, 7300, 7200),
            Err(BucketError::OutOfOrder { age: 100 })
        );

        // Older point after the bucket aged past the timeout
        assert_eq!(
            bucket.add(7000, 1.0, 14400, 7200),
            Err(BucketError::Overflow { age: 7200 })
        );

        // Point past the window
        assert_eq!(
            bucket.add(14400, 1.0, 14400, 7200),
            Err(BucketError::Overflow { age: 7200 })
        );
        assert!(bucket.is_empty());
    }

    #[test]
    fn test_bucket_range_points() {
        let mut bucket = Bucket::new(0, 60);
        for ts in [0, 5, 30, 59] {
            bucket.put(ts, ts as f32).unwrap();
        }

        let points = bucket.range_points(TimeRange::new(5, 30));
        assert_eq!(points, vec![Point::new(5, 5.0), Point::new(30, 30.0)]);

        assert_eq!(bucket.range_points(TimeRange::new(-100, 1000)).len(), 4);
        assert!(bucket.range_points(TimeRange::new(60, 100)).is_empty());
        assert!(bucket.range_points(TimeRange::new(-10, -1)).is_empty());
        assert_eq!(bucket.first_timestamp(), Some(0));
    }

    #[test]
    fn test_bucket_put_out_of_window() {
        let mut bucket = Bucket::new(60, 60);
        assert_eq!(bucket.put(120, 1.0), Err(60));
        assert_eq!(bucket.put(59, 1.0), Err(-1));
        assert!(!bucket.contains(59));
        bucket.put(119, 1.0).unwrap();
        assert!(bucket.contains(119));
    }
}
