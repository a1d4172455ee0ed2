//! Core types for the gorilla cache

use crate::{GorillaError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Timestamp in seconds since Unix epoch
pub type Timestamp = i64;

/// Start timestamp of the fixed-width window a point belongs to
pub type BlockId = i64;

/// A single data point with timestamp and value
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    /// Timestamp in seconds
    pub timestamp: Timestamp,
    /// Sample value
    pub value: f32,
}

impl Point {
    /// Create a new point
    pub fn new(timestamp: Timestamp, value: f32) -> Self {
        Self { timestamp, value }
    }
}

/// Identity of a series: keyspace plus series id
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SeriesKey {
    /// Keyspace (tenant) the series lives in
    pub keyspace: String,
    /// Series id within the keyspace
    pub series: String,
}

impl SeriesKey {
    /// Create a new series key
    pub fn new(keyspace: impl Into<String>, series: impl Into<String>) -> Self {
        Self {
            keyspace: keyspace.into(),
            series: series.into(),
        }
    }

    /// Check both components are usable as file names
    pub fn validate(&self) -> Result<()> {
        validate_component(&self.keyspace)?;
        validate_component(&self.series)
    }
}

/// Reject names that are empty, relative or contain a path separator
pub(crate) fn validate_component(name: &str) -> Result<()> {
    let bad = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\', '\0']);
    if bad {
        return Err(GorillaError::Config(format!("Invalid path component: {:?}", name)));
    }
    Ok(())
}

impl fmt::Display for SeriesKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.keyspace, self.series)
    }
}

/// Floor a timestamp to the start of its `width`-second window
///
/// Uses euclidean division so pre-epoch timestamps floor downwards too.
#[inline]
pub fn block_id(timestamp: Timestamp, width: i64) -> BlockId {
    timestamp - timestamp.rem_euclid(width)
}

/// Window start and inclusive end of `timestamp`, if both fit in `i64`
pub fn checked_window(timestamp: Timestamp, width: i64) -> Option<(BlockId, Timestamp)> {
    let id = timestamp.checked_sub(timestamp.rem_euclid(width))?;
    let end = id.checked_add(width - 1)?;
    Some((id, end))
}

/// Ring slot a block lives in
#[inline]
pub fn slot_index(block_id: BlockId, width: i64, max_blocks: usize) -> usize {
    (block_id.div_euclid(width)).rem_euclid(max_blocks as i64) as usize
}

/// Time range for queries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    /// Start timestamp (inclusive)
    pub start: Timestamp,
    /// End timestamp (inclusive)
    pub end: Timestamp,
}

impl TimeRange {
    /// Create a new time range
    pub fn new(start: Timestamp, end: Timestamp) -> Self {
        Self { start, end }
    }

    /// Check if a timestamp is within the range
    pub fn contains(&self, ts: Timestamp) -> bool {
        ts >= self.start && ts <= self.end
    }

    /// Check if the range selects nothing
    pub fn is_empty(&self) -> bool {
        self.start > self.end
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_id() {
        assert_eq!(block_id(0, 7200), 0);
        assert_eq!(block_id(7199, 7200), 0);
        assert_eq!(block_id(7200, 7200), 7200);
        assert_eq!(block_id(1_700_000_123, 7200), 1_699_999_200);
        assert_eq!(block_id(-1, 7200), -7200);
    }

    #[test]
    fn test_slot_index_wraps() {
        assert_eq!(slot_index(0, 7200, 12), 0);
        assert_eq!(slot_index(7200 * 11, 7200, 12), 11);
        assert_eq!(slot_index(7200 * 12, 7200, 12), 0);
        assert_eq!(slot_index(7200 * 13, 7200, 12), 1);
        assert_eq!(slot_index(-7200, 7200, 12), 11);
    }

    #[test]
    fn test_time_range() {
        let range = TimeRange::new(100, 200);
        assert!(range.contains(100));
        assert!(range.contains(200));
        assert!(!range.contains(201));
        assert!(!range.is_empty());
        assert!(TimeRange::new(5, 4).is_empty());
    }

    #[test]
    fn test_series_key_display() {
        assert_eq!(SeriesKey::new("ks1", "abc").to_string(), "ks1/abc");
    }

    #[test]
    fn test_series_key_validate() {
        SeriesKey::new("ks1", "cpu.load").validate().unwrap();
        for bad in ["", ".", "..", "a/b", "a\\b", "a\0b"] {
            assert!(SeriesKey::new("ks", bad).validate().is_err(), "{bad:?}");
            assert!(SeriesKey::new(bad, "ts").validate().is_err(), "{bad:?}");
        }
    }

    #[test]
    fn test_checked_window() {
        assert_eq!(checked_window(7300, 7200), Some((7200, 14399)));
        assert_eq!(checked_window(-1, 60), Some((-60, -1)));
        assert_eq!(checked_window(i64::MAX, 60), None);
        assert_eq!(checked_window(i64::MIN, 60), None);
        assert!(checked_window(i64::MAX - 7200, 60).is_some());
    }
}
