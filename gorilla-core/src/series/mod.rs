//! Per-series temporal compression cache
//!
//! Each [`Serie`] keeps the most recent window of raw points in a hot
//! [`Bucket`] and a fixed ring of compressed [`Block`]s for the windows
//! before it. A block lives at slot `(block_id / bucket_width) % max_blocks`;
//! storing a newer block into an occupied slot evicts the older one, so the
//! ring always spans `max_blocks * bucket_width` seconds of history. Reads
//! older than the ring fall through to [`Persistence`](crate::persistence::Persistence).

mod block;
mod bucket;
mod serie;

pub use block::{Block, SlotResult};
pub use bucket::{Bucket, BucketError};
pub use serie::{Serie, SerieStats};

use crate::{config, GorillaError, Result};
use std::time::Duration;

/// Series cache configuration
#[derive(Debug, Clone)]
pub struct SerieConfig {
    /// Width of one bucket/block window in seconds
    pub bucket_width: i64,
    /// Number of ring slots
    pub max_blocks: usize,
    /// Age of the hot window after which an older point forces rotation
    pub retention_timeout: i64,
    /// Upper bound on collecting the per-slot fan-out of a read
    pub read_timeout: Duration,
    /// Delay between attempts to warm the hot bucket from persistence
    pub init_retry_delay: Duration,
}

impl Default for SerieConfig {
    fn default() -> Self {
        Self {
            bucket_width: config::BUCKET_WIDTH,
            max_blocks: config::MAX_BLOCKS,
            retention_timeout: config::RETENTION_TIMEOUT,
            read_timeout: config::READ_TIMEOUT,
            init_retry_delay: config::INIT_RETRY_DELAY,
        }
    }
}

impl SerieConfig {
    /// Check the configuration is usable
    pub fn validate(&self) -> Result<()> {
        if self.bucket_width <= 0 {
            return Err(GorillaError::Config("bucket_width must be positive".into()));
        }
        if self.max_blocks == 0 {
            return Err(GorillaError::Config("max_blocks must be positive".into()));
        }
        // A shorter timeout could rotate a bucket into the window it already covers
        if self.retention_timeout < self.bucket_width {
            return Err(GorillaError::Config(format!(
                "retention_timeout {} shorter than bucket_width {}",
                self.retention_timeout, self.bucket_width
            )));
        }
        if self.read_timeout.is_zero() {
            return Err(GorillaError::Config("read_timeout must be positive".into()));
        }
        Ok(())
    }

    /// Seconds of history the ring can hold
    pub fn ring_span(&self) -> i64 {
        self.bucket_width * self.max_blocks as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SerieConfig::default();
        config.validate().unwrap();
        assert_eq!(config.bucket_width, 7200);
        assert_eq!(config.max_blocks, 12);
        assert_eq!(config.ring_span(), 86_400);
    }

    #[test]
    fn test_invalid_configs() {
        let base = SerieConfig::default();

        let config = SerieConfig { bucket_width: 0, ..base.clone() };
        assert!(config.validate().is_err());

        let config = SerieConfig { max_blocks: 0, ..base.clone() };
        assert!(config.validate().is_err());

        let config = SerieConfig { retention_timeout: 60, ..base.clone() };
        assert!(matches!(config.validate(), Err(GorillaError::Config(_))));

        let config = SerieConfig { read_timeout: Duration::ZERO, ..base };
        assert!(config.validate().is_err());
    }
}
