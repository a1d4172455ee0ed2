//! Gorilla Core - per-series temporal compression cache
//!
//! A time-series cache that sits in front of a persistent block store:
//!
//! - Recent points go into an uncompressed hot **bucket** per series
//! - Past windows are kept as Gorilla-compressed **blocks** in a fixed ring
//! - Reads older than the ring fall through to [`Persistence`]
//! - Late points repair the block they belong to, in memory or on disk
//!
//! # Architecture
//!
//! - [`compression`]: delta-of-delta timestamps and XOR values
//! - [`series`]: [`Bucket`], [`Block`] and the [`Serie`] controller
//! - [`persistence`]: block store abstraction with memory and file backends
//! - [`storage`]: registry of series keyed by keyspace and name

pub mod clock;
pub mod compression;
pub mod persistence;
pub mod series;
pub mod storage;

mod error;
mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{GorillaError, Result};
pub use persistence::{FilePersistence, MemoryPersistence, Persistence};
pub use series::{Block, Bucket, BucketError, Serie, SerieConfig, SerieStats};
pub use storage::{Storage, StorageConfig, StorageStats};
pub use types::*;

/// Gorilla Core version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration values
pub mod config {
    use std::time::Duration;

    pub use crate::compression::HEADER_SIZE;

    /// Width of a bucket window (2 hours)
    pub const BUCKET_WIDTH: i64 = 2 * 60 * 60;

    /// Ring slots per series, one day of history at the default width
    pub const MAX_BLOCKS: usize = 12;

    /// Age after which an older point forces the hot bucket to rotate
    pub const RETENTION_TIMEOUT: i64 = BUCKET_WIDTH;

    /// Upper bound on a read's per-slot fan-out
    pub const READ_TIMEOUT: Duration = Duration::from_secs(30);

    /// Delay between warm-up attempts
    pub const INIT_RETRY_DELAY: Duration = Duration::from_secs(1);
}
