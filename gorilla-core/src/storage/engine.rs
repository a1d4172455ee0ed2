//! Storage - top-level coordinator

use super::StorageConfig;
use crate::clock::{Clock, SystemClock};
use crate::persistence::{FilePersistence, Persistence};
use crate::series::{Serie, SerieConfig, SerieStats};
use crate::{Point, Result, SeriesKey, Timestamp};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

/// Registry of series caches sharing one persistence backend
pub struct Storage {
    config: SerieConfig,
    persistence: Arc<dyn Persistence>,
    clock: Arc<dyn Clock>,
    series: RwLock<HashMap<SeriesKey, Serie>>,
    points_written: AtomicU64,
    points_read: AtomicU64,
}

impl Storage {
    /// Create a storage over an arbitrary backend
    pub fn new(
        persistence: Arc<dyn Persistence>,
        config: SerieConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            persistence,
            clock,
            series: RwLock::new(HashMap::new()),
            points_written: AtomicU64::new(0),
            points_read: AtomicU64::new(0),
        })
    }

    /// Open a file-backed storage under `config.data_dir`
    pub fn open(config: StorageConfig) -> Result<Self> {
        let persistence = FilePersistence::open(&config.data_dir)?;
        info!("Opened storage at {}", config.data_dir.display());
        Self::new(Arc::new(persistence), config.serie, Arc::new(SystemClock))
    }

    /// Get or create a series
    ///
    /// Keys that cannot be persisted are rejected before a series exists.
    pub fn serie(&self, keyspace: &str, series: &str) -> Result<Serie> {
        let key = SeriesKey::new(keyspace, series);
        key.validate()?;

        // Check if exists
        if let Some(serie) = self.series.read().get(&key) {
            return Ok(serie.clone());
        }

        let mut registry = self.series.write();
        if let Some(serie) = registry.get(&key) {
            return Ok(serie.clone());
        }

        let serie = Serie::new(
            key.clone(),
            self.config.clone(),
            Arc::clone(&self.persistence),
            Arc::clone(&self.clock),
        )?;
        registry.insert(key.clone(), serie.clone());

        info!("Created serie: {}", key);

        Ok(serie)
    }

    /// Get a series if it was already created
    pub fn get(&self, keyspace: &str, series: &str) -> Option<Serie> {
        self.series.read().get(&SeriesKey::new(keyspace, series)).cloned()
    }

    /// List all series keys
    pub fn list_series(&self) -> Vec<SeriesKey> {
        let mut keys: Vec<_> = self.series.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Write a point to a series
    pub fn write(&self, keyspace: &str, series: &str, timestamp: Timestamp, value: f32) -> Result<()> {
        self.serie(keyspace, series)?.add_point(timestamp, value)?;
        self.points_written.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Write a batch of points to a series
    ///
    /// Stops at the first failing point; the points before it stay written.
    pub fn write_batch(&self, keyspace: &str, series: &str, points: &[Point]) -> Result<usize> {
        let serie = self.serie(keyspace, series)?;
        for p in points {
            serie.add_point(p.timestamp, p.value)?;
            self.points_written.fetch_add(1, Ordering::Relaxed);
        }
        Ok(points.len())
    }

    /// Read `[start, end]` from a series
    ///
    /// A series not seen before is created, so persisted history is still
    /// served for it.
    pub fn read(&self, keyspace: &str, series: &str, start: Timestamp, end: Timestamp) -> Result<Vec<Point>> {
        let points = self.serie(keyspace, series)?.read(start, end)?;
        self.points_read.fetch_add(points.len() as u64, Ordering::Relaxed);
        Ok(points)
    }

    /// Flush every hot bucket
    ///
    /// Flushes all series and returns the first error.
    pub fn flush_all(&self) -> Result<()> {
        let series: Vec<Serie> = self.series.read().values().cloned().collect();

        let mut first_err = None;
        for serie in &series {
            if let Err(e) = serie.flush() {
                warn!("Failed to flush serie {}: {}", serie.key(), e);
                first_err.get_or_insert(e);
            }
        }

        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Get storage statistics
    pub fn stats(&self) -> StorageStats {
        let mut series: Vec<SerieStats> = self.series.read().values().map(|s| s.stats()).collect();
        series.sort_by(|a, b| a.key.cmp(&b.key));

        StorageStats {
            series_count: series.len(),
            points_written: self.points_written.load(Ordering::Relaxed),
            points_read: self.points_read.load(Ordering::Relaxed),
            rotations: series.iter().map(|s| s.rotations).sum(),
            repairs: series.iter().map(|s| s.repairs).sum(),
            series,
        }
    }
}

/// Storage statistics
#[derive(Debug, Clone)]
pub struct StorageStats {
    pub series_count: usize,
    pub points_written: u64,
    pub points_read: u64,
    pub rotations: u64,
    pub repairs: u64,
    pub series: Vec<SerieStats>,
}
