//! Storage - registry of series caches

mod engine;

pub use engine::{Storage, StorageStats};

use crate::series::SerieConfig;
use std::path::PathBuf;

/// Storage configuration
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Root directory for persisted blocks
    pub data_dir: PathBuf,
    /// Configuration applied to every series
    pub serie: SerieConfig,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            serie: SerieConfig::default(),
        }
    }
}
