//! Durable block store behind the series cache
//!
//! Blocks are addressed by (keyspace, series, block id) and carry an
//! opaque codec payload. Reads of absent blocks return `Ok(None)`.

mod file;

pub use file::FilePersistence;

use crate::{BlockId, Result};
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::HashMap;

/// Key-value store for compressed block payloads
pub trait Persistence: Send + Sync {
    /// Read a block payload, `None` when nothing was ever written
    fn read(&self, keyspace: &str, series: &str, block_id: BlockId) -> Result<Option<Bytes>>;

    /// Write (replace) a block payload
    fn write(&self, keyspace: &str, series: &str, block_id: BlockId, payload: &[u8]) -> Result<()>;
}

type BlockAddress = (String, String, BlockId);

/// In-process persistence, for tests and embedders without durability needs
#[derive(Debug, Default)]
pub struct MemoryPersistence {
    blocks: RwLock<HashMap<BlockAddress, Bytes>>,
}

impl MemoryPersistence {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored blocks
    pub fn len(&self) -> usize {
        self.blocks.read().len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fetch a block without going through the trait
    pub fn get(&self, keyspace: &str, series: &str, block_id: BlockId) -> Option<Bytes> {
        self.blocks
            .read()
            .get(&(keyspace.to_string(), series.to_string(), block_id))
            .cloned()
    }
}

impl Persistence for MemoryPersistence {
    fn read(&self, keyspace: &str, series: &str, block_id: BlockId) -> Result<Option<Bytes>> {
        Ok(self.get(keyspace, series, block_id))
    }

    fn write(&self, keyspace: &str, series: &str, block_id: BlockId, payload: &[u8]) -> Result<()> {
        self.blocks.write().insert(
            (keyspace.to_string(), series.to_string(), block_id),
            Bytes::copy_from_slice(payload),
        );
        Ok(())
    }
}
