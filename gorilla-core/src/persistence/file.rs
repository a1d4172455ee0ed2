//! File-per-block persistence
//!
//! Layout: `<data_dir>/<keyspace>/<series>/<block_id>.blk`, each file a
//! single frame:
//!
//! - 4 bytes: magic `GRLA`
//! - 1 byte: format version
//! - 4 bytes: payload length (LE)
//! - 4 bytes: CRC32 of payload (LE)
//! - N bytes: payload

use super::Persistence;
use crate::types::validate_component;
use crate::{BlockId, GorillaError, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

const MAGIC: &[u8; 4] = b"GRLA";
const FORMAT_VERSION: u8 = 1;
const FRAME_HEADER_SIZE: usize = 13;

/// Persistence storing one file per block
#[derive(Debug)]
pub struct FilePersistence {
    root: PathBuf,
    tmp_seq: AtomicU64,
}

impl FilePersistence {
    /// Open (creating if needed) a store rooted at `root`
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            tmp_seq: AtomicU64::new(0),
        })
    }

    /// Root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn block_path(&self, keyspace: &str, series: &str, block_id: BlockId) -> Result<PathBuf> {
        validate_component(keyspace)?;
        validate_component(series)?;
        Ok(self
            .root
            .join(keyspace)
            .join(series)
            .join(format!("{}.blk", block_id)))
    }

    fn encode_frame(payload: &[u8]) -> Result<Bytes> {
        let len = u32::try_from(payload.len())
            .map_err(|_| GorillaError::InvalidFormat("Block payload exceeds 4GiB".into()))?;
        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + payload.len());
        buf.put_slice(MAGIC);
        buf.put_u8(FORMAT_VERSION);
        buf.put_u32_le(len);
        buf.put_u32_le(crc32fast::hash(payload));
        buf.put_slice(payload);
        Ok(buf.freeze())
    }

    fn decode_frame(mut frame: Bytes) -> Result<Bytes> {
        if frame.len() < FRAME_HEADER_SIZE {
            return Err(GorillaError::InvalidFormat("Block file too short".into()));
        }
        if &frame[..4] != MAGIC {
            return Err(GorillaError::InvalidFormat("Invalid block magic".into()));
        }
        frame.advance(4);

        let version = frame.get_u8();
        if version != FORMAT_VERSION {
            return Err(GorillaError::InvalidFormat(format!(
                "Unsupported block version: {}",
                version
            )));
        }

        let len = frame.get_u32_le() as usize;
        let expected = frame.get_u32_le();
        if frame.len() != len {
            return Err(GorillaError::InvalidFormat(format!(
                "Block length mismatch: header {}, body {}",
                len,
                frame.len()
            )));
        }

        let actual = crc32fast::hash(&frame);
        if actual != expected {
            return Err(GorillaError::ChecksumMismatch { expected, actual });
        }

        Ok(frame)
    }
}

impl Persistence for FilePersistence {
    fn read(&self, keyspace: &str, series: &str, block_id: BlockId) -> Result<Option<Bytes>> {
        let path = self.block_path(keyspace, series, block_id)?;
        match fs::read(&path) {
            Ok(data) => Self::decode_frame(Bytes::from(data)).map(Some),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(GorillaError::Io(e)),
        }
    }

    fn write(&self, keyspace: &str, series: &str, block_id: BlockId, payload: &[u8]) -> Result<()> {
        let path = self.block_path(keyspace, series, block_id)?;
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }

        let frame = Self::encode_frame(payload)?;
        let seq = self.tmp_seq.fetch_add(1, Ordering::Relaxed);
        let tmp = path.with_extension(format!("blk.{}.tmp", seq));

        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(&frame)?;
            file.sync_all()?;
        }
        // Rename is atomic, readers see either the old or the new block
        fs::rename(&tmp, &path)?;

        debug!(
            keyspace,
            series,
            block_id,
            size = payload.len(),
            "Persisted block"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_file_persistence_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = FilePersistence::open(dir.path()).unwrap();

        assert!(store.read("ks", "ts", 7200).unwrap().is_none());

        store.write("ks", "ts", 7200, b"compressed").unwrap();
        assert_eq!(store.read("ks", "ts", 7200).unwrap().unwrap(), &b"compressed"[..]);

        store.write("ks", "ts", 7200, b"repaired").unwrap();
        assert_eq!(store.read("ks", "ts", 7200).unwrap().unwrap(), &b"repaired"[..]);
        assert!(store.read("ks", "ts", 14400).unwrap().is_none());
    }

    #[test]
    fn test_file_persistence_survives_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let store = FilePersistence::open(dir.path()).unwrap();
            store.write("ks", "ts", -7200, b"old").unwrap();
        }
        let store = FilePersistence::open(dir.path()).unwrap();
        assert_eq!(store.read("ks", "ts", -7200).unwrap().unwrap(), &b"old"[..]);
    }

    #[test]
    fn test_file_persistence_detects_corruption() {
        let dir = TempDir::new().unwrap();
        let store = FilePersistence::open(dir.path()).unwrap();
        store.write("ks", "ts", 0, b"some payload").unwrap();

        let path = dir.path().join("ks").join("ts").join("0.blk");
        let mut data = fs::read(&path).unwrap();
        let last = data.len() - 1;
        data[last] ^= 0xFF;
        fs::write(&path, data).unwrap();

        let err = store.read("ks", "ts", 0).unwrap_err();
        assert!(err.is_corruption());
    }

    #[test]
    fn test_file_persistence_rejects_path_escape() {
        let dir = TempDir::new().unwrap();
        let store = FilePersistence::open(dir.path()).unwrap();
        assert!(store.write("..", "ts", 0, b"x").is_err());
        assert!(store.write("ks", "a/b", 0, b"x").is_err());
        assert!(store.read("", "ts", 0).is_err());
    }
}
