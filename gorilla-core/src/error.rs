//! Error types for the gorilla cache

use std::time::Duration;
use thiserror::Error;

/// Result type alias for gorilla operations
pub type Result<T> = std::result::Result<T, GorillaError>;

/// Gorilla error types
#[derive(Error, Debug)]
pub enum GorillaError {
    /// IO operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Backing store read or write failed
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Raw codec failure, not yet attributed to a block
    #[error("Compression error: {0}")]
    Compression(String),

    /// Codec failure while handling a specific block
    #[error("Codec error on {keyspace}/{series} block {block_id}: {message}")]
    Codec {
        keyspace: String,
        series: String,
        block_id: i64,
        message: String,
    },

    /// A decoded point does not belong to the block it was stored under
    #[error("Delta {delta} out of range for {keyspace}/{series} block {block_id}")]
    DeltaOutOfRange {
        keyspace: String,
        series: String,
        block_id: i64,
        delta: i64,
    },

    /// Checksum mismatch
    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    /// Invalid data format
    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    /// Ranged read did not collect every ring slot in time
    #[error("Read of {keyspace}/{series} timed out after {waited:?}")]
    ReadTimeout {
        keyspace: String,
        series: String,
        waited: Duration,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl GorillaError {
    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, GorillaError::Io(_) | GorillaError::Persistence(_))
    }

    /// Check if error indicates corruption
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            GorillaError::Codec { .. }
                | GorillaError::DeltaOutOfRange { .. }
                | GorillaError::ChecksumMismatch { .. }
        )
    }

    /// Attach series and block identity to a raw codec error
    pub(crate) fn codec(keyspace: &str, series: &str, block_id: i64, err: GorillaError) -> Self {
        let message = match err {
            GorillaError::Compression(msg) => msg,
            other => other.to_string(),
        };
        GorillaError::Codec {
            keyspace: keyspace.to_string(),
            series: series.to_string(),
            block_id,
            message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(GorillaError::Persistence("down".into()).is_retryable());
        assert!(!GorillaError::Compression("bad".into()).is_retryable());

        let err = GorillaError::DeltaOutOfRange {
            keyspace: "ks".into(),
            series: "ts".into(),
            block_id: 7200,
            delta: 9000,
        };
        assert!(err.is_corruption());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_codec_wrapping() {
        let err = GorillaError::codec("ks", "ts", 7200, GorillaError::Compression("eof".into()));
        assert_eq!(err.to_string(), "Codec error on ks/ts block 7200: eof");
    }
}
