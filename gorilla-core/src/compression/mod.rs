//! Gorilla compression for time-series data
//!
//! Implements the compression algorithm from Facebook's paper:
//! "Gorilla: A Fast, Scalable, In-Memory Time Series Database",
//! specialised for second-resolution timestamps and `f32` values.
//!
//! A payload whose length is at most [`HEADER_SIZE`] carries no points.

mod bitstream;
mod decoder;
mod encoder;

pub use bitstream::{BitReader, BitWriter};
pub use decoder::GorillaDecoder;
pub use encoder::GorillaEncoder;

use crate::{Point, Result, Timestamp};
use bytes::Bytes;

/// Size of the stream header (the 64-bit anchor timestamp)
pub const HEADER_SIZE: usize = 8;

/// Delta-of-delta value that terminates a stream
pub(crate) const END_MARKER: u32 = u32::MAX;

/// Check whether a payload carries no points
#[inline]
pub fn is_empty_payload(payload: &[u8]) -> bool {
    payload.len() <= HEADER_SIZE
}

/// Encode points (ascending by timestamp) anchored at `t0`
pub fn encode_points(t0: Timestamp, points: impl IntoIterator<Item = Point>) -> Result<Bytes> {
    let mut encoder = GorillaEncoder::new(t0);
    for p in points {
        encoder.encode(p.timestamp, p.value);
    }
    encoder.finish()
}

/// Decode every point in a payload
pub fn decode_points(payload: &[u8]) -> Result<Vec<Point>> {
    GorillaDecoder::new(payload).decode_all()
}
