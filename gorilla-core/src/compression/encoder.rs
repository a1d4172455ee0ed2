//! Gorilla encoder for time-series compression

use super::bitstream::BitWriter;
use super::{END_MARKER, HEADER_SIZE};
use crate::{GorillaError, Result, Timestamp};
use bytes::Bytes;

/// Gorilla encoder for one block of (seconds, f32) points
///
/// Layout: 64-bit header timestamp `t0`, then the first point as a 32-bit
/// delta from `t0` plus its raw 32-bit value, then delta-of-delta
/// timestamps and XOR-compressed values. Non-empty streams end with
/// [`END_MARKER`] behind the `1111` prefix.
pub struct GorillaEncoder {
    writer: BitWriter,
    count: usize,
    error: Option<String>,

    // Timestamp state
    header: Timestamp,
    prev_timestamp: Timestamp,
    prev_timestamp_delta: i64,

    // Value state
    prev_value_bits: u32,
    prev_leading_zeros: u32,
    prev_trailing_zeros: u32,
}

impl GorillaEncoder {
    /// Create an encoder whose header is `t0`
    pub fn new(t0: Timestamp) -> Self {
        let mut writer = BitWriter::with_capacity(256);
        writer.write_bits(t0 as u64, 64);
        Self {
            writer,
            count: 0,
            error: None,
            header: t0,
            prev_timestamp: t0,
            prev_timestamp_delta: 0,
            prev_value_bits: 0,
            // forces a fresh window on the first non-zero XOR
            prev_leading_zeros: u32::MAX,
            prev_trailing_zeros: 0,
        }
    }

    /// Encode a timestamp-value pair
    ///
    /// Timestamps must be non-decreasing and no earlier than the header.
    /// A violation poisons the encoder; [`finish`](Self::finish) reports it.
    pub fn encode(&mut self, timestamp: Timestamp, value: f32) {
        if self.error.is_some() {
            return;
        }
        let encoded = if self.count == 0 {
            self.encode_first(timestamp, value)
        } else {
            self.encode_timestamp(timestamp)
                .map(|_| self.encode_value(value))
        };
        match encoded {
            Ok(()) => self.count += 1,
            Err(msg) => self.error = Some(msg),
        }
    }

    /// Number of points encoded so far
    pub fn count(&self) -> usize {
        self.count
    }

    /// Finish encoding and return the payload
    pub fn finish(mut self) -> Result<Bytes> {
        if let Some(msg) = self.error {
            return Err(GorillaError::Compression(msg));
        }
        if self.count > 0 {
            self.writer.write_bits(0b1111, 4);
            self.writer.write_bits(END_MARKER as u64, 32);
        }
        let data = self.writer.finish();
        debug_assert!(self.count > 0 || data.len() == HEADER_SIZE);
        Ok(data)
    }

    fn encode_first(&mut self, timestamp: Timestamp, value: f32) -> std::result::Result<(), String> {
        let delta = timestamp - self.header;
        if !(0..=u32::MAX as i64).contains(&delta) {
            return Err(format!(
                "first timestamp {} not within 32 bits after header {}",
                timestamp, self.header
            ));
        }

        self.writer.write_bits(delta as u64, 32);
        let value_bits = value.to_bits();
        self.writer.write_bits(value_bits as u64, 32);

        self.prev_timestamp = timestamp;
        self.prev_timestamp_delta = delta;
        self.prev_value_bits = value_bits;
        Ok(())
    }

    fn encode_timestamp(&mut self, timestamp: Timestamp) -> std::result::Result<(), String> {
        let delta = timestamp - self.prev_timestamp;
        if delta < 0 {
            return Err(format!(
                "timestamp {} precedes previous {}",
                timestamp, self.prev_timestamp
            ));
        }
        let delta_of_delta = delta - self.prev_timestamp_delta;

        if delta_of_delta == 0 {
            self.writer.write_bit(false);
        } else if (-63..=64).contains(&delta_of_delta) {
            self.writer.write_bits(0b10, 2);
            self.writer.write_bits((delta_of_delta + 63) as u64, 7);
        } else if (-255..=256).contains(&delta_of_delta) {
            self.writer.write_bits(0b110, 3);
            self.writer.write_bits((delta_of_delta + 255) as u64, 9);
        } else if (-2047..=2048).contains(&delta_of_delta) {
            self.writer.write_bits(0b1110, 4);
            self.writer.write_bits((delta_of_delta + 2047) as u64, 12);
        } else if i32::try_from(delta_of_delta).is_ok() {
            // -1 never lands here, so the end marker stays unambiguous
            self.writer.write_bits(0b1111, 4);
            self.writer.write_bits(delta_of_delta as i32 as u32 as u64, 32);
        } else {
            return Err(format!("delta of delta {} exceeds 32 bits", delta_of_delta));
        }

        self.prev_timestamp_delta = delta;
        self.prev_timestamp = timestamp;
        Ok(())
    }

    fn encode_value(&mut self, value: f32) {
        let value_bits = value.to_bits();
        let xor = value_bits ^ self.prev_value_bits;

        if xor == 0 {
            self.writer.write_bit(false);
        } else {
            self.writer.write_bit(true);

            let leading_zeros = xor.leading_zeros();
            let trailing_zeros = xor.trailing_zeros();

            if leading_zeros >= self.prev_leading_zeros
                && trailing_zeros >= self.prev_trailing_zeros
            {
                // Meaningful bits fit the previous window
                self.writer.write_bit(false);
                let meaningful_bits = 32 - self.prev_leading_zeros - self.prev_trailing_zeros;
                let shifted = xor >> self.prev_trailing_zeros;
                self.writer.write_bits(shifted as u64, meaningful_bits as usize);
            } else {
                self.writer.write_bit(true);

                // Non-zero 32-bit XOR has at most 31 leading zeros
                self.writer.write_bits(leading_zeros as u64, 5);

                // 1..=32 meaningful bits
                let meaningful_bits = 32 - leading_zeros - trailing_zeros;
                self.writer.write_bits(meaningful_bits as u64, 6);

                let shifted = xor >> trailing_zeros;
                self.writer.write_bits(shifted as u64, meaningful_bits as usize);

                self.prev_leading_zeros = leading_zeros;
                self.prev_trailing_zeros = trailing_zeros;
            }
        }

        self.prev_value_bits = value_bits;
    }
}
