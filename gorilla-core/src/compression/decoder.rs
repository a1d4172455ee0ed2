//! Gorilla decoder for time-series decompression

use super::bitstream::BitReader;
use super::{END_MARKER, HEADER_SIZE};
use crate::{GorillaError, Point, Result, Timestamp};

/// Gorilla decoder for one block payload
///
/// Decoding is resumable: each [`decode_next`](Self::decode_next) call
/// advances the cursor by one point.
pub struct GorillaDecoder<'a> {
    reader: BitReader<'a>,
    decoded: usize,
    finished: bool,

    // Timestamp state
    header: Timestamp,
    prev_timestamp: Timestamp,
    prev_timestamp_delta: i64,

    // Value state
    prev_value_bits: u32,
    prev_leading_zeros: u32,
    prev_trailing_zeros: u32,
}

fn unexpected_end() -> GorillaError {
    GorillaError::Compression("Unexpected end of data".into())
}

impl<'a> GorillaDecoder<'a> {
    /// Create a new decoder; payloads at or below the header size are empty
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            reader: BitReader::new(data),
            decoded: 0,
            finished: data.len() <= HEADER_SIZE,
            header: 0,
            prev_timestamp: 0,
            prev_timestamp_delta: 0,
            prev_value_bits: 0,
            prev_leading_zeros: 0,
            prev_trailing_zeros: 0,
        }
    }

    /// Number of points decoded so far
    pub fn decoded(&self) -> usize {
        self.decoded
    }

    /// Decode all remaining points
    pub fn decode_all(&mut self) -> Result<Vec<Point>> {
        let mut points = Vec::new();

        while let Some(point) = self.decode_next()? {
            points.push(point);
        }

        Ok(points)
    }

    /// Decode the next point, `None` at the end marker
    pub fn decode_next(&mut self) -> Result<Option<Point>> {
        if self.finished {
            return Ok(None);
        }

        if self.decoded == 0 {
            return self.decode_first().map(Some);
        }

        let timestamp = match self.decode_timestamp()? {
            Some(ts) => ts,
            None => {
                self.finished = true;
                return Ok(None);
            }
        };
        let value = self.decode_value()?;
        self.decoded += 1;

        Ok(Some(Point::new(timestamp, value)))
    }

    fn decode_first(&mut self) -> Result<Point> {
        self.header = self.reader.read_bits(64).ok_or_else(unexpected_end)? as i64;
        let delta = self.reader.read_bits(32).ok_or_else(unexpected_end)? as i64;
        let value_bits = self.reader.read_bits(32).ok_or_else(unexpected_end)? as u32;

        let timestamp = self.header + delta;
        self.prev_timestamp = timestamp;
        self.prev_timestamp_delta = delta;
        self.prev_value_bits = value_bits;
        self.decoded = 1;

        Ok(Point::new(timestamp, f32::from_bits(value_bits)))
    }

    fn read_flag(&mut self) -> Result<bool> {
        self.reader.read_bit().ok_or_else(unexpected_end)
    }

    fn decode_timestamp(&mut self) -> Result<Option<Timestamp>> {
        let delta_of_delta = if !self.read_flag()? {
            // '0' - same delta
            0
        } else if !self.read_flag()? {
            // '10' - 7 bit delta_of_delta
            self.reader.read_bits(7).ok_or_else(unexpected_end)? as i64 - 63
        } else if !self.read_flag()? {
            // '110' - 9 bit delta_of_delta
            self.reader.read_bits(9).ok_or_else(unexpected_end)? as i64 - 255
        } else if !self.read_flag()? {
            // '1110' - 12 bit delta_of_delta
            self.reader.read_bits(12).ok_or_else(unexpected_end)? as i64 - 2047
        } else {
            // '1111' - 32 bit delta_of_delta or end of stream
            let raw = self.reader.read_bits(32).ok_or_else(unexpected_end)? as u32;
            if raw == END_MARKER {
                return Ok(None);
            }
            raw as i32 as i64
        };

        let delta = self.prev_timestamp_delta + delta_of_delta;
        let timestamp = self.prev_timestamp + delta;

        self.prev_timestamp_delta = delta;
        self.prev_timestamp = timestamp;

        Ok(Some(timestamp))
    }

    fn decode_value(&mut self) -> Result<f32> {
        if !self.read_flag()? {
            // Same value
            return Ok(f32::from_bits(self.prev_value_bits));
        }

        let (leading_zeros, meaningful_bits) = if !self.read_flag()? {
            // Use previous window
            let meaningful_bits = 32 - self.prev_leading_zeros - self.prev_trailing_zeros;
            (self.prev_leading_zeros, meaningful_bits)
        } else {
            let leading = self.reader.read_bits(5).ok_or_else(unexpected_end)? as u32;
            let meaningful = self.reader.read_bits(6).ok_or_else(unexpected_end)? as u32;
            if meaningful == 0 || leading + meaningful > 32 {
                return Err(GorillaError::Compression(format!(
                    "invalid XOR window: {} leading, {} meaningful",
                    leading, meaningful
                )));
            }

            self.prev_leading_zeros = leading;
            self.prev_trailing_zeros = 32 - leading - meaningful;

            (leading, meaningful)
        };

        let meaningful_value = self
            .reader
            .read_bits(meaningful_bits as usize)
            .ok_or_else(unexpected_end)? as u32;

        let trailing_zeros = 32 - leading_zeros - meaningful_bits;
        let xor = meaningful_value << trailing_zeros;
        let value_bits = self.prev_value_bits ^ xor;

        self.prev_value_bits = value_bits;

        Ok(f32::from_bits(value_bits))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compression::GorillaEncoder;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    #[test]
    fn test_encode_decode_roundtrip() {
        let mut encoder = GorillaEncoder::new(1_699_999_200);

        let points: Vec<Point> = (0..720)
            .map(|i| Point::new(1_699_999_200 + i * 10, 20.0 + (i as f32 * 0.1).sin() * 5.0))
            .collect();

        for p in &points {
            encoder.encode(p.timestamp, p.value);
        }

        let data = encoder.finish().unwrap();
        let mut decoder = GorillaDecoder::new(&data);
        let decoded = decoder.decode_all().unwrap();

        assert_eq!(decoded, points);
        assert_eq!(decoder.decoded(), 720);
    }

    #[test]
    fn test_irregular_gaps_and_special_values() {
        let points = vec![
            Point::new(0, 0.0),
            Point::new(1, -0.0),
            Point::new(70, f32::MAX),
            Point::new(71, f32::MIN_POSITIVE),
            Point::new(600, -1.5),
            Point::new(5000, 1.5),
            Point::new(7199, 1.5),
        ];

        let mut encoder = GorillaEncoder::new(0);
        for p in &points {
            encoder.encode(p.timestamp, p.value);
        }
        let data = encoder.finish().unwrap();

        let decoded = GorillaDecoder::new(&data).decode_all().unwrap();
        assert_eq!(decoded.len(), points.len());
        for (orig, dec) in points.iter().zip(decoded.iter()) {
            assert_eq!(orig.timestamp, dec.timestamp);
            assert_eq!(orig.value.to_bits(), dec.value.to_bits());
        }
    }

    #[test]
    fn test_random_streams_roundtrip() {
        let mut rng = StdRng::seed_from_u64(0x6011);

        for _ in 0..20 {
            let mut ts = 7200;
            let mut points = Vec::new();
            for _ in 0..rng.gen_range(1..500) {
                ts += match rng.gen_range(0..10) {
                    0 => rng.gen_range(1..7200),
                    _ => rng.gen_range(1..4),
                };
                let value = if rng.gen_bool(0.3) {
                    f32::from_bits(rng.gen())
                } else {
                    rng.gen_range(-100.0..100.0)
                };
                points.push(Point::new(ts, value));
            }

            let mut encoder = GorillaEncoder::new(7200);
            for p in &points {
                encoder.encode(p.timestamp, p.value);
            }
            let data = encoder.finish().unwrap();

            let decoded = GorillaDecoder::new(&data).decode_all().unwrap();
            assert_eq!(decoded.len(), points.len());
            for (orig, dec) in points.iter().zip(decoded.iter()) {
                assert_eq!(orig.timestamp, dec.timestamp);
                assert_eq!(orig.value.to_bits(), dec.value.to_bits());
            }
        }
    }

    #[test]
    fn test_decode_header_only_is_empty() {
        let data = GorillaEncoder::new(42).finish().unwrap();
        let mut decoder = GorillaDecoder::new(&data);
        assert!(decoder.decode_next().unwrap().is_none());
    }

    #[test]
    fn test_decode_truncated_fails() {
        let mut encoder = GorillaEncoder::new(0);
        for i in 0..50 {
            encoder.encode(i * 3, i as f32);
        }
        let data = encoder.finish().unwrap();

        let truncated = &data[..data.len() - 6];
        let result = GorillaDecoder::new(truncated).decode_all();
        assert!(matches!(result, Err(GorillaError::Compression(_))));
    }
}
