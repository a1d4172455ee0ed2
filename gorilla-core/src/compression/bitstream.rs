//! Bit-level I/O for Gorilla compression

use bytes::{BufMut, Bytes, BytesMut};

/// Bit writer for encoding compressed data
#[derive(Debug)]
pub struct BitWriter {
    buffer: BytesMut,
    current_byte: u8,
    bit_position: u8,
}

impl BitWriter {
    /// Create with capacity hint
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(capacity),
            current_byte: 0,
            bit_position: 0,
        }
    }

    /// Write a single bit
    #[inline]
    pub fn write_bit(&mut self, bit: bool) {
        if bit {
            self.current_byte |= 1 << (7 - self.bit_position);
        }
        self.bit_position += 1;

        if self.bit_position == 8 {
            self.buffer.put_u8(self.current_byte);
            self.current_byte = 0;
            self.bit_position = 0;
        }
    }

    /// Write the low `num_bits` bits of `value`, most significant first
    #[inline]
    pub fn write_bits(&mut self, value: u64, num_bits: usize) {
        debug_assert!(num_bits <= 64);

        // Byte-aligned fast path for headers
        if self.bit_position == 0 && num_bits % 8 == 0 {
            for i in (0..num_bits / 8).rev() {
                self.buffer.put_u8((value >> (i * 8)) as u8);
            }
            return;
        }

        for i in (0..num_bits).rev() {
            self.write_bit((value >> i) & 1 == 1);
        }
    }

    /// Finish writing, padding the last byte with zero bits
    pub fn finish(mut self) -> Bytes {
        if self.bit_position > 0 {
            self.buffer.put_u8(self.current_byte);
        }
        self.buffer.freeze()
    }

    /// Get current size in bytes
    pub fn len(&self) -> usize {
        self.buffer.len() + usize::from(self.bit_position > 0)
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty() && self.bit_position == 0
    }
}

impl Default for BitWriter {
    fn default() -> Self {
        Self::with_capacity(64)
    }
}

/// Bit reader for decoding compressed data
#[derive(Debug)]
pub struct BitReader<'a> {
    data: &'a [u8],
    byte_position: usize,
    bit_position: u8,
}

impl<'a> BitReader<'a> {
    /// Create a new BitReader
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            byte_position: 0,
            bit_position: 0,
        }
    }

    /// Read a single bit
    #[inline]
    pub fn read_bit(&mut self) -> Option<bool> {
        if self.byte_position >= self.data.len() {
            return None;
        }

        let bit = (self.data[self.byte_position] >> (7 - self.bit_position)) & 1 == 1;
        self.bit_position += 1;

        if self.bit_position == 8 {
            self.byte_position += 1;
            self.bit_position = 0;
        }

        Some(bit)
    }

    /// Read multiple bits as a u64
    #[inline]
    pub fn read_bits(&mut self, num_bits: usize) -> Option<u64> {
        debug_assert!(num_bits <= 64);

        if self.remaining() < num_bits {
            return None;
        }

        let mut value = 0u64;
        for _ in 0..num_bits {
            let bit = self.read_bit()?;
            value = (value << 1) | (bit as u64);
        }
        Some(value)
    }

    /// Bits left to read
    pub fn remaining(&self) -> usize {
        (self.data.len() - self.byte_position) * 8 - self.bit_position as usize
    }

    /// Get the current position in bits
    pub fn position(&self) -> usize {
        self.byte_position * 8 + self.bit_position as usize
    }
}
