//! MSB-first bit reader

use crate::error::{Error, Result};
use num_traits::{PrimInt, Unsigned};

/// A bit reader over a borrowed byte buffer.
///
/// Reads past the end of the buffer fail with [`Error::Truncated`]
/// and leave the position unchanged.
pub struct LheReader<'a> {
    data: &'a [u8],
    bit_length: usize,
    position: usize,
}

impl<'a> LheReader<'a> {
    pub fn new(data: &'a [u8]) -> LheReader<'a> {
        LheReader {
            data,
            bit_length: data.len() * 8,
            position: 0,
        }
    }

    /// A reader over a buffer whose meaningful length is not a whole
    /// number of bytes.
    pub fn with_bit_length(data: &'a [u8], bit_length: usize) -> LheReader<'a> {
        LheReader {
            data,
            bit_length: bit_length.min(data.len() * 8),
            position: 0,
        }
    }

    pub fn bit_position(&self) -> usize {
        self.position
    }

    pub fn remaining_bits(&self) -> usize {
        self.bit_length - self.position
    }

    fn bit_at(&self, position: usize) -> u8 {
        let byte = self.data[position / 8];
        (byte >> (7 - (position % 8))) & 1
    }

    pub fn read_bit(&mut self) -> Result<u8> {
        if self.position >= self.bit_length {
            return Err(Error::Truncated);
        }
        let bit = self.bit_at(self.position);
        self.position += 1;
        Ok(bit)
    }

    /// Read `count` bits MSB-first into any unsigned integer type.
    /// `count` must not exceed the width of the target type.
    pub fn read_bits<T: PrimInt + Unsigned>(&mut self, count: u32) -> Result<T> {
        debug_assert!(count as usize <= T::zero().count_zeros() as usize);
        if self.remaining_bits() < count as usize {
            return Err(Error::Truncated);
        }
        let mut accumulator = T::zero();
        for _ in 0..count {
            let bit = self.bit_at(self.position);
            self.position += 1;
            accumulator = (accumulator << 1)
                | if bit != 0 { T::one() } else { T::zero() };
        }
        Ok(accumulator)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        self.read_bits::<u8>(8)
    }

    /// Peek at the next `count` bits without advancing.
    pub fn show_bits<T: PrimInt + Unsigned>(&self, count: u32) -> Result<T> {
        if self.remaining_bits() < count as usize {
            return Err(Error::Truncated);
        }
        let mut accumulator = T::zero();
        for offset in 0..count as usize {
            let bit = self.bit_at(self.position + offset);
            accumulator = (accumulator << 1)
                | if bit != 0 { T::one() } else { T::zero() };
        }
        Ok(accumulator)
    }

    pub fn skip_bits(&mut self, count: usize) -> Result<()> {
        if self.remaining_bits() < count {
            return Err(Error::Truncated);
        }
        self.position += count;
        Ok(())
    }

    /// Advance to the next byte boundary.
    pub fn skip_to_alignment(&mut self) {
        let misaligned = self.position % 8;
        if misaligned != 0 {
            self.position = (self.position + 8 - misaligned).min(self.bit_length);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_msb_first() {
        let mut reader = LheReader::new(&[0b1011_0001, 0b1000_0000]);
        assert_eq!(reader.read_bit().unwrap(), 1);
        assert_eq!(reader.read_bits::<u8>(3).unwrap(), 0b011);
        assert_eq!(reader.read_bits::<u16>(5).unwrap(), 0b00011);
        assert_eq!(reader.remaining_bits(), 7);
    }

    #[test]
    fn show_does_not_advance() {
        let reader = LheReader::new(&[0xA5]);
        assert_eq!(reader.show_bits::<u8>(4).unwrap(), 0xA);
        assert_eq!(reader.show_bits::<u8>(8).unwrap(), 0xA5);
        assert_eq!(reader.bit_position(), 0);
    }

    #[test]
    fn exhaustion_is_truncated() {
        let mut reader = LheReader::new(&[0xFF]);
        assert_eq!(reader.read_bits::<u8>(8).unwrap(), 0xFF);
        assert_eq!(reader.read_bit(), Err(Error::Truncated));
        assert_eq!(reader.read_bits::<u32>(1), Err(Error::Truncated));
    }

    #[test]
    fn bit_length_caps_the_buffer() {
        let mut reader = LheReader::with_bit_length(&[0xFF, 0xFF], 9);
        assert_eq!(reader.read_bits::<u16>(9).unwrap(), 0x1FF);
        assert_eq!(reader.read_bit(), Err(Error::Truncated));
    }

    #[test]
    fn alignment_skips_partial_bytes() {
        let mut reader = LheReader::new(&[0x00, 0xF0]);
        reader.read_bits::<u8>(3).unwrap();
        reader.skip_to_alignment();
        assert_eq!(reader.read_bits::<u8>(4).unwrap(), 0xF);
    }
}
