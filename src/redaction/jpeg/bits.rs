//! Bit-level reading and writing of entropy-coded segments.

use crate::error::{BlackoutError, Result};

/// Remove 0xFF00 byte stuffing from one restart interval.
pub(crate) fn destuff(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    let mut i = 0;
    while i < data.len() {
        out.push(data[i]);
        if data[i] == 0xFF && data.get(i + 1) == Some(&0x00) {
            i += 2;
        } else {
            i += 1;
        }
    }
    out
}

/// Signed value of an `size`-bit magnitude field.
#[inline]
pub(crate) fn extend(value: u16, size: u8) -> i32 {
    if size == 0 {
        return 0;
    }
    let value = value as i32;
    if value < 1 << (size - 1) {
        value - (1 << size) + 1
    } else {
        value
    }
}

/// Category and magnitude bits of a coefficient or DC difference.
#[inline]
pub(crate) fn magnitude(value: i32) -> (u8, u16) {
    let size = (32 - value.unsigned_abs().leading_zeros()) as u8;
    let bits = if value < 0 { value - 1 } else { value };
    let mask = if size == 0 { 0 } else { (1u32 << size) - 1 };
    (size, (bits as u32 & mask) as u16)
}

/// MSB-first reader over destuffed data.
pub(crate) struct BitReader<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> BitReader<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Self {
        Self { data, position: 0 }
    }

    /// Current position in bits.
    pub(crate) fn position(&self) -> usize {
        self.position
    }

    pub(crate) fn read_bit(&mut self) -> Result<u16> {
        let byte = self
            .data
            .get(self.position / 8)
            .ok_or_else(|| BlackoutError::Codec("entropy-coded data ended early".into()))?;
        let bit = (byte >> (7 - self.position % 8)) & 1;
        self.position += 1;
        Ok(bit as u16)
    }

    pub(crate) fn read_bits(&mut self, count: u8) -> Result<u16> {
        let mut value = 0u16;
        for _ in 0..count {
            value = (value << 1) | self.read_bit()?;
        }
        Ok(value)
    }
}

/// MSB-first writer producing stuffed bytes.
#[derive(Default)]
pub(crate) struct BitWriter {
    out: Vec<u8>,
    acc: u32,
    count: u8,
}

impl BitWriter {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Append the low `len` bits of `value` (at most 16).
    pub(crate) fn put(&mut self, value: u16, len: u8) {
        if len == 0 {
            return;
        }
        self.acc = (self.acc << len) | (value as u32 & ((1u32 << len) - 1));
        self.count += len;
        while self.count >= 8 {
            let byte = (self.acc >> (self.count - 8)) as u8;
            self.emit(byte);
            self.count -= 8;
        }
        self.acc &= (1u32 << self.count) - 1;
    }

    /// Append bits `start..end` of `src` unchanged.
    pub(crate) fn copy(&mut self, src: &[u8], start: usize, end: usize) {
        let mut position = start;
        while position < end {
            let len = (end - position).min(16) as u8;
            let mut value = 0u16;
            for i in 0..len as usize {
                let bit = position + i;
                value = (value << 1) | ((src[bit / 8] >> (7 - bit % 8)) & 1) as u16;
            }
            self.put(value, len);
            position += len as usize;
        }
    }

    /// Pad the last byte with 1 bits and return the stuffed bytes.
    pub(crate) fn finish(mut self) -> Vec<u8> {
        if self.count > 0 {
            let pad = 8 - self.count;
            self.put((1u16 << pad) - 1, pad);
        }
        self.out
    }

    fn emit(&mut self, byte: u8) {
        self.out.push(byte);
        if byte == 0xFF {
            self.out.push(0x00);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_destuff() {
        assert_eq!(destuff(&[0x12, 0xFF, 0x00, 0x34]), vec![0x12, 0xFF, 0x34]);
    }

    #[test]
    fn test_magnitude_and_extend() {
        assert_eq!(magnitude(0), (0, 0));
        assert_eq!(magnitude(5), (3, 0b101));
        assert_eq!(magnitude(-5), (3, 0b010));
        assert_eq!(magnitude(-1), (1, 0));
        for v in [-2047, -64, -1, 1, 3, 1000, 2047] {
            let (size, bits) = magnitude(v);
            assert_eq!(extend(bits, size), v);
        }
    }

    #[test]
    fn test_writer_stuffs_and_pads() {
        let mut writer = BitWriter::new();
        writer.put(0xFF, 8);
        writer.put(0b0, 1);
        assert_eq!(writer.finish(), vec![0xFF, 0x00, 0x7F]);
    }

    #[test]
    fn test_copy_round_trip() {
        let src = [0b1011_0011, 0b0101_1100, 0xA5];
        let mut writer = BitWriter::new();
        writer.copy(&src, 3, 21);
        let out = writer.finish();
        let mut reader = BitReader::new(&src);
        reader.read_bits(3).unwrap();
        let mut expected = BitReader::new(&out);
        for _ in 3..21 {
            assert_eq!(reader.read_bit().unwrap(), expected.read_bit().unwrap());
        }
        assert_eq!(expected.read_bits(6).unwrap(), 0b111111);
    }

    #[test]
    fn test_reader_overrun() {
        let mut reader = BitReader::new(&[0xFF]);
        assert_eq!(reader.read_bits(8).unwrap(), 0xFF);
        assert!(reader.read_bit().is_err());
    }
}
