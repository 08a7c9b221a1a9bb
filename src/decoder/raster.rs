//! Decoded per-frame rasters.

use serde::{Deserialize, Serialize};

/// Smallest and largest non-padding sample of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValueRange {
    /// Minimum sample value.
    pub min: f64,
    /// Maximum sample value.
    pub max: f64,
}

impl ValueRange {
    /// Create a range, swapping the ends if needed.
    pub fn new(a: f64, b: f64) -> Self {
        Self {
            min: a.min(b),
            max: a.max(b),
        }
    }
}

/// Typed sample storage of one frame.
///
/// Multi-sample data is always held pixel-interleaved, whatever the planar
/// configuration of the source.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameData {
    /// One bit per pixel, packed least-significant bit first.
    Bit1(Vec<u8>),
    /// Unsigned samples of up to 8 bits.
    U8(Vec<u8>),
    /// Signed samples of up to 8 bits, sign-extended.
    S8(Vec<i8>),
    /// Unsigned samples of 9 to 16 bits.
    U16(Vec<u16>),
    /// Signed samples of 9 to 16 bits, sign-extended.
    S16(Vec<i16>),
    /// 32-bit float samples.
    F32(Vec<f32>),
    /// 64-bit float samples.
    F64(Vec<f64>),
    /// Interleaved 8-bit three-sample pixels.
    Rgb8(Vec<u8>),
}

impl FrameData {
    /// Number of bands per pixel.
    pub fn channels(&self) -> usize {
        match self {
            FrameData::Rgb8(_) => 3,
            _ => 1,
        }
    }

    /// Short name of the backing type.
    pub fn type_name(&self) -> &'static str {
        match self {
            FrameData::Bit1(_) => "bit1",
            FrameData::U8(_) => "u8",
            FrameData::S8(_) => "s8",
            FrameData::U16(_) => "u16",
            FrameData::S16(_) => "s16",
            FrameData::F32(_) => "f32",
            FrameData::F64(_) => "f64",
            FrameData::Rgb8(_) => "rgb8",
        }
    }

    /// Whether samples are stored as floating point.
    pub fn is_float(&self) -> bool {
        matches!(self, FrameData::F32(_) | FrameData::F64(_))
    }

    /// Whether samples are two's complement integers.
    pub fn is_signed(&self) -> bool {
        matches!(self, FrameData::S8(_) | FrameData::S16(_))
    }
}

/// One decoded frame: typed samples plus the tracked value range.
#[derive(Debug, Clone, PartialEq)]
pub struct RasterFrame {
    width: u32,
    height: u32,
    data: FrameData,
    range: Option<ValueRange>,
}

impl RasterFrame {
    /// Wrap decoded samples.
    pub fn new(width: u32, height: u32, data: FrameData, range: Option<ValueRange>) -> Self {
        Self {
            width,
            height,
            data,
            range,
        }
    }

    /// Columns.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Rows.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Pixels in the frame.
    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Bands per pixel.
    pub fn samples_per_pixel(&self) -> usize {
        self.data.channels()
    }

    /// Typed sample storage.
    pub fn data(&self) -> &FrameData {
        &self.data
    }

    /// Consume the frame, returning its samples.
    pub fn into_data(self) -> FrameData {
        self.data
    }

    /// Min/max over non-padding samples; `None` if every sample was padding.
    pub fn value_range(&self) -> Option<ValueRange> {
        self.range
    }

    /// Sample `band` of pixel `index` as a float.
    pub fn sample(&self, index: usize, band: usize) -> f64 {
        match &self.data {
            FrameData::Bit1(bits) => bit_at(bits, index) as f64,
            FrameData::U8(v) => v[index] as f64,
            FrameData::S8(v) => v[index] as f64,
            FrameData::U16(v) => v[index] as f64,
            FrameData::S16(v) => v[index] as f64,
            FrameData::F32(v) => v[index] as f64,
            FrameData::F64(v) => v[index],
            FrameData::Rgb8(v) => v[index * 3 + band] as f64,
        }
    }

    /// Integer value of sample `band` of pixel `index`; floats are truncated.
    pub fn int_sample(&self, index: usize, band: usize) -> i64 {
        match &self.data {
            FrameData::Bit1(bits) => bit_at(bits, index) as i64,
            FrameData::U8(v) => v[index] as i64,
            FrameData::S8(v) => v[index] as i64,
            FrameData::U16(v) => v[index] as i64,
            FrameData::S16(v) => v[index] as i64,
            FrameData::F32(v) => v[index] as i64,
            FrameData::F64(v) => v[index] as i64,
            FrameData::Rgb8(v) => v[index * 3 + band] as i64,
        }
    }
}

/// Read bit `index` of an LSB-first packed buffer.
#[inline]
pub(crate) fn bit_at(bits: &[u8], index: usize) -> u8 {
    (bits[index / 8] >> (index % 8)) & 1
}

/// Pack 0/1 values LSB first.
pub(crate) fn pack_bits(values: impl IntoIterator<Item = bool>, count: usize) -> Vec<u8> {
    let mut packed = vec![0u8; count.div_ceil(8)];
    for (i, set) in values.into_iter().take(count).enumerate() {
        if set {
            packed[i / 8] |= 1 << (i % 8);
        }
    }
    packed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bit_packing() {
        let packed = pack_bits([true, false, false, true, true, false, false, false, true], 9);
        assert_eq!(packed, vec![0b0001_1001, 0b0000_0001]);
        assert_eq!(bit_at(&packed, 3), 1);
        assert_eq!(bit_at(&packed, 8), 1);
        assert_eq!(bit_at(&packed, 7), 0);
    }

    #[test]
    fn test_sample_access() {
        let frame = RasterFrame::new(
            2,
            1,
            FrameData::Rgb8(vec![1, 2, 3, 4, 5, 6]),
            Some(ValueRange::new(255.0, 0.0)),
        );
        assert_eq!(frame.samples_per_pixel(), 3);
        assert_eq!(frame.sample(1, 2), 6.0);
        assert_eq!(frame.value_range().unwrap().min, 0.0);
    }
}
