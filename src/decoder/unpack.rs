//! Per-encoding sample unpacking with running min/max tracking.

use std::borrow::Cow;

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{BlackoutError, Result};
use crate::format::{PaddingFilter, PhotometricInterpretation, PixelFormatDescriptor, PlanarConfiguration};

use super::raster::{FrameData, RasterFrame, ValueRange};

/// Storage layout chosen once per descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Encoding {
    /// 1 bit allocated, one grayscale sample.
    Bit1,
    /// 8 bits allocated, one grayscale or palette sample.
    Packed8,
    /// 16 bits allocated, one grayscale or palette sample.
    Word16,
    /// 8 bits allocated, three samples.
    Rgb8,
    /// 32-bit float, one sample.
    Float32,
    /// 64-bit float, one sample.
    Float64,
}

impl Encoding {
    /// Dispatch on samples per pixel, bits allocated and photometric interpretation.
    pub(crate) fn select(format: &PixelFormatDescriptor) -> Result<Self> {
        let single = format.photometric_interpretation.is_single_channel();
        let monochrome = single && format.photometric_interpretation != PhotometricInterpretation::PaletteColor;
        match (format.samples_per_pixel, format.bits_allocated) {
            (1, 1) if monochrome => Ok(Encoding::Bit1),
            (1, 8) if single => Ok(Encoding::Packed8),
            (1, 16) if single => Ok(Encoding::Word16),
            (3, 8) if !single => Ok(Encoding::Rgb8),
            (1, 32) if monochrome => Ok(Encoding::Float32),
            (1, 64) if monochrome => Ok(Encoding::Float64),
            (samples, bits) => Err(BlackoutError::UnsupportedEncoding(format!(
                "{} with {} sample(s) of {} bits allocated ({} stored)",
                format.photometric_interpretation, samples, bits, format.bits_stored
            ))),
        }
    }
}

/// Borrowed view over stored pixel data.
#[derive(Debug, Clone, Copy)]
pub(crate) enum SampleView<'a> {
    /// Little-endian byte stream.
    Bytes(&'a [u8]),
    /// 16-bit words; bytes are taken low byte first.
    Words(&'a [u16]),
}

impl<'a> SampleView<'a> {
    /// Length of the data in bytes.
    pub(crate) fn byte_len(&self) -> usize {
        match self {
            SampleView::Bytes(b) => b.len(),
            SampleView::Words(w) => w.len() * 2,
        }
    }

    /// `len` bytes starting at byte `start`.
    pub(crate) fn bytes(&self, start: usize, len: usize) -> Result<Cow<'a, [u8]>> {
        check_bounds(start, len, self.byte_len())?;
        Ok(match *self {
            SampleView::Bytes(b) => Cow::Borrowed(&b[start..start + len]),
            SampleView::Words(w) => Cow::Owned(
                (start..start + len)
                    .map(|i| {
                        let word = w[i / 2];
                        if i % 2 == 0 {
                            word as u8
                        } else {
                            (word >> 8) as u8
                        }
                    })
                    .collect(),
            ),
        })
    }

    /// `len` 16-bit words starting at word `start`.
    pub(crate) fn words(&self, start: usize, len: usize) -> Result<Cow<'a, [u16]>> {
        check_bounds(start * 2, len * 2, self.byte_len())?;
        Ok(match *self {
            SampleView::Bytes(b) => {
                let mut words = vec![0u16; len];
                LittleEndian::read_u16_into(&b[start * 2..(start + len) * 2], &mut words);
                Cow::Owned(words)
            }
            SampleView::Words(w) => Cow::Borrowed(&w[start..start + len]),
        })
    }
}

fn check_bounds(start: usize, len: usize, available: usize) -> Result<()> {
    if start + len > available {
        return Err(BlackoutError::UnsupportedEncoding(format!(
            "pixel data too short: need bytes {}..{}, have {}",
            start,
            start + len,
            available
        )));
    }
    Ok(())
}

/// Running min/max that ignores padding values.
struct RangeTracker {
    padding: Option<PaddingFilter>,
    min: i64,
    max: i64,
    seen: bool,
}

impl RangeTracker {
    fn new(padding: Option<PaddingFilter>) -> Self {
        Self {
            padding,
            min: i64::MAX,
            max: i64::MIN,
            seen: false,
        }
    }

    #[inline]
    fn observe(&mut self, value: i64) {
        if let Some(padding) = &self.padding {
            if padding.contains(value) {
                return;
            }
        }
        self.seen = true;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }

    fn finish(self) -> Option<ValueRange> {
        self.seen
            .then(|| ValueRange::new(self.min as f64, self.max as f64))
    }
}

/// Decode frame `index` of `view`.
pub(crate) fn decode_frame(
    view: SampleView<'_>,
    format: &PixelFormatDescriptor,
    encoding: Encoding,
    index: usize,
    padding: Option<PaddingFilter>,
) -> Result<RasterFrame> {
    let frame = match encoding {
        Encoding::Bit1 => unpack_bit1(view, format, index)?,
        Encoding::Packed8 => unpack_packed8(view, format, index, padding)?,
        Encoding::Word16 => unpack_word16(view, format, index, padding)?,
        Encoding::Rgb8 => unpack_rgb8(view, format, index)?,
        Encoding::Float32 => unpack_float32(view, format, index)?,
        Encoding::Float64 => unpack_float64(view, format, index)?,
    };
    log::debug!(
        "Decoded frame {} as {} ({}x{}, range {:?})",
        index,
        frame.data().type_name(),
        frame.width(),
        frame.height(),
        frame.value_range()
    );
    Ok(frame)
}

fn unpack_bit1(view: SampleView<'_>, format: &PixelFormatDescriptor, index: usize) -> Result<RasterFrame> {
    let pixels = format.pixel_count();
    let start_bit = index * pixels;
    let first_byte = start_bit / 8;
    let shift = start_bit % 8;
    let span = (shift + pixels).div_ceil(8);
    let source = view.bytes(first_byte, span)?;

    let mut packed = vec![0u8; pixels.div_ceil(8)];
    if shift == 0 {
        let len = packed.len();
        packed.copy_from_slice(&source[..len]);
        let tail = pixels % 8;
        if tail != 0 {
            if let Some(last) = packed.last_mut() {
                *last &= (1u8 << tail) - 1;
            }
        }
    } else {
        for i in 0..pixels {
            let pos = shift + i;
            if (source[pos / 8] >> (pos % 8)) & 1 == 1 {
                packed[i / 8] |= 1 << (i % 8);
            }
        }
    }

    Ok(RasterFrame::new(
        format.columns,
        format.rows,
        FrameData::Bit1(packed),
        Some(ValueRange::new(0.0, 1.0)),
    ))
}

fn unpack_packed8(
    view: SampleView<'_>,
    format: &PixelFormatDescriptor,
    index: usize,
    padding: Option<PaddingFilter>,
) -> Result<RasterFrame> {
    let n = format.samples_per_frame();
    let source = view.bytes(index * n, n)?;
    let mut tracker = RangeTracker::new(padding);

    let data = if format.is_signed() {
        let values = source
            .iter()
            .map(|&raw| {
                let value = format.normalize(raw as u32);
                tracker.observe(value);
                value as i8
            })
            .collect();
        FrameData::S8(values)
    } else {
        let values = source
            .iter()
            .map(|&raw| {
                let value = format.normalize(raw as u32);
                tracker.observe(value);
                value as u8
            })
            .collect();
        FrameData::U8(values)
    };

    Ok(RasterFrame::new(format.columns, format.rows, data, tracker.finish()))
}

fn unpack_word16(
    view: SampleView<'_>,
    format: &PixelFormatDescriptor,
    index: usize,
    padding: Option<PaddingFilter>,
) -> Result<RasterFrame> {
    let n = format.samples_per_frame();
    let source = view.words(index * n, n)?;
    let mut tracker = RangeTracker::new(padding);

    let data = if format.is_signed() {
        let values = source
            .iter()
            .map(|&raw| {
                let value = format.normalize(raw as u32);
                tracker.observe(value);
                value as i16
            })
            .collect();
        FrameData::S16(values)
    } else {
        let values = source
            .iter()
            .map(|&raw| {
                let value = format.normalize(raw as u32);
                tracker.observe(value);
                value as u16
            })
            .collect();
        FrameData::U16(values)
    };

    Ok(RasterFrame::new(format.columns, format.rows, data, tracker.finish()))
}

fn unpack_rgb8(view: SampleView<'_>, format: &PixelFormatDescriptor, index: usize) -> Result<RasterFrame> {
    let pixels = format.pixel_count();
    let n = pixels * 3;
    let source = view.bytes(index * n, n)?;

    let data = match format.planar_configuration {
        PlanarConfiguration::Interleaved => source.into_owned(),
        PlanarConfiguration::ByPlane => {
            let mut interleaved = vec![0u8; n];
            for (band, plane) in source.chunks_exact(pixels).enumerate() {
                for (pixel, &value) in plane.iter().enumerate() {
                    interleaved[pixel * 3 + band] = value;
                }
            }
            interleaved
        }
    };

    Ok(RasterFrame::new(
        format.columns,
        format.rows,
        FrameData::Rgb8(data),
        Some(ValueRange::new(0.0, 255.0)),
    ))
}

fn unpack_float32(view: SampleView<'_>, format: &PixelFormatDescriptor, index: usize) -> Result<RasterFrame> {
    let n = format.pixel_count();
    let source = view.bytes(index * n * 4, n * 4)?;
    let mut values = vec![0f32; n];
    LittleEndian::read_f32_into(&source, &mut values);
    let range = float_range(values.iter().map(|&v| v as f64));
    Ok(RasterFrame::new(format.columns, format.rows, FrameData::F32(values), range))
}

fn unpack_float64(view: SampleView<'_>, format: &PixelFormatDescriptor, index: usize) -> Result<RasterFrame> {
    let n = format.pixel_count();
    let source = view.bytes(index * n * 8, n * 8)?;
    let mut values = vec![0f64; n];
    LittleEndian::read_f64_into(&source, &mut values);
    let range = float_range(values.iter().copied());
    Ok(RasterFrame::new(format.columns, format.rows, FrameData::F64(values), range))
}

fn float_range(values: impl Iterator<Item = f64>) -> Option<ValueRange> {
    values
        .filter(|v| v.is_finite())
        .fold(None, |acc: Option<ValueRange>, v| match acc {
            None => Some(ValueRange::new(v, v)),
            Some(r) => Some(ValueRange::new(r.min.min(v), r.max.max(v))),
        })
}
