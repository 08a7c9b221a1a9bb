//! Region redaction ("blackout") of pixel data.
//!
//! [`redact`] decodes every frame of a [`FrameSource`], optionally burns in
//! overlay planes, fills the requested rectangles with a background value and
//! returns new little-endian pixel bytes with a narrowed descriptor.
//! Frames are never modified in place.
//!
//! Baseline JPEG data can instead be redacted without decoding through
//! [`jpeg::redact_encapsulated_frames`], which rewrites only the affected blocks.

pub mod jpeg;
mod overlay;
mod rotate;
mod values;

pub use jpeg::{redact_baseline_jpeg, redact_encapsulated_frames, JpegRedactionOptions};
pub use overlay::{OverlayPlane, OverlaySource, MAX_OVERLAY_PLANES};
pub use rotate::{rotate_and_flip, Rotation};
pub use values::FillValues;

use std::str::FromStr;

use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};

use crate::config::RedactionDefaults;
use crate::decoder::{FrameData, FrameSource, RasterFrame};
use crate::error::{BlackoutError, Result};
use crate::format::PixelFormatDescriptor;

/// Axis-aligned rectangle in image pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedactionShape {
    /// Left column.
    pub x: i32,
    /// Top row.
    pub y: i32,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl RedactionShape {
    /// Create a rectangle.
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    /// Clamp to a `columns` x `rows` frame, returning `(x0, y0, x1, y1)` with
    /// exclusive ends, or `None` when nothing of the rectangle is inside.
    pub fn clamp(&self, columns: u32, rows: u32) -> Option<(u32, u32, u32, u32)> {
        let x0 = (self.x as i64).clamp(0, columns as i64);
        let y0 = (self.y as i64).clamp(0, rows as i64);
        let x1 = (self.x as i64 + self.width as i64).clamp(0, columns as i64);
        let y1 = (self.y as i64 + self.height as i64).clamp(0, rows as i64);
        (x0 < x1 && y0 < y1).then_some((x0 as u32, y0 as u32, x1 as u32, y1 as u32))
    }
}

impl FromStr for RedactionShape {
    type Err = BlackoutError;

    /// Parse `X,Y,W,H`.
    fn from_str(s: &str) -> Result<Self> {
        let invalid = || BlackoutError::InvalidRequest(format!("expected X,Y,WIDTH,HEIGHT, got '{}'", s));
        let parts: Vec<&str> = s.split(',').map(str::trim).collect();
        match parts.as_slice() {
            [x, y, w, h] => Ok(Self::new(
                x.parse().map_err(|_| invalid())?,
                y.parse().map_err(|_| invalid())?,
                w.parse().map_err(|_| invalid())?,
                h.parse().map_err(|_| invalid())?,
            )),
            _ => Err(invalid()),
        }
    }
}

/// Redaction behaviour for one call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedactionOptions {
    /// Burn overlay planes into the pixel data before filling rectangles.
    pub burn_in_overlays: bool,
    /// Background value, wins over padding and the extremal value.
    pub explicit_background: Option<i32>,
    /// Use the pixel padding value as background when one is declared.
    pub use_padding_as_background: bool,
}

impl From<&RedactionDefaults> for RedactionOptions {
    fn from(defaults: &RedactionDefaults) -> Self {
        Self {
            burn_in_overlays: defaults.burn_in_overlays,
            explicit_background: defaults.explicit_background,
            use_padding_as_background: defaults.use_padding_as_background,
        }
    }
}

/// New pixel data and the descriptor that goes with it.
#[derive(Debug, Clone, PartialEq)]
pub struct PixelBuffer {
    /// Frames back to back, little-endian.
    pub bytes: Vec<u8>,
    /// Descriptor of `bytes`.
    pub format: PixelFormatDescriptor,
}

/// Editable copy of one frame, samples interleaved per pixel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Canvas {
    width: u32,
    height: u32,
    samples_per_pixel: usize,
    samples: Vec<i64>,
}

impl Canvas {
    /// Copy the integer samples of `frame`.
    pub fn from_frame(frame: &RasterFrame) -> Self {
        let spp = frame.samples_per_pixel();
        let samples = (0..frame.pixel_count())
            .flat_map(|i| (0..spp).map(move |band| (i, band)))
            .map(|(i, band)| frame.int_sample(i, band))
            .collect();
        Self {
            width: frame.width(),
            height: frame.height(),
            samples_per_pixel: spp,
            samples,
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

    /// Sample of pixel (`x`, `y`) in `band`.
    pub fn get(&self, x: u32, y: u32, band: usize) -> i64 {
        self.samples[(y as usize * self.width as usize + x as usize) * self.samples_per_pixel + band]
    }

    /// Set every band of pixel (`x`, `y`); coordinates outside the frame are ignored.
    pub fn set_pixel(&mut self, x: i64, y: i64, values: &[i64]) {
        if x < 0 || y < 0 || x >= self.width as i64 || y >= self.height as i64 {
            return;
        }
        let base = (y as usize * self.width as usize + x as usize) * self.samples_per_pixel;
        for (sample, &value) in self.samples[base..base + self.samples_per_pixel].iter_mut().zip(values) {
            *sample = value;
        }
    }

    /// Fill the part of `shape` inside the frame.
    pub fn fill(&mut self, shape: &RedactionShape, values: &[i64]) {
        if let Some((x0, y0, x1, y1)) = shape.clamp(self.width, self.height) {
            for y in y0..y1 {
                for x in x0..x1 {
                    self.set_pixel(x as i64, y as i64, values);
                }
            }
        }
    }

    /// Draw `plane`: its shadow one pixel down and right in `background`,
    /// then the set pixels in `foreground`.
    pub fn burn_in(&mut self, plane: &OverlayPlane, fill: &FillValues) {
        for (x, y) in plane.set_pixels() {
            self.set_pixel(x + 1, y + 1, &fill.background);
        }
        for (x, y) in plane.set_pixels() {
            self.set_pixel(x, y, &fill.foreground);
        }
    }

    /// Append the samples to `out` in the layout of `format` (8 or 16 bits
    /// allocated, planar configuration honoured).
    pub fn write(&self, format: &PixelFormatDescriptor, out: &mut Vec<u8>) {
        let spp = self.samples_per_pixel;
        let pixels = self.width as usize * self.height as usize;
        let (pixel_stride, band_stride) = format.planar_configuration.strides(spp, pixels);
        let mut ordered = vec![0i64; self.samples.len()];
        for pixel in 0..pixels {
            for band in 0..spp {
                ordered[pixel * pixel_stride + band * band_stride] = self.samples[pixel * spp + band];
            }
        }
        if format.bits_allocated <= 8 {
            out.extend(ordered.iter().map(|&v| v as u8));
        } else {
            let words: Vec<u16> = ordered.iter().map(|&v| v as u16).collect();
            let start = out.len();
            out.resize(start + words.len() * 2, 0);
            LittleEndian::write_u16_into(&words, &mut out[start..]);
        }
    }
}

/// Descriptor of redacted or rotated output: bits allocated narrowed to 8 or
/// 16, everything else preserved.
pub(crate) fn output_format(format: &PixelFormatDescriptor) -> Result<PixelFormatDescriptor> {
    let bits_allocated = match format.bits_allocated {
        1..=8 => 8,
        9..=16 => 16,
        other => {
            return Err(BlackoutError::UnsupportedEncoding(format!(
                "cannot write {} bit samples",
                other
            )))
        }
    };
    let bits_stored = format.bits_stored.min(bits_allocated);
    Ok(PixelFormatDescriptor {
        bits_allocated,
        bits_stored,
        high_bit: bits_stored - 1,
        ..format.clone()
    })
}

/// Check that the decoded sample type matches the declared layout.
pub(crate) fn check_frame(frame: &RasterFrame, format: &PixelFormatDescriptor) -> Result<()> {
    let signed = format.is_signed();
    let matches = match (frame.data(), format.bits_allocated, format.samples_per_pixel) {
        (FrameData::Bit1(_), 1, 1) => true,
        (FrameData::U8(_), 2..=8, 1) => !signed,
        (FrameData::S8(_), 2..=8, 1) => signed,
        (FrameData::U16(_), 9..=16, 1) => !signed,
        (FrameData::S16(_), 9..=16, 1) => signed,
        (FrameData::Rgb8(_), 8, 3) => true,
        _ => false,
    };
    if !matches || frame.width() != format.columns || frame.height() != format.rows {
        return Err(BlackoutError::UnsupportedEncoding(format!(
            "{} {}x{} frame does not match {} bits allocated, {} samples per pixel, {}x{}",
            frame.data().type_name(),
            frame.width(),
            frame.height(),
            format.bits_allocated,
            format.samples_per_pixel,
            format.columns,
            format.rows
        )));
    }
    Ok(())
}

/// Redact one decoded frame: copy, burn in overlays, then fill shapes.
pub fn redact_frame(
    frame: &RasterFrame,
    format: &PixelFormatDescriptor,
    frame_index: usize,
    shapes: &[RedactionShape],
    options: &RedactionOptions,
    overlays: Option<&dyn OverlaySource>,
) -> Result<Canvas> {
    check_frame(frame, format)?;
    let fill = FillValues::for_format(format, options);
    let mut canvas = Canvas::from_frame(frame);

    if options.burn_in_overlays {
        if let Some(source) = overlays {
            for plane in 0..MAX_OVERLAY_PLANES {
                if !source.has_overlay(frame_index, plane) {
                    continue;
                }
                if let Some(overlay) = source.overlay(frame_index, plane) {
                    log::debug!("Burning overlay plane {} into frame {}", plane, frame_index);
                    canvas.burn_in(&overlay, &fill);
                }
            }
        }
    }

    for shape in shapes {
        canvas.fill(shape, &fill.background);
    }
    Ok(canvas)
}

/// Redact every frame of `source`.
///
/// `shapes[i]` lists the rectangles for frame `i`; frames without an entry
/// only get overlays burned in. At least one rectangle is required unless
/// overlay burn-in is requested with an overlay source.
pub fn redact(
    source: &mut FrameSource,
    shapes: &[Vec<RedactionShape>],
    options: &RedactionOptions,
    overlays: Option<&dyn OverlaySource>,
) -> Result<PixelBuffer> {
    let total: usize = shapes.iter().map(Vec::len).sum();
    if total == 0 && !(options.burn_in_overlays && overlays.is_some()) {
        return Err(BlackoutError::InvalidRequest("no redaction shapes given".into()));
    }

    let format = source.format().clone();
    let out_format = output_format(&format)?;
    let frames = source.frame_count();
    let mut bytes = Vec::with_capacity(out_format.bits_per_frame() / 8 * frames);
    for index in 0..frames {
        let frame = source.frame(index)?;
        let frame_shapes = shapes.get(index).map(Vec::as_slice).unwrap_or(&[]);
        let canvas = redact_frame(&frame, &format, index, frame_shapes, options, overlays)?;
        canvas.write(&out_format, &mut bytes);
    }

    log::info!(
        "Redacted {} rectangle(s) across {} frame(s), output {} bits allocated",
        total,
        frames,
        out_format.bits_allocated
    );
    Ok(PixelBuffer {
        bytes,
        format: out_format,
    })
}
