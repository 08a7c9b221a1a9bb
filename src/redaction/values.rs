//! Background and foreground sample values used when painting.

use crate::format::{PhotometricInterpretation, PixelFormatDescriptor};
use crate::transform::rgb_to_ybr;

use super::RedactionOptions;

/// Per-band sample values for redaction fill and overlay burn-in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FillValues {
    /// Written inside redaction rectangles and for overlay shadows.
    pub background: Vec<i64>,
    /// Written for overlay pixels.
    pub foreground: Vec<i64>,
}

impl FillValues {
    /// Derive fill values for `format`.
    ///
    /// The background is the explicit value, else the padding value when
    /// enabled, else the extremal value that displays as black. The
    /// foreground is always the opposite extremal value.
    pub fn for_format(format: &PixelFormatDescriptor, options: &RedactionOptions) -> Self {
        let (lo, hi) = format.representable_range();
        let (black, white) = if format.photometric_interpretation == PhotometricInterpretation::Monochrome1 {
            (hi, lo)
        } else {
            (lo, hi)
        };
        let padding = format
            .padding
            .filter(|_| options.use_padding_as_background)
            .map(|p| p.value as i64);
        let background = options
            .explicit_background
            .map(i64::from)
            .or(padding)
            .unwrap_or(black);

        Self {
            background: bands(format, background),
            foreground: bands(format, white),
        }
    }
}

/// Expand a single luma value to one value per band.
fn bands(format: &PixelFormatDescriptor, value: i64) -> Vec<i64> {
    let samples = format.samples_per_pixel as usize;
    if samples == 1 {
        return vec![value];
    }
    let level = value.clamp(0, 255) as f64;
    if format.photometric_interpretation.is_ybr() {
        rgb_to_ybr(level, level, level).iter().map(|&v| v as i64).collect()
    } else {
        vec![level as i64; samples]
    }
}
