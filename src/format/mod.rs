//! Pixel format description shared by decoding, rendering and redaction.
//!
//! A [`PixelFormatDescriptor`] is built once per image and never mutated. It
//! carries the geometry and bit layout of the stored samples together with the
//! optional pixel padding declaration, and derives the masks used when
//! unpacking stored values.

use serde::{Deserialize, Serialize};

use crate::error::{BlackoutError, Result};

/// Whether stored integer samples are two's complement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum PixelRepresentation {
    /// Pixel Representation 0
    #[default]
    Unsigned,
    /// Pixel Representation 1
    Signed,
}

impl PixelRepresentation {
    /// Map the DICOM Pixel Representation value.
    pub fn from_dicom(value: u16) -> Self {
        if value == 1 {
            PixelRepresentation::Signed
        } else {
            PixelRepresentation::Unsigned
        }
    }
}

/// Layout of multi-sample pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum PlanarConfiguration {
    /// Samples of one pixel are adjacent (R1 G1 B1 R2 G2 B2 ...).
    #[default]
    Interleaved,
    /// Each sample is stored as a separate plane (R1 R2 ... G1 G2 ... B1 B2 ...).
    ByPlane,
}

impl PlanarConfiguration {
    /// Map the DICOM Planar Configuration value.
    pub fn from_dicom(value: u16) -> Self {
        if value == 1 {
            PlanarConfiguration::ByPlane
        } else {
            PlanarConfiguration::Interleaved
        }
    }

    /// DICOM Planar Configuration value.
    pub fn to_dicom(self) -> u16 {
        match self {
            PlanarConfiguration::Interleaved => 0,
            PlanarConfiguration::ByPlane => 1,
        }
    }

    /// Distance between consecutive pixels and between consecutive bands,
    /// in samples, for a frame of `pixel_count` pixels.
    pub fn strides(self, samples_per_pixel: usize, pixel_count: usize) -> (usize, usize) {
        match self {
            PlanarConfiguration::Interleaved => (samples_per_pixel, 1),
            PlanarConfiguration::ByPlane => (1, pixel_count),
        }
    }
}

/// Photometric interpretation of the stored samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PhotometricInterpretation {
    /// Grayscale, minimum value displayed white.
    Monochrome1,
    /// Grayscale, minimum value displayed black.
    Monochrome2,
    /// Single sample indexing a palette color lookup table.
    PaletteColor,
    /// Red, green, blue.
    Rgb,
    /// Full range luminance/chrominance.
    YbrFull,
    /// Full range luminance/chrominance, horizontally subsampled chroma.
    YbrFull422,
    /// Partial range, horizontally subsampled chroma.
    YbrPartial422,
    /// Partial range, 4:2:0 chroma.
    YbrPartial420,
    /// JPEG 2000 irreversible color transform.
    YbrIct,
    /// JPEG 2000 reversible color transform.
    YbrRct,
}

impl PhotometricInterpretation {
    /// Parse a DICOM photometric interpretation string.
    pub fn from_dicom_string(s: &str) -> Result<Self> {
        let normalized = s.trim_end_matches(['\0', ' ']).trim().to_uppercase();
        Ok(match normalized.as_str() {
            "MONOCHROME1" => PhotometricInterpretation::Monochrome1,
            "MONOCHROME2" => PhotometricInterpretation::Monochrome2,
            "PALETTE COLOR" => PhotometricInterpretation::PaletteColor,
            "RGB" => PhotometricInterpretation::Rgb,
            "YBR_FULL" => PhotometricInterpretation::YbrFull,
            "YBR_FULL_422" => PhotometricInterpretation::YbrFull422,
            "YBR_PARTIAL_422" => PhotometricInterpretation::YbrPartial422,
            "YBR_PARTIAL_420" => PhotometricInterpretation::YbrPartial420,
            "YBR_ICT" => PhotometricInterpretation::YbrIct,
            "YBR_RCT" => PhotometricInterpretation::YbrRct,
            other => {
                return Err(BlackoutError::UnsupportedEncoding(format!(
                    "photometric interpretation '{}'",
                    other
                )))
            }
        })
    }

    /// DICOM string for this interpretation.
    pub fn as_str(&self) -> &'static str {
        match self {
            PhotometricInterpretation::Monochrome1 => "MONOCHROME1",
            PhotometricInterpretation::Monochrome2 => "MONOCHROME2",
            PhotometricInterpretation::PaletteColor => "PALETTE COLOR",
            PhotometricInterpretation::Rgb => "RGB",
            PhotometricInterpretation::YbrFull => "YBR_FULL",
            PhotometricInterpretation::YbrFull422 => "YBR_FULL_422",
            PhotometricInterpretation::YbrPartial422 => "YBR_PARTIAL_422",
            PhotometricInterpretation::YbrPartial420 => "YBR_PARTIAL_420",
            PhotometricInterpretation::YbrIct => "YBR_ICT",
            PhotometricInterpretation::YbrRct => "YBR_RCT",
        }
    }

    /// Grayscale interpretations (including palette indices).
    pub fn is_single_channel(&self) -> bool {
        matches!(
            self,
            PhotometricInterpretation::Monochrome1
                | PhotometricInterpretation::Monochrome2
                | PhotometricInterpretation::PaletteColor
        )
    }

    /// MONOCHROME1 renders inverted.
    pub fn is_inverted(&self) -> bool {
        matches!(self, PhotometricInterpretation::Monochrome1)
    }

    /// Any of the YBR family.
    pub fn is_ybr(&self) -> bool {
        matches!(
            self,
            PhotometricInterpretation::YbrFull
                | PhotometricInterpretation::YbrFull422
                | PhotometricInterpretation::YbrPartial422
                | PhotometricInterpretation::YbrPartial420
                | PhotometricInterpretation::YbrIct
                | PhotometricInterpretation::YbrRct
        )
    }
}

impl std::fmt::Display for PhotometricInterpretation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pixel Padding Value and optional Pixel Padding Range Limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelPadding {
    /// Pixel Padding Value.
    pub value: i32,
    /// Pixel Padding Range Limit; the range is inclusive at both ends.
    pub range_limit: Option<i32>,
}

/// Inclusive range of stored values treated as padding.
///
/// Values are compared after masking to the stored bits (and sign extension
/// for signed data).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaddingFilter {
    low: i64,
    high: i64,
}

impl PaddingFilter {
    /// A filter matching exactly one value.
    pub fn exact(value: i64) -> Self {
        Self {
            low: value,
            high: value,
        }
    }

    /// A filter matching `a..=b` in whichever order the ends are given.
    pub fn range(a: i64, b: i64) -> Self {
        Self {
            low: a.min(b),
            high: a.max(b),
        }
    }

    /// Whether a stored value is padding.
    #[inline]
    pub fn contains(&self, value: i64) -> bool {
        value >= self.low && value <= self.high
    }

    /// Lowest padded value.
    pub fn low(&self) -> i64 {
        self.low
    }

    /// Highest padded value.
    pub fn high(&self) -> i64 {
        self.high
    }
}

/// Immutable description of how pixel samples are stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PixelFormatDescriptor {
    /// Rows per frame.
    pub rows: u32,
    /// Columns per frame.
    pub columns: u32,
    /// Samples per pixel (1 or 3).
    pub samples_per_pixel: u16,
    /// Bits allocated per sample.
    pub bits_allocated: u16,
    /// Bits stored per sample.
    pub bits_stored: u16,
    /// Most significant stored bit.
    pub high_bit: u16,
    /// Signedness of integer samples.
    pub pixel_representation: PixelRepresentation,
    /// Sample layout for multi-sample pixels.
    pub planar_configuration: PlanarConfiguration,
    /// Photometric interpretation.
    pub photometric_interpretation: PhotometricInterpretation,
    /// Number of frames in the pixel data.
    pub number_of_frames: u32,
    /// Pixel padding declaration.
    pub padding: Option<PixelPadding>,
}

impl PixelFormatDescriptor {
    /// Create a descriptor for a single frame, checking the bit layout invariants.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        rows: u32,
        columns: u32,
        samples_per_pixel: u16,
        bits_allocated: u16,
        bits_stored: u16,
        high_bit: u16,
        pixel_representation: PixelRepresentation,
        planar_configuration: PlanarConfiguration,
        photometric_interpretation: PhotometricInterpretation,
    ) -> Result<Self> {
        let descriptor = Self {
            rows,
            columns,
            samples_per_pixel,
            bits_allocated,
            bits_stored,
            high_bit,
            pixel_representation,
            planar_configuration,
            photometric_interpretation,
            number_of_frames: 1,
            padding: None,
        };
        descriptor.validate()?;
        Ok(descriptor)
    }

    /// Unsigned MONOCHROME2 descriptor with `bits_stored == bits_allocated`.
    pub fn grayscale(rows: u32, columns: u32, bits: u16) -> Result<Self> {
        Self::new(
            rows,
            columns,
            1,
            bits,
            bits,
            bits.saturating_sub(1),
            PixelRepresentation::Unsigned,
            PlanarConfiguration::Interleaved,
            PhotometricInterpretation::Monochrome2,
        )
    }

    /// Interleaved 8-bit RGB descriptor.
    pub fn rgb(rows: u32, columns: u32) -> Result<Self> {
        Self::new(
            rows,
            columns,
            3,
            8,
            8,
            7,
            PixelRepresentation::Unsigned,
            PlanarConfiguration::Interleaved,
            PhotometricInterpretation::Rgb,
        )
    }

    /// Set the number of frames.
    pub fn with_frames(mut self, number_of_frames: u32) -> Self {
        self.number_of_frames = number_of_frames.max(1);
        self
    }

    /// Set the pixel padding declaration.
    pub fn with_padding(mut self, padding: Option<PixelPadding>) -> Self {
        self.padding = padding;
        self
    }

    /// Set signed pixel representation.
    pub fn with_representation(mut self, representation: PixelRepresentation) -> Self {
        self.pixel_representation = representation;
        self
    }

    /// Set the photometric interpretation.
    pub fn with_photometric(mut self, photometric: PhotometricInterpretation) -> Self {
        self.photometric_interpretation = photometric;
        self
    }

    /// Set the planar configuration.
    pub fn with_planar_configuration(mut self, planar: PlanarConfiguration) -> Self {
        self.planar_configuration = planar;
        self
    }

    /// Check the bit layout invariants.
    pub fn validate(&self) -> Result<()> {
        if self.rows == 0 || self.columns == 0 {
            return Err(BlackoutError::UnsupportedEncoding(format!(
                "empty frame geometry {}x{}",
                self.columns, self.rows
            )));
        }
        if self.bits_stored == 0 || self.bits_stored > self.bits_allocated {
            return Err(BlackoutError::UnsupportedEncoding(format!(
                "bits stored {} with bits allocated {}",
                self.bits_stored, self.bits_allocated
            )));
        }
        if self.high_bit >= self.bits_allocated || self.high_bit + 1 < self.bits_stored {
            return Err(BlackoutError::UnsupportedEncoding(format!(
                "high bit {} inconsistent with bits stored {} / allocated {}",
                self.high_bit, self.bits_stored, self.bits_allocated
            )));
        }
        Ok(())
    }

    /// Whether samples are two's complement.
    pub fn is_signed(&self) -> bool {
        self.pixel_representation == PixelRepresentation::Signed
    }

    /// Pixels per frame.
    pub fn pixel_count(&self) -> usize {
        self.rows as usize * self.columns as usize
    }

    /// Samples per frame across all bands.
    pub fn samples_per_frame(&self) -> usize {
        self.pixel_count() * self.samples_per_pixel as usize
    }

    /// Bits occupied by one frame in the stored pixel data.
    pub fn bits_per_frame(&self) -> usize {
        self.samples_per_frame() * self.bits_allocated as usize
    }

    /// Mask covering the stored bits.
    pub fn stored_mask(&self) -> u32 {
        low_bits_mask(self.bits_stored)
    }

    /// Right shift that brings the lowest stored bit to bit 0.
    pub fn stored_shift(&self) -> u32 {
        (self.high_bit + 1 - self.bits_stored) as u32
    }

    /// Sign bit of a masked stored value.
    pub fn sign_bit(&self) -> u32 {
        1u32 << (self.bits_stored - 1)
    }

    /// Bits OR-ed into a negative masked value to sign-extend it.
    pub fn extend_mask(&self) -> u32 {
        !self.stored_mask()
    }

    /// Mask, shift and (when signed) sign-extend a raw allocated word.
    #[inline]
    pub fn normalize(&self, raw: u32) -> i64 {
        let masked = (raw >> self.stored_shift()) & self.stored_mask();
        if self.is_signed() && masked & self.sign_bit() != 0 {
            (masked | self.extend_mask()) as i32 as i64
        } else {
            masked as i64
        }
    }

    /// Smallest and largest values representable in the stored bits.
    pub fn representable_range(&self) -> (i64, i64) {
        let bits = self.bits_stored.min(32) as u32;
        if self.is_signed() {
            (-(1i64 << (bits - 1)), (1i64 << (bits - 1)) - 1)
        } else {
            (0, (1i64 << bits) - 1)
        }
    }

    /// Padding filter derived from the padding declaration and the stored mask.
    ///
    /// A padding value outside the representable range is matched exactly
    /// after masking and the range limit is ignored.
    pub fn padding_filter(&self) -> Option<PaddingFilter> {
        let padding = self.padding?;
        let (lo, hi) = self.representable_range();
        let value = padding.value as i64;
        if value < lo || value > hi {
            return Some(PaddingFilter::exact(self.normalize(padding.value as u32)));
        }
        match padding.range_limit {
            Some(limit) => {
                let limit = limit as i64;
                let limit = if limit < lo || limit > hi {
                    self.normalize(limit as u32)
                } else {
                    limit
                };
                Some(PaddingFilter::range(value, limit))
            }
            None => Some(PaddingFilter::exact(value)),
        }
    }
}

/// Mask of the low `bits` bits.
pub(crate) fn low_bits_mask(bits: u16) -> u32 {
    if bits >= 32 {
        u32::MAX
    } else {
        (1u32 << bits) - 1
    }
}
