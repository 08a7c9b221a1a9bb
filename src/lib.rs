//! DICOM Pixel Decoding, Rendering and Redaction Library
//!
//! Decodes stored DICOM pixel data into typed frames, renders them to 8-bit
//! gray or RGB rasters through the modality, VOI and palette transforms, and
//! blacks out rectangular regions of the stored pixel data.
//!
//! # Features
//!
//! - **Decoding**: 1, 8, 16, 32 and 64 bit samples, signed or unsigned, any
//!   high bit placement, from owned buffers or memory-mapped files
//! - **Rendering**: rescale, VOI windows and LUTs (linear, exact linear,
//!   sigmoid), palette color, YBR to RGB, inversion and pixel padding
//! - **Redaction**: rectangle fill and overlay burn-in on native pixel data,
//!   rotation and flipping, and lossless 8x8 block blackout of baseline JPEG
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use medimg_blackout::{DicomImage, RedactionOptions, RedactionShape};
//! use medimg_blackout::redaction::redact;
//!
//! let image = DicomImage::open("input.dcm")?;
//! let mut source = image.frame_source()?;
//!
//! // Black out the top banner of every frame
//! let shapes = vec![vec![RedactionShape::new(0, 0, 512, 40)]; source.frame_count()];
//! let buffer = redact(&mut source, &shapes, &RedactionOptions::default(), Some(&image.overlays))?;
//! ```
//!
//! Baseline JPEG frames are redacted without decoding the untouched blocks:
//!
//! ```rust,ignore
//! use medimg_blackout::redaction::{redact_baseline_jpeg, JpegRedactionOptions};
//!
//! let redacted = redact_baseline_jpeg(&jpeg, &[RedactionShape::new(0, 0, 64, 16)], &JpegRedactionOptions::default())?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cli;
pub mod config;
pub mod decoder;
pub mod dicom;
pub mod error;
pub mod format;
pub mod redaction;
pub mod transform;

// Re-export commonly used types
pub use config::{BlackoutConfig, ColorMode, VoiFunction};
pub use decoder::{FrameData, FrameSource, PixelSource, RasterFrame};
pub use dicom::DicomImage;
pub use error::{BlackoutError, Result};
pub use format::{PhotometricInterpretation, PixelFormatDescriptor, PixelRepresentation, PlanarConfiguration};
pub use redaction::{PixelBuffer, RedactionOptions, RedactionShape};
pub use transform::{render, ModalityTransform, RenderOptions, Rendered, VoiTransform, Window};

/// Library version information.
pub mod version {
    /// Library version string.
    pub const VERSION: &str = env!("CARGO_PKG_VERSION");

    /// Library name.
    pub const NAME: &str = env!("CARGO_PKG_NAME");

    /// Get full version string.
    pub fn full_version() -> String {
        format!("{} {}", NAME, VERSION)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(version::full_version().starts_with("medimg_blackout "));
    }

    #[test]
    fn test_decode_render_redact() {
        let format = PixelFormatDescriptor::grayscale(2, 4, 8).unwrap();
        let mut source = FrameSource::decode(PixelSource::Bytes((0..8).map(|v| v * 30).collect()), format).unwrap();

        let frame = source.frame(0).unwrap();
        let rendered = render(
            &frame,
            &ModalityTransform::default(),
            &VoiTransform::window(105.0, 211.0),
            None,
            &RenderOptions::default(),
        )
        .unwrap();
        assert_eq!(rendered.raster.data.len(), 8);
        assert!(rendered.raster.data.windows(2).all(|w| w[0] <= w[1]));

        let buffer = redaction::redact(
            &mut source,
            &[vec![RedactionShape::new(0, 0, 2, 2)]],
            &RedactionOptions::default(),
            None,
        )
        .unwrap();
        assert_eq!(buffer.bytes, vec![0, 0, 60, 90, 0, 0, 180, 210]);
    }
}
