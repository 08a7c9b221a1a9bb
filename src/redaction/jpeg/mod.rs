//! Lossless block-level redaction of baseline JPEG frames.
//!
//! Only the 8x8 blocks that intersect a redaction rectangle are rewritten.
//! Every other block keeps its entropy-coded bits, so untouched image regions
//! suffer no generation loss. Only baseline sequential Huffman JPEG (SOF0,
//! transfer syntax 1.2.840.10008.1.2.4.50) is handled.
//!
//! # Example
//!
//! ```rust,ignore
//! use medimg_blackout::redaction::{redact_baseline_jpeg, JpegRedactionOptions, RedactionShape};
//!
//! let shapes = [RedactionShape::new(0, 0, 256, 32)];
//! let redacted = redact_baseline_jpeg(&jpeg, &shapes, &JpegRedactionOptions::default())?;
//! ```

mod bits;
mod blackout;
mod huffman;
mod markers;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::transfer_syntax;
use crate::error::{BlackoutError, Result};

use super::RedactionShape;

/// Options for block-level JPEG redaction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JpegRedactionOptions {
    /// Gray level redacted luma blocks decode to.
    pub gray_level: u8,
    /// Always regenerate optimal Huffman tables instead of only when the
    /// existing tables lack a needed code.
    pub optimize_tables: bool,
}

/// Redact `shapes` in one baseline JPEG stream.
///
/// An empty shape list is rejected with `InvalidRequest`; any JPEG process
/// other than baseline with `UnsupportedTransferSyntax`.
pub fn redact_baseline_jpeg(
    data: &[u8],
    shapes: &[RedactionShape],
    options: &JpegRedactionOptions,
) -> Result<Vec<u8>> {
    if shapes.is_empty() {
        return Err(BlackoutError::InvalidRequest("no redaction shapes given".into()));
    }
    let structure = markers::parse(data)?;
    log::debug!(
        "Baseline JPEG {}x{}, {} component(s), {} scan(s)",
        structure.frame.width,
        structure.frame.height,
        structure.frame.components.len(),
        structure.scans.len()
    );
    blackout::redact_structure(data, &structure, shapes, options)
}

/// Redact the encapsulated frames of a baseline JPEG image.
///
/// `shapes[i]` lists the rectangles for frame `i`; frames without shapes are
/// returned unchanged. The transfer syntax is checked before any frame is
/// touched.
pub fn redact_encapsulated_frames(
    transfer_syntax_uid: &str,
    frames: &[Vec<u8>],
    shapes: &[Vec<RedactionShape>],
    options: &JpegRedactionOptions,
) -> Result<Vec<Vec<u8>>> {
    let uid = transfer_syntax::normalize(transfer_syntax_uid);
    if uid != transfer_syntax::JPEG_BASELINE {
        return Err(BlackoutError::UnsupportedTransferSyntax(format!(
            "block redaction needs baseline JPEG ({}), got {}",
            transfer_syntax::JPEG_BASELINE,
            uid
        )));
    }
    if shapes.iter().all(Vec::is_empty) {
        return Err(BlackoutError::InvalidRequest("no redaction shapes given".into()));
    }

    let redacted = frames
        .par_iter()
        .enumerate()
        .map(|(index, frame)| match shapes.get(index) {
            Some(frame_shapes) if !frame_shapes.is_empty() => redact_baseline_jpeg(frame, frame_shapes, options),
            _ => Ok(frame.clone()),
        })
        .collect::<Result<Vec<_>>>()?;
    log::info!("Redacted {} baseline JPEG frame(s)", shapes.iter().filter(|s| !s.is_empty()).count());
    Ok(redacted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::codecs::jpeg::JpegEncoder;
    use image::ExtendedColorType;

    fn encode(pixels: &[u8], width: u32, height: u32, color: ExtendedColorType) -> Vec<u8> {
        let mut out = Vec::new();
        JpegEncoder::new_with_quality(&mut out, 85)
            .encode(pixels, width, height, color)
            .unwrap();
        out
    }

    fn gray_fixture() -> Vec<u8> {
        let pixels: Vec<u8> = (0..64u32)
            .flat_map(|y| (0..64u32).map(move |x| (100 + (x + y) % 100) as u8))
            .collect();
        encode(&pixels, 64, 64, ExtendedColorType::L8)
    }

    #[test]
    fn test_redacted_blocks_are_black_and_others_identical() {
        let data = gray_fixture();
        let shape = RedactionShape::new(18, 20, 10, 5);
        let out = redact_baseline_jpeg(&data, &[shape], &JpegRedactionOptions::default()).unwrap();

        let before = image::load_from_memory(&data).unwrap().to_luma8();
        let after = image::load_from_memory(&out).unwrap().to_luma8();
        // the shape touches blocks in columns 16..32 and rows 16..32
        for y in 0..64 {
            for x in 0..64 {
                let in_block = (16..32).contains(&x) && (16..32).contains(&y);
                let (a, b) = (before.get_pixel(x, y)[0], after.get_pixel(x, y)[0]);
                if in_block {
                    assert!(b <= 2, "pixel ({}, {}) = {}", x, y, b);
                } else {
                    assert_eq!(a, b, "pixel ({}, {}) changed", x, y);
                }
            }
        }
    }

    #[test]
    fn test_header_bytes_preserved() {
        let data = gray_fixture();
        let out = redact_baseline_jpeg(&data, &[RedactionShape::new(40, 40, 8, 8)], &JpegRedactionOptions::default()).unwrap();
        let sos = data.windows(2).position(|w| w == [0xFF, 0xDA]).unwrap();
        assert_eq!(&out[..sos], &data[..sos]);
        assert_eq!(&out[out.len() - 2..], &[0xFF, 0xD9]);
    }

    #[test]
    fn test_gray_level_option() {
        let data = gray_fixture();
        let options = JpegRedactionOptions {
            gray_level: 200,
            ..Default::default()
        };
        let out = redact_baseline_jpeg(&data, &[RedactionShape::new(0, 0, 8, 8)], &options).unwrap();
        let after = image::load_from_memory(&out).unwrap().to_luma8();
        let value = after.get_pixel(3, 3)[0] as i32;
        assert!((value - 200).abs() <= 3, "got {}", value);
    }

    #[test]
    fn test_color_redaction_is_dark() {
        let pixels: Vec<u8> = (0..32u32 * 32)
            .flat_map(|i| [(i % 200) as u8 + 40, 120, (255 - i % 200) as u8])
            .collect();
        let data = encode(&pixels, 32, 32, ExtendedColorType::Rgb8);
        let out = redact_baseline_jpeg(&data, &[RedactionShape::new(0, 0, 16, 16)], &JpegRedactionOptions::default()).unwrap();
        let after = image::load_from_memory(&out).unwrap().to_rgb8();
        for y in 2..14 {
            for x in 2..14 {
                let p = after.get_pixel(x, y);
                assert!(p[0] < 12 && p[1] < 12 && p[2] < 12, "pixel ({}, {}) = {:?}", x, y, p);
            }
        }
    }

    #[test]
    fn test_empty_shapes_rejected() {
        let result = redact_baseline_jpeg(&gray_fixture(), &[], &JpegRedactionOptions::default());
        assert!(matches!(result, Err(BlackoutError::InvalidRequest(_))));
    }

    #[test]
    fn test_non_baseline_rejected() {
        let mut data = gray_fixture();
        let sof = data.windows(2).position(|w| w == [0xFF, 0xC0]).unwrap();
        data[sof + 1] = 0xC2;
        let result = redact_baseline_jpeg(&data, &[RedactionShape::new(0, 0, 8, 8)], &JpegRedactionOptions::default());
        assert!(matches!(result, Err(BlackoutError::UnsupportedTransferSyntax(_))));
    }

    #[test]
    fn test_encapsulated_frames() {
        let frames = vec![gray_fixture(), gray_fixture()];
        let shapes = vec![Vec::new(), vec![RedactionShape::new(0, 0, 8, 8)]];
        let out = redact_encapsulated_frames(
            "1.2.840.10008.1.2.4.50\0",
            &frames,
            &shapes,
            &JpegRedactionOptions::default(),
        )
        .unwrap();
        assert_eq!(out[0], frames[0]);
        assert_ne!(out[1], frames[1]);

        let wrong = redact_encapsulated_frames(
            transfer_syntax::JPEG_LOSSLESS_SV1,
            &frames,
            &shapes,
            &JpegRedactionOptions::default(),
        );
        assert!(matches!(wrong, Err(BlackoutError::UnsupportedTransferSyntax(_))));

        let empty = redact_encapsulated_frames(
            transfer_syntax::JPEG_BASELINE,
            &frames,
            &[Vec::new(), Vec::new()],
            &JpegRedactionOptions::default(),
        );
        assert!(matches!(empty, Err(BlackoutError::InvalidRequest(_))));
    }
}
