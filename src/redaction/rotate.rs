//! Lossless rotation by multiples of 90 degrees with optional horizontal flip.

use serde::{Deserialize, Serialize};

use crate::decoder::{bit_at, pack_bits, FrameData, FrameSource, RasterFrame};
use crate::error::{BlackoutError, Result};

use super::{output_format, Canvas, PixelBuffer};

/// Clockwise rotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Rotation {
    /// No rotation.
    #[default]
    None,
    /// 90 degrees clockwise.
    Clockwise90,
    /// 180 degrees.
    Rotate180,
    /// 270 degrees clockwise.
    Clockwise270,
}

impl Rotation {
    /// Parse a clockwise angle; negative angles rotate counter-clockwise.
    pub fn from_degrees(degrees: i32) -> Result<Self> {
        if degrees % 90 != 0 {
            return Err(BlackoutError::InvalidRequest(format!(
                "rotation of {} degrees is not a multiple of 90",
                degrees
            )));
        }
        Ok(match degrees.rem_euclid(360) {
            0 => Rotation::None,
            90 => Rotation::Clockwise90,
            180 => Rotation::Rotate180,
            _ => Rotation::Clockwise270,
        })
    }

    /// Clockwise angle in degrees.
    pub fn degrees(self) -> i32 {
        match self {
            Rotation::None => 0,
            Rotation::Clockwise90 => 90,
            Rotation::Rotate180 => 180,
            Rotation::Clockwise270 => 270,
        }
    }

    /// Whether rows and columns swap.
    pub fn swaps_dimensions(self) -> bool {
        matches!(self, Rotation::Clockwise90 | Rotation::Clockwise270)
    }

    /// Output (width, height) for an input of `width` x `height`.
    pub fn output_size(self, width: usize, height: usize) -> (usize, usize) {
        if self.swaps_dimensions() {
            (height, width)
        } else {
            (width, height)
        }
    }

    /// Input (row, column) shown at output (`row`, `column`).
    pub fn source_position(self, row: usize, column: usize, width: usize, height: usize, flip: bool) -> (usize, usize) {
        let (out_width, _) = self.output_size(width, height);
        let column = if flip { out_width - 1 - column } else { column };
        match self {
            Rotation::None => (row, column),
            Rotation::Clockwise90 => (height - 1 - column, row),
            Rotation::Rotate180 => (height - 1 - row, width - 1 - column),
            Rotation::Clockwise270 => (column, width - 1 - row),
        }
    }
}

fn remap<T: Copy>(values: &[T], channels: usize, width: usize, height: usize, rotation: Rotation, flip: bool) -> Vec<T> {
    let (out_width, out_height) = rotation.output_size(width, height);
    let mut out = Vec::with_capacity(values.len());
    for row in 0..out_height {
        for column in 0..out_width {
            let (r, c) = rotation.source_position(row, column, width, height, flip);
            let base = (r * width + c) * channels;
            out.extend_from_slice(&values[base..base + channels]);
        }
    }
    out
}

impl RasterFrame {
    /// Rotate and optionally flip this frame. The value range is unchanged.
    pub fn rotated(&self, rotation: Rotation, flip: bool) -> RasterFrame {
        let (w, h) = (self.width() as usize, self.height() as usize);
        let data = match self.data() {
            FrameData::Bit1(bits) => {
                let unpacked: Vec<u8> = (0..w * h).map(|i| bit_at(bits, i)).collect();
                let rotated = remap(&unpacked, 1, w, h, rotation, flip);
                FrameData::Bit1(pack_bits(rotated.iter().map(|&b| b != 0), w * h))
            }
            FrameData::U8(v) => FrameData::U8(remap(v, 1, w, h, rotation, flip)),
            FrameData::S8(v) => FrameData::S8(remap(v, 1, w, h, rotation, flip)),
            FrameData::U16(v) => FrameData::U16(remap(v, 1, w, h, rotation, flip)),
            FrameData::S16(v) => FrameData::S16(remap(v, 1, w, h, rotation, flip)),
            FrameData::F32(v) => FrameData::F32(remap(v, 1, w, h, rotation, flip)),
            FrameData::F64(v) => FrameData::F64(remap(v, 1, w, h, rotation, flip)),
            FrameData::Rgb8(v) => FrameData::Rgb8(remap(v, 3, w, h, rotation, flip)),
        };
        let (out_w, out_h) = rotation.output_size(w, h);
        RasterFrame::new(out_w as u32, out_h as u32, data, self.value_range())
    }
}

/// Rotate and optionally flip every frame of `source`.
///
/// Produces new pixel bytes and a descriptor with rows and columns swapped for
/// 90 and 270 degrees. Bit widths narrow the same way redaction output does.
pub fn rotate_and_flip(source: &mut FrameSource, rotation: Rotation, flip: bool) -> Result<PixelBuffer> {
    let mut format = output_format(source.format())?;
    if rotation.swaps_dimensions() {
        std::mem::swap(&mut format.rows, &mut format.columns);
    }

    let mut bytes = Vec::with_capacity(format.bits_per_frame() / 8 * source.frame_count());
    for index in 0..source.frame_count() {
        let frame = source.frame(index)?;
        super::check_frame(&frame, source.format())?;
        let rotated = frame.rotated(rotation, flip);
        Canvas::from_frame(&rotated).write(&format, &mut bytes);
    }
    log::info!(
        "Rotated {} frame(s) by {} degrees{}",
        source.frame_count(),
        rotation.degrees(),
        if flip { " with flip" } else { "" }
    );
    Ok(PixelBuffer { bytes, format })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::PixelSource;
    use crate::format::PixelFormatDescriptor;

    fn frame_2x3() -> RasterFrame {
        // 1 2 3
        // 4 5 6
        RasterFrame::new(3, 2, FrameData::U8(vec![1, 2, 3, 4, 5, 6]), None)
    }

    fn values(frame: &RasterFrame) -> Vec<u8> {
        match frame.data() {
            FrameData::U8(v) => v.clone(),
            other => panic!("unexpected {:?}", other.type_name()),
        }
    }

    #[test]
    fn test_rotation_cases() {
        let frame = frame_2x3();
        let cw = frame.rotated(Rotation::Clockwise90, false);
        assert_eq!((cw.width(), cw.height()), (2, 3));
        assert_eq!(values(&cw), vec![4, 1, 5, 2, 6, 3]);

        let half = frame.rotated(Rotation::Rotate180, false);
        assert_eq!(values(&half), vec![6, 5, 4, 3, 2, 1]);

        let ccw = frame.rotated(Rotation::Clockwise270, false);
        assert_eq!(values(&ccw), vec![3, 6, 2, 5, 1, 4]);

        let flipped = frame.rotated(Rotation::None, true);
        assert_eq!(values(&flipped), vec![3, 2, 1, 6, 5, 4]);
    }

    #[test]
    fn test_rotation_involutions() {
        let frame = frame_2x3();
        let mut four = frame.clone();
        for _ in 0..4 {
            four = four.rotated(Rotation::Clockwise90, false);
        }
        assert_eq!(four, frame);
        let twice = frame
            .rotated(Rotation::Rotate180, false)
            .rotated(Rotation::Rotate180, false);
        assert_eq!(twice, frame);
    }

    #[test]
    fn test_bit1_and_rgb_rotation() {
        let bits = RasterFrame::new(2, 1, FrameData::Bit1(vec![0b01]), None);
        let rotated = bits.rotated(Rotation::Clockwise90, false);
        assert_eq!((rotated.width(), rotated.height()), (1, 2));
        assert_eq!(rotated.int_sample(0, 0), 1);
        assert_eq!(rotated.int_sample(1, 0), 0);

        let rgb = RasterFrame::new(2, 1, FrameData::Rgb8(vec![1, 2, 3, 4, 5, 6]), None);
        let rotated = rgb.rotated(Rotation::Rotate180, false);
        assert_eq!(rotated.data(), &FrameData::Rgb8(vec![4, 5, 6, 1, 2, 3]));
    }

    #[test]
    fn test_from_degrees() {
        assert_eq!(Rotation::from_degrees(-90).unwrap(), Rotation::Clockwise270);
        assert_eq!(Rotation::from_degrees(450).unwrap(), Rotation::Clockwise90);
        assert!(matches!(Rotation::from_degrees(45), Err(BlackoutError::InvalidRequest(_))));
    }

    #[test]
    fn test_rotate_source_swaps_geometry() {
        let format = PixelFormatDescriptor::grayscale(2, 3, 8).unwrap().with_frames(2);
        let bytes = vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12];
        let mut source = FrameSource::decode(PixelSource::Bytes(bytes), format).unwrap();
        let rotated = rotate_and_flip(&mut source, Rotation::Clockwise90, false).unwrap();
        assert_eq!((rotated.format.rows, rotated.format.columns), (3, 2));
        assert_eq!(rotated.bytes, vec![4, 1, 5, 2, 6, 3, 10, 7, 11, 8, 12, 9]);
    }
}
