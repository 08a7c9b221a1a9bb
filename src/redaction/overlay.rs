//! Overlay bit planes burned into redacted pixel data.

use crate::decoder::{bit_at, pack_bits};

/// Number of overlay planes (groups 6000 to 601E).
pub const MAX_OVERLAY_PLANES: usize = 16;

/// One binary overlay plane positioned in image coordinates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverlayPlane {
    /// Overlay rows.
    pub rows: u32,
    /// Overlay columns.
    pub columns: u32,
    /// Column of the overlay's first pixel in the image, 0-based.
    pub origin_x: i32,
    /// Row of the overlay's first pixel in the image, 0-based.
    pub origin_y: i32,
    /// Packed bits, least significant bit first, row major.
    pub bits: Vec<u8>,
}

impl OverlayPlane {
    /// Create a plane from packed overlay data.
    pub fn new(rows: u32, columns: u32, origin_x: i32, origin_y: i32, bits: Vec<u8>) -> Self {
        Self {
            rows,
            columns,
            origin_x,
            origin_y,
            bits,
        }
    }

    /// Create a plane from one flag per pixel.
    pub fn from_mask(rows: u32, columns: u32, origin_x: i32, origin_y: i32, mask: &[bool]) -> Self {
        let count = rows as usize * columns as usize;
        let bits = pack_bits(mask.iter().copied(), count);
        Self::new(rows, columns, origin_x, origin_y, bits)
    }

    /// Whether overlay pixel (`row`, `column`) is set. Truncated data reads as unset.
    pub fn is_set(&self, row: u32, column: u32) -> bool {
        if row >= self.rows || column >= self.columns {
            return false;
        }
        let index = row as usize * self.columns as usize + column as usize;
        index / 8 < self.bits.len() && bit_at(&self.bits, index) != 0
    }

    /// Image coordinates (x, y) of every set pixel.
    pub fn set_pixels(&self) -> impl Iterator<Item = (i64, i64)> + '_ {
        (0..self.rows).flat_map(move |row| {
            (0..self.columns)
                .filter(move |&column| self.is_set(row, column))
                .map(move |column| {
                    (
                        self.origin_x as i64 + column as i64,
                        self.origin_y as i64 + row as i64,
                    )
                })
        })
    }
}

/// Supplier of overlay planes for a multi-frame image.
pub trait OverlaySource {
    /// Whether overlay `plane` (0..16) applies to `frame`.
    fn has_overlay(&self, frame: usize, plane: usize) -> bool;

    /// Overlay `plane` as it applies to `frame`.
    fn overlay(&self, frame: usize, plane: usize) -> Option<OverlayPlane>;
}
