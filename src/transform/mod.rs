//! Radiometric rendering transforms.
//!
//! This module turns a decoded [`crate::RasterFrame`] into an 8-bit
//! displayable [`Raster8`]:
//! - **Modality rescale** (`slope`, `intercept`) per frame
//! - **VOI** window (center/width) or lookup table per frame, LUTs winning
//! - **Palette color** lookup for palette and supplemental-palette images
//! - **Inversion** and **padding** suppression
//!
//! Every call takes its own [`RenderOptions`]; there is no shared selection state.

mod color;
mod palette;
mod render;
mod window;

pub use color::{rgb_to_ybr, ybr_to_rgb};
pub use palette::{PaletteColorLut, PaletteDescriptor, PaletteUsage};
pub use render::{render, Raster8, RenderOptions, RenderWarning, Rendered};
pub use window::apply_function;

pub use crate::config::{ColorMode, VoiFunction};

use serde::{Deserialize, Serialize};

/// Modality rescale of one frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rescale {
    /// Rescale Slope.
    pub slope: f64,
    /// Rescale Intercept.
    pub intercept: f64,
}

impl Rescale {
    /// Slope 1, intercept 0.
    pub const IDENTITY: Rescale = Rescale {
        slope: 1.0,
        intercept: 0.0,
    };

    /// Create a rescale.
    pub fn new(slope: f64, intercept: f64) -> Self {
        Self { slope, intercept }
    }

    /// `stored * slope + intercept`.
    #[inline]
    pub fn apply(&self, stored: f64) -> f64 {
        stored * self.slope + self.intercept
    }
}

impl Default for Rescale {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Per-frame modality rescale values.
///
/// A list shorter than the number of frames (typically one shared entry)
/// applies its first entry to the remaining frames.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModalityTransform {
    frames: Vec<Rescale>,
}

impl ModalityTransform {
    /// One rescale per frame.
    pub fn new(frames: Vec<Rescale>) -> Self {
        Self { frames }
    }

    /// The same rescale for every frame.
    pub fn uniform(rescale: Rescale) -> Self {
        Self {
            frames: vec![rescale],
        }
    }

    /// Rescale for `frame`, identity if none is present.
    pub fn for_frame(&self, frame: usize) -> Rescale {
        self.frames
            .get(frame)
            .or_else(|| self.frames.first())
            .copied()
            .unwrap_or(Rescale::IDENTITY)
    }

    /// Whether any rescale is defined.
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

/// VOI window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Window {
    /// Window Center.
    pub center: f64,
    /// Window Width.
    pub width: f64,
}

impl Window {
    /// Create a window.
    pub fn new(center: f64, width: f64) -> Self {
        Self { center, width }
    }
}

/// VOI lookup table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoiLut {
    /// First input value mapped by the table.
    pub first_value_mapped: i32,
    /// Number of table entries.
    pub number_of_entries: u32,
    /// Bits per output entry.
    pub bits_per_entry: u16,
    /// Output values.
    pub data: Vec<u16>,
}

impl VoiLut {
    /// Create a LUT; a declared entry count of 0 means 65536.
    pub fn new(first_value_mapped: i32, number_of_entries: u32, bits_per_entry: u16, data: Vec<u16>) -> Self {
        let number_of_entries = if number_of_entries == 0 { 65536 } else { number_of_entries };
        Self {
            first_value_mapped,
            number_of_entries,
            bits_per_entry,
            data,
        }
    }

    /// Window that presents the table as an identity-scaled index transform.
    pub fn identity_window(&self) -> Window {
        Window::new(
            self.first_value_mapped as f64 + self.number_of_entries as f64 / 2.0,
            self.number_of_entries as f64,
        )
    }

    /// Largest output value the table can produce, rounded up to a full
    /// power of two and capped by the declared bits per entry.
    pub fn output_max(&self) -> u32 {
        let declared = crate::format::low_bits_mask(self.bits_per_entry.clamp(1, 16));
        let largest = self.data.iter().copied().max().unwrap_or(0) as u32;
        let used = (largest + 1).next_power_of_two() - 1;
        used.min(declared).max(1)
    }

    /// Table output for a rescaled input value.
    pub fn lookup(&self, value: f64) -> u16 {
        if self.data.is_empty() {
            return 0;
        }
        let last = self.data.len().min(self.number_of_entries as usize).max(1) - 1;
        let index = (value.floor() as i64 - self.first_value_mapped as i64).clamp(0, last as i64);
        self.data[index as usize]
    }
}

/// VOI windows and LUTs defined for one frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VoiFrame {
    /// Windows in declaration order.
    pub windows: Vec<Window>,
    /// Lookup tables in declaration order.
    pub luts: Vec<VoiLut>,
}

/// VOI transform chosen for one render call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum VoiSelection<'a> {
    /// Apply a window with the requested function.
    Window(Window),
    /// Apply a lookup table.
    Lut(&'a VoiLut),
}

/// Per-frame VOI transforms.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VoiTransform {
    frames: Vec<VoiFrame>,
}

impl VoiTransform {
    /// One entry per frame.
    pub fn new(frames: Vec<VoiFrame>) -> Self {
        Self { frames }
    }

    /// The same windows and LUTs for every frame.
    pub fn uniform(frame: VoiFrame) -> Self {
        Self {
            frames: vec![frame],
        }
    }

    /// A single window for every frame.
    pub fn window(center: f64, width: f64) -> Self {
        Self::uniform(VoiFrame {
            windows: vec![Window::new(center, width)],
            luts: Vec::new(),
        })
    }

    /// Definitions for `frame`, falling back to the first entry.
    pub fn for_frame(&self, frame: usize) -> Option<&VoiFrame> {
        self.frames.get(frame).or_else(|| self.frames.first())
    }

    /// Pick the transform for `frame`: a LUT if the frame has any, otherwise a
    /// window with positive width. `selection` indexes into whichever list
    /// wins and falls back to its first entry.
    pub fn select(&self, frame: usize, selection: usize) -> Option<VoiSelection<'_>> {
        let entry = self.for_frame(frame)?;
        if !entry.luts.is_empty() {
            let lut = entry.luts.get(selection).unwrap_or(&entry.luts[0]);
            return Some(VoiSelection::Lut(lut));
        }
        let window = entry.windows.get(selection).or_else(|| entry.windows.first())?;
        (window.width > 0.0).then_some(VoiSelection::Window(*window))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_modality_fallback() {
        let modality = ModalityTransform::new(vec![Rescale::new(2.0, -10.0), Rescale::new(1.0, 5.0)]);
        assert_eq!(modality.for_frame(1).apply(10.0), 15.0);
        assert_eq!(modality.for_frame(7).apply(10.0), 10.0);
        assert_eq!(ModalityTransform::default().for_frame(0), Rescale::IDENTITY);
    }

    #[test]
    fn test_lut_wins_over_window() {
        let voi = VoiTransform::uniform(VoiFrame {
            windows: vec![Window::new(40.0, 400.0)],
            luts: vec![VoiLut::new(-100, 4, 8, vec![0, 10, 20, 30])],
        });
        assert!(matches!(voi.select(0, 0), Some(VoiSelection::Lut(_))));
        assert!(matches!(voi.select(3, 5), Some(VoiSelection::Lut(_))));
    }

    #[test]
    fn test_window_selection_and_zero_width() {
        let voi = VoiTransform::uniform(VoiFrame {
            windows: vec![Window::new(40.0, 400.0), Window::new(300.0, 1500.0)],
            luts: Vec::new(),
        });
        assert_eq!(voi.select(0, 1), Some(VoiSelection::Window(Window::new(300.0, 1500.0))));
        assert_eq!(voi.select(0, 9), Some(VoiSelection::Window(Window::new(40.0, 400.0))));
        assert_eq!(VoiTransform::window(10.0, 0.0).select(0, 0), None);
        assert_eq!(VoiTransform::default().select(0, 0), None);
    }

    #[test]
    fn test_voi_lut_lookup_and_identity() {
        let lut = VoiLut::new(-2, 4, 16, vec![100, 200, 300, 4000]);
        assert_eq!(lut.lookup(-50.0), 100);
        assert_eq!(lut.lookup(-1.0), 200);
        assert_eq!(lut.lookup(99.0), 4000);
        assert_eq!(lut.output_max(), 4095);
        assert_eq!(lut.identity_window(), Window::new(0.0, 4.0));
        assert_eq!(VoiLut::new(0, 0, 16, vec![]).number_of_entries, 65536);
    }
}
