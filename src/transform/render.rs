//! Rendering of decoded frames to 8-bit rasters.

use std::path::Path;

use image::{DynamicImage, GrayImage, ImageFormat, RgbImage};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::{ColorMode, VoiFunction};
use crate::decoder::{bit_at, FrameData, RasterFrame, ValueRange};
use crate::error::{BlackoutError, Result};
use crate::format::{PaddingFilter, PhotometricInterpretation, PixelFormatDescriptor};

use super::color::ybr_to_rgb;
use super::palette::{PaletteColorLut, PaletteUsage};
use super::window::{apply_function, to_level};
use super::{ModalityTransform, Rescale, VoiLut, VoiSelection, VoiTransform, Window};

/// Per-call rendering parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderOptions {
    /// Frame index used to select modality and VOI entries.
    pub frame_index: usize,
    /// VOI function for windows.
    pub function: VoiFunction,
    /// Render `255 - y`.
    pub inverted: bool,
    /// Stored values rendered as 0.
    pub padding: Option<PaddingFilter>,
    /// Output layout for grayscale results.
    pub color_mode: ColorMode,
    /// Explicit window, wins over VOI LUTs and windows.
    pub window: Option<Window>,
    /// Which VOI window or LUT of the frame to use.
    pub voi_selection: usize,
    /// Photometric interpretation of the source, for palette and YBR handling.
    pub photometric: Option<PhotometricInterpretation>,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            frame_index: 0,
            function: VoiFunction::LinearDicom,
            inverted: false,
            padding: None,
            color_mode: ColorMode::Gray,
            window: None,
            voi_selection: 0,
            photometric: None,
        }
    }
}

impl RenderOptions {
    /// Options derived from a pixel format: inversion for MONOCHROME1, the
    /// padding filter and the photometric interpretation.
    pub fn for_format(format: &PixelFormatDescriptor, frame_index: usize) -> Self {
        Self {
            frame_index,
            inverted: format.photometric_interpretation.is_inverted(),
            padding: format.padding_filter(),
            photometric: Some(format.photometric_interpretation),
            ..Default::default()
        }
    }
}

/// Non-fatal conditions met while rendering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderWarning {
    /// The palette was unusable; the frame was rendered as grayscale.
    MalformedPalette(String),
}

/// 8-bit displayable raster, gray or interleaved RGB.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Raster8 {
    /// Columns.
    pub width: u32,
    /// Rows.
    pub height: u32,
    /// 1 (gray) or 3 (RGB).
    pub channels: u8,
    /// `width * height * channels` bytes, row major.
    pub data: Vec<u8>,
}

impl Raster8 {
    /// Convert to an `image` crate buffer.
    pub fn to_dynamic_image(&self) -> Result<DynamicImage> {
        let invalid = || {
            BlackoutError::UnsupportedPixelType(format!(
                "{} channel raster of {} bytes for {}x{}",
                self.channels,
                self.data.len(),
                self.width,
                self.height
            ))
        };
        match self.channels {
            1 => GrayImage::from_raw(self.width, self.height, self.data.clone())
                .map(DynamicImage::ImageLuma8)
                .ok_or_else(invalid),
            3 => RgbImage::from_raw(self.width, self.height, self.data.clone())
                .map(DynamicImage::ImageRgb8)
                .ok_or_else(invalid),
            _ => Err(invalid()),
        }
    }

    /// Write the raster as PNG.
    pub fn save_png<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        self.to_dynamic_image()?
            .save_with_format(path, ImageFormat::Png)?;
        Ok(())
    }
}

/// Render result.
#[derive(Debug, Clone)]
pub struct Rendered {
    /// The displayable raster.
    pub raster: Raster8,
    /// Window actually applied, if any.
    pub window: Option<Window>,
    /// Degradations that did not stop rendering.
    pub warnings: Vec<RenderWarning>,
}

/// How rescaled values become gray levels.
#[derive(Debug, Clone, Copy)]
enum GrayMapping<'a> {
    Window { window: Window, function: VoiFunction },
    Lut(&'a VoiLut),
}

impl GrayMapping<'_> {
    fn level(&self, x: f64) -> u8 {
        match self {
            GrayMapping::Window { window, function } => {
                to_level(apply_function(*function, x, window.center, window.width))
            }
            GrayMapping::Lut(lut) => {
                let out = lut.lookup(x) as f64;
                to_level(out * 255.0 / lut.output_max() as f64)
            }
        }
    }

    fn window(&self) -> Window {
        match self {
            GrayMapping::Window { window, .. } => *window,
            GrayMapping::Lut(lut) => lut.identity_window(),
        }
    }
}

/// Render `frame` to an 8-bit raster.
///
/// Grayscale frames go through rescale, VOI, palette, inversion and padding;
/// color frames only through an optional linear window.
pub fn render(
    frame: &RasterFrame,
    modality: &ModalityTransform,
    voi: &VoiTransform,
    palette: Option<&PaletteColorLut>,
    options: &RenderOptions,
) -> Result<Rendered> {
    let rendered = match frame.data() {
        FrameData::Rgb8(samples) => render_color(frame, samples, voi, options),
        _ => render_gray(frame, modality, voi, palette, options)?,
    };
    log::debug!(
        "Rendered frame {} ({}x{}x{}) with window {:?}",
        options.frame_index,
        rendered.raster.width,
        rendered.raster.height,
        rendered.raster.channels,
        rendered.window
    );
    Ok(rendered)
}

fn render_gray(
    frame: &RasterFrame,
    modality: &ModalityTransform,
    voi: &VoiTransform,
    palette: Option<&PaletteColorLut>,
    options: &RenderOptions,
) -> Result<Rendered> {
    let mut warnings = Vec::new();
    let palette = match palette {
        Some(lut) => match lut.validate() {
            Ok(()) => Some((lut, lut.usage(options.photometric))),
            Err(reason) => {
                log::warn!("Ignoring palette: {}", reason);
                warnings.push(RenderWarning::MalformedPalette(reason));
                None
            }
        },
        None => None,
    };
    if palette.is_some() && frame.data().is_float() {
        return Err(BlackoutError::UnsupportedPixelType(format!(
            "palette lookup on {} samples",
            frame.data().type_name()
        )));
    }

    let rescale = modality.for_frame(options.frame_index);
    let mapping = gray_mapping(frame, rescale, voi, options);
    let channels = if palette.is_some() || options.color_mode == ColorMode::Rgb {
        3
    } else {
        1
    };

    let pixel = |raw: f64, integral: bool| -> [u8; 3] {
        if integral {
            if let Some(padding) = &options.padding {
                if padding.contains(raw as i64) {
                    return [0; 3];
                }
            }
        }
        let x = rescale.apply(raw);
        if let Some((lut, usage)) = palette {
            match usage {
                PaletteUsage::TrueColor => return lut.color(x),
                PaletteUsage::Supplemental { largest_monochrome } if raw > largest_monochrome as f64 => {
                    return lut.color(x)
                }
                PaletteUsage::Supplemental { .. } => {}
            }
        }
        let level = mapping.level(x);
        let level = if options.inverted { 255 - level } else { level };
        [level; 3]
    };

    let width = frame.width() as usize;
    let mut data = vec![0u8; frame.pixel_count() * channels];
    match frame.data() {
        FrameData::Bit1(bits) => {
            let lut = [pixel(0.0, true), pixel(1.0, true)];
            let values: Vec<u8> = (0..frame.pixel_count()).map(|i| bit_at(bits, i)).collect();
            map_rows(&values, width, channels, &mut data, |v| lut[v as usize]);
        }
        FrameData::U8(values) => {
            let lut = build_lut(0, 255, |raw| pixel(raw as f64, true));
            map_rows(values, width, channels, &mut data, |v| lut[v as usize]);
        }
        FrameData::S8(values) => {
            let lut = build_lut(-128, 127, |raw| pixel(raw as f64, true));
            map_rows(values, width, channels, &mut data, |v| lut[(v as i64 + 128) as usize]);
        }
        FrameData::U16(values) => {
            let lut = build_lut(0, 65535, |raw| pixel(raw as f64, true));
            map_rows(values, width, channels, &mut data, |v| lut[v as usize]);
        }
        FrameData::S16(values) => {
            let lut = build_lut(-32768, 32767, |raw| pixel(raw as f64, true));
            map_rows(values, width, channels, &mut data, |v| lut[(v as i64 + 32768) as usize]);
        }
        FrameData::F32(values) => {
            map_rows(values, width, channels, &mut data, |v| pixel(v as f64, false));
        }
        FrameData::F64(values) => {
            map_rows(values, width, channels, &mut data, |v| pixel(v, false));
        }
        FrameData::Rgb8(_) => {
            return Err(BlackoutError::UnsupportedPixelType(
                "color samples in grayscale pipeline".into(),
            ))
        }
    }

    Ok(Rendered {
        raster: Raster8 {
            width: frame.width(),
            height: frame.height(),
            channels: channels as u8,
            data,
        },
        window: Some(mapping.window()),
        warnings,
    })
}

/// Explicit window, else VOI LUT, else VOI window, else min/max statistics.
fn gray_mapping<'a>(
    frame: &RasterFrame,
    rescale: Rescale,
    voi: &'a VoiTransform,
    options: &RenderOptions,
) -> GrayMapping<'a> {
    let function = options.function;
    if let Some(window) = options.window.filter(|w| w.width > 0.0) {
        return GrayMapping::Window { window, function };
    }
    match voi.select(options.frame_index, options.voi_selection) {
        Some(VoiSelection::Lut(lut)) => GrayMapping::Lut(lut),
        Some(VoiSelection::Window(window)) => GrayMapping::Window { window, function },
        None => {
            let range = frame
                .value_range()
                .unwrap_or_else(|| type_range(frame.data()));
            let rescaled = ValueRange::new(rescale.apply(range.min), rescale.apply(range.max));
            let width = rescaled.max - rescaled.min;
            let window = Window::new(
                (rescaled.max + rescaled.min) / 2.0,
                if width > 0.0 { width } else { 1.0 },
            );
            GrayMapping::Window { window, function }
        }
    }
}

/// Full range of the backing type, used when a frame is entirely padding.
fn type_range(data: &FrameData) -> ValueRange {
    match data {
        FrameData::Bit1(_) => ValueRange::new(0.0, 1.0),
        FrameData::U8(_) | FrameData::Rgb8(_) => ValueRange::new(0.0, 255.0),
        FrameData::S8(_) => ValueRange::new(-128.0, 127.0),
        FrameData::U16(_) => ValueRange::new(0.0, 65535.0),
        FrameData::S16(_) => ValueRange::new(-32768.0, 32767.0),
        FrameData::F32(_) | FrameData::F64(_) => ValueRange::new(0.0, 1.0),
    }
}

fn build_lut(lo: i64, hi: i64, f: impl Fn(i64) -> [u8; 3]) -> Vec<[u8; 3]> {
    (lo..=hi).map(f).collect()
}

/// Map every sample to an output pixel, one row per rayon task.
fn map_rows<T, F>(values: &[T], width: usize, channels: usize, out: &mut [u8], f: F)
where
    T: Copy + Sync,
    F: Fn(T) -> [u8; 3] + Sync,
{
    out.par_chunks_mut(width * channels)
        .zip(values.par_chunks(width))
        .for_each(|(dst, src)| {
            for (px, &v) in dst.chunks_exact_mut(channels).zip(src) {
                let rgb = f(v);
                px.copy_from_slice(&rgb[..channels]);
            }
        });
}

fn render_color(frame: &RasterFrame, samples: &[u8], voi: &VoiTransform, options: &RenderOptions) -> Rendered {
    let converted;
    let samples = match options.photometric {
        Some(PhotometricInterpretation::YbrFull | PhotometricInterpretation::YbrFull422) => {
            converted = samples
                .chunks_exact(3)
                .flat_map(|p| ybr_to_rgb(p[0], p[1], p[2]))
                .collect::<Vec<u8>>();
            &converted[..]
        }
        _ => samples,
    };

    let window = options.window.filter(|w| w.width > 0.0).or_else(|| {
        voi.for_frame(options.frame_index)
            .and_then(|entry| entry.windows.first().copied())
            .filter(|w| w.width > 0.0)
    });
    let data = match window {
        Some(window) => {
            let function = match options.function {
                VoiFunction::LinearExact => VoiFunction::LinearExact,
                _ => VoiFunction::LinearDicom,
            };
            let lut: Vec<u8> = (0..=255)
                .map(|v| to_level(apply_function(function, v as f64, window.center, window.width)))
                .collect();
            samples.par_iter().map(|&v| lut[v as usize]).collect()
        }
        None => samples.to_vec(),
    };

    Rendered {
        raster: Raster8 {
            width: frame.width(),
            height: frame.height(),
            channels: 3,
            data,
        },
        window,
        warnings: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::palette::PaletteDescriptor;
    use crate::transform::VoiFrame;

    fn ramp_u8() -> RasterFrame {
        let values: Vec<u8> = (0..=255).collect();
        RasterFrame::new(256, 1, FrameData::U8(values), Some(ValueRange::new(0.0, 255.0)))
    }

    #[test]
    fn test_dicom_identity_window_on_ramp() {
        let frame = ramp_u8();
        let voi = VoiTransform::window(128.5, 256.0);
        let rendered = render(&frame, &ModalityTransform::default(), &voi, None, &RenderOptions::default()).unwrap();
        let expected: Vec<u8> = (0..=255).collect();
        assert_eq!(rendered.raster.data, expected);
        assert_eq!(rendered.raster.channels, 1);
    }

    #[test]
    fn test_statistical_window_from_range() {
        let frame = RasterFrame::new(
            3,
            1,
            FrameData::U16(vec![1000, 1500, 2000]),
            Some(ValueRange::new(1000.0, 2000.0)),
        );
        let options = RenderOptions {
            function: VoiFunction::LinearExact,
            ..Default::default()
        };
        let rendered = render(&frame, &ModalityTransform::default(), &VoiTransform::default(), None, &options).unwrap();
        assert_eq!(rendered.window, Some(Window::new(1500.0, 1000.0)));
        assert_eq!(rendered.raster.data, vec![0, 128, 255]);
    }

    #[test]
    fn test_rescale_applied_before_window() {
        let frame = RasterFrame::new(
            2,
            1,
            FrameData::S16(vec![-1024, 1024]),
            Some(ValueRange::new(-1024.0, 1024.0)),
        );
        let modality = ModalityTransform::uniform(Rescale::new(1.0, 1024.0));
        let options = RenderOptions {
            function: VoiFunction::LinearExact,
            window: Some(Window::new(1024.0, 2048.0)),
            ..Default::default()
        };
        let rendered = render(&frame, &modality, &VoiTransform::default(), None, &options).unwrap();
        assert_eq!(rendered.raster.data, vec![0, 255]);
    }

    #[test]
    fn test_inversion_per_call_and_deterministic() {
        let frame = ramp_u8();
        let voi = VoiTransform::window(128.5, 256.0);
        let inverted = RenderOptions {
            inverted: true,
            ..Default::default()
        };
        let a = render(&frame, &ModalityTransform::default(), &voi, None, &inverted).unwrap();
        let b = render(&frame, &ModalityTransform::default(), &voi, None, &inverted).unwrap();
        let plain = render(&frame, &ModalityTransform::default(), &voi, None, &RenderOptions::default()).unwrap();
        assert_eq!(a.raster, b.raster);
        assert_ne!(a.raster, plain.raster);
        assert_eq!(a.raster.data[0], 255);
        assert_eq!(plain.raster.data[0], 0);
    }

    #[test]
    fn test_padding_rendered_black_even_inverted() {
        let frame = RasterFrame::new(3, 1, FrameData::U8(vec![0, 100, 200]), Some(ValueRange::new(100.0, 200.0)));
        let options = RenderOptions {
            inverted: true,
            padding: Some(PaddingFilter::exact(0)),
            ..Default::default()
        };
        let rendered = render(&frame, &ModalityTransform::default(), &VoiTransform::default(), None, &options).unwrap();
        assert_eq!(rendered.raster.data[0], 0);
        assert_eq!(rendered.raster.data[1], 255);
        assert_eq!(rendered.raster.data[2], 0);
    }

    #[test]
    fn test_voi_lut_scaled_to_output_range() {
        let frame = RasterFrame::new(3, 1, FrameData::U16(vec![0, 1, 2]), Some(ValueRange::new(0.0, 2.0)));
        let lut = VoiLut::new(0, 3, 16, vec![0, 2048, 4095]);
        let voi = VoiTransform::uniform(VoiFrame {
            windows: vec![Window::new(0.0, 10.0)],
            luts: vec![lut],
        });
        let rendered = render(&frame, &ModalityTransform::default(), &voi, None, &RenderOptions::default()).unwrap();
        assert_eq!(rendered.raster.data, vec![0, 128, 255]);
        assert_eq!(rendered.window, Some(Window::new(1.5, 3.0)));
    }

    #[test]
    fn test_palette_true_color() {
        let frame = RasterFrame::new(2, 1, FrameData::U8(vec![0, 1]), Some(ValueRange::new(0.0, 1.0)));
        let descriptor = PaletteDescriptor {
            number_of_entries: 2,
            first_value_mapped: 0,
            bits_per_entry: 8,
        };
        let lut = PaletteColorLut::new(descriptor, vec![255, 0], vec![0, 255], vec![0, 0]);
        let options = RenderOptions {
            photometric: Some(PhotometricInterpretation::PaletteColor),
            ..Default::default()
        };
        let rendered = render(&frame, &ModalityTransform::default(), &VoiTransform::default(), Some(&lut), &options).unwrap();
        assert_eq!(rendered.raster.channels, 3);
        assert_eq!(rendered.raster.data, vec![255, 0, 0, 0, 255, 0]);
        assert!(rendered.warnings.is_empty());
    }

    #[test]
    fn test_supplemental_palette_only_above_largest_gray() {
        let frame = RasterFrame::new(2, 1, FrameData::U8(vec![10, 200]), Some(ValueRange::new(10.0, 200.0)));
        let descriptor = PaletteDescriptor {
            number_of_entries: 256,
            first_value_mapped: 0,
            bits_per_entry: 8,
        };
        let lut = PaletteColorLut::new(descriptor, vec![7; 256], vec![8; 256], vec![9; 256])
            .with_presentation(Some(100), Some("MIXED".into()));
        let options = RenderOptions {
            photometric: Some(PhotometricInterpretation::Monochrome2),
            window: Some(Window::new(128.5, 256.0)),
            ..Default::default()
        };
        let rendered = render(&frame, &ModalityTransform::default(), &VoiTransform::default(), Some(&lut), &options).unwrap();
        assert_eq!(rendered.raster.data, vec![10, 10, 10, 7, 8, 9]);
    }

    #[test]
    fn test_malformed_palette_degrades_with_warning() {
        let frame = ramp_u8();
        let descriptor = PaletteDescriptor {
            number_of_entries: 256,
            first_value_mapped: 0,
            bits_per_entry: 8,
        };
        let lut = PaletteColorLut::new(descriptor, vec![1; 256], Vec::new(), vec![1; 256]);
        let voi = VoiTransform::window(128.5, 256.0);
        let rendered = render(&frame, &ModalityTransform::default(), &voi, Some(&lut), &RenderOptions::default()).unwrap();
        assert_eq!(rendered.raster.channels, 1);
        assert_eq!(rendered.raster.data[200], 200);
        assert!(matches!(rendered.warnings[0], RenderWarning::MalformedPalette(_)));
    }

    #[test]
    fn test_palette_on_float_is_unsupported() {
        let frame = RasterFrame::new(1, 1, FrameData::F32(vec![0.5]), Some(ValueRange::new(0.5, 0.5)));
        let descriptor = PaletteDescriptor {
            number_of_entries: 1,
            first_value_mapped: 0,
            bits_per_entry: 8,
        };
        let lut = PaletteColorLut::new(descriptor, vec![1], vec![1], vec![1]);
        let result = render(&frame, &ModalityTransform::default(), &VoiTransform::default(), Some(&lut), &RenderOptions::default());
        assert!(matches!(result, Err(BlackoutError::UnsupportedPixelType(_))));
    }

    #[test]
    fn test_color_passthrough_and_window() {
        let frame = RasterFrame::new(1, 1, FrameData::Rgb8(vec![10, 128, 250]), Some(ValueRange::new(0.0, 255.0)));
        let plain = render(&frame, &ModalityTransform::default(), &VoiTransform::default(), None, &RenderOptions::default()).unwrap();
        assert_eq!(plain.raster.data, vec![10, 128, 250]);
        assert_eq!(plain.window, None);

        let options = RenderOptions {
            function: VoiFunction::Logistic,
            window: Some(Window::new(128.0, 2.0)),
            ..Default::default()
        };
        let windowed = render(&frame, &ModalityTransform::default(), &VoiTransform::default(), None, &options).unwrap();
        assert_eq!(windowed.raster.data, vec![0, 255, 255]);
    }

    #[test]
    fn test_rgb_color_mode_replicates_gray() {
        let frame = ramp_u8();
        let voi = VoiTransform::window(128.5, 256.0);
        let options = RenderOptions {
            color_mode: ColorMode::Rgb,
            ..Default::default()
        };
        let rendered = render(&frame, &ModalityTransform::default(), &voi, None, &options).unwrap();
        assert_eq!(rendered.raster.channels, 3);
        assert_eq!(&rendered.raster.data[300..303], &[100, 100, 100]);
        let image = rendered.raster.to_dynamic_image().unwrap();
        assert_eq!(image.width(), 256);
    }

    #[test]
    fn test_bit1_frame_renders_black_and_white() {
        let frame = RasterFrame::new(3, 1, FrameData::Bit1(vec![0b101]), Some(ValueRange::new(0.0, 1.0)));
        let rendered = render(&frame, &ModalityTransform::default(), &VoiTransform::default(), None, &RenderOptions::default()).unwrap();
        assert_eq!(rendered.raster.data, vec![255, 0, 255]);
    }
}
