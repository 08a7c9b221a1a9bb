//! DICOM file reading.
//!
//! [`DicomImage::open`] extracts everything the decoder, renderer and
//! redaction engine need from a DICOM file: the pixel format, modality and VOI
//! transforms (including enhanced multi-frame functional groups), palette
//! tables, overlay planes and the native or encapsulated pixel data.
//! Writing DICOM files is left to the caller.

use std::path::Path;

use dicom::core::Tag;
use dicom::dictionary_std::tags;
use dicom::object::{open_file, InMemDicomObject};
use serde::Serialize;

use crate::config::transfer_syntax;
use crate::decoder::{FrameSource, PixelSource};
use crate::error::{BlackoutError, Result};
use crate::format::{
    PhotometricInterpretation, PixelFormatDescriptor, PixelPadding, PixelRepresentation, PlanarConfiguration,
};
use crate::redaction::{OverlayPlane, OverlaySource, MAX_OVERLAY_PLANES};
use crate::transform::{
    ModalityTransform, PaletteColorLut, PaletteDescriptor, Rescale, RenderOptions, VoiFrame, VoiLut, VoiTransform,
    Window,
};

const PIXEL_PRESENTATION: Tag = Tag(0x0008, 0x9205);
const PIXEL_PADDING_RANGE_LIMIT: Tag = Tag(0x0028, 0x0121);
const LUT_DESCRIPTOR: Tag = Tag(0x0028, 0x3002);
const LUT_DATA: Tag = Tag(0x0028, 0x3006);
const VOI_LUT_SEQUENCE: Tag = Tag(0x0028, 0x3010);
const PALETTE_DESCRIPTORS: [Tag; 3] = [Tag(0x0028, 0x1101), Tag(0x0028, 0x1102), Tag(0x0028, 0x1103)];
const PALETTE_DATA: [Tag; 3] = [Tag(0x0028, 0x1201), Tag(0x0028, 0x1202), Tag(0x0028, 0x1203)];
const LARGEST_MONOCHROME_PIXEL_VALUE: Tag = Tag(0x0028, 0x9099);
const PIXEL_VALUE_TRANSFORMATION_SEQUENCE: Tag = Tag(0x0028, 0x9145);
const FRAME_VOI_LUT_SEQUENCE: Tag = Tag(0x0028, 0x9132);
const SHARED_FUNCTIONAL_GROUPS_SEQUENCE: Tag = Tag(0x5200, 0x9229);
const PER_FRAME_FUNCTIONAL_GROUPS_SEQUENCE: Tag = Tag(0x5200, 0x9230);

const OVERLAY_ROWS: u16 = 0x0010;
const OVERLAY_COLUMNS: u16 = 0x0011;
const NUMBER_OF_FRAMES_IN_OVERLAY: u16 = 0x0015;
const OVERLAY_ORIGIN: u16 = 0x0050;
const IMAGE_FRAME_ORIGIN: u16 = 0x0051;
const OVERLAY_DATA: u16 = 0x3000;

fn uint(obj: &InMemDicomObject, tag: Tag) -> Option<u32> {
    obj.element(tag).ok().and_then(|e| e.to_int::<u32>().ok())
}

fn int(obj: &InMemDicomObject, tag: Tag) -> Option<i32> {
    obj.element(tag).ok().and_then(|e| e.to_int::<i32>().ok())
}

fn ints(obj: &InMemDicomObject, tag: Tag) -> Vec<i32> {
    obj.element(tag)
        .ok()
        .and_then(|e| e.to_multi_int::<i32>().ok())
        .unwrap_or_default()
}

fn floats(obj: &InMemDicomObject, tag: Tag) -> Vec<f64> {
    obj.element(tag)
        .ok()
        .and_then(|e| e.to_multi_float64().ok())
        .unwrap_or_default()
}

fn string(obj: &InMemDicomObject, tag: Tag) -> Option<String> {
    obj.element(tag)
        .ok()
        .and_then(|e| e.to_str().ok())
        .map(|s| s.trim_end_matches(['\0', ' ']).trim().to_string())
}

fn bytes(obj: &InMemDicomObject, tag: Tag) -> Option<Vec<u8>> {
    obj.element(tag)
        .ok()
        .and_then(|e| e.to_bytes().ok())
        .map(|b| b.to_vec())
}

fn items(obj: &InMemDicomObject, tag: Tag) -> &[InMemDicomObject] {
    obj.element(tag).ok().and_then(|e| e.items()).unwrap_or(&[])
}

/// Little-endian 16-bit words of an OW element.
fn words(obj: &InMemDicomObject, tag: Tag) -> Vec<u16> {
    bytes(obj, tag)
        .map(|raw| raw.chunks_exact(2).map(|b| u16::from_le_bytes([b[0], b[1]])).collect())
        .unwrap_or_default()
}

/// Stored pixel data of a DICOM file.
#[derive(Debug, Clone)]
pub enum PixelData {
    /// Native (uncompressed) little-endian pixel data.
    Native(Vec<u8>),
    /// Compressed frames, one byte stream per frame.
    Encapsulated(Vec<Vec<u8>>),
}

/// Overlay plane as declared in one 60xx group.
#[derive(Debug, Clone)]
struct OverlayGroup {
    rows: u32,
    columns: u32,
    origin_x: i32,
    origin_y: i32,
    frames: u32,
    first_frame: u32,
    data: Vec<u8>,
}

/// Overlay planes of one image.
#[derive(Debug, Clone, Default)]
pub struct DicomOverlays {
    planes: Vec<Option<OverlayGroup>>,
}

impl DicomOverlays {
    fn read(obj: &InMemDicomObject) -> Self {
        let planes = (0..MAX_OVERLAY_PLANES)
            .map(|plane| {
                let group = 0x6000 + 2 * plane as u16;
                let data = bytes(obj, Tag(group, OVERLAY_DATA))?;
                let rows = uint(obj, Tag(group, OVERLAY_ROWS))?;
                let columns = uint(obj, Tag(group, OVERLAY_COLUMNS))?;
                let origin = ints(obj, Tag(group, OVERLAY_ORIGIN));
                let (origin_y, origin_x) = match origin.as_slice() {
                    [row, column, ..] => (row - 1, column - 1),
                    _ => (0, 0),
                };
                Some(OverlayGroup {
                    rows,
                    columns,
                    origin_x,
                    origin_y,
                    frames: uint(obj, Tag(group, NUMBER_OF_FRAMES_IN_OVERLAY)).unwrap_or(1).max(1),
                    first_frame: uint(obj, Tag(group, IMAGE_FRAME_ORIGIN)).unwrap_or(1).max(1) - 1,
                    data,
                })
            })
            .collect();
        Self { planes }
    }

    /// Indices of the planes present.
    pub fn planes(&self) -> Vec<usize> {
        self.planes
            .iter()
            .enumerate()
            .filter_map(|(i, p)| p.as_ref().map(|_| i))
            .collect()
    }

    fn group_frame(&self, frame: usize, plane: usize) -> Option<(&OverlayGroup, usize)> {
        let group = self.planes.get(plane)?.as_ref()?;
        if group.frames == 1 {
            return Some((group, 0));
        }
        let index = (frame as u32).checked_sub(group.first_frame)?;
        (index < group.frames).then_some((group, index as usize))
    }
}

impl OverlaySource for DicomOverlays {
    fn has_overlay(&self, frame: usize, plane: usize) -> bool {
        self.group_frame(frame, plane).is_some()
    }

    fn overlay(&self, frame: usize, plane: usize) -> Option<OverlayPlane> {
        let (group, index) = self.group_frame(frame, plane)?;
        let count = group.rows as usize * group.columns as usize;
        let offset = index * count;
        let mask: Vec<bool> = (offset..offset + count)
            .map(|bit| {
                group
                    .data
                    .get(bit / 8)
                    .map(|byte| (byte >> (bit % 8)) & 1 != 0)
                    .unwrap_or(false)
            })
            .collect();
        Some(OverlayPlane::from_mask(
            group.rows,
            group.columns,
            group.origin_x,
            group.origin_y,
            &mask,
        ))
    }
}

/// Summary printed by `info`.
#[derive(Debug, Clone, Serialize)]
pub struct DicomSummary {
    /// Transfer syntax UID.
    pub transfer_syntax: String,
    /// Modality (0008,0060).
    pub modality: Option<String>,
    /// Pixel format.
    pub format: PixelFormatDescriptor,
    /// Whether pixel data is encapsulated.
    pub encapsulated: bool,
    /// Number of VOI windows of the first frame.
    pub windows: usize,
    /// Number of VOI LUTs of the first frame.
    pub voi_luts: usize,
    /// Whether a palette is present.
    pub palette: bool,
    /// Overlay planes present.
    pub overlay_planes: Vec<usize>,
}

/// Image attributes and pixel data read from a DICOM file.
#[derive(Debug, Clone)]
pub struct DicomImage {
    /// Pixel format.
    pub format: PixelFormatDescriptor,
    /// Transfer syntax UID.
    pub transfer_syntax: String,
    /// Modality (0008,0060).
    pub modality_name: Option<String>,
    /// Rescale per frame.
    pub modality: ModalityTransform,
    /// Windows and LUTs per frame.
    pub voi: VoiTransform,
    /// Palette color tables, if any.
    pub palette: Option<PaletteColorLut>,
    /// Overlay planes.
    pub overlays: DicomOverlays,
    /// Stored pixel data.
    pub pixel_data: PixelData,
}

impl DicomImage {
    /// Open and read a DICOM file.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let object = open_file(path)
            .map_err(|e| BlackoutError::Dicom(format!("Failed to read DICOM file: {}", e)))?;
        let transfer_syntax = transfer_syntax::normalize(object.meta().transfer_syntax()).to_string();
        let obj: &InMemDicomObject = &object;

        let format = Self::read_format(obj)?;
        let pixel_data = Self::read_pixel_data(obj, &format, &transfer_syntax)?;
        let image = Self {
            modality_name: string(obj, tags::MODALITY),
            modality: Self::read_modality(obj),
            voi: Self::read_voi(obj),
            palette: Self::read_palette(obj),
            overlays: DicomOverlays::read(obj),
            format,
            transfer_syntax,
            pixel_data,
        };
        log::debug!(
            "Read {}: {}x{}x{} {} ({} bits stored), transfer syntax {}",
            path.display(),
            image.format.columns,
            image.format.rows,
            image.format.number_of_frames,
            image.format.photometric_interpretation,
            image.format.bits_stored,
            image.transfer_syntax
        );
        Ok(image)
    }

    fn read_format(obj: &InMemDicomObject) -> Result<PixelFormatDescriptor> {
        let required = |tag: Tag, name: &str| -> Result<u32> {
            uint(obj, tag).ok_or_else(|| BlackoutError::Dicom(format!("Missing {} tag", name)))
        };
        let rows = required(tags::ROWS, "Rows")?;
        let columns = required(tags::COLUMNS, "Columns")?;
        let bits_allocated = required(tags::BITS_ALLOCATED, "BitsAllocated")? as u16;
        let bits_stored = uint(obj, tags::BITS_STORED).map(|v| v as u16).unwrap_or(bits_allocated);
        let high_bit = uint(obj, tags::HIGH_BIT)
            .map(|v| v as u16)
            .unwrap_or(bits_stored.saturating_sub(1));
        let samples_per_pixel = uint(obj, tags::SAMPLES_PER_PIXEL).unwrap_or(1) as u16;
        let photometric = string(obj, tags::PHOTOMETRIC_INTERPRETATION)
            .map(|s| PhotometricInterpretation::from_dicom_string(&s))
            .transpose()?
            .unwrap_or(PhotometricInterpretation::Monochrome2);
        let representation = PixelRepresentation::from_dicom(uint(obj, tags::PIXEL_REPRESENTATION).unwrap_or(0) as u16);
        let planar = PlanarConfiguration::from_dicom(uint(obj, tags::PLANAR_CONFIGURATION).unwrap_or(0) as u16);
        let frames = string(obj, tags::NUMBER_OF_FRAMES)
            .and_then(|s| s.parse::<u32>().ok())
            .or_else(|| uint(obj, tags::NUMBER_OF_FRAMES))
            .unwrap_or(1);
        let padding = int(obj, tags::PIXEL_PADDING_VALUE).map(|value| PixelPadding {
            value,
            range_limit: int(obj, PIXEL_PADDING_RANGE_LIMIT),
        });

        Ok(PixelFormatDescriptor::new(
            rows,
            columns,
            samples_per_pixel,
            bits_allocated,
            bits_stored,
            high_bit,
            representation,
            planar,
            photometric,
        )?
        .with_frames(frames)
        .with_padding(padding))
    }

    fn read_pixel_data(obj: &InMemDicomObject, format: &PixelFormatDescriptor, ts: &str) -> Result<PixelData> {
        let element = obj
            .element(tags::PIXEL_DATA)
            .map_err(|_| BlackoutError::Dicom("Missing PixelData element".into()))?;

        if let Some(fragments) = element.value().fragments() {
            let frames = group_fragments(fragments, format.number_of_frames as usize);
            log::debug!("{} fragment(s) grouped into {} frame(s)", fragments.len(), frames.len());
            return Ok(PixelData::Encapsulated(frames));
        }
        if transfer_syntax::normalize(ts) == transfer_syntax::EXPLICIT_VR_BIG_ENDIAN {
            return Err(BlackoutError::UnsupportedTransferSyntax(format!(
                "big endian pixel data is not supported ({})",
                ts
            )));
        }
        if !transfer_syntax::is_native(ts) {
            return Err(BlackoutError::UnsupportedTransferSyntax(format!(
                "native pixel data expected for {}",
                ts
            )));
        }
        let data = element
            .to_bytes()
            .map_err(|e| BlackoutError::Dicom(format!("Failed to extract pixel data: {}", e)))?;
        Ok(PixelData::Native(data.to_vec()))
    }

    fn read_rescale(obj: &InMemDicomObject) -> Option<Rescale> {
        let slope = floats(obj, tags::RESCALE_SLOPE).first().copied();
        let intercept = floats(obj, tags::RESCALE_INTERCEPT).first().copied();
        if slope.is_none() && intercept.is_none() {
            return None;
        }
        Some(Rescale::new(slope.unwrap_or(1.0), intercept.unwrap_or(0.0)))
    }

    fn read_windows(obj: &InMemDicomObject) -> Vec<Window> {
        let centers = floats(obj, tags::WINDOW_CENTER);
        let widths = floats(obj, tags::WINDOW_WIDTH);
        centers
            .iter()
            .zip(&widths)
            .map(|(&center, &width)| Window::new(center, width))
            .collect()
    }

    fn read_luts(obj: &InMemDicomObject) -> Vec<VoiLut> {
        items(obj, VOI_LUT_SEQUENCE)
            .iter()
            .filter_map(|item| {
                let descriptor = ints(item, LUT_DESCRIPTOR);
                let [entries, first, bits, ..] = descriptor.as_slice() else {
                    return None;
                };
                let entries = if *entries <= 0 { 65536 } else { *entries as usize };
                let raw = bytes(item, LUT_DATA)?;
                let data: Vec<u16> = if raw.len() >= entries * 2 {
                    raw.chunks_exact(2).map(|b| u16::from_le_bytes([b[0], b[1]])).collect()
                } else {
                    raw.iter().map(|&b| b as u16).collect()
                };
                Some(VoiLut::new(*first, entries as u32, (*bits).clamp(1, 16) as u16, data))
            })
            .collect()
    }

    /// Nested item of a functional group, e.g. the pixel value transformation of a frame.
    fn group_item<'a>(group: Option<&'a InMemDicomObject>, tag: Tag) -> Option<&'a InMemDicomObject> {
        group.and_then(|g| items(g, tag).first())
    }

    fn read_modality(obj: &InMemDicomObject) -> ModalityTransform {
        let shared = items(obj, SHARED_FUNCTIONAL_GROUPS_SEQUENCE).first();
        let per_frame = items(obj, PER_FRAME_FUNCTIONAL_GROUPS_SEQUENCE);
        let fallback = Self::group_item(shared, PIXEL_VALUE_TRANSFORMATION_SEQUENCE)
            .and_then(Self::read_rescale)
            .or_else(|| Self::read_rescale(obj));

        if per_frame.is_empty() {
            return fallback.map(ModalityTransform::uniform).unwrap_or_default();
        }
        ModalityTransform::new(
            per_frame
                .iter()
                .map(|frame| {
                    Self::group_item(Some(frame), PIXEL_VALUE_TRANSFORMATION_SEQUENCE)
                        .and_then(Self::read_rescale)
                        .or(fallback)
                        .unwrap_or(Rescale::IDENTITY)
                })
                .collect(),
        )
    }

    fn read_voi(obj: &InMemDicomObject) -> VoiTransform {
        let top = VoiFrame {
            windows: Self::read_windows(obj),
            luts: Self::read_luts(obj),
        };
        let shared = items(obj, SHARED_FUNCTIONAL_GROUPS_SEQUENCE).first();
        let shared_frame = Self::group_item(shared, FRAME_VOI_LUT_SEQUENCE).map(|item| VoiFrame {
            windows: Self::read_windows(item),
            luts: top.luts.clone(),
        });
        let fallback = shared_frame.unwrap_or(top);

        let per_frame = items(obj, PER_FRAME_FUNCTIONAL_GROUPS_SEQUENCE);
        if per_frame.is_empty() {
            return VoiTransform::uniform(fallback);
        }
        VoiTransform::new(
            per_frame
                .iter()
                .map(|frame| match Self::group_item(Some(frame), FRAME_VOI_LUT_SEQUENCE) {
                    Some(item) => VoiFrame {
                        windows: Self::read_windows(item),
                        luts: fallback.luts.clone(),
                    },
                    None => fallback.clone(),
                })
                .collect(),
        )
    }

    fn read_palette(obj: &InMemDicomObject) -> Option<PaletteColorLut> {
        let descriptor = PaletteDescriptor::from_values(&ints(obj, PALETTE_DESCRIPTORS[0]))?;
        let [red, green, blue] = PALETTE_DATA.map(|tag| words(obj, tag));
        let lut = PaletteColorLut::from_words(descriptor, &red, &green, &blue).with_presentation(
            int(obj, LARGEST_MONOCHROME_PIXEL_VALUE),
            string(obj, PIXEL_PRESENTATION),
        );
        Some(lut)
    }

    /// Whether the pixel data is baseline JPEG.
    pub fn is_baseline_jpeg(&self) -> bool {
        self.transfer_syntax == transfer_syntax::JPEG_BASELINE
    }

    /// Decoder over native pixel data.
    pub fn frame_source(&self) -> Result<FrameSource> {
        let source = match &self.pixel_data {
            PixelData::Native(bytes) => PixelSource::Bytes(bytes.clone()),
            PixelData::Encapsulated(_) => {
                return Err(BlackoutError::UnsupportedTransferSyntax(format!(
                    "cannot decode encapsulated pixel data ({})",
                    self.transfer_syntax
                )))
            }
        };
        FrameSource::decode(source, self.format.clone())
    }

    /// Render options for `frame` following the image's own attributes.
    pub fn render_options(&self, frame: usize) -> RenderOptions {
        RenderOptions::for_format(&self.format, frame)
    }

    /// Attribute summary.
    pub fn summary(&self) -> DicomSummary {
        let first = self.voi.for_frame(0);
        DicomSummary {
            transfer_syntax: self.transfer_syntax.clone(),
            modality: self.modality_name.clone(),
            format: self.format.clone(),
            encapsulated: matches!(self.pixel_data, PixelData::Encapsulated(_)),
            windows: first.map(|f| f.windows.len()).unwrap_or(0),
            voi_luts: first.map(|f| f.luts.len()).unwrap_or(0),
            palette: self.palette.is_some(),
            overlay_planes: self.overlays.planes(),
        }
    }
}

/// Group encapsulated fragments into frames: one fragment per frame when the
/// counts agree, everything in one frame for single-frame images, otherwise a
/// new frame at every fragment starting with a JPEG SOI marker.
fn group_fragments(fragments: &[Vec<u8>], frames: usize) -> Vec<Vec<u8>> {
    if fragments.len() == frames {
        return fragments.to_vec();
    }
    if frames <= 1 {
        return vec![fragments.concat()];
    }
    let mut grouped: Vec<Vec<u8>> = Vec::with_capacity(frames);
    for fragment in fragments {
        match grouped.last_mut() {
            Some(current) if !fragment.starts_with(&[0xFF, 0xD8]) => current.extend_from_slice(fragment),
            _ => grouped.push(fragment.clone()),
        }
    }
    grouped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_fragments() {
        let a = vec![0xFF, 0xD8, 1];
        let b = vec![2, 3];
        let c = vec![0xFF, 0xD8, 4];
        assert_eq!(group_fragments(&[a.clone(), c.clone()], 2), vec![a.clone(), c.clone()]);
        assert_eq!(group_fragments(&[a.clone(), b.clone()], 1), vec![vec![0xFF, 0xD8, 1, 2, 3]]);
        assert_eq!(
            group_fragments(&[a.clone(), b.clone(), c.clone()], 2),
            vec![vec![0xFF, 0xD8, 1, 2, 3], c]
        );
    }

    #[test]
    fn test_overlay_frames() {
        let mut overlays = DicomOverlays {
            planes: vec![None; MAX_OVERLAY_PLANES],
        };
        overlays.planes[2] = Some(OverlayGroup {
            rows: 2,
            columns: 2,
            origin_x: 4,
            origin_y: 5,
            frames: 2,
            first_frame: 1,
            // frame 1: bit 0 set, frame 2: bit 3 set
            data: vec![0b1000_0001],
        });
        assert_eq!(overlays.planes(), vec![2]);
        assert!(!overlays.has_overlay(0, 2));
        assert!(overlays.has_overlay(1, 2));
        assert!(overlays.has_overlay(2, 2));
        assert!(!overlays.has_overlay(3, 2));
        assert!(!overlays.has_overlay(1, 0));

        let first = overlays.overlay(1, 2).unwrap();
        assert!(first.is_set(0, 0));
        assert!(!first.is_set(1, 1));
        let second = overlays.overlay(2, 2).unwrap();
        assert!(second.is_set(1, 1));
        assert_eq!((second.origin_x, second.origin_y), (4, 5));
    }
}
