//! Pixel data decoding.
//!
//! [`FrameSource`] turns stored pixel data plus a [`PixelFormatDescriptor`]
//! into per-frame [`RasterFrame`]s. Frames are unpacked on first access and
//! cached. For memory-mapped sources only the requested frame is copied out of
//! the mapping and only the most recent frame is kept.
//!
//! # Example
//!
//! ```rust,ignore
//! use medimg_blackout::{FrameSource, PixelFormatDescriptor, PixelSource};
//!
//! let format = PixelFormatDescriptor::grayscale(512, 512, 16)?.with_frames(40);
//! let mut source = FrameSource::decode(PixelSource::Bytes(bytes), format)?;
//! let frame = source.frame(12)?;
//! println!("range: {:?}", frame.value_range());
//! source.close();
//! ```

mod mapped;
mod raster;
mod unpack;

pub use mapped::MappedRegion;
pub use raster::{FrameData, RasterFrame, ValueRange};

pub(crate) use raster::{bit_at, pack_bits};

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use crate::config::DecoderConfig;
use crate::error::{BlackoutError, Result};
use crate::format::{PaddingFilter, PixelFormatDescriptor};

use unpack::{Encoding, SampleView};

/// Stored pixel data handed to the decoder.
#[derive(Debug)]
pub enum PixelSource {
    /// Owned little-endian bytes.
    Bytes(Vec<u8>),
    /// Owned 16-bit words (OW), low byte first for 8-bit samples.
    Words(Vec<u16>),
    /// Memory-mapped file region, little-endian.
    Mapped(MappedRegion),
}

impl PixelSource {
    fn view(&self) -> SampleView<'_> {
        match self {
            PixelSource::Bytes(b) => SampleView::Bytes(b),
            PixelSource::Words(w) => SampleView::Words(w),
            PixelSource::Mapped(m) => SampleView::Bytes(m.bytes()),
        }
    }

    fn is_mapped(&self) -> bool {
        matches!(self, PixelSource::Mapped(_))
    }

    fn byte_len(&self) -> usize {
        self.view().byte_len()
    }
}

/// Lazily decoded frames of one image.
///
/// A source is used by one owner at a time. [`FrameSource::close`] releases
/// the backing bytes (and any mapping) deterministically; frames already
/// handed out stay valid because they are reference counted.
#[derive(Debug)]
pub struct FrameSource {
    format: PixelFormatDescriptor,
    encoding: Encoding,
    padding: Option<PaddingFilter>,
    storage: Option<PixelSource>,
    cache: HashMap<usize, Arc<RasterFrame>>,
}

impl FrameSource {
    /// Create a frame source over `source`.
    ///
    /// Fails with `UnsupportedEncoding` if the descriptor has no decoder or the
    /// data is too short for the declared number of frames.
    pub fn decode(source: PixelSource, format: PixelFormatDescriptor) -> Result<Self> {
        format.validate()?;
        let encoding = Encoding::select(&format)?;
        check_length(&source, &format)?;
        let padding = format.padding_filter();
        log::debug!(
            "Frame source: {}x{}x{} frames, {:?}, {} bytes{}",
            format.columns,
            format.rows,
            format.number_of_frames,
            encoding,
            source.byte_len(),
            if source.is_mapped() { " (mapped)" } else { "" }
        );
        Ok(Self {
            format,
            encoding,
            padding,
            storage: Some(source),
            cache: HashMap::new(),
        })
    }

    /// Create a frame source over a region of a file, mapped into memory.
    pub fn open_mapped<P: AsRef<Path>>(
        path: P,
        offset: u64,
        format: PixelFormatDescriptor,
        config: &DecoderConfig,
    ) -> Result<Self> {
        let len = required_bytes(&format);
        let region = MappedRegion::open(path, offset, len, config)?;
        Self::decode(PixelSource::Mapped(region), format)
    }

    /// Point the source at new data with the same format.
    ///
    /// The new data is checked first; on success the previous storage (and
    /// mapping) is released and every cached frame is dropped.
    pub fn repoint(&mut self, source: PixelSource) -> Result<()> {
        check_length(&source, &self.format)?;
        self.release();
        self.storage = Some(source);
        Ok(())
    }

    /// Re-map a file region, releasing the current mapping first.
    pub fn remap<P: AsRef<Path>>(&mut self, path: P, offset: u64, config: &DecoderConfig) -> Result<()> {
        self.release();
        let region = MappedRegion::open(path, offset, required_bytes(&self.format), config)?;
        self.repoint(PixelSource::Mapped(region))
    }

    /// Pixel format of the source.
    pub fn format(&self) -> &PixelFormatDescriptor {
        &self.format
    }

    /// Number of frames.
    pub fn frame_count(&self) -> usize {
        self.format.number_of_frames as usize
    }

    /// Whether [`FrameSource::close`] has been called.
    pub fn is_closed(&self) -> bool {
        self.storage.is_none()
    }

    /// Padding filter derived from the descriptor.
    pub fn padding_filter(&self) -> Option<PaddingFilter> {
        self.padding
    }

    /// Decode (or fetch from cache) frame `index`.
    pub fn frame(&mut self, index: usize) -> Result<Arc<RasterFrame>> {
        let storage = self
            .storage
            .as_ref()
            .ok_or_else(|| BlackoutError::InvalidRequest("frame source is closed".into()))?;
        if index >= self.format.number_of_frames as usize {
            return Err(BlackoutError::InvalidRequest(format!(
                "frame {} out of range (0..{})",
                index, self.format.number_of_frames
            )));
        }
        if let Some(frame) = self.cache.get(&index) {
            return Ok(Arc::clone(frame));
        }

        let frame = Arc::new(unpack::decode_frame(
            storage.view(),
            &self.format,
            self.encoding,
            index,
            self.padding,
        )?);
        if storage.is_mapped() {
            self.cache.clear();
        }
        self.cache.insert(index, Arc::clone(&frame));
        Ok(frame)
    }

    /// Release the backing data and any mapping. Safe to call repeatedly.
    pub fn close(&mut self) {
        if self.storage.is_some() {
            log::debug!("Closing frame source");
        }
        self.release();
    }

    fn release(&mut self) {
        self.cache.clear();
        self.storage = None;
    }
}

/// Bytes of stored pixel data needed for every declared frame.
fn required_bytes(format: &PixelFormatDescriptor) -> usize {
    (format.bits_per_frame() * format.number_of_frames as usize).div_ceil(8)
}

fn check_length(source: &PixelSource, format: &PixelFormatDescriptor) -> Result<()> {
    let required = required_bytes(format);
    let available = source.byte_len();
    if available < required {
        return Err(BlackoutError::UnsupportedEncoding(format!(
            "pixel data holds {} bytes, {} frame(s) need {}",
            available, format.number_of_frames, required
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{PhotometricInterpretation, PixelPadding, PixelRepresentation, PlanarConfiguration};
    use std::io::Write;

    fn ramp16(frames: u32) -> (PixelFormatDescriptor, Vec<u8>) {
        let format = PixelFormatDescriptor::grayscale(2, 4, 16).unwrap().with_frames(frames);
        let mut bytes = Vec::new();
        for f in 0..frames as u16 {
            for i in 0..8u16 {
                bytes.extend_from_slice(&(f * 100 + i).to_le_bytes());
            }
        }
        (format, bytes)
    }

    #[test]
    fn test_frames_decoded_and_cached() {
        let (format, bytes) = ramp16(3);
        let mut source = FrameSource::decode(PixelSource::Bytes(bytes), format).unwrap();
        let first = source.frame(2).unwrap();
        let again = source.frame(2).unwrap();
        assert!(Arc::ptr_eq(&first, &again));
        assert_eq!(first.value_range(), Some(ValueRange::new(200.0, 207.0)));
        assert!(matches!(
            source.frame(3),
            Err(BlackoutError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_short_data_rejected() {
        let (format, mut bytes) = ramp16(2);
        bytes.truncate(20);
        let result = FrameSource::decode(PixelSource::Bytes(bytes), format);
        assert!(matches!(result, Err(BlackoutError::UnsupportedEncoding(_))));
    }

    #[test]
    fn test_close_is_idempotent_and_frames_survive() {
        let (format, bytes) = ramp16(1);
        let mut source = FrameSource::decode(PixelSource::Bytes(bytes), format).unwrap();
        let frame = source.frame(0).unwrap();
        source.close();
        source.close();
        assert!(source.is_closed());
        assert_eq!(frame.sample(7, 0), 7.0);
        assert!(matches!(source.frame(0), Err(BlackoutError::InvalidRequest(_))));
    }

    #[test]
    fn test_repoint_invalidates_cache() {
        let (format, bytes) = ramp16(1);
        let mut source = FrameSource::decode(PixelSource::Bytes(bytes), format).unwrap();
        let before = source.frame(0).unwrap();
        let replacement: Vec<u8> = (0..8u16).flat_map(|v| (v + 1000).to_le_bytes()).collect();
        source.repoint(PixelSource::Bytes(replacement)).unwrap();
        let after = source.frame(0).unwrap();
        assert_eq!(before.value_range().unwrap().min, 0.0);
        assert_eq!(after.value_range().unwrap().min, 1000.0);
    }

    #[test]
    fn test_failed_repoint_keeps_current_data() {
        let (format, bytes) = ramp16(1);
        let mut source = FrameSource::decode(PixelSource::Bytes(bytes), format).unwrap();
        let before = source.frame(0).unwrap();
        let result = source.repoint(PixelSource::Bytes(vec![0; 4]));
        assert!(matches!(result, Err(BlackoutError::UnsupportedEncoding(_))));
        assert!(!source.is_closed());
        let after = source.frame(0).unwrap();
        assert!(Arc::ptr_eq(&before, &after));
    }

    #[test]
    fn test_word_source_8_bit() {
        let format = PixelFormatDescriptor::grayscale(1, 4, 8).unwrap();
        let words = vec![0x0201u16, 0x0403];
        let mut source = FrameSource::decode(PixelSource::Words(words), format).unwrap();
        let frame = source.frame(0).unwrap();
        assert_eq!(frame.data(), &FrameData::U8(vec![1, 2, 3, 4]));
    }

    #[test]
    fn test_mapped_source_matches_heap_source() {
        let (format, bytes) = ramp16(4);
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"HEADER").unwrap();
        file.write_all(&bytes).unwrap();
        file.flush().unwrap();

        let mut mapped =
            FrameSource::open_mapped(file.path(), 6, format.clone(), &DecoderConfig::default()).unwrap();
        let mut heap = FrameSource::decode(PixelSource::Bytes(bytes), format).unwrap();
        for index in [3, 0, 2] {
            assert_eq!(*mapped.frame(index).unwrap(), *heap.frame(index).unwrap());
        }
        // only the latest frame is retained for mapped sources
        assert_eq!(mapped.cache.len(), 1);
        mapped.close();
        mapped.close();
        assert!(mapped.frame(0).is_err());
    }

    #[test]
    fn test_signed_with_padding_range() {
        let format = PixelFormatDescriptor::new(
            1,
            4,
            1,
            16,
            16,
            15,
            PixelRepresentation::Signed,
            PlanarConfiguration::Interleaved,
            PhotometricInterpretation::Monochrome2,
        )
        .unwrap()
        .with_padding(Some(PixelPadding {
            value: -2000,
            range_limit: Some(-1024),
        }));
        let bytes: Vec<u8> = [-2000i16, -1500, -1000, 400]
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .collect();
        let mut source = FrameSource::decode(PixelSource::Bytes(bytes), format).unwrap();
        let frame = source.frame(0).unwrap();
        assert_eq!(frame.value_range(), Some(ValueRange::new(-1000.0, 400.0)));
        assert_eq!(frame.data(), &FrameData::S16(vec![-2000, -1500, -1000, 400]));
    }
}
