//! Decode, render and redact through the public API.

use std::io::Write;

use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;
use medimg_blackout::config::DecoderConfig;
use medimg_blackout::format::PixelPadding;
use medimg_blackout::redaction::{
    redact, redact_encapsulated_frames, rotate_and_flip, JpegRedactionOptions, Rotation,
};
use medimg_blackout::transform::VoiFrame;
use medimg_blackout::{
    render, BlackoutConfig, BlackoutError, FrameSource, ModalityTransform, PixelFormatDescriptor, PixelRepresentation,
    PixelSource, RedactionOptions, RedactionShape, RenderOptions, VoiTransform, Window,
};

fn ct_format(rows: u32, columns: u32, frames: u32) -> PixelFormatDescriptor {
    PixelFormatDescriptor::grayscale(rows, columns, 16)
        .unwrap()
        .with_representation(PixelRepresentation::Signed)
        .with_frames(frames)
}

fn ct_bytes(rows: u32, columns: u32, frames: u32) -> Vec<u8> {
    (0..frames * rows * columns)
        .flat_map(|i| ((i as i16 % 400) - 200).to_le_bytes())
        .collect()
}

#[test]
fn test_ct_pipeline() {
    let (rows, columns) = (16, 16);
    let mut source = FrameSource::decode(PixelSource::Bytes(ct_bytes(rows, columns, 2)), ct_format(rows, columns, 2)).unwrap();
    assert_eq!(source.frame_count(), 2);

    let frame = source.frame(1).unwrap();
    let range = frame.value_range().unwrap();
    assert!(range.min >= -200.0 && range.max <= 199.0);

    let modality = ModalityTransform::new(vec![medimg_blackout::transform::Rescale::new(1.0, -1024.0)]);
    let voi = VoiTransform::uniform(VoiFrame {
        windows: vec![Window::new(-1024.0, 400.0), Window::new(-1000.0, 100.0)],
        luts: Vec::new(),
    });
    let options = RenderOptions {
        frame_index: 1,
        ..Default::default()
    };
    let first = render(&frame, &modality, &voi, None, &options).unwrap();
    let again = render(&frame, &modality, &voi, None, &options).unwrap();
    assert_eq!(first.raster, again.raster);
    assert_eq!(first.window, Some(Window::new(-1024.0, 400.0)));
    assert_eq!(first.raster.data.len(), (rows * columns) as usize);

    let shapes = vec![vec![RedactionShape::new(0, 0, 4, 4)], Vec::new()];
    let buffer = redact(&mut source, &shapes, &RedactionOptions::default(), None).unwrap();
    assert_eq!(buffer.format.bits_allocated, 16);
    assert_eq!(buffer.bytes.len(), ct_bytes(rows, columns, 2).len());

    // frame 0 corner holds the signed minimum, frame 1 is untouched
    let sample = |frame: usize, x: usize, y: usize| {
        let i = (frame * (rows * columns) as usize + y * columns as usize + x) * 2;
        i16::from_le_bytes([buffer.bytes[i], buffer.bytes[i + 1]])
    };
    assert_eq!(sample(0, 3, 3), i16::MIN);
    assert_eq!(sample(0, 4, 4), ((4 * 16 + 4) % 400 - 200) as i16);
    let original = ct_bytes(rows, columns, 2);
    let half = original.len() / 2;
    assert_eq!(&buffer.bytes[half..], &original[half..]);

    source.close();
    assert!(matches!(source.frame(0), Err(BlackoutError::InvalidRequest(_))));
    // frames handed out earlier stay usable
    assert_eq!(frame.width(), columns);
}

#[test]
fn test_padding_is_background() {
    let format = PixelFormatDescriptor::grayscale(4, 4, 16)
        .unwrap()
        .with_padding(Some(PixelPadding {
            value: 7,
            range_limit: None,
        }));
    let data: Vec<u8> = (0..16u16).flat_map(|v| (v * 100).to_le_bytes()).collect();
    let mut source = FrameSource::decode(PixelSource::Bytes(data), format).unwrap();
    let options = RedactionOptions {
        use_padding_as_background: true,
        ..Default::default()
    };
    let buffer = redact(&mut source, &[vec![RedactionShape::new(-2, -2, 3, 3)]], &options, None).unwrap();
    assert_eq!(u16::from_le_bytes([buffer.bytes[0], buffer.bytes[1]]), 7);
    assert_eq!(u16::from_le_bytes([buffer.bytes[2], buffer.bytes[3]]), 100);
}

#[test]
fn test_mapped_source_matches_heap_source() {
    let (rows, columns) = (8, 8);
    let bytes = ct_bytes(rows, columns, 3);
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(&[0xAB; 132]).unwrap();
    file.write_all(&bytes).unwrap();
    file.flush().unwrap();

    let mut heap = FrameSource::decode(PixelSource::Bytes(bytes), ct_format(rows, columns, 3)).unwrap();
    let mut mapped =
        FrameSource::open_mapped(file.path(), 132, ct_format(rows, columns, 3), &DecoderConfig::default()).unwrap();
    for index in 0..3 {
        assert_eq!(heap.frame(index).unwrap().data(), mapped.frame(index).unwrap().data());
    }
    mapped.close();
    mapped.close();
    assert!(mapped.is_closed());
}

#[test]
fn test_rotation_round_trip() {
    let format = PixelFormatDescriptor::grayscale(3, 5, 8).unwrap();
    let original: Vec<u8> = (0..15).collect();
    let mut bytes = original.clone();
    let mut current = format.clone();
    for _ in 0..4 {
        let mut source = FrameSource::decode(PixelSource::Bytes(bytes), current).unwrap();
        let buffer = rotate_and_flip(&mut source, Rotation::Clockwise90, false).unwrap();
        bytes = buffer.bytes;
        current = buffer.format;
    }
    assert_eq!(bytes, original);
    assert_eq!((current.rows, current.columns), (3, 5));

    let mut source = FrameSource::decode(PixelSource::Bytes(original.clone()), format).unwrap();
    let rotated = rotate_and_flip(&mut source, Rotation::from_degrees(270).unwrap(), true).unwrap();
    assert_eq!((rotated.format.rows, rotated.format.columns), (5, 3));
    assert!(Rotation::from_degrees(45).is_err());
}

#[test]
fn test_encapsulated_jpeg_frames() {
    let pixels: Vec<u8> = (0..48u32 * 48).map(|i| (i % 48 * 5) as u8).collect();
    let mut jpeg = Vec::new();
    JpegEncoder::new_with_quality(&mut jpeg, 90)
        .encode(&pixels, 48, 48, ExtendedColorType::L8)
        .unwrap();

    let frames = vec![jpeg.clone(), jpeg.clone(), jpeg];
    let shapes = vec![vec![RedactionShape::new(8, 8, 8, 8)], Vec::new(), vec![RedactionShape::new(40, 40, 20, 20)]];
    let redacted = redact_encapsulated_frames(
        medimg_blackout::config::transfer_syntax::JPEG_BASELINE,
        &frames,
        &shapes,
        &JpegRedactionOptions::default(),
    )
    .unwrap();
    assert_eq!(redacted.len(), 3);
    assert_eq!(redacted[1], frames[1]);

    let decoded = image::load_from_memory(&redacted[0]).unwrap().to_luma8();
    assert!(decoded.get_pixel(12, 12)[0] <= 2);
    let last = image::load_from_memory(&redacted[2]).unwrap().to_luma8();
    assert!(last.get_pixel(44, 44)[0] <= 2);
    assert_eq!(last.get_pixel(4, 4), image::load_from_memory(&frames[2]).unwrap().to_luma8().get_pixel(4, 4));
}

#[test]
fn test_config_drives_redaction_defaults() {
    let config = BlackoutConfig::from_toml_str(
        r#"
        threads = 2

        [redaction]
        explicit_background = 1000
        "#,
    )
    .unwrap();
    assert_eq!(config.thread_count(), 2);

    let format = PixelFormatDescriptor::grayscale(2, 2, 16).unwrap();
    let mut source = FrameSource::decode(PixelSource::Words(vec![1, 2, 3, 4]), format).unwrap();
    let buffer = redact(
        &mut source,
        &[vec![RedactionShape::new(1, 1, 1, 1)]],
        &RedactionOptions::from(&config.redaction),
        None,
    )
    .unwrap();
    assert_eq!(buffer.bytes, vec![1, 0, 2, 0, 3, 0, 0xE8, 0x03]);
}
