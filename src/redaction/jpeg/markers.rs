//! Marker segment parsing for baseline sequential JPEG.

use std::ops::Range;

use crate::error::{BlackoutError, Result};

use super::huffman::HuffmanTable;

const SOI: u8 = 0xD8;
const EOI: u8 = 0xD9;
const SOF0: u8 = 0xC0;
const DHT: u8 = 0xC4;
const DQT: u8 = 0xDB;
const DRI: u8 = 0xDD;
const SOS: u8 = 0xDA;

/// Frame component from SOF0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Component {
    pub id: u8,
    pub h: u8,
    pub v: u8,
    pub tq: u8,
}

/// Frame header from SOF0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct FrameHeader {
    pub width: u16,
    pub height: u16,
    pub components: Vec<Component>,
}

impl FrameHeader {
    pub(crate) fn h_max(&self) -> usize {
        self.components.iter().map(|c| c.h as usize).max().unwrap_or(1)
    }

    pub(crate) fn v_max(&self) -> usize {
        self.components.iter().map(|c| c.v as usize).max().unwrap_or(1)
    }

    /// MCUs per row of an interleaved scan.
    pub(crate) fn mcus_x(&self) -> usize {
        (self.width as usize).div_ceil(8 * self.h_max())
    }

    /// MCU rows of an interleaved scan.
    pub(crate) fn mcus_y(&self) -> usize {
        (self.height as usize).div_ceil(8 * self.v_max())
    }

    /// Blocks per row of component `c` in a non-interleaved scan.
    pub(crate) fn blocks_across(&self, c: &Component) -> usize {
        (self.width as usize * c.h as usize)
            .div_ceil(self.h_max())
            .div_ceil(8)
    }

    /// Block rows of component `c` in a non-interleaved scan.
    pub(crate) fn blocks_down(&self, c: &Component) -> usize {
        (self.height as usize * c.v as usize)
            .div_ceil(self.v_max())
            .div_ceil(8)
    }
}

/// Scan component: frame component index and table slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ScanComponent {
    pub component: usize,
    pub dc_table: usize,
    pub ac_table: usize,
}

/// One scan and the decoding state in force when it starts.
#[derive(Debug, Clone)]
pub(crate) struct Scan {
    /// SOS marker segment, copied unchanged.
    pub header: Range<usize>,
    pub components: Vec<ScanComponent>,
    /// Stuffed entropy-coded data of each restart interval.
    pub intervals: Vec<Range<usize>>,
    /// RSTn marker byte following each interval but the last.
    pub restart_markers: Vec<u8>,
    pub restart_interval: u16,
    pub dc_tables: [Option<HuffmanTable>; 4],
    pub ac_tables: [Option<HuffmanTable>; 4],
    /// DC quantizer of each quantization table slot.
    pub dc_quant: [u16; 4],
}

/// Part of the file as it is written back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Piece {
    /// Bytes copied unchanged.
    Copy(Range<usize>),
    /// A DHT segment, dropped when tables are regenerated.
    Tables(Range<usize>),
    /// Scan header and entropy-coded data, index into `scans`.
    Scan(usize),
}

/// Parsed layout of a baseline JPEG stream.
#[derive(Debug, Clone)]
pub(crate) struct JpegStructure {
    pub frame: FrameHeader,
    pub scans: Vec<Scan>,
    pub pieces: Vec<Piece>,
}

fn codec(message: impl Into<String>) -> BlackoutError {
    BlackoutError::Codec(message.into())
}

fn read_u16(data: &[u8], at: usize) -> Result<u16> {
    data.get(at..at + 2)
        .map(|b| u16::from_be_bytes([b[0], b[1]]))
        .ok_or_else(|| codec(format!("truncated data at offset {}", at)))
}

/// Parse the marker structure of `data`.
///
/// Any process other than baseline sequential Huffman (SOF0) is rejected with
/// `UnsupportedTransferSyntax`.
pub(crate) fn parse(data: &[u8]) -> Result<JpegStructure> {
    if data.len() < 2 || data[0] != 0xFF || data[1] != SOI {
        return Err(codec("missing SOI marker"));
    }

    let mut pieces = vec![Piece::Copy(0..2)];
    let mut scans = Vec::new();
    let mut frame: Option<FrameHeader> = None;
    let mut dc_tables: [Option<HuffmanTable>; 4] = Default::default();
    let mut ac_tables: [Option<HuffmanTable>; 4] = Default::default();
    let mut dc_quant = [0u16; 4];
    let mut restart_interval = 0u16;
    let mut pos = 2;

    loop {
        if pos >= data.len() {
            return Err(codec("missing EOI marker"));
        }
        if data[pos] != 0xFF {
            return Err(codec(format!("expected marker at offset {}", pos)));
        }
        let start = pos;
        while pos < data.len() && data[pos] == 0xFF {
            pos += 1;
        }
        let marker = *data.get(pos).ok_or_else(|| codec("truncated marker"))?;
        pos += 1;

        match marker {
            EOI => {
                pieces.push(Piece::Copy(start..data.len()));
                break;
            }
            0xD0..=0xD7 | 0x01 => {
                pieces.push(Piece::Copy(start..pos));
                continue;
            }
            _ => {}
        }

        let length = read_u16(data, pos)? as usize;
        let end = pos + length;
        if length < 2 || end > data.len() {
            return Err(codec(format!("segment 0x{:02X} overruns the data", marker)));
        }
        let body = &data[pos + 2..end];

        match marker {
            SOF0 => {
                frame = Some(parse_frame(body)?);
                pieces.push(Piece::Copy(start..end));
            }
            0xC1..=0xCF if marker != DHT => {
                return Err(BlackoutError::UnsupportedTransferSyntax(format!(
                    "JPEG process SOF{} is not baseline",
                    marker - SOF0
                )));
            }
            DHT => {
                parse_tables(body, &mut dc_tables, &mut ac_tables)?;
                pieces.push(Piece::Tables(start..end));
            }
            DQT => {
                parse_quantization(body, &mut dc_quant)?;
                pieces.push(Piece::Copy(start..end));
            }
            DRI => {
                restart_interval = read_u16(body, 0)?;
                pieces.push(Piece::Copy(start..end));
            }
            SOS => {
                let header = frame
                    .as_ref()
                    .ok_or_else(|| codec("scan before frame header"))?;
                let components = parse_scan_header(body, header)?;
                let (intervals, restart_markers, ecs_end) = split_intervals(data, end);
                scans.push(Scan {
                    header: start..end,
                    components,
                    intervals,
                    restart_markers,
                    restart_interval,
                    dc_tables: dc_tables.clone(),
                    ac_tables: ac_tables.clone(),
                    dc_quant,
                });
                pieces.push(Piece::Scan(scans.len() - 1));
                pos = ecs_end;
                continue;
            }
            _ => pieces.push(Piece::Copy(start..end)),
        }
        pos = end;
    }

    let frame = frame.ok_or_else(|| codec("no SOF0 frame header"))?;
    if scans.is_empty() {
        return Err(codec("no scans"));
    }
    Ok(JpegStructure { frame, scans, pieces })
}

fn parse_frame(body: &[u8]) -> Result<FrameHeader> {
    let precision = *body.first().ok_or_else(|| codec("empty frame header"))?;
    if precision != 8 {
        return Err(BlackoutError::UnsupportedTransferSyntax(format!(
            "{} bit baseline JPEG",
            precision
        )));
    }
    let height = read_u16(body, 1)?;
    let width = read_u16(body, 3)?;
    let count = *body.get(5).ok_or_else(|| codec("truncated frame header"))? as usize;
    if height == 0 || width == 0 || count == 0 {
        return Err(codec(format!("unsupported frame geometry {}x{} with {} components", width, height, count)));
    }
    let mut components = Vec::with_capacity(count);
    for i in 0..count {
        let c = body
            .get(6 + i * 3..9 + i * 3)
            .ok_or_else(|| codec("truncated frame header"))?;
        let (h, v) = (c[1] >> 4, c[1] & 0x0F);
        if !(1..=4).contains(&h) || !(1..=4).contains(&v) || c[2] > 3 {
            return Err(codec(format!("invalid component {} parameters", c[0])));
        }
        components.push(Component {
            id: c[0],
            h,
            v,
            tq: c[2],
        });
    }
    Ok(FrameHeader {
        width,
        height,
        components,
    })
}

fn parse_tables(
    body: &[u8],
    dc_tables: &mut [Option<HuffmanTable>; 4],
    ac_tables: &mut [Option<HuffmanTable>; 4],
) -> Result<()> {
    let mut i = 0;
    while i < body.len() {
        let class = body[i] >> 4;
        let slot = (body[i] & 0x0F) as usize;
        let counts: [u8; 16] = body
            .get(i + 1..i + 17)
            .and_then(|c| c.try_into().ok())
            .ok_or_else(|| codec("truncated DHT segment"))?;
        let total: usize = counts.iter().map(|&c| c as usize).sum();
        let values = body
            .get(i + 17..i + 17 + total)
            .ok_or_else(|| codec("truncated DHT segment"))?
            .to_vec();
        if slot > 3 {
            return Err(codec(format!("Huffman table slot {} out of range", slot)));
        }
        let table = HuffmanTable::new(counts, values)?;
        match class {
            0 => dc_tables[slot] = Some(table),
            1 => ac_tables[slot] = Some(table),
            _ => return Err(codec(format!("Huffman table class {}", class))),
        }
        i += 17 + total;
    }
    Ok(())
}

fn parse_quantization(body: &[u8], dc_quant: &mut [u16; 4]) -> Result<()> {
    let mut i = 0;
    while i < body.len() {
        let precision = body[i] >> 4;
        let slot = (body[i] & 0x0F) as usize;
        if slot > 3 {
            return Err(codec(format!("quantization table slot {} out of range", slot)));
        }
        let (first, size) = match precision {
            0 => (*body.get(i + 1).ok_or_else(|| codec("truncated DQT segment"))? as u16, 64),
            1 => (read_u16(body, i + 1)?, 128),
            _ => return Err(codec(format!("quantization precision {}", precision))),
        };
        if i + 1 + size > body.len() {
            return Err(codec("truncated DQT segment"));
        }
        dc_quant[slot] = first.max(1);
        i += 1 + size;
    }
    Ok(())
}

fn parse_scan_header(body: &[u8], frame: &FrameHeader) -> Result<Vec<ScanComponent>> {
    let count = *body.first().ok_or_else(|| codec("empty scan header"))? as usize;
    if count == 0 || count > 4 || body.len() < 1 + count * 2 + 3 {
        return Err(codec("malformed scan header"));
    }
    let mut components = Vec::with_capacity(count);
    for i in 0..count {
        let id = body[1 + i * 2];
        let tables = body[2 + i * 2];
        let component = frame
            .components
            .iter()
            .position(|c| c.id == id)
            .ok_or_else(|| codec(format!("scan references unknown component {}", id)))?;
        components.push(ScanComponent {
            component,
            dc_table: (tables >> 4) as usize & 3,
            ac_table: (tables & 0x0F) as usize & 3,
        });
    }
    let spectral = &body[1 + count * 2..];
    if spectral[0] != 0 || spectral[1] != 63 || spectral[2] != 0 {
        return Err(BlackoutError::UnsupportedTransferSyntax(
            "scan is not baseline sequential".into(),
        ));
    }
    Ok(components)
}

/// Split entropy-coded data starting at `start` at RSTn markers. Returns the
/// interval ranges, the marker bytes between them and the offset of the
/// marker that ends the scan.
fn split_intervals(data: &[u8], start: usize) -> (Vec<Range<usize>>, Vec<u8>, usize) {
    let mut intervals = Vec::new();
    let mut markers = Vec::new();
    let mut interval_start = start;
    let mut i = start;
    while i < data.len() {
        if data[i] != 0xFF {
            i += 1;
            continue;
        }
        match data.get(i + 1) {
            Some(0x00) => i += 2,
            Some(&m @ 0xD0..=0xD7) => {
                intervals.push(interval_start..i);
                markers.push(m);
                i += 2;
                interval_start = i;
            }
            _ => break,
        }
    }
    intervals.push(interval_start..i);
    (intervals, markers, i)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_intervals() {
        let data = [0x11, 0xFF, 0x00, 0x22, 0xFF, 0xD0, 0x33, 0xFF, 0xD9];
        let (intervals, markers, end) = split_intervals(&data, 0);
        assert_eq!(intervals, vec![0..4, 6..7]);
        assert_eq!(markers, vec![0xD0]);
        assert_eq!(end, 7);
    }

    #[test]
    fn test_frame_geometry() {
        let frame = FrameHeader {
            width: 100,
            height: 50,
            components: vec![
                Component { id: 1, h: 2, v: 2, tq: 0 },
                Component { id: 2, h: 1, v: 1, tq: 1 },
            ],
        };
        assert_eq!((frame.mcus_x(), frame.mcus_y()), (7, 4));
        assert_eq!(frame.blocks_across(&frame.components[0]), 13);
        assert_eq!(frame.blocks_across(&frame.components[1]), 7);
        assert_eq!(frame.blocks_down(&frame.components[1]), 4);
    }

    #[test]
    fn test_rejects_non_jpeg() {
        assert!(matches!(parse(&[0x00, 0x01]), Err(BlackoutError::Codec(_))));
    }

    #[test]
    fn test_rejects_progressive() {
        // SOI, SOF2 with an 8 bit 1x1 single component frame
        let data = [
            0xFF, 0xD8, 0xFF, 0xC2, 0x00, 0x0B, 0x08, 0x00, 0x01, 0x00, 0x01, 0x01, 0x01, 0x11, 0x00, 0xFF, 0xD9,
        ];
        assert!(matches!(parse(&data), Err(BlackoutError::UnsupportedTransferSyntax(_))));
    }
}
