//! Block-level redaction of baseline JPEG entropy-coded data.
//!
//! Every block is decoded to its Huffman symbols and its bit span in the
//! destuffed data. Blocks that intersect a redaction rectangle are replaced by
//! a flat block (DC only); all other blocks keep their coded bits, with the DC
//! difference re-encoded only where the predictor changed.

use crate::error::{BlackoutError, Result};
use crate::redaction::RedactionShape;

use super::bits::{destuff, extend, magnitude, BitReader, BitWriter};
use super::huffman::{HuffmanTable, TableClass};
use super::markers::{FrameHeader, JpegStructure, Piece, Scan};
use super::JpegRedactionOptions;

const EOB: u8 = 0x00;
const ZRL: u8 = 0xF0;

/// One coded block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct BlockCode {
    /// Index into the scan's components.
    pub scan_component: usize,
    pub row: usize,
    pub col: usize,
    /// Absolute quantized DC value.
    pub dc: i32,
    /// AC run/size symbols with their magnitude bits.
    pub ac: Vec<(u8, u16)>,
    start: usize,
    ac_start: usize,
    end: usize,
}

pub(crate) struct DecodedInterval {
    data: Vec<u8>,
    pub blocks: Vec<BlockCode>,
}

pub(crate) struct DecodedScan {
    pub intervals: Vec<DecodedInterval>,
}

/// Redaction flags per block of one frame component.
#[derive(Debug, Clone)]
pub(crate) struct BlockMask {
    cols: usize,
    flags: Vec<bool>,
}

impl BlockMask {
    pub(crate) fn get(&self, row: usize, col: usize) -> bool {
        col < self.cols && self.flags.get(row * self.cols + col).copied().unwrap_or(false)
    }

    fn count(&self) -> usize {
        self.flags.iter().filter(|&&f| f).count()
    }
}

/// Symbol needed for re-encoding that the tables do not define.
#[derive(Debug)]
struct MissingCode;

fn codec(message: impl Into<String>) -> BlackoutError {
    BlackoutError::Codec(message.into())
}

/// Blocks of every frame component whose pixel footprint meets a shape.
pub(crate) fn block_masks(frame: &FrameHeader, shapes: &[RedactionShape]) -> Vec<BlockMask> {
    let (h_max, v_max) = (frame.h_max(), frame.v_max());
    frame
        .components
        .iter()
        .map(|c| {
            let (h, v) = (c.h as usize, c.v as usize);
            let cols = frame.mcus_x() * h;
            let rows = frame.mcus_y() * v;
            let mut flags = vec![false; cols * rows];
            for shape in shapes {
                let Some((x0, y0, x1, y1)) = shape.clamp(frame.width as u32, frame.height as u32) else {
                    continue;
                };
                let (x0, y0, x1, y1) = (x0 as usize, y0 as usize, x1 as usize, y1 as usize);
                let c0 = x0 * h / (8 * h_max);
                let c1 = (x1 - 1) * h / (8 * h_max);
                let r0 = y0 * v / (8 * v_max);
                let r1 = (y1 - 1) * v / (8 * v_max);
                for row in r0..=r1.min(rows - 1) {
                    for col in c0..=c1.min(cols - 1) {
                        flags[row * cols + col] = true;
                    }
                }
            }
            BlockMask { cols, flags }
        })
        .collect()
}

/// Block positions of one MCU, in coding order.
fn mcu_blocks(frame: &FrameHeader, scan: &Scan, mcu: usize) -> Vec<(usize, usize, usize)> {
    if scan.components.len() == 1 {
        let component = &frame.components[scan.components[0].component];
        let across = frame.blocks_across(component);
        return vec![(0, mcu / across, mcu % across)];
    }
    let (mx, my) = (mcu % frame.mcus_x(), mcu / frame.mcus_x());
    let mut blocks = Vec::new();
    for (k, sc) in scan.components.iter().enumerate() {
        let c = &frame.components[sc.component];
        let (h, v) = (c.h as usize, c.v as usize);
        for by in 0..v {
            for bx in 0..h {
                blocks.push((k, my * v + by, mx * h + bx));
            }
        }
    }
    blocks
}

fn mcu_count(frame: &FrameHeader, scan: &Scan) -> usize {
    if scan.components.len() == 1 {
        let component = &frame.components[scan.components[0].component];
        frame.blocks_across(component) * frame.blocks_down(component)
    } else {
        frame.mcus_x() * frame.mcus_y()
    }
}

fn table<'a>(tables: &'a [Option<HuffmanTable>; 4], slot: usize, kind: &str) -> Result<&'a HuffmanTable> {
    tables[slot]
        .as_ref()
        .ok_or_else(|| codec(format!("scan uses undefined {} table {}", kind, slot)))
}

/// Decode the symbols and bit spans of every block in `scan`.
pub(crate) fn decode_scan(data: &[u8], frame: &FrameHeader, scan: &Scan) -> Result<DecodedScan> {
    let total = mcu_count(frame, scan);
    let per_interval = match scan.restart_interval {
        0 => total,
        n => n as usize,
    };
    let expected = total.div_ceil(per_interval.max(1));
    if scan.intervals.len() < expected {
        return Err(codec(format!(
            "scan has {} restart interval(s), expected {}",
            scan.intervals.len(),
            expected
        )));
    }

    let mut intervals = Vec::with_capacity(expected);
    let mut mcu = 0;
    for range in scan.intervals.iter().take(expected) {
        let destuffed = destuff(&data[range.clone()]);
        let mut reader = BitReader::new(&destuffed);
        let mut predictors = vec![0i32; scan.components.len()];
        let mut blocks = Vec::new();
        let end_mcu = (mcu + per_interval).min(total);
        while mcu < end_mcu {
            for (k, row, col) in mcu_blocks(frame, scan, mcu) {
                let sc = &scan.components[k];
                let dc_table = table(&scan.dc_tables, sc.dc_table, "DC")?;
                let ac_table = table(&scan.ac_tables, sc.ac_table, "AC")?;
                let mut block = decode_block(&mut reader, dc_table, ac_table, predictors[k])?;
                predictors[k] = block.dc;
                block.scan_component = k;
                block.row = row;
                block.col = col;
                blocks.push(block);
            }
            mcu += 1;
        }
        intervals.push(DecodedInterval {
            data: destuffed,
            blocks,
        });
    }
    Ok(DecodedScan { intervals })
}

fn decode_block(
    reader: &mut BitReader<'_>,
    dc_table: &HuffmanTable,
    ac_table: &HuffmanTable,
    predictor: i32,
) -> Result<BlockCode> {
    let start = reader.position();
    let size = dc_table.decode(reader)?;
    if size > 11 {
        return Err(codec(format!("DC difference category {}", size)));
    }
    let dc = predictor + extend(reader.read_bits(size)?, size);
    let ac_start = reader.position();

    let mut ac = Vec::new();
    let mut k = 1;
    while k < 64 {
        let symbol = ac_table.decode(reader)?;
        let (run, size) = ((symbol >> 4) as usize, symbol & 0x0F);
        if size == 0 {
            match symbol {
                EOB => {
                    ac.push((symbol, 0));
                    break;
                }
                ZRL => {
                    ac.push((symbol, 0));
                    k += 16;
                    continue;
                }
                _ => return Err(codec(format!("invalid AC symbol 0x{:02X}", symbol))),
            }
        }
        k += run;
        if k > 63 {
            return Err(codec("AC coefficients run past the block"));
        }
        ac.push((symbol, reader.read_bits(size)?));
        k += 1;
    }
    if k > 64 {
        return Err(codec("AC coefficients run past the block"));
    }

    Ok(BlockCode {
        scan_component: 0,
        row: 0,
        col: 0,
        dc,
        ac,
        start,
        ac_start,
        end: reader.position(),
    })
}

/// Quantized DC of a flat block at `gray` (luma) or neutral (chroma).
fn target_dc(component: usize, gray: u8, quantizer: u16) -> i32 {
    if component != 0 {
        return 0;
    }
    let value = ((gray as f64 - 128.0) * 8.0 / quantizer.max(1) as f64).round() as i32;
    value.clamp(-2047, 2047)
}

/// A block as it is written back.
struct Edit<'a> {
    block: &'a BlockCode,
    redacted: bool,
    diff: i32,
    unchanged: bool,
}

fn interval_edits<'a>(
    frame: &FrameHeader,
    scan: &Scan,
    interval: &'a DecodedInterval,
    masks: &[BlockMask],
    gray: u8,
) -> Vec<Edit<'a>> {
    let mut new_pred = vec![0i32; scan.components.len()];
    let mut old_pred = vec![0i32; scan.components.len()];
    interval
        .blocks
        .iter()
        .map(|block| {
            let k = block.scan_component;
            let component = scan.components[k].component;
            let redacted = masks[component].get(block.row, block.col);
            let dc = if redacted {
                let tq = frame.components[component].tq as usize;
                target_dc(component, gray, scan.dc_quant[tq])
            } else {
                block.dc
            };
            let diff = dc - new_pred[k];
            let unchanged = !redacted && diff == block.dc - old_pred[k];
            new_pred[k] = dc;
            old_pred[k] = block.dc;
            Edit {
                block,
                redacted,
                diff,
                unchanged,
            }
        })
        .collect()
}

fn put_symbol(writer: &mut BitWriter, table: &HuffmanTable, symbol: u8) -> std::result::Result<(), MissingCode> {
    let (code, len) = table.code(symbol).ok_or(MissingCode)?;
    writer.put(code, len);
    Ok(())
}

/// Tables used when writing, per class and slot.
type TableSet = [[Option<HuffmanTable>; 4]; 2];

fn encode_scan(
    frame: &FrameHeader,
    scan: &Scan,
    decoded: &DecodedScan,
    masks: &[BlockMask],
    gray: u8,
    regenerated: Option<&TableSet>,
) -> std::result::Result<Vec<Vec<u8>>, MissingCode> {
    let mut out = Vec::with_capacity(decoded.intervals.len());
    for interval in &decoded.intervals {
        let mut writer = BitWriter::new();
        for edit in interval_edits(frame, scan, interval, masks, gray) {
            let block = edit.block;
            let sc = &scan.components[block.scan_component];
            let (dc_table, ac_table) = match regenerated {
                Some(set) => (set[0][sc.dc_table].as_ref(), set[1][sc.ac_table].as_ref()),
                None => (scan.dc_tables[sc.dc_table].as_ref(), scan.ac_tables[sc.ac_table].as_ref()),
            };
            let (dc_table, ac_table) = (dc_table.ok_or(MissingCode)?, ac_table.ok_or(MissingCode)?);

            if regenerated.is_none() && edit.unchanged {
                writer.copy(&interval.data, block.start, block.end);
                continue;
            }
            let (size, bits) = magnitude(edit.diff);
            put_symbol(&mut writer, dc_table, size)?;
            writer.put(bits, size);
            if edit.redacted {
                put_symbol(&mut writer, ac_table, EOB)?;
            } else if regenerated.is_none() {
                writer.copy(&interval.data, block.ac_start, block.end);
            } else {
                for &(symbol, bits) in &block.ac {
                    put_symbol(&mut writer, ac_table, symbol)?;
                    writer.put(bits, symbol & 0x0F);
                }
            }
        }
        out.push(writer.finish());
    }
    Ok(out)
}

/// Optimal tables for every slot used by any scan, given the edited blocks.
fn optimal_tables(
    structure: &JpegStructure,
    decoded: &[DecodedScan],
    masks: &[BlockMask],
    gray: u8,
) -> Result<TableSet> {
    let mut freq = [[[0u32; 256]; 4]; 2];
    let mut used = [[false; 4]; 2];
    for (scan, decoded) in structure.scans.iter().zip(decoded) {
        for sc in &scan.components {
            used[0][sc.dc_table] = true;
            used[1][sc.ac_table] = true;
        }
        for interval in &decoded.intervals {
            for edit in interval_edits(&structure.frame, scan, interval, masks, gray) {
                let sc = &scan.components[edit.block.scan_component];
                let (size, _) = magnitude(edit.diff);
                freq[0][sc.dc_table][size as usize] += 1;
                if edit.redacted {
                    freq[1][sc.ac_table][EOB as usize] += 1;
                } else {
                    for &(symbol, _) in &edit.block.ac {
                        freq[1][sc.ac_table][symbol as usize] += 1;
                    }
                }
            }
        }
    }

    let mut set: TableSet = Default::default();
    for class in 0..2 {
        for slot in 0..4 {
            if used[class][slot] {
                set[class][slot] = Some(HuffmanTable::optimal(&freq[class][slot])?);
            }
        }
    }
    Ok(set)
}

fn dht_segment(set: &TableSet) -> Vec<u8> {
    let length: usize = 2 + set.iter().flatten().flatten().map(HuffmanTable::entry_len).sum::<usize>();
    let mut out = vec![0xFF, 0xC4, (length >> 8) as u8, length as u8];
    for (class, tables) in [TableClass::Dc, TableClass::Ac].into_iter().zip(set) {
        for (slot, table) in tables.iter().enumerate() {
            if let Some(table) = table {
                table.write_entry(class, slot as u8, &mut out);
            }
        }
    }
    out
}

fn assemble(data: &[u8], structure: &JpegStructure, encoded: &[Vec<Vec<u8>>], tables: Option<&TableSet>) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + 1024);
    let mut tables_written = false;
    for piece in &structure.pieces {
        match piece {
            Piece::Copy(range) => out.extend_from_slice(&data[range.clone()]),
            Piece::Tables(range) => {
                if tables.is_none() {
                    out.extend_from_slice(&data[range.clone()]);
                }
            }
            Piece::Scan(index) => {
                if let Some(set) = tables.filter(|_| !tables_written) {
                    out.extend_from_slice(&dht_segment(set));
                    tables_written = true;
                }
                let scan = &structure.scans[*index];
                out.extend_from_slice(&data[scan.header.clone()]);
                for (i, interval) in encoded[*index].iter().enumerate() {
                    out.extend_from_slice(interval);
                    if let Some(&marker) = scan.restart_markers.get(i) {
                        out.extend_from_slice(&[0xFF, marker]);
                    }
                }
            }
        }
    }
    out
}

/// Redact `shapes` in one parsed baseline JPEG stream.
pub(crate) fn redact_structure(
    data: &[u8],
    structure: &JpegStructure,
    shapes: &[RedactionShape],
    options: &JpegRedactionOptions,
) -> Result<Vec<u8>> {
    let frame = &structure.frame;
    let masks = block_masks(frame, shapes);
    let marked: usize = masks.iter().map(BlockMask::count).sum();
    if marked == 0 {
        log::warn!("No JPEG blocks intersect the redaction shapes; stream left unchanged");
        return Ok(data.to_vec());
    }

    let decoded = structure
        .scans
        .iter()
        .map(|scan| decode_scan(data, frame, scan))
        .collect::<Result<Vec<_>>>()?;
    let gray = options.gray_level;

    if !options.optimize_tables {
        let encoded: std::result::Result<Vec<_>, MissingCode> = structure
            .scans
            .iter()
            .zip(&decoded)
            .map(|(scan, d)| encode_scan(frame, scan, d, &masks, gray, None))
            .collect();
        match encoded {
            Ok(encoded) => {
                log::debug!("Rewrote {} JPEG block(s) with the existing Huffman tables", marked);
                return Ok(assemble(data, structure, &encoded, None));
            }
            Err(MissingCode) => {
                log::warn!("Existing Huffman tables lack a code needed for redaction; regenerating optimal tables");
            }
        }
    }

    let tables = optimal_tables(structure, &decoded, &masks, gray)?;
    let encoded = structure
        .scans
        .iter()
        .zip(&decoded)
        .map(|(scan, d)| encode_scan(frame, scan, d, &masks, gray, Some(&tables)))
        .collect::<std::result::Result<Vec<_>, MissingCode>>()
        .map_err(|_| codec("regenerated Huffman tables are incomplete"))?;
    log::debug!("Rewrote {} JPEG block(s) with regenerated Huffman tables", marked);
    Ok(assemble(data, structure, &encoded, Some(&tables)))
}
