//! Canonical Huffman tables (ITU T.81 Annex C) and optimal table generation
//! (Annex K.2).

use crate::error::{BlackoutError, Result};

use super::bits::BitReader;

/// Table class as written in DHT segments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TableClass {
    Dc = 0,
    Ac = 1,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct HuffmanTable {
    counts: [u8; 16],
    values: Vec<u8>,
    codes: [u16; 256],
    lengths: [u8; 256],
    max_code: [i32; 17],
    first_index: [usize; 17],
    min_code: [u16; 17],
}

impl HuffmanTable {
    /// Build from code length counts (lengths 1..=16) and symbols in code order.
    pub(crate) fn new(counts: [u8; 16], values: Vec<u8>) -> Result<Self> {
        let total: usize = counts.iter().map(|&c| c as usize).sum();
        if total != values.len() || total > 256 {
            return Err(BlackoutError::Codec(format!(
                "Huffman table declares {} codes for {} symbols",
                total,
                values.len()
            )));
        }

        let mut table = Self {
            counts,
            values,
            codes: [0; 256],
            lengths: [0; 256],
            max_code: [-1; 17],
            first_index: [0; 17],
            min_code: [0; 17],
        };
        let mut code: u32 = 0;
        let mut index = 0;
        for len in 1..=16usize {
            let count = counts[len - 1] as usize;
            table.first_index[len] = index;
            table.min_code[len] = code as u16;
            for _ in 0..count {
                let symbol = table.values[index] as usize;
                table.codes[symbol] = code as u16;
                table.lengths[symbol] = len as u8;
                code += 1;
                index += 1;
            }
            if count > 0 {
                table.max_code[len] = code as i32 - 1;
            }
            if code > 1 << len {
                return Err(BlackoutError::Codec("Huffman code space overflow".into()));
            }
            code <<= 1;
        }
        Ok(table)
    }

    /// Decode one symbol.
    pub(crate) fn decode(&self, reader: &mut BitReader<'_>) -> Result<u8> {
        let mut code: i32 = 0;
        for len in 1..=16 {
            code = (code << 1) | reader.read_bit()? as i32;
            if code <= self.max_code[len] {
                let index = self.first_index[len] + (code - self.min_code[len] as i32) as usize;
                return Ok(self.values[index]);
            }
        }
        Err(BlackoutError::Codec("invalid Huffman code".into()))
    }

    /// Code and length for `symbol`, if the table has one.
    pub(crate) fn code(&self, symbol: u8) -> Option<(u16, u8)> {
        let len = self.lengths[symbol as usize];
        (len > 0).then_some((self.codes[symbol as usize], len))
    }

    /// Optimal table for the given symbol frequencies.
    pub(crate) fn optimal(frequencies: &[u32; 256]) -> Result<Self> {
        if frequencies.iter().all(|&f| f == 0) {
            return Err(BlackoutError::Codec("no symbols to encode".into()));
        }
        let mut freq = [0i64; 257];
        for (f, &count) in freq.iter_mut().zip(frequencies.iter()) {
            *f = count as i64;
        }
        // reserved symbol keeps any code from being all ones
        freq[256] = 1;
        let mut code_size = [0usize; 257];
        let mut others = [-1i32; 257];

        loop {
            let mut c1: i32 = -1;
            let mut v = i64::MAX;
            for (i, &f) in freq.iter().enumerate() {
                if f > 0 && f <= v {
                    v = f;
                    c1 = i as i32;
                }
            }
            let mut c2: i32 = -1;
            v = i64::MAX;
            for (i, &f) in freq.iter().enumerate() {
                if f > 0 && f <= v && i as i32 != c1 {
                    v = f;
                    c2 = i as i32;
                }
            }
            if c2 < 0 {
                break;
            }
            let (mut a, mut b) = (c1 as usize, c2 as usize);
            freq[a] += freq[b];
            freq[b] = 0;
            code_size[a] += 1;
            while others[a] >= 0 {
                a = others[a] as usize;
                code_size[a] += 1;
            }
            others[a] = b as i32;
            code_size[b] += 1;
            while others[b] >= 0 {
                b = others[b] as usize;
                code_size[b] += 1;
            }
        }

        let mut bits = [0usize; 33];
        for &size in code_size.iter().filter(|&&s| s > 0) {
            if size > 32 {
                return Err(BlackoutError::Codec("Huffman code length overflow".into()));
            }
            bits[size] += 1;
        }
        // limit code lengths to 16 bits
        for i in (17..=32).rev() {
            while bits[i] > 0 {
                let mut j = i - 2;
                while bits[j] == 0 {
                    j -= 1;
                }
                bits[i] -= 2;
                bits[i - 1] += 1;
                bits[j + 1] += 2;
                bits[j] -= 1;
            }
        }
        // drop the reserved code from the longest length
        let mut longest = 16;
        while bits[longest] == 0 {
            longest -= 1;
        }
        bits[longest] -= 1;

        let mut values = Vec::new();
        for size in 1..=32 {
            for symbol in 0..256 {
                if code_size[symbol] == size {
                    values.push(symbol as u8);
                }
            }
        }
        let mut counts = [0u8; 16];
        for (count, &b) in counts.iter_mut().zip(&bits[1..=16]) {
            *count = b as u8;
        }
        Self::new(counts, values)
    }

    /// Append this table's DHT entry (class/slot byte, counts, symbols).
    pub(crate) fn write_entry(&self, class: TableClass, slot: u8, out: &mut Vec<u8>) {
        out.push(((class as u8) << 4) | slot);
        out.extend_from_slice(&self.counts);
        out.extend_from_slice(&self.values);
    }

    /// Length of the entry written by [`HuffmanTable::write_entry`].
    pub(crate) fn entry_len(&self) -> usize {
        17 + self.values.len()
    }
}
