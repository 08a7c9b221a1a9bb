//! Palette color lookup tables.

use serde::{Deserialize, Serialize};

use crate::format::PhotometricInterpretation;

/// Red/Green/Blue Palette Color Lookup Table Descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaletteDescriptor {
    /// Number of entries (0 means 65536).
    pub number_of_entries: u32,
    /// First stored value mapped.
    pub first_value_mapped: i32,
    /// Bits per entry (8 or 16).
    pub bits_per_entry: u16,
}

impl PaletteDescriptor {
    /// Build from the three descriptor values as stored in the data set.
    pub fn from_values(values: &[i32]) -> Option<Self> {
        match values {
            [entries, first, bits, ..] => Some(Self {
                number_of_entries: if *entries <= 0 { 65536 } else { *entries as u32 },
                first_value_mapped: *first,
                bits_per_entry: (*bits).clamp(0, 16) as u16,
            }),
            _ => None,
        }
    }
}

/// How a palette participates in rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaletteUsage {
    /// Every sample is colored through the palette.
    TrueColor,
    /// Samples above the largest monochrome value are colored, the rest are gray.
    Supplemental {
        /// Largest Monochrome Pixel Value.
        largest_monochrome: i32,
    },
}

/// Three parallel lookup tables mapping a stored index to red/green/blue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaletteColorLut {
    /// First value mapped by the tables.
    pub first_value_mapped: i32,
    /// Declared number of entries.
    pub number_of_entries: u32,
    /// Declared bits per entry.
    pub bits_per_entry: u16,
    /// Red table, one value per entry.
    pub red: Vec<u16>,
    /// Green table, one value per entry.
    pub green: Vec<u16>,
    /// Blue table, one value per entry.
    pub blue: Vec<u16>,
    /// Largest Monochrome Pixel Value (0028,9099), if declared.
    pub largest_monochrome_pixel_value: Option<i32>,
    /// Pixel Presentation (0008,9205), if declared.
    pub pixel_presentation: Option<String>,
}

impl PaletteColorLut {
    /// Create a palette from already unpacked tables.
    pub fn new(descriptor: PaletteDescriptor, red: Vec<u16>, green: Vec<u16>, blue: Vec<u16>) -> Self {
        Self {
            first_value_mapped: descriptor.first_value_mapped,
            number_of_entries: descriptor.number_of_entries,
            bits_per_entry: descriptor.bits_per_entry,
            red,
            green,
            blue,
            largest_monochrome_pixel_value: None,
            pixel_presentation: None,
        }
    }

    /// Create a palette from OW table data, unpacking legacy tables that hold
    /// two 8-bit entries per word (low byte first).
    pub fn from_words(descriptor: PaletteDescriptor, red: &[u16], green: &[u16], blue: &[u16]) -> Self {
        let unpack = |words: &[u16]| unpack_table(words, descriptor.number_of_entries as usize, descriptor.bits_per_entry);
        Self::new(descriptor, unpack(red), unpack(green), unpack(blue))
    }

    /// Attach the attributes that decide between true color and supplemental use.
    pub fn with_presentation(mut self, largest_monochrome: Option<i32>, pixel_presentation: Option<String>) -> Self {
        self.largest_monochrome_pixel_value = largest_monochrome;
        self.pixel_presentation = pixel_presentation;
        self
    }

    /// Reason the palette cannot be used, if any.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.bits_per_entry == 0 {
            return Err("bits per entry is zero".into());
        }
        for (name, table) in [("red", &self.red), ("green", &self.green), ("blue", &self.blue)] {
            if table.is_empty() {
                return Err(format!("{} table is missing", name));
            }
        }
        Ok(())
    }

    /// True color unless a largest monochrome value is declared and neither
    /// the photometric interpretation nor the pixel presentation says color.
    ///
    /// This three-way OR mirrors how existing files mark supplemental palettes
    /// and is kept as is for compatibility.
    pub fn usage(&self, photometric: Option<PhotometricInterpretation>) -> PaletteUsage {
        let presentation_is_color = self
            .pixel_presentation
            .as_deref()
            .map(|p| p.trim_end_matches(['\0', ' ']).eq_ignore_ascii_case("COLOR"))
            .unwrap_or(false);
        match self.largest_monochrome_pixel_value {
            Some(largest)
                if photometric != Some(PhotometricInterpretation::PaletteColor) && !presentation_is_color =>
            {
                PaletteUsage::Supplemental {
                    largest_monochrome: largest,
                }
            }
            _ => PaletteUsage::TrueColor,
        }
    }

    /// 8-bit color for a (rescaled) input value, clamped to the table bounds.
    pub fn color(&self, value: f64) -> [u8; 3] {
        let shift = self.entry_shift();
        let pick = |table: &[u16]| -> u8 {
            let last = table.len().saturating_sub(1) as i64;
            let index = (value.round() as i64 - self.first_value_mapped as i64).clamp(0, last);
            (table[index as usize] >> shift).min(255) as u8
        };
        [pick(&self.red), pick(&self.green), pick(&self.blue)]
    }

    /// Right shift bringing entries to 8 bits. Tables declared as 16 bit
    /// whose values all fit in a byte are used unshifted.
    fn entry_shift(&self) -> u16 {
        if self.bits_per_entry <= 8 {
            return 0;
        }
        let fits_in_byte = self
            .red
            .iter()
            .chain(&self.green)
            .chain(&self.blue)
            .all(|&v| v <= 0xFF);
        if fits_in_byte {
            0
        } else {
            self.bits_per_entry - 8
        }
    }
}

/// Expand table words into one value per entry.
fn unpack_table(words: &[u16], entries: usize, bits_per_entry: u16) -> Vec<u16> {
    if bits_per_entry <= 8 && words.len() < entries && words.len() * 2 >= entries {
        log::debug!("Unpacking legacy 8-bit palette table ({} words for {} entries)", words.len(), entries);
        return words
            .iter()
            .flat_map(|&w| [w & 0x00FF, w >> 8])
            .take(entries)
            .collect();
    }
    if bits_per_entry <= 8 && words.iter().any(|&w| w > 0xFF) {
        // 8-bit entries left in the high byte of each word
        return words.iter().take(entries).map(|&w| w >> 8).collect();
    }
    words.iter().take(entries).copied().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(entries: u32, first: i32, bits: u16) -> PaletteDescriptor {
        PaletteDescriptor {
            number_of_entries: entries,
            first_value_mapped: first,
            bits_per_entry: bits,
        }
    }

    #[test]
    fn test_legacy_packed_tables_low_byte_first() {
        let words = [0x0201u16, 0x0403];
        let lut = PaletteColorLut::from_words(descriptor(4, 0, 8), &words, &words, &words);
        assert_eq!(lut.red, vec![1, 2, 3, 4]);
        assert_eq!(lut.color(3.0), [4, 4, 4]);
    }

    #[test]
    fn test_sixteen_bit_entries_shifted() {
        let lut = PaletteColorLut::from_words(
            descriptor(2, 10, 16),
            &[0x0000, 0xFF00],
            &[0x1000, 0x8000],
            &[0xFFFF, 0x0100],
        );
        assert_eq!(lut.color(10.0), [0x00, 0x10, 0xFF]);
        assert_eq!(lut.color(11.0), [0xFF, 0x80, 0x01]);
        // clamped to the table bounds
        assert_eq!(lut.color(-100.0), lut.color(10.0));
        assert_eq!(lut.color(5000.0), lut.color(11.0));
    }

    #[test]
    fn test_sixteen_bit_declared_eight_bit_values() {
        let lut = PaletteColorLut::new(descriptor(2, 0, 16), vec![10, 200], vec![0, 0], vec![255, 1]);
        assert_eq!(lut.color(1.0), [200, 0, 1]);
    }

    #[test]
    fn test_validation() {
        let ok = PaletteColorLut::new(descriptor(1, 0, 8), vec![1], vec![1], vec![1]);
        assert!(ok.validate().is_ok());
        let missing = PaletteColorLut::new(descriptor(1, 0, 8), vec![1], vec![], vec![1]);
        assert!(missing.validate().unwrap_err().contains("green"));
        let zero_bits = PaletteColorLut::new(descriptor(1, 0, 0), vec![1], vec![1], vec![1]);
        assert!(zero_bits.validate().is_err());
    }

    #[test]
    fn test_usage_heuristic() {
        let lut = PaletteColorLut::new(descriptor(1, 0, 8), vec![1], vec![1], vec![1]);
        assert_eq!(lut.usage(Some(PhotometricInterpretation::Monochrome2)), PaletteUsage::TrueColor);

        let supplemental = lut.clone().with_presentation(Some(1023), Some("MIXED".into()));
        assert_eq!(
            supplemental.usage(Some(PhotometricInterpretation::Monochrome2)),
            PaletteUsage::Supplemental { largest_monochrome: 1023 }
        );
        assert_eq!(
            supplemental.usage(Some(PhotometricInterpretation::PaletteColor)),
            PaletteUsage::TrueColor
        );
        let color = lut.with_presentation(Some(1023), Some("COLOR ".into()));
        assert_eq!(color.usage(Some(PhotometricInterpretation::Monochrome2)), PaletteUsage::TrueColor);
    }

    #[test]
    fn test_descriptor_from_values() {
        let d = PaletteDescriptor::from_values(&[0, -100, 16]).unwrap();
        assert_eq!(d.number_of_entries, 65536);
        assert_eq!(d.first_value_mapped, -100);
        assert!(PaletteDescriptor::from_values(&[256, 0]).is_none());
    }
}
