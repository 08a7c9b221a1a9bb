//! Configuration types for decoding, rendering and redaction defaults.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{BlackoutError, Result};

/// VOI rendering function used to map real-world values to display gray levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum VoiFunction {
    /// DICOM PS3.3 C.11.2.1.2 linear function, with the -0.5 / -1 offsets.
    #[default]
    LinearDicom,
    /// Plain linear ramp from `center - width/2` to `center + width/2`.
    LinearExact,
    /// DICOM SIGMOID function.
    Logistic,
}

/// Channel layout of a rendered grayscale raster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ColorMode {
    /// One byte per pixel.
    #[default]
    Gray,
    /// Gray level replicated into interleaved RGB.
    Rgb,
}

/// Settings for frame sources backed by memory-mapped files.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DecoderConfig {
    /// Number of attempts made to map a file region before giving up.
    pub memory_mapper_number_of_retries: u32,
    /// Pause between two mapping attempts, in milliseconds.
    pub memory_mapper_retry_delay_ms: u64,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            memory_mapper_number_of_retries: 3,
            memory_mapper_retry_delay_ms: 50,
        }
    }
}

/// Defaults applied to render requests that do not override them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderDefaults {
    /// VOI function.
    pub function: VoiFunction,
    /// Output channel layout for grayscale images.
    pub color_mode: ColorMode,
}

/// Defaults applied to redaction requests.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RedactionDefaults {
    /// Draw overlay planes into the pixel data before blacking out regions.
    pub burn_in_overlays: bool,
    /// Use the pixel padding value as background when one is declared.
    pub use_padding_as_background: bool,
    /// Fixed background value, wins over every other policy.
    pub explicit_background: Option<i32>,
}

/// Top-level configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BlackoutConfig {
    /// Decoder settings.
    pub decoder: DecoderConfig,
    /// Rendering defaults.
    pub render: RenderDefaults,
    /// Redaction defaults.
    pub redaction: RedactionDefaults,
    /// Worker threads for the CLI (defaults to the number of CPUs).
    pub threads: Option<usize>,
}

impl BlackoutConfig {
    /// Parse a configuration from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: BlackoutConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        log::debug!("Loaded configuration from {}", path.as_ref().display());
        Self::from_toml_str(&text)
    }

    /// Check values that serde cannot constrain.
    pub fn validate(&self) -> Result<()> {
        if self.decoder.memory_mapper_number_of_retries == 0 {
            return Err(BlackoutError::Config(
                "memory_mapper_number_of_retries must be at least 1".into(),
            ));
        }
        if self.threads == Some(0) {
            return Err(BlackoutError::Config("threads must be at least 1".into()));
        }
        Ok(())
    }

    /// Number of worker threads to use.
    pub fn thread_count(&self) -> usize {
        self.threads.unwrap_or_else(num_cpus::get)
    }
}

/// Transfer syntax UIDs for DICOM.
pub mod transfer_syntax {
    /// Implicit VR Little Endian (uncompressed)
    pub const IMPLICIT_VR_LITTLE_ENDIAN: &str = "1.2.840.10008.1.2";
    /// Explicit VR Little Endian (uncompressed)
    pub const EXPLICIT_VR_LITTLE_ENDIAN: &str = "1.2.840.10008.1.2.1";
    /// Deflated Explicit VR Little Endian
    pub const DEFLATED_EXPLICIT_VR_LITTLE_ENDIAN: &str = "1.2.840.10008.1.2.1.99";
    /// Explicit VR Big Endian (retired)
    pub const EXPLICIT_VR_BIG_ENDIAN: &str = "1.2.840.10008.1.2.2";
    /// JPEG Baseline (Process 1), the only form the block redaction path accepts
    pub const JPEG_BASELINE: &str = "1.2.840.10008.1.2.4.50";
    /// JPEG Extended (Process 2 & 4)
    pub const JPEG_EXTENDED: &str = "1.2.840.10008.1.2.4.51";
    /// JPEG Lossless SV1
    pub const JPEG_LOSSLESS_SV1: &str = "1.2.840.10008.1.2.4.70";

    /// Strip the NUL/space padding DICOM leaves on UI values.
    pub fn normalize(uid: &str) -> &str {
        uid.trim_end_matches(['\0', ' '])
    }

    /// Whether pixel data in this transfer syntax is stored natively in
    /// little endian order. Big endian native data is not decoded.
    pub fn is_native(uid: &str) -> bool {
        matches!(
            normalize(uid),
            IMPLICIT_VR_LITTLE_ENDIAN | EXPLICIT_VR_LITTLE_ENDIAN | DEFLATED_EXPLICIT_VR_LITTLE_ENDIAN
        )
    }
}
