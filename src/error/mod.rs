//! Error types for the pixel decoding, rendering and redaction library.

use thiserror::Error;

/// Result type alias for the library.
pub type Result<T> = std::result::Result<T, BlackoutError>;

/// Main error type for the blackout library.
#[derive(Error, Debug)]
pub enum BlackoutError {
    /// Format, bit depth or buffer type combination that is not handled.
    #[error("Unsupported encoding: {0}")]
    UnsupportedEncoding(String),

    /// Backing sample type cannot be rendered with the requested options.
    #[error("Unsupported pixel type: {0}")]
    UnsupportedPixelType(String),

    /// Compressed redaction requested for anything but baseline JPEG.
    #[error("Unsupported transfer syntax: {0}")]
    UnsupportedTransferSyntax(String),

    /// Memory mapping kept failing after the configured number of retries.
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Palette attributes are missing or inconsistent.
    ///
    /// Rendering never returns this; it degrades to grayscale and reports
    /// [`crate::transform::RenderWarning::MalformedPalette`] instead.
    #[error("Malformed palette: {0}")]
    MalformedPalette(String),

    /// Caller misuse (empty shape list, frame index out of range, closed source).
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Malformed or truncated compressed bitstream.
    #[error("Codec error: {0}")]
    Codec(String),

    /// Error reading or interpreting a DICOM file.
    #[error("DICOM error: {0}")]
    Dicom(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Error converting or writing a rendered raster.
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
}

impl From<dicom::object::ReadError> for BlackoutError {
    fn from(err: dicom::object::ReadError) -> Self {
        BlackoutError::Dicom(err.to_string())
    }
}

impl From<toml::de::Error> for BlackoutError {
    fn from(err: toml::de::Error) -> Self {
        BlackoutError::Config(err.to_string())
    }
}
