//! Error types for escape32.

use std::io;
use thiserror::Error;

/// Result type for escape32 operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for escape32 operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (serial port, file operations).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// No data arrived within the per-read timeout.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// A value failed its complement check.
    #[error("Corrupt value: {byte:#04x} / {complement:#04x}")]
    Corrupt {
        /// Value byte as received.
        byte: u8,
        /// Complement byte as received.
        complement: u8,
    },

    /// Block checksum mismatch.
    #[error("CRC mismatch: expected {expected:#010x}, got {actual:#010x}")]
    CrcMismatch {
        /// Checksum carried by the frame.
        expected: u32,
        /// Checksum computed over the received payload.
        actual: u32,
    },

    /// The device answered an exchange with something other than what was expected.
    #[error("{operation} (result {}, expected {expected})", display_result(.result))]
    UnexpectedResult {
        /// Human-readable label of the failing operation.
        operation: &'static str,
        /// Received result, `None` when nothing valid arrived.
        result: Option<u32>,
        /// Expected result.
        expected: u32,
    },

    /// Block payload length is not a positive multiple of 4 up to 1024 bytes.
    #[error("Invalid block length: {0}")]
    InvalidBlockLength(usize),

    /// Image does not fit the target region.
    #[error("Image too big: {size} bytes (max {max})")]
    ImageTooBig {
        /// Image size in bytes.
        size: usize,
        /// Maximum allowed size in bytes.
        max: usize,
    },

    /// Image file contained no data.
    #[error("Empty data")]
    EmptyImage,

    /// Operation stopped by the embedding application.
    #[error("Interrupted")]
    Interrupted,
}

impl Error {
    /// Whether this is a protocol-level failure (as opposed to an environment
    /// or usage error).
    ///
    /// Protocol failures can be retried by the probe loop or tolerated in
    /// force mode. Everything else is always fatal.
    pub fn is_protocol(&self) -> bool {
        matches!(
            self,
            Self::Timeout(_)
                | Self::Corrupt { .. }
                | Self::CrcMismatch { .. }
                | Self::UnexpectedResult { .. }
        )
    }
}

#[allow(clippy::ref_option)]
fn display_result(result: &Option<u32>) -> String {
    result.map_or_else(|| "none".to_string(), |r| r.to_string())
}
