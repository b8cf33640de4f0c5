//! Firmware and bootloader images.
//!
//! An image is the raw flash content to transfer. Its length is rounded up
//! to a whole number of 4-byte words, and any bytes added by rounding or
//! padding read as `0xFF`, the value of erased flash.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use log::{debug, warn};

use crate::error::{Error, Result};
use crate::protocol::block::MAX_BLOCK_SIZE;

/// Largest image accepted (size of the application flash window).
pub const MAX_IMAGE_SIZE: usize = 61440;

/// Largest bootloader image.
pub const MAX_BOOT_SIZE: usize = 4096;

/// Transfer chunk size.
pub const CHUNK_SIZE: usize = MAX_BLOCK_SIZE;

/// Fill value for bytes beyond the end of the loaded data.
pub const ERASED: u8 = 0xFF;

/// An image ready to be transferred.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    data: Vec<u8>,
}

impl Image {
    /// Create an image from raw bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.is_empty() {
            return Err(Error::EmptyImage);
        }
        if bytes.len() > MAX_IMAGE_SIZE {
            return Err(Error::ImageTooBig {
                size: bytes.len(),
                max: MAX_IMAGE_SIZE,
            });
        }
        let mut data = bytes.to_vec();
        data.resize(bytes.len().next_multiple_of(4), ERASED);
        Ok(Self { data })
    }

    /// Load an image from a file.
    ///
    /// Files longer than [`MAX_IMAGE_SIZE`] are truncated to it.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let size = file.metadata()?.len();
        if size > MAX_IMAGE_SIZE as u64 {
            warn!(
                "{} is {size} bytes, only the first {MAX_IMAGE_SIZE} are used",
                path.display()
            );
        }
        let mut bytes = Vec::new();
        file.take(MAX_IMAGE_SIZE as u64)
            .read_to_end(&mut bytes)?;
        debug!("Loaded {} bytes from {}", bytes.len(), path.display());
        Self::from_bytes(&bytes)
    }

    /// Image size in bytes (always a multiple of 4).
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Always `false`: empty images are rejected on construction.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Image content.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Prepare this image for a bootloader update.
    ///
    /// Rejects images over [`MAX_BOOT_SIZE`]. When the image ends exactly on
    /// a chunk boundary short of the maximum size, one erased word is
    /// appended so that the last block is shorter than a full chunk. The
    /// bootloader relies on that to recognize the end of the transfer.
    pub fn for_bootloader(&self) -> Result<Self> {
        if self.len() > MAX_BOOT_SIZE {
            return Err(Error::ImageTooBig {
                size: self.len(),
                max: MAX_BOOT_SIZE,
            });
        }
        let mut data = self.data.clone();
        if data.len() % CHUNK_SIZE == 0 && data.len() != MAX_BOOT_SIZE {
            data.extend_from_slice(&[ERASED; 4]);
        }
        Ok(Self { data })
    }

    /// Iterate over `(offset, chunk)` pairs of at most [`CHUNK_SIZE`] bytes.
    pub fn chunks(&self) -> impl Iterator<Item = (usize, &[u8])> {
        self.data
            .chunks(CHUNK_SIZE)
            .enumerate()
            .map(|(i, chunk)| (i * CHUNK_SIZE, chunk))
    }

    /// Number of chunks in a transfer of this image.
    pub fn chunk_count(&self) -> usize {
        self.len().div_ceil(CHUNK_SIZE)
    }
}
