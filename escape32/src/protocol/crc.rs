//! CRC-32 checksum used to protect data blocks.

use crc::{CRC_32_ISO_HDLC, Crc};

/// CRC-32 (IEEE 802.3): reflected, polynomial `0x04C11DB7`, init and
/// xorout `0xFFFFFFFF`.
const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// Calculate the CRC-32 of `data`.
pub fn crc32(data: &[u8]) -> u32 {
    CRC32.checksum(data)
}
