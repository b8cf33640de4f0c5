//! Checksummed data blocks.
//!
//! ## Frame Format
//!
//! ```text
//! +-------------+----------------+---------+
//! |   Length    |      Data      |  CRC32  |
//! +-------------+----------------+---------+
//! |   value     | 4 .. 1024      | 4 bytes |
//! +-------------+----------------+---------+
//! | len / 4 - 1 |    payload     |   LE    |
//! +-------------+----------------+---------+
//! ```
//!
//! The length travels as a self-checking value (see [`super::value`]), so a
//! single length byte covers payloads of 4 to 1024 bytes in steps of 4.

use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};
use log::{debug, trace};

use crate::channel::Channel;
use crate::error::{Error, Result};
use crate::port::Port;
use crate::protocol::crc::crc32;
use crate::protocol::value::{self, recv_value, send_value};

/// Largest payload carried by one block.
pub const MAX_BLOCK_SIZE: usize = 1024;

/// Length value for a payload of `len` bytes.
///
/// Fails unless `len` is a positive multiple of 4 no larger than
/// [`MAX_BLOCK_SIZE`].
#[allow(clippy::cast_possible_truncation)]
pub fn length_value(len: usize) -> Result<u8> {
    if len == 0 || len % 4 != 0 || len > MAX_BLOCK_SIZE {
        return Err(Error::InvalidBlockLength(len));
    }
    // Safe cast: len / 4 - 1 is at most 255
    Ok((len / 4 - 1) as u8)
}

/// Payload length announced by a length value.
pub fn payload_len(value: u8) -> usize {
    (usize::from(value) + 1) * 4
}

/// Build the complete wire frame for a payload.
pub fn encode(payload: &[u8]) -> Result<Vec<u8>> {
    let cnt = length_value(payload.len())?;
    let mut frame = Vec::with_capacity(2 + payload.len() + 4);
    frame.extend_from_slice(&value::encode(cnt));
    frame.extend_from_slice(payload);
    frame.write_u32::<LittleEndian>(crc32(payload))?;
    Ok(frame)
}

/// Send a data block.
///
/// The payload length is validated before anything is transmitted.
pub fn send_block<P: Port>(channel: &mut Channel<P>, payload: &[u8]) -> Result<()> {
    let cnt = length_value(payload.len())?;
    let crc = crc32(payload);
    debug!("Sending block: {} bytes, crc {crc:#010x}", payload.len());

    send_value(channel, cnt)?;
    channel.send(payload)?;
    channel.send(&crc.to_le_bytes())
}

/// Receive a data block and verify its checksum.
pub fn recv_block<P: Port>(channel: &mut Channel<P>) -> Result<Vec<u8>> {
    let len = payload_len(recv_value(channel)?);
    trace!("Receiving block of {len} bytes");

    let mut payload = vec![0u8; len];
    if !channel.receive(&mut payload)? {
        return Err(Error::Timeout(format!("block payload ({len} bytes)")));
    }

    let mut trailer = [0u8; 4];
    if !channel.receive(&mut trailer)? {
        return Err(Error::Timeout("block checksum".into()));
    }

    let expected = LittleEndian::read_u32(&trailer);
    let actual = crc32(&payload);
    if expected != actual {
        return Err(Error::CrcMismatch { expected, actual });
    }

    debug!("Received block: {len} bytes");
    Ok(payload)
}
