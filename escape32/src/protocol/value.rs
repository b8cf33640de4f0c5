//! Self-checking single-byte values.
//!
//! ```text
//! +-------+--------+
//! | value | ~value |
//! +-------+--------+
//! ```
//!
//! Commands, acknowledgments, block indices and block lengths all travel
//! this way. A pair whose bytes do not XOR to `0xFF` is rejected.

use log::trace;

use crate::channel::Channel;
use crate::error::{Error, Result};
use crate::port::Port;

/// Encode a value into its two wire bytes.
pub const fn encode(value: u8) -> [u8; 2] {
    [value, !value]
}

/// Decode two wire bytes into a value.
pub fn decode(bytes: [u8; 2]) -> Result<u8> {
    let [byte, complement] = bytes;
    if byte ^ complement == 0xFF {
        Ok(byte)
    } else {
        Err(Error::Corrupt { byte, complement })
    }
}

/// Send a value.
pub fn send_value<P: Port>(channel: &mut Channel<P>, value: u8) -> Result<()> {
    trace!("tx value {value:#04x}");
    channel.send(&encode(value))
}

/// Receive a value.
///
/// Fails with [`Error::Timeout`] when nothing arrives and with
/// [`Error::Corrupt`] when the complement check fails.
pub fn recv_value<P: Port>(channel: &mut Channel<P>) -> Result<u8> {
    let mut buf = [0u8; 2];
    if !channel.receive(&mut buf)? {
        return Err(Error::Timeout("no value received".into()));
    }
    let value = decode(buf)?;
    trace!("rx value {value:#04x}");
    Ok(value)
}
