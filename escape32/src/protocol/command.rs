//! Bootloader commands and the exchanges built from them.
//!
//! Every exchange is a strict request/response round trip:
//!
//! | Exchange        | Host sends                          | Device answers        |
//! |-----------------|-------------------------------------|-----------------------|
//! | Probe           | `PROBE`                             | `OK`                  |
//! | Info            | `INFO`                              | 32-byte block         |
//! | Read            | `READ`, index, size                 | block of `size` bytes |
//! | Write           | `WRITE`, index, block               | `OK`                  |
//! | Update          | `UPDATE`, then blocks               | `OK` per block + 1    |
//! | SetWriteProtect | `SETWRP`, level                     | `OK`                  |
//!
//! Acknowledgments go through a [`ResultPolicy`], which decides whether a
//! mismatch stops the run or is only logged.

use std::fmt;
use std::str::FromStr;

use byteorder::{ByteOrder, LittleEndian};
use log::{debug, warn};

use crate::channel::Channel;
use crate::error::{Error, Result};
use crate::port::Port;
use crate::protocol::block::{self, recv_block, send_block};
use crate::protocol::value::{recv_value, send_value};
use crate::session::SessionConfig;

/// Size of the block returned by the info command.
pub const INFO_SIZE: usize = 32;

/// Size of the firmware descriptor at the start of the application region.
pub const DESCRIPTOR_SIZE: usize = 20;

/// Marker at the start of the descriptor when firmware is installed.
pub const FIRMWARE_MAGIC: u16 = 0x32EA;

/// Bootloader command opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    /// Liveness check.
    Probe = 0,
    /// Fetch bootloader information.
    Info = 1,
    /// Read a region of the application flash.
    Read = 2,
    /// Write one 1 KiB block of application flash.
    Write = 3,
    /// Stream a new bootloader image.
    Update = 4,
    /// Set flash write protection.
    SetWriteProtect = 5,
}

/// Response codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Status {
    /// Success.
    Ok = 0,
    /// The device rejected the request.
    Error = 1,
}

impl TryFrom<u8> for Status {
    type Error = u8;

    fn try_from(value: u8) -> std::result::Result<Self, u8> {
        match value {
            0 => Ok(Status::Ok),
            1 => Ok(Status::Error),
            other => Err(other),
        }
    }
}

/// Flash write-protection level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
#[repr(u8)]
pub enum ProtectionLevel {
    /// No protection.
    Off = 0x33,
    /// Bootloader region protected.
    Bootloader = 0x44,
    /// Whole flash protected.
    Full = 0x55,
}

impl ProtectionLevel {
    /// Wire code for this level.
    pub fn code(self) -> u8 {
        self as u8
    }
}

impl FromStr for ProtectionLevel {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "off" | "0" => Ok(Self::Off),
            "bootloader" | "boot" | "1" => Ok(Self::Bootloader),
            "full" | "2" => Ok(Self::Full),
            _ => Err(format!(
                "invalid protection level '{s}' (expected off, bootloader or full)"
            )),
        }
    }
}

impl fmt::Display for ProtectionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Off => write!(f, "off"),
            Self::Bootloader => write!(f, "bootloader"),
            Self::Full => write!(f, "full"),
        }
    }
}

/// What to do when a result does not match the expectation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResultPolicy {
    /// Stop with [`Error::UnexpectedResult`].
    #[default]
    Strict,
    /// Log a warning and carry on (force mode).
    Tolerant,
}

impl ResultPolicy {
    /// Policy for a session.
    pub fn for_session(session: &SessionConfig) -> Self {
        if session.force {
            Self::Tolerant
        } else {
            Self::Strict
        }
    }

    /// Check an actual result against the expected one.
    ///
    /// Environment errors in `actual` are returned unchanged whatever the
    /// policy.
    pub fn check(self, operation: &'static str, actual: Result<u32>, expected: u32) -> Result<()> {
        let Some(mismatch) = compare(operation, actual, expected)? else {
            return Ok(());
        };
        match self {
            Self::Strict => Err(mismatch),
            Self::Tolerant => {
                warn!("{mismatch} (ignored)");
                Ok(())
            },
        }
    }
}

/// `Ok(None)` on a match, `Ok(Some(mismatch))` on a protocol-level mismatch.
fn compare(operation: &'static str, actual: Result<u32>, expected: u32) -> Result<Option<Error>> {
    match actual {
        Ok(result) if result == expected => Ok(None),
        Ok(result) => Ok(Some(Error::UnexpectedResult {
            operation,
            result: Some(result),
            expected,
        })),
        Err(e) if e.is_protocol() => {
            debug!("{operation}: {e}");
            Ok(Some(Error::UnexpectedResult {
                operation,
                result: None,
                expected,
            }))
        },
        Err(e) => Err(e),
    }
}

/// Bootloader information returned by the info command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct BootloaderInfo {
    /// Bootloader revision.
    pub revision: u8,
}

impl BootloaderInfo {
    /// Parse the info block.
    pub fn parse(block: &[u8]) -> Option<Self> {
        block.first().map(|&revision| Self { revision })
    }
}

/// Installed firmware, as described by its descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct FirmwareInfo {
    /// Firmware revision.
    pub revision: u8,
    /// Human-readable firmware identifier.
    pub name: String,
}

impl FirmwareInfo {
    /// Parse a firmware descriptor.
    ///
    /// Returns `None` when the magic marker is absent (no firmware installed).
    pub fn parse(descriptor: &[u8]) -> Option<Self> {
        if descriptor.len() < 4 || LittleEndian::read_u16(descriptor) != FIRMWARE_MAGIC {
            return None;
        }
        let text = &descriptor[4..];
        let end = text.iter().position(|&b| b == 0).unwrap_or(text.len());
        Some(Self {
            revision: descriptor[2],
            name: String::from_utf8_lossy(&text[..end]).into_owned(),
        })
    }
}

/// Command-level access to the bootloader.
pub struct Commander<P: Port> {
    channel: Channel<P>,
    policy: ResultPolicy,
}

impl<P: Port> Commander<P> {
    /// Create a commander for a session.
    pub fn new(channel: Channel<P>, session: &SessionConfig) -> Self {
        Self::with_policy(channel, ResultPolicy::for_session(session))
    }

    /// Create a commander with an explicit result policy.
    pub fn with_policy(channel: Channel<P>, policy: ResultPolicy) -> Self {
        Self { channel, policy }
    }

    /// Active result policy.
    pub fn policy(&self) -> ResultPolicy {
        self.policy
    }

    /// Get a reference to the underlying channel.
    pub fn channel(&self) -> &Channel<P> {
        &self.channel
    }

    /// Get a mutable reference to the underlying channel.
    pub fn channel_mut(&mut self) -> &mut Channel<P> {
        &mut self.channel
    }

    /// Consume the commander and return the underlying channel.
    pub fn into_channel(self) -> Channel<P> {
        self.channel
    }

    fn send_opcode(&mut self, opcode: Opcode) -> Result<()> {
        debug!("Sending command {opcode:?}");
        send_value(&mut self.channel, opcode as u8)
    }

    /// Wait for an `OK` acknowledgment, subject to the result policy.
    pub fn expect_ok(&mut self, operation: &'static str) -> Result<()> {
        let actual = recv_value(&mut self.channel).map(u32::from);
        self.policy.check(operation, actual, Status::Ok as u32)
    }

    /// Receive a block that must be exactly `expected` bytes long.
    ///
    /// Query results carry data, so a mismatch is always an error.
    fn recv_sized_block(&mut self, operation: &'static str, expected: usize) -> Result<Vec<u8>> {
        let expected_len =
            u32::try_from(expected).map_err(|_| Error::InvalidBlockLength(expected))?;
        let (data, actual) = match recv_block(&mut self.channel) {
            Ok(data) => {
                // Safe cast: blocks are at most 1024 bytes
                #[allow(clippy::cast_possible_truncation)]
                let len = data.len() as u32;
                (data, Ok(len))
            },
            Err(e) => (Vec::new(), Err(e)),
        };
        ResultPolicy::Strict.check(operation, actual, expected_len)?;
        Ok(data)
    }

    /// Send a single probe.
    ///
    /// Returns `true` when the bootloader answered `OK`. Silence or a
    /// garbled answer yields `false`; only environment errors fail.
    pub fn probe(&mut self) -> Result<bool> {
        self.send_opcode(Opcode::Probe)?;
        match recv_value(&mut self.channel) {
            Ok(value) => {
                let acked = Status::try_from(value) == Ok(Status::Ok);
                if !acked {
                    debug!("Probe answered with {value:#04x}");
                }
                Ok(acked)
            },
            Err(e) if e.is_protocol() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Fetch bootloader information.
    pub fn info(&mut self) -> Result<BootloaderInfo> {
        self.send_opcode(Opcode::Info)?;
        let data = self.recv_sized_block("Error reading data", INFO_SIZE)?;
        BootloaderInfo::parse(&data).ok_or(Error::InvalidBlockLength(data.len()))
    }

    /// Read `size` bytes starting at 4-byte block `index`.
    pub fn read(&mut self, index: u8, size: usize) -> Result<Vec<u8>> {
        let cnt = block::length_value(size)?;
        self.send_opcode(Opcode::Read)?;
        send_value(&mut self.channel, index)?;
        send_value(&mut self.channel, cnt)?;
        self.recv_sized_block("Error reading data", size)
    }

    /// Read the firmware descriptor.
    ///
    /// Returns `None` when no firmware is installed.
    pub fn firmware_info(&mut self) -> Result<Option<FirmwareInfo>> {
        let descriptor = self.read(0, DESCRIPTOR_SIZE)?;
        Ok(FirmwareInfo::parse(&descriptor))
    }

    /// Write one block of application firmware.
    pub fn write(&mut self, index: u8, data: &[u8]) -> Result<()> {
        block::length_value(data.len())?;
        self.send_opcode(Opcode::Write)?;
        send_value(&mut self.channel, index)?;
        send_block(&mut self.channel, data)?;
        self.expect_ok("Error writing data")
    }

    /// Start a bootloader update.
    pub fn begin_update(&mut self) -> Result<()> {
        self.send_opcode(Opcode::Update)
    }

    /// Send the next bootloader block of an update in progress.
    pub fn update_block(&mut self, data: &[u8]) -> Result<()> {
        send_block(&mut self.channel, data)?;
        self.expect_ok("Error writing data")
    }

    /// Wait for the acknowledgment the device sends after rebooting into
    /// the new bootloader.
    pub fn finish_update(&mut self) -> Result<()> {
        self.expect_ok("Update failed")
    }

    /// Set flash write protection.
    pub fn set_write_protect(&mut self, level: ProtectionLevel) -> Result<()> {
        self.send_opcode(Opcode::SetWriteProtect)?;
        send_value(&mut self.channel, level.code())?;
        self.expect_ok("Operation failed")
    }
}
