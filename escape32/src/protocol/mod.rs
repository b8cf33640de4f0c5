//! ESCape32 bootloader wire protocol.
//!
//! Three layers, each built on the one below:
//!
//! - [`value`]: single bytes sent as `byte, !byte`
//! - [`block`]: length-prefixed payloads with a CRC-32 trailer
//! - [`command`]: opcodes, acknowledgments and the exchanges built from them

pub mod block;
pub mod command;
pub mod crc;
pub mod value;

// Re-export common types
pub use block::{MAX_BLOCK_SIZE, recv_block, send_block};
pub use command::{BootloaderInfo, Commander, FirmwareInfo, Opcode, ProtectionLevel, ResultPolicy, Status};
pub use value::{recv_value, send_value};
