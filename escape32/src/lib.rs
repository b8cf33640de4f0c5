//! # escape32
//!
//! A library for updating ESCape32 electronic speed controllers through
//! their serial bootloader.
//!
//! This crate provides the host side of the bootloader protocol:
//!
//! - Byte channel over a serial port with per-read timeouts
//! - Self-checking values and CRC-32 protected data blocks
//! - Bootloader commands (probe, info, read, write, update, write protection)
//! - Firmware and bootloader upload sequencing with progress reporting
//!
//! ## Supported Platforms
//!
//! - **Native** (default): Linux, macOS, Windows via the `serialport` crate
//!
//! ## Features
//!
//! - `native` (default): Native serial port support
//! - `serde`: Serialization support for data types
//!
//! ## Example
//!
//! ```rust,no_run
//! use escape32::{Image, SessionConfig};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let image = Image::from_file("escape32.bin")?;
//!
//!     #[cfg(feature = "native")]
//!     {
//!         let mut updater = escape32::Updater::open("/dev/ttyUSB0", SessionConfig::default())?;
//!         updater.probe(|_| {})?;
//!         updater.update_firmware(&image, |offset, total| {
//!             println!("{}%", offset * 100 / total);
//!         })?;
//!     }
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::sync::{Arc, OnceLock};

pub mod channel;
pub mod error;
pub mod image;
pub mod port;
pub mod protocol;
pub mod session;
pub mod updater;

static INTERRUPT_CHECKER: OnceLock<Arc<dyn Fn() -> bool + Send + Sync>> = OnceLock::new();

/// Register a global interruption checker used by long-running library loops.
///
/// The checker should return `true` when the current operation should stop
/// (for example after receiving Ctrl-C in CLI applications).
pub fn set_interrupt_checker<F>(checker: F)
where
    F: Fn() -> bool + Send + Sync + 'static,
{
    let _ = INTERRUPT_CHECKER.set(Arc::new(checker));
}

/// Returns whether interruption was requested by the embedding application.
#[must_use]
pub fn is_interrupted_requested() -> bool {
    INTERRUPT_CHECKER
        .get()
        .is_some_and(|checker| checker())
}

#[cfg(test)]
pub(crate) fn test_set_interrupted(value: bool) {
    use std::sync::atomic::{AtomicBool, Ordering};

    static TEST_INTERRUPT_FLAG: OnceLock<Arc<AtomicBool>> = OnceLock::new();

    let flag = TEST_INTERRUPT_FLAG
        .get_or_init(|| {
            let shared = Arc::new(AtomicBool::new(false));
            let checker = Arc::clone(&shared);
            set_interrupt_checker(move || checker.load(Ordering::Relaxed));
            shared
        })
        .clone();

    flag.store(value, Ordering::Relaxed);
}

/// Serializes tests that toggle or depend on the interrupt flag.
#[cfg(test)]
pub(crate) fn test_interrupt_lock() -> std::sync::MutexGuard<'static, ()> {
    use std::sync::{Mutex, PoisonError};

    static LOCK: Mutex<()> = Mutex::new(());
    LOCK.lock().unwrap_or_else(PoisonError::into_inner)
}

// Re-exports for convenience
// Native-specific re-exports
#[cfg(feature = "native")]
pub use port::{NativePort, NativePortEnumerator};
pub use {
    channel::Channel,
    error::{Error, Result},
    image::{Image, MAX_BOOT_SIZE, MAX_IMAGE_SIZE},
    port::{Port, PortEnumerator, PortInfo, SerialConfig},
    protocol::{BootloaderInfo, Commander, FirmwareInfo, ProtectionLevel, ResultPolicy},
    session::SessionConfig,
    updater::{DeviceInfo, FORCED_PROBE_ATTEMPTS, Updater},
};
