//! Per-run session configuration.
//!
//! Everything that changes how the channel and the command layer behave for
//! one run lives here and is passed explicitly to their constructors.

use std::time::Duration;

use crate::port::{DEFAULT_BAUD, READ_TIMEOUT};

/// Pause inserted after each transmitted byte in delay mode.
pub const BYTE_DELAY: Duration = Duration::from_micros(200);

/// Session configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    /// Tolerate mismatched responses instead of failing.
    pub force: bool,
    /// Send one byte at a time with a settling pause after each.
    pub delay: bool,
    /// Per-read timeout.
    pub timeout: Duration,
    /// Line baud rate.
    pub baud_rate: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            force: false,
            delay: false,
            timeout: READ_TIMEOUT,
            baud_rate: DEFAULT_BAUD,
        }
    }
}

impl SessionConfig {
    /// Build a session from the number of times force mode was requested.
    ///
    /// Once enables force mode; twice or more also enables the inter-byte
    /// delay.
    pub fn from_force_count(count: u8) -> Self {
        Self {
            force: count >= 1,
            delay: count >= 2,
            ..Self::default()
        }
    }

    /// Enable or disable force mode.
    #[must_use]
    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// Enable or disable the inter-byte delay.
    #[must_use]
    pub fn with_delay(mut self, delay: bool) -> Self {
        self.delay = delay;
        self
    }

    /// Set the per-read timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}
