//! Byte channel over a serial port.
//!
//! The channel moves exact byte counts. A receive that sees one read come
//! back empty reports a timeout; anything the operating system reports as
//! an error is fatal for the session.

use std::io::{ErrorKind, Read, Write};
use std::thread;

use log::trace;

use crate::error::{Error, Result};
use crate::port::Port;
use crate::session::{BYTE_DELAY, SessionConfig};

/// Configured byte channel owning its port.
pub struct Channel<P: Port> {
    port: P,
    delay: bool,
}

impl<P: Port> Channel<P> {
    /// Wrap an opened port.
    ///
    /// Applies the session timeout and discards stale buffered data.
    pub fn new(mut port: P, session: &SessionConfig) -> Result<Self> {
        port.set_timeout(session.timeout)?;
        port.clear_buffers()?;
        Ok(Self {
            port,
            delay: session.delay,
        })
    }

    /// Fill `buf` completely.
    ///
    /// Returns `Ok(false)` as soon as a single read yields no data within
    /// the port timeout. Short reads keep accumulating.
    pub fn receive(&mut self, buf: &mut [u8]) -> Result<bool> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.port.read(&mut buf[filled..]) {
                Ok(0) => {
                    trace!("rx timeout after {filled}/{} bytes", buf.len());
                    return Ok(false);
                },
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::TimedOut => {
                    trace!("rx timeout after {filled}/{} bytes", buf.len());
                    return Ok(false);
                },
                Err(e) if e.kind() == ErrorKind::Interrupted => {},
                Err(e) => return Err(Error::Io(e)),
            }
        }
        trace!("rx {} bytes", buf.len());
        Ok(true)
    }

    /// Send all of `buf` and wait until it has left the host.
    pub fn send(&mut self, buf: &[u8]) -> Result<()> {
        trace!("tx {} bytes", buf.len());
        if self.delay {
            for byte in buf {
                self.port.write_all(std::slice::from_ref(byte))?;
                self.port.flush()?;
                thread::sleep(BYTE_DELAY);
            }
        } else {
            self.port.write_all(buf)?;
        }
        self.port.flush()?;
        Ok(())
    }

    /// Get a reference to the underlying port.
    pub fn port(&self) -> &P {
        &self.port
    }

    /// Consume the channel and return the underlying port.
    pub fn into_port(self) -> P {
        self.port
    }

    /// Close the underlying port.
    pub fn close(&mut self) -> Result<()> {
        self.port.close()
    }
}

#[cfg(feature = "native")]
mod native_impl {
    use super::{Channel, Result, SessionConfig};
    use crate::port::{NativePort, SerialConfig};

    impl Channel<NativePort> {
        /// Open a serial device for a session.
        ///
        /// # Arguments
        ///
        /// * `path` - Serial device (e.g., "/dev/ttyUSB0" or "COM3")
        /// * `session` - Session settings (baud rate, timeout, delay)
        pub fn open(path: &str, session: &SessionConfig) -> Result<Self> {
            let config = SerialConfig::new(path, session.baud_rate).with_timeout(session.timeout);
            let port = NativePort::open(&config)?;
            Self::new(port, session)
        }
    }
}
