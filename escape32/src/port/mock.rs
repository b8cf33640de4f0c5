//! Scripted in-memory port for protocol tests.
//!
//! Reads replay a queue of scripted replies; writes are recorded. An empty
//! queue or a scripted `Silence` reads as a timeout, like a quiet serial
//! line. `ZeroRead` is the other way a port may report one: a read that
//! succeeds with no bytes.

use std::collections::VecDeque;
use std::io::{Read, Write};
use std::time::Duration;

use crate::error::Result;
use crate::port::{Port, READ_TIMEOUT};

/// One scripted event on the receive side.
#[derive(Debug, Clone)]
pub(crate) enum Reply {
    /// Bytes made available to the host.
    Bytes(Vec<u8>),
    /// A single read that times out.
    Silence,
    /// A single read returning `Ok(0)`.
    ZeroRead,
    /// A single read cut short by a signal.
    Interrupted,
}

pub(crate) struct MockPort {
    replies: VecDeque<Reply>,
    pub(crate) written: Vec<u8>,
    pub(crate) writes: usize,
    pub(crate) flushes: usize,
    pub(crate) clears: usize,
    max_read: usize,
    timeout: Duration,
    pub(crate) closed: bool,
}

impl MockPort {
    pub(crate) fn new() -> Self {
        Self {
            replies: VecDeque::new(),
            written: Vec::new(),
            writes: 0,
            flushes: 0,
            clears: 0,
            max_read: usize::MAX,
            timeout: READ_TIMEOUT,
            closed: false,
        }
    }

    /// Port whose reads return at most `max_read` bytes at a time.
    pub(crate) fn with_max_read(mut self, max_read: usize) -> Self {
        self.max_read = max_read;
        self
    }

    pub(crate) fn push_bytes(&mut self, bytes: &[u8]) -> &mut Self {
        self.replies.push_back(Reply::Bytes(bytes.to_vec()));
        self
    }

    pub(crate) fn push_silence(&mut self) -> &mut Self {
        self.replies.push_back(Reply::Silence);
        self
    }

    pub(crate) fn push_zero_read(&mut self) -> &mut Self {
        self.replies.push_back(Reply::ZeroRead);
        self
    }

    pub(crate) fn push_interrupted(&mut self) -> &mut Self {
        self.replies.push_back(Reply::Interrupted);
        self
    }

    /// Queue a value as the device would send it.
    pub(crate) fn push_value(&mut self, value: u8) -> &mut Self {
        self.push_bytes(&[value, !value])
    }

    /// Queue a well-formed block as the device would send it.
    pub(crate) fn push_block(&mut self, payload: &[u8]) -> &mut Self {
        let cnt = u8::try_from(payload.len() / 4 - 1).unwrap();
        let crc = crate::protocol::crc::crc32(payload);
        self.push_value(cnt);
        self.push_bytes(payload);
        self.push_bytes(&crc.to_le_bytes())
    }

    pub(crate) fn is_drained(&self) -> bool {
        self.replies.is_empty()
    }
}

impl Read for MockPort {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self.replies.pop_front() {
            None | Some(Reply::Silence) => Err(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "no data",
            )),
            Some(Reply::ZeroRead) => Ok(0),
            Some(Reply::Interrupted) => Err(std::io::Error::new(
                std::io::ErrorKind::Interrupted,
                "signal",
            )),
            Some(Reply::Bytes(mut bytes)) => {
                let n = buf.len().min(bytes.len()).min(self.max_read);
                buf[..n].copy_from_slice(&bytes[..n]);
                if n < bytes.len() {
                    bytes.drain(..n);
                    self.replies.push_front(Reply::Bytes(bytes));
                }
                Ok(n)
            },
        }
    }
}

impl Write for MockPort {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.writes += 1;
        self.written.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.flushes += 1;
        Ok(())
    }
}

impl Port for MockPort {
    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.timeout = timeout;
        Ok(())
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn clear_buffers(&mut self) -> Result<()> {
        self.clears += 1;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}
