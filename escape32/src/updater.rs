//! Update sequencing.
//!
//! [`Updater`] drives one run against the bootloader: it waits for the
//! device to answer, then uploads a bootloader or firmware image chunk by
//! chunk, sets write protection, or queries what is installed.

use log::{debug, info, warn};

use crate::channel::Channel;
use crate::error::{Error, Result};
use crate::image::{CHUNK_SIZE, Image, MAX_IMAGE_SIZE};
use crate::port::Port;
use crate::protocol::{BootloaderInfo, Commander, FirmwareInfo, ProtectionLevel};
use crate::session::SessionConfig;

/// Probe attempts made in force mode before carrying on regardless.
pub const FORCED_PROBE_ATTEMPTS: usize = 20;

/// What the device reports about itself.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct DeviceInfo {
    /// Bootloader details.
    pub bootloader: BootloaderInfo,
    /// Installed firmware, `None` when not installed.
    pub firmware: Option<FirmwareInfo>,
}

/// Runs probe, transfer, protection and query sequences on one session.
pub struct Updater<P: Port> {
    commander: Commander<P>,
    session: SessionConfig,
}

impl<P: Port> Updater<P> {
    /// Create an updater over an opened port.
    pub fn new(port: P, session: SessionConfig) -> Result<Self> {
        let channel = Channel::new(port, &session)?;
        Ok(Self {
            commander: Commander::new(channel, &session),
            session,
        })
    }

    /// Session settings in effect.
    pub fn session(&self) -> &SessionConfig {
        &self.session
    }

    /// Get a reference to the command layer.
    pub fn commander(&self) -> &Commander<P> {
        &self.commander
    }

    /// Wait for the bootloader to answer a probe.
    ///
    /// `on_attempt` is called with the 1-based attempt number before each
    /// probe. Without force mode this keeps probing until the device
    /// answers `OK`. In force mode it gives up after
    /// [`FORCED_PROBE_ATTEMPTS`] attempts and returns `Ok(false)` so the
    /// caller can proceed anyway.
    ///
    /// Returns [`Error::Interrupted`] when the registered interrupt checker
    /// fires between attempts.
    pub fn probe<F>(&mut self, mut on_attempt: F) -> Result<bool>
    where
        F: FnMut(usize),
    {
        let limit = if self.session.force {
            FORCED_PROBE_ATTEMPTS
        } else {
            usize::MAX
        };

        for attempt in 1..=limit {
            if crate::is_interrupted_requested() {
                return Err(Error::Interrupted);
            }
            on_attempt(attempt);
            if self.commander.probe()? {
                info!("Bootloader answered after {attempt} attempt(s)");
                return Ok(true);
            }
            debug!("No answer to probe {attempt}");
        }

        warn!("No answer after {FORCED_PROBE_ATTEMPTS} probes, continuing (forced)");
        Ok(false)
    }

    /// Replace the bootloader.
    ///
    /// `progress` receives `(offset, total)` before each chunk. Fails with
    /// [`Error::ImageTooBig`] before sending anything when the image does
    /// not fit the bootloader region.
    pub fn update_bootloader<F>(&mut self, image: &Image, mut progress: F) -> Result<()>
    where
        F: FnMut(usize, usize),
    {
        let image = image.for_bootloader()?;
        let total = image.len();
        info!(
            "Updating bootloader: {total} bytes in {} blocks",
            image.chunk_count()
        );

        self.commander.begin_update()?;
        for (offset, chunk) in image.chunks() {
            progress(offset, total);
            debug!("Bootloader block at {offset:#06x} ({} bytes)", chunk.len());
            self.commander.update_block(chunk)?;
        }

        // The device reboots into the new bootloader before answering
        self.commander.finish_update()?;
        info!("Bootloader updated");
        Ok(())
    }

    /// Write application firmware.
    ///
    /// `progress` receives `(offset, total)` before each chunk.
    pub fn update_firmware<F>(&mut self, image: &Image, mut progress: F) -> Result<()>
    where
        F: FnMut(usize, usize),
    {
        let total = image.len();
        info!(
            "Updating firmware: {total} bytes in {} blocks",
            image.chunk_count()
        );

        for (offset, chunk) in image.chunks() {
            progress(offset, total);
            let index = u8::try_from(offset / CHUNK_SIZE).map_err(|_| Error::ImageTooBig {
                size: total,
                max: MAX_IMAGE_SIZE,
            })?;
            debug!("Writing block {index} ({} bytes)", chunk.len());
            self.commander.write(index, chunk)?;
        }

        info!("Firmware updated");
        Ok(())
    }

    /// Set flash write protection.
    pub fn set_write_protect(&mut self, level: ProtectionLevel) -> Result<()> {
        info!("Setting write protection: {level}");
        self.commander.set_write_protect(level)
    }

    /// Query bootloader and firmware details.
    pub fn query_info(&mut self) -> Result<DeviceInfo> {
        let bootloader = self.commander.info()?;
        let firmware = self.commander.firmware_info()?;
        debug!("Device info: {bootloader:?}, {firmware:?}");
        Ok(DeviceInfo {
            bootloader,
            firmware,
        })
    }

    /// Close the port.
    pub fn close(&mut self) -> Result<()> {
        self.commander.channel_mut().close()
    }

    /// Consume the updater and return the underlying port.
    pub fn into_port(self) -> P {
        self.commander.into_channel().into_port()
    }
}

#[cfg(feature = "native")]
mod native_impl {
    use super::{Result, SessionConfig, Updater};
    use crate::port::{NativePort, SerialConfig};

    impl Updater<NativePort> {
        /// Open a serial device and prepare a session on it.
        pub fn open(path: &str, session: SessionConfig) -> Result<Self> {
            let config = SerialConfig::new(path, session.baud_rate).with_timeout(session.timeout);
            let port = NativePort::open(&config)?;
            Self::new(port, session)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::ERASED;
    use crate::port::mock::MockPort;
    use crate::protocol::command::{DESCRIPTOR_SIZE, INFO_SIZE};
    use crate::protocol::{block, value};

    const OK: u8 = 0;
    const ERROR: u8 = 1;

    fn init_logger() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn updater(port: MockPort, session: SessionConfig) -> Updater<MockPort> {
        init_logger();
        Updater::new(port, session).unwrap()
    }

    fn written(updater: &Updater<MockPort>) -> &[u8] {
        &updater.commander().channel().port().written
    }

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 253) as u8).collect()
    }

    #[test]
    fn test_probe_forced_gives_up_after_limit() {
        let _guard = crate::test_interrupt_lock();
        let mut up = updater(MockPort::new(), SessionConfig::from_force_count(1));

        let mut attempts = Vec::new();
        assert!(!up.probe(|n| attempts.push(n)).unwrap());

        assert_eq!(attempts, (1..=FORCED_PROBE_ATTEMPTS).collect::<Vec<_>>());
        let probe = value::encode(0);
        assert_eq!(written(&up), probe.repeat(FORCED_PROBE_ATTEMPTS).as_slice());
    }

    #[test]
    fn test_probe_forced_stops_on_ok() {
        let _guard = crate::test_interrupt_lock();
        let mut port = MockPort::new();
        port.push_silence().push_value(OK);
        let mut up = updater(port, SessionConfig::from_force_count(1));

        assert!(up.probe(|_| {}).unwrap());
        assert_eq!(written(&up).len(), 4);
    }

    #[test]
    fn test_probe_retries_until_ok() {
        let _guard = crate::test_interrupt_lock();
        const N: usize = 37;
        let mut port = MockPort::new();
        for _ in 0..N - 3 {
            port.push_silence();
        }
        // Garbled and negative answers count as failed attempts too
        port.push_bytes(&[0x00, 0x00]).push_value(ERROR).push_value(OK);
        let mut up = updater(port, SessionConfig::default());

        let mut last = 0;
        assert!(up.probe(|n| last = n).unwrap());
        assert_eq!(last, N);
        assert_eq!(written(&up).len(), N * 2);
        assert!(up.commander().channel().port().is_drained());
    }

    #[test]
    fn test_probe_interrupted() {
        let _guard = crate::test_interrupt_lock();
        let mut up = updater(MockPort::new(), SessionConfig::default());

        let result = up.probe(|n| {
            if n == 3 {
                crate::test_set_interrupted(true);
            }
        });
        crate::test_set_interrupted(false);

        assert!(matches!(result, Err(Error::Interrupted)));
        assert_eq!(written(&up).len(), 3 * 2);
    }

    #[test]
    fn test_firmware_update_1500_bytes() {
        let data = pattern(1500);
        let image = Image::from_bytes(&data).unwrap();
        let mut port = MockPort::new();
        port.push_value(OK).push_value(OK);
        let mut up = updater(port, SessionConfig::default());

        let mut progress = Vec::new();
        up.update_firmware(&image, |offset, total| progress.push((offset, total)))
            .unwrap();

        assert_eq!(progress, vec![(0, 1500), (1024, 1500)]);

        let mut expected = Vec::new();
        expected.extend_from_slice(&value::encode(3));
        expected.extend_from_slice(&value::encode(0));
        expected.extend_from_slice(&block::encode(&data[..1024]).unwrap());
        expected.extend_from_slice(&value::encode(3));
        expected.extend_from_slice(&value::encode(1));
        expected.extend_from_slice(&block::encode(&data[1024..]).unwrap());
        assert_eq!(written(&up), expected.as_slice());
        // Second block announces 476 bytes
        assert_eq!(block::payload_len(expected[4 + 2 + 1024 + 4 + 4]), 476);
    }

    #[test]
    fn test_firmware_update_fails_on_error_ack() {
        let image = Image::from_bytes(&pattern(3000)).unwrap();
        let mut port = MockPort::new();
        port.push_value(OK).push_value(ERROR);
        let mut up = updater(port, SessionConfig::default());

        let err = up.update_firmware(&image, |_, _| {}).unwrap_err();
        assert!(matches!(
            err,
            Error::UnexpectedResult {
                operation: "Error writing data",
                result: Some(1),
                expected: 0
            }
        ));
        // Stopped after the second block
        assert_eq!(
            written(&up).len(),
            2 * (4 + 2 + CHUNK_SIZE + 4)
        );
    }

    #[test]
    fn test_firmware_update_forced_pushes_through() {
        let image = Image::from_bytes(&pattern(2048)).unwrap();
        let mut port = MockPort::new();
        port.push_silence().push_value(ERROR);
        let mut up = updater(port, SessionConfig::from_force_count(1));
        assert_eq!(up.commander().policy(), crate::protocol::ResultPolicy::Tolerant);

        up.update_firmware(&image, |_, _| {}).unwrap();
        assert_eq!(written(&up).len(), 2 * (4 + 2 + CHUNK_SIZE + 4));
    }

    #[test]
    fn test_bootloader_update_flow() {
        let data = pattern(1500);
        let image = Image::from_bytes(&data).unwrap();
        let mut port = MockPort::new();
        port.push_value(OK).push_value(OK).push_value(OK);
        let mut up = updater(port, SessionConfig::default());

        let mut progress = Vec::new();
        up.update_bootloader(&image, |offset, total| progress.push((offset, total)))
            .unwrap();

        assert_eq!(progress, vec![(0, 1500), (1024, 1500)]);

        let mut expected = value::encode(4).to_vec();
        expected.extend_from_slice(&block::encode(&data[..1024]).unwrap());
        expected.extend_from_slice(&block::encode(&data[1024..]).unwrap());
        assert_eq!(written(&up), expected.as_slice());
        assert!(up.commander().channel().port().is_drained());
    }

    #[test]
    fn test_bootloader_update_requires_final_ack() {
        let image = Image::from_bytes(&pattern(512)).unwrap();
        let mut port = MockPort::new();
        port.push_value(OK);
        let mut up = updater(port, SessionConfig::default());

        let err = up.update_bootloader(&image, |_, _| {}).unwrap_err();
        assert!(matches!(
            err,
            Error::UnexpectedResult {
                operation: "Update failed",
                result: None,
                ..
            }
        ));
    }

    #[test]
    fn test_bootloader_update_pads_aligned_image() {
        let data = pattern(2048);
        let image = Image::from_bytes(&data).unwrap();
        let mut port = MockPort::new();
        for _ in 0..4 {
            port.push_value(OK);
        }
        let mut up = updater(port, SessionConfig::default());

        let mut progress = Vec::new();
        up.update_bootloader(&image, |offset, total| progress.push((offset, total)))
            .unwrap();
        assert_eq!(progress, vec![(0, 2052), (1024, 2052), (2048, 2052)]);

        let tail = block::encode(&[ERASED; 4]).unwrap();
        assert!(written(&up).ends_with(&tail));
    }

    #[test]
    fn test_bootloader_update_rejects_oversized_before_sending() {
        let image = Image::from_bytes(&pattern(4100)).unwrap();
        let mut up = updater(MockPort::new(), SessionConfig::from_force_count(1));

        assert!(matches!(
            up.update_bootloader(&image, |_, _| {}),
            Err(Error::ImageTooBig { max: 4096, .. })
        ));
        assert!(written(&up).is_empty());
    }

    #[test]
    fn test_set_write_protect_bootloader() {
        let mut port = MockPort::new();
        port.push_value(OK);
        let mut up = updater(port, SessionConfig::default());

        up.set_write_protect(ProtectionLevel::Bootloader).unwrap();
        assert_eq!(written(&up), &[0x05, 0xFA, 0x44, 0xBB]);
    }

    #[test]
    fn test_set_write_protect_requires_ok() {
        let mut up = updater(MockPort::new(), SessionConfig::default());
        assert!(matches!(
            up.set_write_protect(ProtectionLevel::Full),
            Err(Error::UnexpectedResult {
                operation: "Operation failed",
                ..
            })
        ));
    }

    #[test]
    fn test_query_info_installed() {
        let mut info = vec![0u8; INFO_SIZE];
        info[0] = 7;
        let mut descriptor = vec![0u8; DESCRIPTOR_SIZE];
        descriptor[..2].copy_from_slice(&[0xEA, 0x32]);
        descriptor[2] = 3;
        descriptor[4..10].copy_from_slice(b"ESC-32");

        let mut port = MockPort::new();
        port.push_block(&info).push_block(&descriptor);
        let mut up = updater(port, SessionConfig::default());

        let device = up.query_info().unwrap();
        assert_eq!(device.bootloader.revision, 7);
        let firmware = device.firmware.unwrap();
        assert_eq!(firmware.revision, 3);
        assert_eq!(firmware.name, "ESC-32");

        // INFO, then READ block 0 for 20 bytes
        assert_eq!(written(&up), &[0x01, 0xFE, 0x02, 0xFD, 0x00, 0xFF, 0x04, 0xFB]);
    }

    #[test]
    fn test_query_info_not_installed() {
        let mut info = vec![0u8; INFO_SIZE];
        info[0] = 12;
        let mut port = MockPort::new();
        port.push_block(&info).push_block(&[0xFF; DESCRIPTOR_SIZE]);
        let mut up = updater(port, SessionConfig::default());

        let device = up.query_info().unwrap();
        assert_eq!(device.bootloader.revision, 12);
        assert_eq!(device.firmware, None);
    }

    #[test]
    fn test_query_info_wrong_size_is_fatal_even_forced() {
        let mut port = MockPort::new();
        port.push_block(&[7; 16]);
        let mut up = updater(port, SessionConfig::from_force_count(1));

        assert!(matches!(
            up.query_info(),
            Err(Error::UnexpectedResult {
                operation: "Error reading data",
                result: Some(16),
                expected: 32
            })
        ));
    }

    #[test]
    fn test_close_and_into_port() {
        let mut up = updater(MockPort::new(), SessionConfig::default());
        up.close().unwrap();
        assert!(up.into_port().closed);
    }
}
