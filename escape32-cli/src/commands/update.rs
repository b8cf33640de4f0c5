//! Update, write protection and info query.

use anyhow::{Context, Result};
use console::style;
use escape32::{FORCED_PROBE_ATTEMPTS, Image, NativePort, Port, SessionConfig, Updater};
use indicatif::{ProgressBar, ProgressStyle};
use log::debug;
use std::path::Path;

use crate::commands::info::print_device_info;
use crate::config::Config;
use crate::{Cli, CliError, use_fancy_output, was_interrupted};

fn ensure_not_interrupted(context: &str) -> Result<()> {
    if was_interrupted() {
        Err(CliError::Cancelled(context.to_string()).into())
    } else {
        Ok(())
    }
}

/// What one run does after the bootloader answers.
#[derive(Debug)]
struct Plan {
    device: String,
    force: u8,
    boot: bool,
    protect: Option<escape32::ProtectionLevel>,
    image: Option<Image>,
    json: bool,
}

impl Plan {
    /// Resolve arguments and config, and load the image.
    ///
    /// Everything that can be rejected without talking to the device is
    /// checked here.
    fn from_cli(cli: &Cli, config: &Config) -> Result<Self> {
        let force = config.resolve_force(cli.force);

        if cli.boot && cli.image.is_none() {
            return Err(CliError::Usage("--boot requires an image file".to_string()).into());
        }
        if cli.image.is_none() && cli.protect.is_none() && force > 0 {
            return Err(CliError::Usage(
                "nothing to do in forced mode: specify an image or --protect".to_string(),
            )
            .into());
        }

        let image = cli
            .image
            .as_deref()
            .map(|path| load_image(path, cli.boot))
            .transpose()?;

        Ok(Self {
            device: config.resolve_device(cli.device.as_deref()),
            force,
            boot: cli.boot,
            protect: cli.protect,
            image,
            json: cli.json,
        })
    }

    /// Info is queried only when nothing else was asked for.
    fn queries_info(&self) -> bool {
        self.image.is_none() && self.protect.is_none() && self.force == 0
    }
}

fn load_image(path: &Path, boot: bool) -> Result<Image> {
    let image = Image::from_file(path).with_context(|| path.display().to_string())?;
    if boot {
        image
            .for_bootloader()
            .with_context(|| path.display().to_string())?;
    }
    Ok(image)
}

fn status(cli: &Cli, message: &str) {
    if !cli.quiet {
        eprintln!("{message}");
    }
}

/// Update command implementation.
pub(crate) fn cmd_update(cli: &Cli, config: &Config) -> Result<()> {
    let plan = Plan::from_cli(cli, config)?;
    let session = SessionConfig::from_force_count(plan.force);

    status(cli, &format!("Probing bootloader via '{}'...", plan.device));
    let mut updater = Updater::open(&plan.device, session)
        .with_context(|| format!("Failed to open '{}'", plan.device))?;

    let result = run_plan(cli, &plan, &mut updater);
    finish_session(&mut updater, result)
}

/// Close the device, keeping the outcome of the run.
fn finish_session<P: Port>(updater: &mut Updater<P>, result: Result<()>) -> Result<()> {
    if let Err(e) = updater.close() {
        debug!("Failed to close serial port: {e}");
    }
    result
}

fn run_plan(cli: &Cli, plan: &Plan, updater: &mut Updater<NativePort>) -> Result<()> {
    probe(cli, updater)?;
    ensure_not_interrupted("Interrupted")?;

    if let Some(image) = &plan.image {
        let pb = transfer_bar(cli);
        let progress = |offset: usize, total: usize| {
            pb.set_position((offset * 100 / total) as u64);
        };
        if plan.boot {
            status(cli, "Updating bootloader...");
            updater.update_bootloader(image, progress)?;
        } else {
            status(cli, "Updating firmware...");
            updater.update_firmware(image, progress)?;
        }
        pb.set_position(100);
        pb.finish_and_clear();
        // The image is written; a pending Ctrl-C only skips what follows
        ensure_not_interrupted("Interrupted after the transfer completed")?;
        status(cli, &style("Done!").green().bold().to_string());
    }

    if let Some(level) = plan.protect {
        status(cli, "Setting write protection...");
        updater.set_write_protect(level)?;
        status(cli, &style("Done!").green().bold().to_string());
    } else if plan.queries_info() {
        status(cli, "Fetching ESCape32 info...");
        let info = updater.query_info()?;
        print_device_info(&info, plan.json)?;
    }

    Ok(())
}

fn probe(cli: &Cli, updater: &mut Updater<NativePort>) -> Result<()> {
    let forced = updater.session().force;
    let pb = if cli.quiet || !use_fancy_output() {
        ProgressBar::hidden()
    } else {
        let pb = ProgressBar::new_spinner();
        #[allow(clippy::unwrap_used)] // Static template string
        pb.set_style(ProgressStyle::default_spinner().template("{spinner:.green} {msg}").unwrap());
        pb.set_draw_target(indicatif::ProgressDrawTarget::stderr());
        pb
    };

    let answered = updater.probe(|attempt| {
        if forced {
            pb.set_message(format!("{}", FORCED_PROBE_ATTEMPTS + 1 - attempt));
        }
        pb.tick();
    });
    pb.finish_and_clear();

    match answered {
        Ok(true) => Ok(()),
        Ok(false) => {
            if !cli.quiet {
                eprintln!(
                    "{} No answer from bootloader, continuing (forced)",
                    style("Warning:").yellow().bold()
                );
            }
            Ok(())
        },
        Err(escape32::Error::Interrupted) => {
            Err(CliError::Cancelled("Interrupted while probing".to_string()).into())
        },
        Err(e) => Err(e.into()),
    }
}

fn transfer_bar(cli: &Cli) -> ProgressBar {
    if cli.quiet || !use_fancy_output() {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(100);
    #[allow(clippy::unwrap_used)] // Static template string
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}% {msg}")
            .unwrap()
            .progress_chars("#>-"),
    );
    pb.set_draw_target(indicatif::ProgressDrawTarget::stderr());
    pb
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::io::Write;

    fn cli(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("escape32-update").chain(args.iter().copied()))
            .unwrap()
    }

    fn image_file(len: usize) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&vec![0x42; len]).unwrap();
        file
    }

    fn usage_error(result: Result<Plan>) -> bool {
        matches!(
            result.unwrap_err().downcast_ref::<CliError>(),
            Some(CliError::Usage(_))
        )
    }

    #[test]
    fn test_plan_info_query() {
        let plan = Plan::from_cli(&cli(&["-d", "/dev/ttyS1"]), &Config::default()).unwrap();
        assert_eq!(plan.device, "/dev/ttyS1");
        assert!(plan.queries_info());
    }

    #[test]
    fn test_plan_boot_without_image() {
        assert!(usage_error(Plan::from_cli(&cli(&["-B"]), &Config::default())));
    }

    #[test]
    fn test_plan_force_without_work() {
        assert!(usage_error(Plan::from_cli(&cli(&["-f"]), &Config::default())));

        let mut config = Config::default();
        config.update.force = Some(1);
        assert!(usage_error(Plan::from_cli(&cli(&[]), &config)));
    }

    #[test]
    fn test_plan_force_with_protect() {
        let plan = Plan::from_cli(&cli(&["-ff", "-P", "full"]), &Config::default()).unwrap();
        assert_eq!(plan.force, 2);
        assert!(!plan.queries_info());
    }

    #[test]
    fn test_plan_loads_image() {
        let file = image_file(1497);
        let path = file.path().to_str().unwrap();
        let plan = Plan::from_cli(&cli(&[path]), &Config::default()).unwrap();
        assert_eq!(plan.image.as_ref().map(Image::len), Some(1500));
        assert!(!plan.queries_info());
    }

    #[test]
    fn test_interrupt_after_transfer_is_cancellation() {
        crate::test_set_interrupted(true);
        let err = ensure_not_interrupted("Interrupted after the transfer completed").unwrap_err();
        crate::test_set_interrupted(false);

        assert!(matches!(
            err.downcast_ref::<CliError>(),
            Some(CliError::Cancelled(msg)) if msg.contains("transfer completed")
        ));
        assert!(ensure_not_interrupted("Interrupted").is_ok());
    }

    /// Port whose close always fails.
    struct StuckPort;

    impl std::io::Read for StuckPort {
        fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
            Ok(0)
        }
    }

    impl std::io::Write for StuckPort {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl Port for StuckPort {
        fn set_timeout(&mut self, _timeout: std::time::Duration) -> escape32::Result<()> {
            Ok(())
        }

        fn timeout(&self) -> std::time::Duration {
            std::time::Duration::ZERO
        }

        fn clear_buffers(&mut self) -> escape32::Result<()> {
            Ok(())
        }

        fn close(&mut self) -> escape32::Result<()> {
            Err(std::io::Error::other("device busy").into())
        }
    }

    #[test]
    fn test_finish_session_keeps_run_outcome_when_close_fails() {
        let mut updater = Updater::new(StuckPort, SessionConfig::default()).unwrap();
        assert!(finish_session(&mut updater, Ok(())).is_ok());

        let failed = finish_session(&mut updater, Err(escape32::Error::EmptyImage.into()));
        assert!(matches!(
            failed.unwrap_err().downcast_ref::<escape32::Error>(),
            Some(escape32::Error::EmptyImage)
        ));
    }

    #[test]
    fn test_plan_rejects_oversized_bootloader() {
        let file = image_file(4100);
        let path = file.path().to_str().unwrap();
        let err = Plan::from_cli(&cli(&["-B", path]), &Config::default()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<escape32::Error>(),
            Some(escape32::Error::ImageTooBig { .. })
        ));

        // The same file is fine as firmware
        assert!(Plan::from_cli(&cli(&[path]), &Config::default()).is_ok());
    }
}
