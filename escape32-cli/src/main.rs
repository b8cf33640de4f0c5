//! escape32-update - Command-line tool for updating ESCape32 motor controllers.
//!
//! ## Features
//!
//! - Update application firmware or the bootloader over a serial link
//! - Set flash write protection
//! - Query bootloader and firmware revisions (optionally as JSON)
//! - List available serial ports
//! - Environment variable and config file support

use anyhow::Result;
use clap::{ArgAction, Parser};
use console::style;
use env_logger::Env;
use escape32::ProtectionLevel;
use log::debug;
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};

mod commands;
mod config;

use config::Config;

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: AtomicBool = AtomicBool::new(true);

/// Set by the Ctrl-C handler.
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Exit code for usage errors.
const EXIT_USAGE: u8 = 2;

/// Exit code after Ctrl-C (128 + SIGINT).
const EXIT_CANCELLED: u8 = 130;

/// Check if spinners and progress bars should be drawn (TTY and colors enabled).
pub(crate) fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(Ordering::Relaxed) && console::colors_enabled_stderr()
}

/// Whether Ctrl-C was pressed.
pub(crate) fn was_interrupted() -> bool {
    INTERRUPTED.load(Ordering::Relaxed)
}

#[cfg(test)]
pub(crate) fn test_set_interrupted(value: bool) {
    INTERRUPTED.store(value, Ordering::Relaxed);
}

/// Errors that map to a dedicated exit code.
#[derive(Debug, thiserror::Error)]
pub(crate) enum CliError {
    /// Invalid combination of arguments.
    #[error("{0}")]
    Usage(String),
    /// Stopped by the user.
    #[error("{0}")]
    Cancelled(String),
}

/// escape32-update - Update ESCape32 firmware and bootloader over a serial link.
///
/// ESC info is printed when no operation is specified.
///
/// Environment variables:
///   ESCAPE32_DEVICE  - Default serial device
#[derive(Parser, Debug)]
#[command(name = "escape32-update")]
#[command(author, version, about, long_about = None)]
pub(crate) struct Cli {
    /// Binary image file for update.
    #[arg(value_name = "IMAGE")]
    pub(crate) image: Option<PathBuf>,

    /// Serial device name.
    #[arg(short, long, env = "ESCAPE32_DEVICE")]
    pub(crate) device: Option<String>,

    /// Forced mode (specify twice to add delay after each transmitted byte).
    #[arg(short, long, action = ArgAction::Count)]
    pub(crate) force: u8,

    /// Update bootloader instead of firmware.
    #[arg(short = 'B', long)]
    pub(crate) boot: bool,

    /// Set write protection (0/off, 1/bootloader, 2/full).
    #[arg(short = 'P', long, value_name = "LEVEL")]
    pub(crate) protect: Option<ProtectionLevel>,

    /// List available serial ports and exit.
    #[arg(long)]
    pub(crate) list_ports: bool,

    /// Print results as JSON to stdout.
    #[arg(long)]
    pub(crate) json: bool,

    /// Verbose output level (-v, -vv for increasing detail).
    #[arg(short, long, action = ArgAction::Count)]
    pub(crate) verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long)]
    pub(crate) quiet: bool,

    /// Path to a configuration file.
    #[arg(long = "config", value_name = "PATH")]
    pub(crate) config_path: Option<PathBuf>,
}

fn main() -> ExitCode {
    // --- NO_COLOR and TTY detection ---
    let stderr_is_tty = console::Term::stderr().is_term();
    STDERR_IS_TTY.store(stderr_is_tty, Ordering::Relaxed);

    if env::var("NO_COLOR").is_ok() || !stderr_is_tty {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    let cli = Cli::parse();
    init_logging(&cli);
    install_interrupt_handler();

    debug!(
        "escape32-update v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{} {err:#}", style("Error:").red().bold());
            ExitCode::from(exit_code(&err))
        },
    }
}

/// Setup logging based on verbosity.
fn init_logging(cli: &Cli) {
    let log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(cli.verbose >= 2)
        .format_timestamp(if cli.verbose >= 2 {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        })
        .init();
}

/// First Ctrl-C asks the running operation to stop, the second one exits.
fn install_interrupt_handler() {
    let result = ctrlc::set_handler(|| {
        if INTERRUPTED.swap(true, Ordering::Relaxed) {
            std::process::exit(i32::from(EXIT_CANCELLED));
        }
    });
    if let Err(e) = result {
        debug!("Could not install Ctrl-C handler: {e}");
    }
    escape32::set_interrupt_checker(was_interrupted);
}

fn run(cli: &Cli) -> Result<()> {
    if cli.list_ports {
        return commands::ports::cmd_list_ports(cli.json);
    }

    let config = if let Some(ref path) = cli.config_path {
        Config::load_from_path(path)
    } else {
        Config::load()
    };

    commands::update::cmd_update(cli, &config)
}

/// Map an error to the process exit code.
fn exit_code(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<CliError>() {
        Some(CliError::Usage(_)) => EXIT_USAGE,
        Some(CliError::Cancelled(_)) => EXIT_CANCELLED,
        None => 1,
    }
}
