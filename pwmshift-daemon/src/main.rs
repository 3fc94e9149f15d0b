//! pwmshift: drive an RGB light through pi-blaster from the keyboard or UDP
//!
//! Usage: pwmshift [--id N] [--test] [--daemon] [--config FILE]

use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn, LevelFilter};
use pwmshift_engine::{ModeController, PiBlasterSink};
use pwmshift_protocol::{Decoder, ProtocolVariant, MAX_TARGET_ID};
use std::fs::{File, OpenOptions};
use std::os::unix::fs::OpenOptionsExt;
use std::path::PathBuf;
use std::sync::Arc;

mod config;
mod console;
mod listener;
mod thread_util;

use config::Config;
use console::{Console, ConsoleExit};
use listener::RemoteListener;

const TEST_DEVICE: &str = "/dev/null";

#[derive(Parser, Debug)]
#[command(name = "pwmshift", version)]
#[command(about = "Fade an RGB light between colors from the keyboard or over UDP")]
struct Args {
    /// Target id for remote commands (0-64)
    #[arg(short, long, value_parser = clap::value_parser!(u8).range(0..=i64::from(MAX_TARGET_ID)))]
    id: Option<u8>,

    /// Write to /dev/null instead of the pi-blaster device
    #[arg(short, long)]
    test: bool,

    /// Run without the console, only listening for remote commands
    #[arg(short, long)]
    daemon: bool,

    /// JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// UDP port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Datagram layout: single-id or bitmask
    #[arg(long)]
    protocol: Option<ProtocolVariant>,
}

impl Args {
    fn apply_to(&self, config: &mut Config) {
        if let Some(id) = self.id {
            config.target_id = id;
        }
        if let Some(port) = self.port {
            config.listen_port = port;
        }
        if let Some(protocol) = self.protocol {
            config.protocol = protocol;
        }
    }

    fn device<'a>(&self, config: &'a Config) -> &'a str {
        if self.test {
            TEST_DEVICE
        } else {
            &config.device
        }
    }
}

fn init_logging(level: LevelFilter) {
    // RUST_LOG, when set, overrides the configured level
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .format_timestamp_millis()
        .init();
}

/// Open the device for writing without waiting for a reader.
///
/// pi-blaster's device is a FIFO; a blocking open would hang until the
/// daemon starts, non-blocking fails with ENXIO instead.
fn open_device(path: &str) -> Result<File> {
    OpenOptions::new()
        .write(true)
        .custom_flags(libc::O_NONBLOCK)
        .open(path)
        .with_context(|| format!("Failed to open output device {path}"))
}

fn install_interrupt_handler(controller: Arc<ModeController>, interactive: bool) -> Result<()> {
    ctrlc::set_handler(move || {
        if interactive {
            console::restore_terminal();
        }
        warn!("Interrupted, switching off");
        controller.shutdown();
        std::process::exit(1);
    })
    .context("Failed to set Ctrl-C handler")
}

fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    args.apply_to(&mut config);

    // The console owns the screen; only warnings and errors may interrupt it
    let level = config.log_level.as_level_filter();
    init_logging(if args.daemon {
        level
    } else {
        level.min(LevelFilter::Warn)
    });

    info!("pwmshift {} starting", env!("CARGO_PKG_VERSION"));
    config.validate()?;

    let device = args.device(&config);
    let file = open_device(device)?;
    info!(
        "Writing to {device} (pins r={} g={} b={})",
        config.pins.red, config.pins.green, config.pins.blue
    );
    let sink = PiBlasterSink::new(file, config.pins.into());
    let controller = Arc::new(ModeController::new(sink, config.recovery_ramp_ms));

    let decoder = Decoder::new(config.protocol, config.target_id);
    let listener = RemoteListener::bind(config.listen_port, decoder, controller.clone())
        .with_context(|| format!("Failed to bind UDP port {}", config.listen_port))?;

    install_interrupt_handler(controller.clone(), !args.daemon)?;

    if args.daemon {
        listener.run();
    }

    let stats = listener.stats();
    thread_util::spawn_named("udp-listener", move || {
        listener.run();
    })
    .context("Failed to start listener thread")?;

    let mut console = Console::new(
        controller.clone(),
        stats,
        config.target_id,
        config.crazy_delay_ms,
    );
    let exit = console.run();

    controller.shutdown();
    match exit.context("Console failed")? {
        ConsoleExit::Quit => {
            info!("Quit");
            Ok(())
        }
        ConsoleExit::Interrupted => std::process::exit(1),
    }
}
