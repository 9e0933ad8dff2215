//! # Voxel MCU Emulator
//!
//! Emulates a 3D-printer motion-control MCU. An unmodified host print
//! controller connects over the exposed PTY (or Unix socket) and speaks
//! the Klipper binary protocol to what it believes is real hardware:
//! stepper drivers, digital and PWM outputs, ADC sampling, endstops,
//! displays, and neopixels, all driven by a virtual-time tick engine.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};
use voxel_core::board::Board;
use voxel_core::clock::parse_frequency;
use voxel_core::objects::create_object;
use voxel_core::registry::{Registry, RegistryBuilder};

use voxel_emu::config::EmulatorConfig;
use voxel_emu::link::{self, LinkKind};
use voxel_emu::supervisor::{Supervisor, SupervisorOptions};

/// A virtual 3D-printer motion-control MCU speaking the Klipper protocol.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the machine configuration file.
    #[arg(short = 'C', long)]
    config: PathBuf,

    /// MCU clock frequency (e.g. "16MHz"); overrides the configuration.
    #[arg(short = 'F', long)]
    frequency: Option<String>,

    /// Host link transport.
    #[arg(long, value_parser = parse_link_kind, default_value = "pty")]
    link: LinkKind,

    /// Path of the exposed PTY symlink or Unix socket.
    #[arg(long, default_value = "/tmp/voxel-mcu")]
    link_path: PathBuf,

    /// Clock update cadence in updates per second of wall time.
    #[arg(long, default_value_t = 5_000)]
    process_frequency: u32,

    /// Raise the scheduler thread to a real-time-ish priority.
    #[arg(long)]
    realtime: bool,

    /// Log filter (e.g. "info", "voxel_klipper=debug").
    #[arg(short = 'd', long, default_value = "info")]
    debug: String,
}

fn parse_link_kind(text: &str) -> Result<LinkKind, String> {
    match text {
        "pty" => Ok(LinkKind::Pty),
        "socket" => Ok(LinkKind::Socket),
        _ => Err(format!("unknown link kind '{text}'")),
    }
}

static STOP: AtomicBool = AtomicBool::new(false);

extern "C" fn on_interrupt(_: libc::c_int) {
    STOP.store(true, Ordering::SeqCst);
}

fn main() {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_env_filter(cli.debug.clone())
        .init();

    std::process::exit(match run(cli) {
        Ok(()) => 0,
        Err(err) => {
            error!("{err:#}");
            exit_code_for(&err)
        }
    });
}

/// Maps startup failures onto the documented exit codes: missing files
/// surface as ENOENT, configuration problems as EINVAL.
fn exit_code_for(err: &anyhow::Error) -> i32 {
    if let Some(io) = err.downcast_ref::<std::io::Error>() {
        if io.kind() == std::io::ErrorKind::NotFound {
            return libc::ENOENT;
        }
    }
    libc::EINVAL
}

fn run(cli: Cli) -> Result<()> {
    let config = EmulatorConfig::load(&cli.config)?;
    let frequency = match &cli.frequency {
        Some(text) => parse_frequency(text).context("invalid --frequency")?,
        None => config.frequency.unwrap_or(16_000_000),
    };
    let registry = build_registry(&config, frequency)?;

    let host_link = link::open(cli.link, &cli.link_path)?;
    let emulator = Supervisor::start(
        registry,
        host_link,
        SupervisorOptions {
            process_frequency: cli.process_frequency,
            realtime: cli.realtime,
        },
    )?;

    unsafe {
        libc::signal(libc::SIGINT, on_interrupt as libc::sighandler_t);
        libc::signal(libc::SIGTERM, on_interrupt as libc::sighandler_t);
    }
    info!("emulator running; press Ctrl-C to stop");
    while !STOP.load(Ordering::SeqCst) {
        std::thread::sleep(std::time::Duration::from_millis(100));
    }

    emulator.stop();
    Ok(())
}

/// Instantiates every configured object into the registry.
fn build_registry(config: &EmulatorConfig, frequency: u32) -> Result<Arc<Registry>> {
    let mut builder = RegistryBuilder::new(Board::generic(frequency));
    for section in &config.objects {
        let object = create_object(
            section.class,
            builder.next_id(),
            &section.name,
            &section.options,
            builder.board(),
        );
        let object = match object {
            Ok(object) => object,
            Err(err) => {
                // Classes the board cannot model (kinematics-level objects)
                // are ignored the way unknown sections are.
                warn!(class = %section.class, name = section.name, %err, "skipping object");
                continue;
            }
        };
        builder
            .register(object)
            .with_context(|| format!("registering {} '{}'", section.class, section.name))?;
    }
    let registry = builder.build();
    info!(
        steppers = registry.count(voxel_core::object::ObjectClass::Stepper),
        thermistors = registry.count(voxel_core::object::ObjectClass::Thermistor),
        heaters = registry.count(voxel_core::object::ObjectClass::Heater),
        "registry populated"
    );
    Ok(registry)
}
