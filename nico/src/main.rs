//! # NICO Orchestrator Binary
//!
//! Waits for the session button, brings up the remote speech service,
//! runs the conversational worker and tears everything down exactly once.
//!
//! # Usage
//!
//! ```bash
//! # Production (config from /etc/nico/nico.toml)
//! nico
//!
//! # Workstation run: simulated instance and actuator, stdin button
//! nico --config config/nico.toml --simulate -v
//!
//! # Hand one command to a running relay
//! nico send FORWARD:1.5
//! ```

use clap::{Parser, Subcommand};
use nico::feedback::PromptPlayer;
use nico::session::{SessionController, SessionParts};
use nico_actuator::send_command;
use nico_common::actuator::ActuatorCommand;
use nico_common::config::{InputKind, LogLevel, NicoConfig};
use nico_common::consts::{DEFAULT_CONFIG_PATH, DEFAULT_INLET_SOCKET};
use nico_common::session::ShutdownTrigger;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{Level, error, info, warn};
use tracing_subscriber::EnvFilter;

/// NICO - button-driven conversation session orchestrator
#[derive(Parser, Debug)]
#[command(name = "nico")]
#[command(version)]
#[command(about = "Button-driven session orchestrator for the NICO toy")]
#[command(long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Simulated instance and actuator, console button, no power-off
    #[arg(short = 's', long)]
    simulate: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Output logs in JSON format
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the orchestrator (default)
    Run,
    /// Send one actuator command (`FORWARD:<secs>`, `REVERSE:<secs>`, `STOP`)
    Send {
        token: String,
        /// Inlet socket; defaults to `[actuator].inlet_socket`
        #[arg(long)]
        socket: Option<PathBuf>,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    if let Err(e) = run() {
        error!("nico failed: {}", e);
        std::process::exit(1);
    }
    Ok(())
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = NicoConfig::load_validated(&args.config);

    setup_tracing(&args, config.as_ref().ok().map(|c| c.shared.log_level));

    match args.command {
        Some(Command::Send { ref token, ref socket }) => {
            let cmd: ActuatorCommand = token.parse()?;
            let path = socket
                .clone()
                .or_else(|| config.as_ref().ok().map(|c| c.actuator.inlet_socket.clone()))
                .unwrap_or_else(|| PathBuf::from(DEFAULT_INLET_SOCKET));
            send_command(&path, cmd)?;
            info!("Sent {cmd} to {}", path.display());
            Ok(())
        }
        Some(Command::Run) | None => run_orchestrator(&args, config?),
    }
}

fn run_orchestrator(args: &Args, config: NicoConfig) -> Result<(), Box<dyn std::error::Error>> {
    info!("NICO v{} starting...", env!("CARGO_PKG_VERSION"));
    if args.simulate {
        info!("Simulation mode enabled");
    }
    preflight(&config, args.simulate);

    let parts = SessionParts::from_config(&config, args.simulate)?;
    let controller = SessionController::new(parts);

    let on_signal = Arc::clone(&controller);
    ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        on_signal.handle_shutdown(ShutdownTrigger::Signal);
    })?;

    let prompt = PromptPlayer::new(config.feedback.prompt_audio.as_deref());
    if let Err(e) = controller.arm(&prompt) {
        error!("Failed to arm button: {e}");
        controller.handle_shutdown(ShutdownTrigger::Fatal(e.to_string()));
    } else {
        info!("Ready; press the button to start a session");
    }

    while !controller.wait_finished(Duration::from_secs(1)) {}

    info!("NICO shutdown complete");
    Ok(())
}

/// Warn about setups that will fail late rather than early.
fn preflight(config: &NicoConfig, simulate: bool) {
    if simulate {
        return;
    }
    let euid = nix::unistd::geteuid();
    if !euid.is_root() && config.hardware.input == InputKind::Sysfs {
        warn!("Running as uid {euid}; GPIO export and forced release may be denied");
    }
    if config.dev_mode() {
        info!("Dev mode: host will not be powered off");
    }
}

/// Setup tracing subscriber based on CLI arguments and config.
fn setup_tracing(args: &Args, configured: Option<LogLevel>) {
    let level = if args.verbose {
        Level::DEBUG
    } else {
        configured
            .unwrap_or_default()
            .as_directive()
            .parse()
            .unwrap_or(Level::INFO)
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    if args.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_thread_names(true)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_names(true)
            .init();
    }
}
