use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use nix::unistd::{fork, ForkResult};

use padmacro::settings::load_settings;

/// Turn a USB numeric keypad into macro buttons
#[derive(Parser, Debug)]
#[command(name = "padmacrod")]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file (default: ~/.config/padmacro/config.json)
    #[arg(short, long, env = "PADMACRO_CONFIG")]
    config: Option<PathBuf>,

    /// Input device node, overrides the configuration
    #[arg(short, long, env = "PADMACRO_DEVICE")]
    device: Option<PathBuf>,

    /// Stay attached instead of forking into the background
    #[arg(short, long)]
    foreground: bool,

    /// Disable acknowledge/reject/keystroke feedback commands
    #[arg(long)]
    no_feedback: bool,

    /// Print the effective configuration as JSON and exit
    #[arg(long)]
    print_config: bool,

    /// Verbose logging (can be specified multiple times)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(format!("padmacro={level},warn")));

    // Also installs the bridge that turns `log` records into events
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();
}

/// Fork once so a `Type=forking` service manager sees the parent exit.
/// Returns true in the child, which goes on to run the daemon.
fn detach() -> Result<bool> {
    // SAFETY: no runtime or other threads exist yet
    match unsafe { fork() }.context("Forking failed")? {
        ForkResult::Parent { child } => {
            log::info!("Detached, daemon pid {}", child);
            Ok(false)
        }
        ForkResult::Child => Ok(true),
    }
}

fn main() -> Result<()> {
    // Load .env file if present (for development convenience)
    let _ = dotenvy::dotenv();

    let args = Args::parse();
    init_logging(args.verbose);

    let mut settings = load_settings(args.config.as_deref())?;
    if let Some(device) = args.device {
        settings.device = device;
    }
    if args.no_feedback {
        settings.feedback.enabled = false;
    }

    if args.print_config {
        println!("{}", serde_json::to_string_pretty(&settings)?);
        return Ok(());
    }

    let bindings = settings.resolve().context("Invalid configuration")?;

    if !args.foreground && !detach()? {
        return Ok(());
    }

    // Single-threaded on purpose: commands are launched with fork
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build runtime")?;
    runtime.block_on(padmacro::run(settings, bindings))?;
    Ok(())
}
