use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use flaretun_core::config::load_settings;
use flaretun_core::tracing_init::init_tracing;
use flaretun_setup::manage::{ServiceArgs, UninstallArgs};
use flaretun_setup::tunnel::TunnelArgs;

/// Expose a local service through a quick tunnel, optionally as a host service.
#[derive(Debug, Parser)]
#[command(name = "flaretun-setup", version, about, args_conflicts_with_subcommands = true)]
struct Cli {
    /// Run without interactive prompts (use defaults or CLI flags)
    #[arg(long, global = true)]
    non_interactive: bool,

    /// Emit JSON log lines instead of human-readable output
    #[arg(long, global = true)]
    log_json: bool,

    /// Settings file layered over the global one
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    setup: TunnelArgs,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Install the tunnel and discover its public URL (default)
    Setup(TunnelArgs),
    /// Show the state of the installed service
    Status(ServiceArgs),
    /// Stop and remove the service and its log file
    Uninstall(UninstallArgs),
    /// Print the public URL of the running service
    Url(ServiceArgs),
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    // Settings loading logs, so tracing comes first at the env level.
    let startup_level = std::env::var("FLARETUN_LOG_LEVEL").unwrap_or_default();
    let logging = init_tracing(&startup_level, cli.log_json);
    let settings = load_settings(cli.config.as_deref())?;
    logging.set_level(&settings.log_level);

    match cli.command {
        None => flaretun_setup::tunnel::run(cli.setup, &settings, cli.non_interactive)?,
        Some(Commands::Setup(args)) => {
            flaretun_setup::tunnel::run(args, &settings, cli.non_interactive)?;
        }
        Some(Commands::Status(ref args)) => flaretun_setup::manage::status(args, &settings)?,
        Some(Commands::Uninstall(ref args)) => {
            flaretun_setup::manage::uninstall(args, &settings, cli.non_interactive)?;
        }
        Some(Commands::Url(ref args)) => flaretun_setup::manage::url(args, &settings)?,
    }

    Ok(())
}
