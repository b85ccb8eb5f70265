//! scooplet CLI
//!
//! Launches a worker pool across hosts, or prints the placement plan.

mod commands;

use clap::{Parser, Subcommand};
use scooplet_core::{LaunchConfig, LoggingConfig};
use std::path::PathBuf;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use commands::LaunchArgs;

/// scooplet - launch broker-based worker pools
#[derive(Parser, Debug)]
#[command(name = "scooplet")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Increase verbosity (repeatable)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Launch workers and wait for the origin
    Launch(LaunchArgs),

    /// Print the placement plan and worker commands without launching
    Plan {
        #[command(flatten)]
        args: LaunchArgs,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
}

fn init_logging(logging: &LoggingConfig, verbose: u8) {
    let level = match verbose {
        0 => logging.level.as_str(),
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if logging.format == "json" {
        let subscriber = FmtSubscriber::builder()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .finish();
        let _ = tracing::subscriber::set_global_default(subscriber);
    } else {
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(filter)
            .with_target(false)
            .finish();
        let _ = tracing::subscriber::set_global_default(subscriber);
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => LaunchConfig::from_file(path)?,
        None => LaunchConfig::default(),
    };
    init_logging(&config.logging, cli.verbose);

    match cli.command {
        Commands::Launch(args) => {
            let code = commands::launch(&config, &args, cli.verbose).await?;
            if code != 0 {
                std::process::exit(code);
            }
        }
        Commands::Plan { args, json } => {
            commands::plan(&config, &args, cli.verbose, json)?;
        }
    }

    Ok(())
}
