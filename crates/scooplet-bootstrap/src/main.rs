//! scooplet worker bootstrap
//!
//! Started once per worker by the launcher. Applies priority, affinity and
//! start directory, loads the worker module and runs it.

use clap::Parser;
use scooplet_runtime::{Bootstrap, BootstrapArgs};
use std::path::PathBuf;
use tracing::{debug, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// scooplet-bootstrap - start one worker
#[derive(Parser, Debug)]
#[command(name = "scooplet-bootstrap")]
#[command(version, about, long_about = None)]
struct Args {
    /// Run as the origin worker
    #[arg(long)]
    origin: bool,

    /// Worker name
    #[arg(long = "workerName", default_value = "worker0")]
    worker_name: String,

    /// Broker name
    #[arg(long = "brokerName", default_value = "broker")]
    broker_name: String,

    /// Broker task address, tcp://host:port
    #[arg(long = "brokerAddress", default_value = "")]
    broker_address: String,

    /// Broker info address, tcp://host:port
    #[arg(long = "metaAddress", default_value = "")]
    meta_address: String,

    /// Worker pool size
    #[arg(long, default_value_t = 1)]
    size: u32,

    /// Debug mode
    #[arg(long)]
    debug: bool,

    /// Profile the worker module
    #[arg(long)]
    profile: bool,

    /// Print the process group id before running
    #[arg(long = "echoGroup")]
    echo_group: bool,

    /// Directory to change into
    #[arg(long = "startfrom")]
    start_from: Option<PathBuf>,

    /// Nice level
    #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
    nice: i32,

    /// Affinity, ALGO:PARAM...
    #[arg(long)]
    affinity: Option<String>,

    /// Process control mode
    #[arg(long = "processcontrol")]
    process_control: Option<String>,

    /// Free origin mode
    #[arg(long = "freeorigin")]
    free_origin: bool,

    /// Worker module to run, followed by its arguments
    #[arg(
        trailing_var_arg = true,
        allow_hyphen_values = true,
        num_args = 1..,
        required = true,
        value_name = "EXECUTABLE"
    )]
    command: Vec<String>,
}

impl From<Args> for BootstrapArgs {
    fn from(args: Args) -> Self {
        let mut command = args.command.into_iter();
        let executable = command.next().unwrap_or_default();
        Self {
            origin: args.origin,
            worker_name: args.worker_name,
            broker_name: args.broker_name,
            broker_address: args.broker_address,
            meta_address: args.meta_address,
            size: args.size,
            debug: args.debug,
            profile: args.profile,
            echo_group: args.echo_group,
            start_from: args.start_from,
            nice: args.nice,
            affinity: args.affinity,
            process_control: args.process_control,
            free_origin: args.free_origin,
            executable,
            args: command.collect(),
        }
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // stdout belongs to the worker module
    let level = if args.debug { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);

    info!(
        worker = %args.worker_name,
        broker = %args.broker_address,
        executable = %args.command.first().map(String::as_str).unwrap_or_default(),
        "Starting scooplet-bootstrap v{}",
        env!("CARGO_PKG_VERSION")
    );

    let outcome = Bootstrap::new(args.into()).main().await;
    debug!(
        state = %outcome.state,
        warnings = outcome.warnings.len(),
        status = %outcome.status,
        "Bootstrap finished"
    );

    std::process::exit(outcome.status.code());
}
