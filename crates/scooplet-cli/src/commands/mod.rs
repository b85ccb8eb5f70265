//! CLI commands implementation

use anyhow::{Context, Result};
use clap::Args;
use scooplet_core::{ConfigWarning, LaunchConfig, LaunchSettings};
use scooplet_launcher::{
    read_hostfile, split_hosts, LaunchParameters, LaunchRequest, Launcher, ShellBroker,
    WorkerCommandBuilder,
};
use scooplet_runtime::native_registry;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

/// Options shared by `launch` and `plan`
#[derive(Args, Debug, Clone, Default)]
pub struct LaunchArgs {
    /// Number of workers
    #[arg(short = 'n', long)]
    pub size: Option<u32>,

    /// Comma separated host list, one entry per worker slot
    #[arg(long, conflicts_with = "hostfile")]
    pub hosts: Option<String>,

    /// File listing hosts, one per line with an optional slot count
    #[arg(long)]
    pub hostfile: Option<PathBuf>,

    /// Workers per unique host
    #[arg(long)]
    pub ppn: Option<u32>,

    /// Externally routable broker host
    #[arg(long)]
    pub broker: Option<String>,

    /// Run the executable through this worker module
    #[arg(short, long)]
    pub module: Option<String>,

    /// Directory workers start from
    #[arg(long)]
    pub path: Option<PathBuf>,

    /// Script sourced on every worker before the bootstrap
    #[arg(long)]
    pub prolog: Option<String>,

    /// Command starting the bootstrap on workers
    #[arg(long)]
    pub interpreter: Option<String>,

    /// Nice level for workers
    #[arg(long, allow_negative_numbers = true)]
    pub nice: Option<i32>,

    /// Affinity algorithm
    #[arg(long)]
    pub affinity: Option<String>,

    /// Process control mode
    #[arg(long, conflicts_with = "no_process_control")]
    pub process_control: Option<String>,

    /// Disable process control
    #[arg(long)]
    pub no_process_control: bool,

    /// Run the origin as an extra process outside affinity
    #[arg(long)]
    pub free_origin: bool,

    /// Reach the broker through ssh tunnels
    #[arg(long)]
    pub tunnel: bool,

    /// Profile every worker
    #[arg(long)]
    pub profile: bool,

    /// Debug mode
    #[arg(long)]
    pub debug: bool,

    /// Executable to run, followed by its arguments
    #[arg(
        trailing_var_arg = true,
        allow_hyphen_values = true,
        num_args = 1..,
        required = true,
        value_name = "EXECUTABLE"
    )]
    pub command: Vec<String>,
}

impl LaunchArgs {
    /// Executable to run
    pub fn executable(&self) -> &str {
        self.command.first().map(String::as_str).unwrap_or_default()
    }

    /// Arguments for the executable
    pub fn arguments(&self) -> &[String] {
        self.command.get(1..).unwrap_or_default()
    }
}

/// Overlay command line options on the configured settings
pub fn settings(config: &LaunchConfig, args: &LaunchArgs) -> LaunchSettings {
    let mut settings = config.launch.clone();

    if let Some(broker) = &args.broker {
        settings.broker = Some(broker.clone());
    }
    if let Some(ppn) = args.ppn {
        settings.workers_per_node = Some(ppn);
    }
    if let Some(path) = &args.path {
        settings.path = Some(path.clone());
    }
    if let Some(prolog) = &args.prolog {
        settings.prolog = Some(prolog.clone());
    }
    if let Some(interpreter) = &args.interpreter {
        settings.interpreter = interpreter.split_whitespace().map(str::to_string).collect();
    }
    if let Some(nice) = args.nice {
        settings.nice = nice;
    }
    if let Some(affinity) = &args.affinity {
        settings.affinity = Some(affinity.clone());
    }
    if args.no_process_control {
        settings.process_control = None;
    } else if let Some(mode) = &args.process_control {
        settings.process_control = Some(mode.clone());
    }
    settings.free_origin |= args.free_origin;
    settings.tunnel |= args.tunnel;
    settings.profile |= args.profile;

    settings
}

/// Build the launch request
pub fn request(args: &LaunchArgs, verbose: u8) -> Result<LaunchRequest> {
    let hosts = match (&args.hosts, &args.hostfile) {
        (Some(list), _) => split_hosts(list),
        (None, Some(path)) => read_hostfile(path)?,
        (None, None) => Vec::new(),
    };

    Ok(LaunchRequest {
        executable: args.executable().to_string(),
        arguments: args.arguments().to_vec(),
        hosts,
        size: args.size,
        module: args.module.clone(),
        debug: args.debug,
        verbosity: 1 + verbose,
    })
}

fn launcher(settings: LaunchSettings) -> Launcher {
    let broker = ShellBroker::new(settings.ssh.clone())
        .with_broker_command(settings.broker_command.clone());
    Launcher::new(settings, Arc::new(broker)).with_registry(native_registry())
}

/// Launch workers and return the origin's exit code
pub async fn launch(config: &LaunchConfig, args: &LaunchArgs, verbose: u8) -> Result<i32> {
    let launcher = launcher(settings(config, args));
    let request = request(args, verbose)?;

    let status = launcher
        .run(request)
        .await
        .with_context(|| format!("Failed to run {}", args.executable()))?;
    Ok(status.code())
}

/// One worker in `plan` output
#[derive(Debug, Serialize)]
pub struct PlannedWorker {
    pub worker: String,
    pub host: String,
    pub origin: bool,
    pub total_workers_on_host: u32,
    pub affinity: Option<String>,
    pub command: String,
    pub warnings: Vec<ConfigWarning>,
}

#[derive(Serialize)]
struct PlanOutput<'a> {
    run: &'a LaunchParameters,
    workers: &'a [PlannedWorker],
}

/// Render every worker of a prepared run
pub fn planned_workers(params: &LaunchParameters) -> Vec<PlannedWorker> {
    let builder = WorkerCommandBuilder::standard();
    params
        .plan
        .with_origin()
        .descriptors
        .iter()
        .map(|worker| {
            let rendered = builder.render(worker, &params.environment);
            PlannedWorker {
                worker: worker.worker_name(),
                host: worker.host_name.clone(),
                origin: worker.is_origin,
                total_workers_on_host: worker.total_workers_on_host,
                affinity: worker.affinity.as_ref().map(|a| a.to_arg()),
                command: rendered.to_shell(),
                warnings: rendered.warnings,
            }
        })
        .collect()
}

/// Print the placement plan
pub fn plan(config: &LaunchConfig, args: &LaunchArgs, verbose: u8, json: bool) -> Result<()> {
    let launcher = launcher(settings(config, args));
    let params = launcher.prepare(&request(args, verbose)?)?;
    let workers = planned_workers(&params);

    if json {
        let output = PlanOutput {
            run: &params,
            workers: &workers,
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!(
        "{} workers, broker {} at {}",
        workers.len(),
        params.broker.name,
        params.broker.address
    );
    for warning in &params.plan.warnings {
        println!("warning: {}", warning);
    }
    println!();
    println!(
        "{:<10} {:<24} {:<7} {:<6} {:<16}",
        "WORKER", "HOST", "ORIGIN", "TOTAL", "AFFINITY"
    );
    println!("{}", "-".repeat(67));
    for worker in &workers {
        println!(
            "{:<10} {:<24} {:<7} {:<6} {:<16}",
            worker.worker,
            worker.host,
            if worker.origin { "yes" } else { "" },
            worker.total_workers_on_host,
            worker.affinity.as_deref().unwrap_or("-")
        );
    }
    println!();
    for worker in &workers {
        println!("{}: {}", worker.worker, worker.command);
        for warning in &worker.warnings {
            println!("  warning: {}", warning);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(hosts: &str) -> LaunchArgs {
        LaunchArgs {
            hosts: Some(hosts.to_string()),
            command: vec!["job.sh".to_string(), "--fast".to_string()],
            ..Default::default()
        }
    }

    #[test]
    fn test_settings_overlay() {
        let mut a = args("a");
        a.nice = Some(5);
        a.no_process_control = true;
        a.free_origin = true;
        a.interpreter = Some("python3 -m bootstrap".to_string());

        let settings = settings(&LaunchConfig::default(), &a);
        assert_eq!(settings.nice, 5);
        assert!(settings.process_control.is_none());
        assert!(settings.free_origin);
        assert_eq!(settings.interpreter, vec!["python3", "-m", "bootstrap"]);
        assert_eq!(settings.affinity.as_deref(), Some("basiccore"));
    }

    #[test]
    fn test_request_hosts() {
        let request = request(&args("a,a,b"), 1).unwrap();
        assert_eq!(request.hosts, vec!["a", "a", "b"]);
        assert_eq!(request.verbosity, 2);
        assert_eq!(request.arguments, vec!["--fast"]);
    }

    #[derive(clap::Parser)]
    struct TestCli {
        #[command(flatten)]
        args: LaunchArgs,
    }

    #[test]
    fn test_flags_after_executable_belong_to_job() {
        use clap::Parser;

        let cli = TestCli::try_parse_from(["scooplet", "--hosts", "a", "job.sh", "--debug", "-n", "3"])
            .unwrap();
        assert!(!cli.args.debug);
        assert_eq!(cli.args.size, None);

        let request = request(&cli.args, 0).unwrap();
        assert_eq!(request.executable, "job.sh");
        assert_eq!(request.arguments, vec!["--debug", "-n", "3"]);
        assert_eq!(request.hosts, vec!["a"]);
    }

    #[test]
    fn test_executable_is_required() {
        use clap::Parser;

        assert!(TestCli::try_parse_from(["scooplet", "--hosts", "a"]).is_err());
    }

    #[test]
    fn test_planned_workers() {
        let a = args("a,a,b");
        let launcher = launcher(settings(&LaunchConfig::default(), &a));
        let params = launcher.prepare(&request(&a, 0).unwrap()).unwrap();

        let workers = planned_workers(&params);
        assert_eq!(workers.len(), 3);
        assert_eq!(workers.iter().filter(|w| w.origin).count(), 1);

        let origin = workers.iter().find(|w| w.origin).unwrap();
        assert_eq!(origin.host, "a");
        assert!(origin.command.contains("--origin"));
        assert!(origin.command.contains("job.sh --fast"));
    }
}
