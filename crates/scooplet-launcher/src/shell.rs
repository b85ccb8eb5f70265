//! Shell broker launcher
//!
//! Starts each worker through a shell: `sh -c` on the local machine, the
//! configured ssh command on remote hosts. With tunnelling enabled, remote
//! workers reach the broker through `ssh -R` forwards on their loopback
//! interface.

use async_trait::async_trait;
use scooplet_core::{
    BrokerEndpoint, ExitStatus, ScoopletError, ScoopletResult, WorkerDescriptor,
};
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::broker::{BrokerApp, BrokerLauncher, LaunchParameters};
use crate::command::{RenderedCommand, WorkerCommandBuilder};
use crate::nodes::LocalHosts;

const LOOPBACK: &str = "127.0.0.1";

/// Launches workers through local and remote shells
#[derive(Clone)]
pub struct ShellBroker {
    builder: Arc<WorkerCommandBuilder>,
    ssh: Vec<String>,
    broker_command: Option<Vec<String>>,
    local: LocalHosts,
}

impl ShellBroker {
    /// Create a shell broker using `ssh` for remote hosts
    pub fn new(ssh: Vec<String>) -> Self {
        Self {
            builder: Arc::new(WorkerCommandBuilder::standard()),
            ssh,
            broker_command: None,
            local: LocalHosts::detect(),
        }
    }

    /// Use a custom command builder
    pub fn with_builder(mut self, builder: WorkerCommandBuilder) -> Self {
        self.builder = Arc::new(builder);
        self
    }

    /// Start the broker with this command before the workers
    pub fn with_broker_command(mut self, command: Option<Vec<String>>) -> Self {
        self.broker_command = command.filter(|c| !c.is_empty());
        self
    }

    /// Override local host detection
    pub fn with_local_hosts(mut self, local: LocalHosts) -> Self {
        self.local = local;
        self
    }

    /// Argv spawning one worker, with its rendered command
    pub fn spawn_argv(
        &self,
        params: &LaunchParameters,
        worker: &WorkerDescriptor,
    ) -> (Vec<String>, RenderedCommand) {
        if self.local.is_local(&worker.host_name) {
            let rendered = self.builder.render(worker, &params.environment);
            let argv = vec!["sh".to_string(), "-c".to_string(), rendered.to_shell()];
            return (argv, rendered);
        }

        let mut argv = self.ssh.clone();
        let rendered = if params.tunnel {
            for port in [params.broker_port, params.meta_port] {
                argv.push("-R".to_string());
                argv.push(format!("{}:{}:{}", port, params.broker_host, port));
            }
            let mut tunnelled = worker.clone();
            tunnelled.broker = BrokerEndpoint::new(
                worker.broker.name.clone(),
                LOOPBACK,
                params.broker_port,
                params.meta_port,
            );
            self.builder.render(&tunnelled, &params.environment)
        } else {
            self.builder.render(worker, &params.environment)
        };
        argv.push(worker.host_name.clone());
        argv.push(rendered.to_shell());
        (argv, rendered)
    }
}

impl BrokerLauncher for ShellBroker {
    fn name(&self) -> &str {
        "shell"
    }

    fn launch(&self, params: LaunchParameters) -> ScoopletResult<Box<dyn BrokerApp>> {
        if self.ssh.is_empty() {
            return Err(ScoopletError::Config("empty ssh command".to_string()));
        }
        Ok(Box::new(ShellApp {
            launcher: self.clone(),
            params,
            broker: None,
            origin: None,
            workers: Vec::new(),
        }))
    }
}

/// A run started by [`ShellBroker`]
pub struct ShellApp {
    launcher: ShellBroker,
    params: LaunchParameters,
    broker: Option<Child>,
    origin: Option<(String, Child)>,
    workers: Vec<(String, Child)>,
}

impl ShellApp {
    fn spawn(argv: &[String]) -> std::io::Result<Child> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty command"))?;
        Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()
    }

    fn start_broker(&mut self) -> ScoopletResult<()> {
        let Some(command) = self.launcher.broker_command.as_ref() else {
            return Ok(());
        };
        let child = Self::spawn(command).map_err(|e| {
            ScoopletError::Launch(format!("Failed to start broker {:?}: {}", command, e))
        })?;
        info!(
            broker = %self.params.broker.name,
            host = %self.params.broker_host,
            pid = ?child.id(),
            "Broker started"
        );
        self.broker = Some(child);
        Ok(())
    }

    fn start_workers(&mut self) -> ScoopletResult<()> {
        let plan = self.params.plan.with_origin();
        for worker in &plan.descriptors {
            let (argv, rendered) = self.launcher.spawn_argv(&self.params, worker);
            for warning in &rendered.warnings {
                warn!(worker = %worker.worker_name(), "{}", warning);
            }

            let child = Self::spawn(&argv).map_err(|e| {
                ScoopletError::Launch(format!(
                    "Failed to start {} on {}: {}",
                    worker.worker_name(),
                    worker.host_name,
                    e
                ))
            })?;
            debug!(
                worker = %worker.worker_name(),
                host = %worker.host_name,
                origin = worker.is_origin,
                pid = ?child.id(),
                "Worker started"
            );

            if worker.is_origin {
                self.origin = Some((worker.worker_name(), child));
            } else {
                self.workers.push((worker.worker_name(), child));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl BrokerApp for ShellApp {
    async fn run(&mut self) -> ScoopletResult<ExitStatus> {
        if self.params.plan.is_empty() {
            return Err(ScoopletError::Launch("no workers to start".to_string()));
        }

        self.start_broker()?;
        self.start_workers()?;

        let Some((name, origin)) = self.origin.as_mut() else {
            return Err(ScoopletError::Internal("no origin worker started".to_string()));
        };
        info!(
            run_id = %self.params.run_id,
            origin = %name,
            workers = self.params.plan.len(),
            "Waiting for origin"
        );
        let status = origin
            .wait()
            .await
            .map_err(|e| ScoopletError::Launch(format!("Failed to wait for {}: {}", name, e)))?;

        Ok(ExitStatus(exit_code(status)))
    }

    async fn close(&mut self) {
        let origin = self.origin.take();
        let mut children: Vec<(String, Child)> = self.workers.drain(..).collect();
        children.extend(origin);
        if let Some(broker) = self.broker.take() {
            children.push((self.params.broker.name.clone(), broker));
        }

        for (name, mut child) in children {
            if let Ok(Some(_)) = child.try_wait() {
                continue;
            }
            if let Err(e) = child.start_kill() {
                debug!(process = %name, error = %e, "Kill failed");
            }
            if let Err(e) = child.wait().await {
                warn!(process = %name, error = %e, "Failed to reap process");
            }
        }
        debug!(run_id = %self.params.run_id, "Run closed");
    }
}

fn exit_code(status: std::process::ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    ExitStatus::FAILURE.code()
}
