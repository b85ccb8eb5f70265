//! Process-based worker plugins
//!
//! Worker code that lives in an executable file runs as a direct child
//! process. The worker context reaches it through `SCOOPLET_*` environment
//! variables.

use async_trait::async_trait;
use scooplet_core::{ExitStatus, ScoopletError, ScoopletResult};
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{debug, error, info};

use crate::traits::{WorkerContext, WorkerPlugin};

/// Worker code loaded from an executable file
#[derive(Debug, Clone)]
pub struct ProcessPlugin {
    name: String,
    path: PathBuf,
}

impl ProcessPlugin {
    /// Create a plugin for an executable file
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
        }
    }

    /// Path of the executable
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Build the command running the worker code
    fn build_command(&self, ctx: &WorkerContext, args: &[String]) -> Command {
        let mut cmd = Command::new(&self.path);
        cmd.args(args);
        cmd.envs(ctx.env_vars());
        cmd.kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl WorkerPlugin for ProcessPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: &WorkerContext, args: &[String]) -> ScoopletResult<ExitStatus> {
        info!(
            worker = %ctx.worker_name,
            path = %self.path.display(),
            "Starting worker process"
        );
        run_command(self.build_command(ctx, args), &self.path.display().to_string()).await
    }
}

/// Built-in module running its arguments as a command
#[derive(Debug, Default, Clone, Copy)]
pub struct SimpleShell;

impl SimpleShell {
    /// Module name
    pub const NAME: &'static str = "simple_shell";
}

#[async_trait]
impl WorkerPlugin for SimpleShell {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn run(&self, ctx: &WorkerContext, args: &[String]) -> ScoopletResult<ExitStatus> {
        let Some((program, rest)) = args.split_first() else {
            return Err(ScoopletError::Runtime(
                "simple_shell needs a command to run".to_string(),
            ));
        };

        let mut cmd = Command::new(program);
        cmd.args(rest);
        cmd.envs(ctx.env_vars());
        cmd.kill_on_drop(true);

        debug!(worker = %ctx.worker_name, command = %program, "simple_shell command");
        run_command(cmd, program).await
    }
}

async fn run_command(mut cmd: Command, what: &str) -> ScoopletResult<ExitStatus> {
    let status = cmd.status().await.map_err(|e| {
        error!(command = %what, error = %e, "Failed to spawn worker process");
        ScoopletError::Runtime(format!("Failed to spawn {}: {}", what, e))
    })?;

    let status = exit_status(status);
    debug!(command = %what, status = %status, "Worker process exited");
    Ok(status)
}

/// Map a child exit status, reporting signals shell-style (128 + signal)
pub(crate) fn exit_status(status: std::process::ExitStatus) -> ExitStatus {
    if let Some(code) = status.code() {
        return ExitStatus(code);
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return ExitStatus(128 + signal);
        }
    }

    ExitStatus(1)
}
