//! Per-worker bootstrap
//!
//! Every spawned worker runs this sequence once:
//! `Init -> ResourceConfigured -> ModuleLoaded -> Running -> Terminated`.
//! Resource configuration is best effort: each step returns its own
//! result and failures end up in the warnings list. Only a module that
//! cannot be loaded stops the worker, with exit status -1.

use scooplet_core::{
    AffinityRequest, ConfigWarning, ControlRegistry, ExitStatus, ScoopletError, ScoopletResult,
};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::control::native_registry;
use crate::loader::{ModuleLoader, PluginLoader, SearchPath};
use crate::profile::ProfiledRuntime;
use crate::traits::{LocalRuntime, WorkerContext, WorkerPlugin, WorkerRuntime};

/// Startup arguments of one worker process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapArgs {
    /// Whether this worker is the origin
    pub origin: bool,
    /// Worker name
    pub worker_name: String,
    /// Broker name
    pub broker_name: String,
    /// Broker task address
    pub broker_address: String,
    /// Broker info address
    pub meta_address: String,
    /// Worker pool size
    pub size: u32,
    /// Debug mode
    pub debug: bool,
    /// Profile the worker code
    pub profile: bool,
    /// Print the process group id before running worker code
    pub echo_group: bool,
    /// Directory to change into
    pub start_from: Option<PathBuf>,
    /// Nice level, 0 leaves the priority alone
    pub nice: i32,
    /// Affinity argument, `ALGO:PARAM...`
    pub affinity: Option<String>,
    /// Process control mode
    pub process_control: Option<String>,
    /// Free origin mode
    pub free_origin: bool,
    /// Worker module executable
    pub executable: String,
    /// Arguments for the worker module
    pub args: Vec<String>,
}

impl Default for BootstrapArgs {
    fn default() -> Self {
        Self {
            origin: false,
            worker_name: "worker0".to_string(),
            broker_name: "broker".to_string(),
            broker_address: String::new(),
            meta_address: String::new(),
            size: 1,
            debug: false,
            profile: false,
            echo_group: false,
            start_from: None,
            nice: 0,
            affinity: None,
            process_control: None,
            free_origin: false,
            executable: String::new(),
            args: Vec::new(),
        }
    }
}

impl BootstrapArgs {
    /// Worker context handed to the worker module
    pub fn context(&self) -> WorkerContext {
        WorkerContext {
            worker_name: self.worker_name.clone(),
            broker_name: self.broker_name.clone(),
            broker_address: self.broker_address.clone(),
            meta_address: self.meta_address.clone(),
            size: self.size,
            is_origin: self.origin,
            free_origin: self.free_origin,
            debug: self.debug,
        }
    }
}

/// Bootstrap progress
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapState {
    /// Arguments parsed
    Init,
    /// Priority, affinity and directory handled
    ResourceConfigured,
    /// Worker module resolved
    ModuleLoaded,
    /// Worker module running
    Running,
    /// Finished, successfully or not
    Terminated,
}

impl std::fmt::Display for BootstrapState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BootstrapState::Init => write!(f, "Init"),
            BootstrapState::ResourceConfigured => write!(f, "ResourceConfigured"),
            BootstrapState::ModuleLoaded => write!(f, "ModuleLoaded"),
            BootstrapState::Running => write!(f, "Running"),
            BootstrapState::Terminated => write!(f, "Terminated"),
        }
    }
}

/// Result of a complete bootstrap
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapOutcome {
    /// Process exit status
    pub status: ExitStatus,
    /// Non-fatal problems met on the way
    pub warnings: Vec<ConfigWarning>,
    /// Final state
    pub state: BootstrapState,
}

/// Worker bootstrap state machine
pub struct Bootstrap {
    args: BootstrapArgs,
    registry: ControlRegistry,
    loader: Arc<dyn PluginLoader>,
    runtime: Arc<dyn WorkerRuntime>,
    search_path: SearchPath,
    state: BootstrapState,
    warnings: Vec<ConfigWarning>,
    stdout: Box<dyn Write + Send>,
    stderr: Box<dyn Write + Send>,
}

impl Bootstrap {
    /// Create a bootstrap with the native backends and standard loader
    pub fn new(args: BootstrapArgs) -> Self {
        let runtime: Arc<dyn WorkerRuntime> = if args.profile {
            Arc::new(ProfiledRuntime::new(LocalRuntime))
        } else {
            Arc::new(LocalRuntime)
        };

        Self {
            args,
            registry: native_registry(),
            loader: Arc::new(ModuleLoader::new()),
            runtime,
            search_path: SearchPath::from_env(),
            state: BootstrapState::Init,
            warnings: Vec::new(),
            stdout: Box::new(std::io::stdout()),
            stderr: Box::new(std::io::stderr()),
        }
    }

    /// Use another process control registry
    pub fn with_registry(mut self, registry: ControlRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Use another module loader
    pub fn with_loader(mut self, loader: Arc<dyn PluginLoader>) -> Self {
        self.loader = loader;
        self
    }

    /// Use another runtime
    pub fn with_runtime(mut self, runtime: Arc<dyn WorkerRuntime>) -> Self {
        self.runtime = runtime;
        self
    }

    /// Start from another module search path
    pub fn with_search_path(mut self, search_path: SearchPath) -> Self {
        self.search_path = search_path;
        self
    }

    /// Redirect the output streams
    pub fn with_output(
        mut self,
        stdout: Box<dyn Write + Send>,
        stderr: Box<dyn Write + Send>,
    ) -> Self {
        self.stdout = stdout;
        self.stderr = stderr;
        self
    }

    /// Current state
    pub fn state(&self) -> BootstrapState {
        self.state
    }

    /// Warnings collected so far
    pub fn warnings(&self) -> &[ConfigWarning] {
        &self.warnings
    }

    /// Module search path
    pub fn search_path(&self) -> &SearchPath {
        &self.search_path
    }

    /// Apply priority, affinity and start directory
    ///
    /// The steps are independent; a failing one does not stop the others.
    pub fn configure_resources(&mut self) {
        debug!(
            worker = %self.args.worker_name,
            nice = self.args.nice,
            affinity = ?self.args.affinity,
            start_from = ?self.args.start_from,
            "Configuring resources"
        );

        let steps = [self.set_nice(), self.set_affinity(), self.change_directory()];
        for warning in steps.into_iter().filter_map(Result::err) {
            warn!(worker = %self.args.worker_name, warning = %warning, "Resource configuration");
            self.warnings.push(warning);
        }

        self.state = BootstrapState::ResourceConfigured;
    }

    fn set_nice(&self) -> Result<(), ConfigWarning> {
        let nice = self.args.nice;
        if nice == 0 {
            return Ok(());
        }

        let mode = self.args.process_control.as_deref();
        let control = self
            .registry
            .what_priority(mode)
            .ok_or_else(|| ConfigWarning::NoPriorityBackend {
                mode: mode.map(str::to_string),
            })?;

        control
            .set_priority(nice)
            .map_err(|e| ConfigWarning::PriorityFailed {
                nice,
                reason: e.to_string(),
            })
    }

    fn set_affinity(&self) -> Result<(), ConfigWarning> {
        let Some(affinity) = self.args.affinity.as_deref() else {
            return Ok(());
        };
        let failed = |reason: String| ConfigWarning::AffinityFailed {
            affinity: affinity.to_string(),
            reason,
        };

        let request = AffinityRequest::parse(affinity).map_err(|e| failed(e.to_string()))?;
        let mode = self.args.process_control.as_deref();
        let control = self
            .registry
            .what_affinity(mode, &request.algorithm)
            .ok_or_else(|| ConfigWarning::NoAffinityBackend {
                mode: mode.map(str::to_string),
                algorithm: request.algorithm.clone(),
            })?;

        control
            .apply(&request.params)
            .map_err(|e| failed(e.to_string()))
    }

    fn change_directory(&self) -> Result<(), ConfigWarning> {
        let Some(dir) = self.args.start_from.as_ref() else {
            return Ok(());
        };
        std::env::set_current_dir(dir).map_err(|e| ConfigWarning::ChdirFailed {
            path: dir.display().to_string(),
            reason: e.to_string(),
        })
    }

    /// Resolve the worker module
    ///
    /// The executable's directory joins the search path first, so a module
    /// next to the executable is always found.
    pub fn load_module(&mut self) -> ScoopletResult<Arc<dyn WorkerPlugin>> {
        let cwd = std::env::current_dir()?;
        let parent = Path::new(&self.args.executable)
            .parent()
            .unwrap_or_else(|| Path::new(""));
        if self.search_path.push_if_absent(cwd.join(parent)) {
            debug!(search_path = %self.search_path, "Module directory added to search path");
        }

        if self.args.echo_group {
            if let Err(warning) = self.echo_group() {
                warn!(worker = %self.args.worker_name, warning = %warning, "Echo group");
                self.warnings.push(warning);
            }
        }

        let plugin = self.loader.load(&self.args.executable, &self.search_path)?;
        self.state = BootstrapState::ModuleLoaded;
        Ok(plugin)
    }

    fn echo_group(&mut self) -> Result<(), ConfigWarning> {
        #[cfg(unix)]
        {
            // SAFETY: getpgrp cannot fail and takes no arguments.
            let pgrp = unsafe { libc::getpgrp() };
            writeln!(self.stdout, "{}", pgrp)
                .and_then(|()| self.stdout.flush())
                .map_err(|e| ConfigWarning::EchoGroupFailed {
                    reason: e.to_string(),
                })?;
        }
        #[cfg(not(unix))]
        debug!("Process groups are not available on this platform");
        Ok(())
    }

    /// Hand control to the worker module through the runtime
    pub async fn run(&mut self, plugin: Arc<dyn WorkerPlugin>) -> ScoopletResult<ExitStatus> {
        self.state = BootstrapState::Running;
        info!(
            worker = %self.args.worker_name,
            module = plugin.name(),
            runtime = self.runtime.name(),
            "Running worker module"
        );
        self.runtime
            .startup(plugin, self.args.context(), self.args.args.clone())
            .await
    }

    /// Run the full sequence, always ending in `Terminated`
    pub async fn main(mut self) -> BootstrapOutcome {
        self.configure_resources();

        let status = match self.load_module() {
            Ok(plugin) => match self.run(plugin).await {
                Ok(status) => status,
                Err(e) => {
                    error!(worker = %self.args.worker_name, error = %e, "Worker module failed");
                    ExitStatus::FAILURE
                }
            },
            Err(ScoopletError::Load(msg)) => {
                self.report_load_failure(&msg);
                ExitStatus::LOAD_FAILURE
            }
            Err(e) => {
                error!(worker = %self.args.worker_name, error = %e, "Bootstrap failed");
                ExitStatus::FAILURE
            }
        };

        self.state = BootstrapState::Terminated;
        debug!(worker = %self.args.worker_name, status = %status, "Bootstrap ended");

        BootstrapOutcome {
            status,
            warnings: self.warnings,
            state: self.state,
        }
    }

    fn report_load_failure(&mut self, msg: &str) {
        let path = self
            .search_path
            .last()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        error!(
            worker = %self.args.worker_name,
            executable = %self.args.executable,
            search_path = %self.search_path,
            "Failed to load worker module"
        );
        let _ = writeln!(self.stderr, "{}\nIn path: {}", msg, path);
        let _ = self.stderr.flush();
    }
}
