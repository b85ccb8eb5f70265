//! Worker launch command rendering
//!
//! A [`WorkerCommandBuilder`] turns one [`WorkerDescriptor`] and a snapshot
//! of the launching environment into the shell command that starts the
//! worker's bootstrap. The generic invocation comes from
//! [`BaseCommandBuilder`]; everything else is contributed by small strategy
//! objects, so the builder itself stays a pure function of its inputs.

use scooplet_core::{ConfigWarning, WorkerDescriptor, MODULE_PATH_VAR};
use serde::Serialize;
use std::collections::BTreeMap;

/// Read-only copy of the launching environment
pub type EnvSnapshot = BTreeMap<String, String>;

/// Take a snapshot of the current process environment
pub fn env_snapshot() -> EnvSnapshot {
    std::env::vars().collect()
}

/// Quote a word for a POSIX shell
pub fn shell_quote(word: &str) -> String {
    let safe = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_-./:=,@%+".contains(c));
    if safe {
        word.to_string()
    } else {
        single_quote(word)
    }
}

fn single_quote(word: &str) -> String {
    format!("'{}'", word.replace('\'', r"'\''"))
}

/// Rendered launch command of one worker
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RenderedCommand {
    /// Shell statements run before the bootstrap
    pub environment: Vec<String>,
    /// Argv prefix starting the bootstrap
    pub bootstrap: Vec<String>,
    /// Bootstrap options
    pub options: Vec<String>,
    /// Worker module and its arguments
    pub target: Vec<String>,
    /// Configuration problems found while rendering
    pub warnings: Vec<ConfigWarning>,
}

impl RenderedCommand {
    /// Bootstrap argv
    pub fn argv(&self) -> Vec<String> {
        self.bootstrap
            .iter()
            .chain(&self.options)
            .chain(&self.target)
            .cloned()
            .collect()
    }

    /// Single shell command line
    pub fn to_shell(&self) -> String {
        let argv: Vec<String> = self.argv().iter().map(|w| shell_quote(w)).collect();
        let mut parts = self.environment.clone();
        parts.push(argv.join(" "));
        parts.join(" && ")
    }
}

/// Adds shell statements to the worker environment
pub trait EnvironmentDecorator: Send + Sync {
    /// Append statements for this worker
    fn decorate(&self, worker: &WorkerDescriptor, env: &EnvSnapshot, statements: &mut Vec<String>);
}

/// Adds bootstrap options
pub trait OptionAugmenter: Send + Sync {
    /// Append options for this worker
    fn augment(
        &self,
        worker: &WorkerDescriptor,
        options: &mut Vec<String>,
        warnings: &mut Vec<ConfigWarning>,
    );
}

/// Rewrites the finished command
pub trait CommandAugmenter: Send + Sync {
    /// Adjust the rendered command for this worker
    fn augment(&self, worker: &WorkerDescriptor, command: &mut RenderedCommand);
}

/// Generic bootstrap invocation
#[derive(Debug, Default, Clone, Copy)]
pub struct BaseCommandBuilder;

impl BaseCommandBuilder {
    /// Module search path export
    pub fn environment(&self, worker: &WorkerDescriptor) -> Vec<String> {
        match worker.module_path.as_deref() {
            Some(path) if !path.is_empty() => vec![format!(
                "export {}={}:\"${}\"",
                MODULE_PATH_VAR,
                shell_quote(path),
                MODULE_PATH_VAR
            )],
            _ => Vec::new(),
        }
    }

    /// Program starting the bootstrap, under `nice` when a level is set
    pub fn bootstrap(&self, worker: &WorkerDescriptor) -> Vec<String> {
        let mut c = Vec::new();
        if let Some(nice) = worker.nice.filter(|n| *n != 0) {
            c.extend(["nice".to_string(), "-n".to_string(), nice.to_string()]);
        }
        c.extend(worker.interpreter.iter().cloned());
        c
    }

    /// Options every bootstrap understands
    pub fn options(&self, worker: &WorkerDescriptor) -> Vec<String> {
        let mut c = vec![
            "--workerName".to_string(),
            worker.worker_name(),
            "--brokerName".to_string(),
            worker.broker.name.clone(),
            "--brokerAddress".to_string(),
            worker.broker.address.clone(),
            "--metaAddress".to_string(),
            worker.broker.meta_address.clone(),
            "--size".to_string(),
            worker.size.to_string(),
        ];
        if worker.is_origin {
            c.push("--origin".to_string());
        }
        if worker.debug {
            c.push("--debug".to_string());
        }
        if worker.profile {
            c.push("--profile".to_string());
        }
        if let Some(path) = &worker.start_from {
            c.extend(["--startfrom".to_string(), path.clone()]);
        }
        c
    }

    /// Worker module and arguments
    pub fn target(&self, worker: &WorkerDescriptor) -> Vec<String> {
        let mut c = vec![worker.executable.clone()];
        c.extend(worker.arguments.iter().cloned());
        c
    }
}

/// Whether `name` can be exported by a POSIX shell
pub fn is_shell_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Exports allow-listed variables present in the environment
#[derive(Debug, Default, Clone, Copy)]
pub struct PassVariables;

impl EnvironmentDecorator for PassVariables {
    fn decorate(&self, worker: &WorkerDescriptor, env: &EnvSnapshot, statements: &mut Vec<String>) {
        for name in worker.variables_to_pass.iter().filter(|n| is_shell_name(n)) {
            if let Some(value) = env.get(name) {
                statements.push(format!("export {}={}", name, single_quote(value)));
            }
        }
    }
}

/// `--processcontrol`, `--nice` and `--affinity`
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessControlOptions;

impl OptionAugmenter for ProcessControlOptions {
    fn augment(
        &self,
        worker: &WorkerDescriptor,
        options: &mut Vec<String>,
        warnings: &mut Vec<ConfigWarning>,
    ) {
        let Some(mode) = worker.process_control.as_ref() else {
            if worker.nice.is_some() {
                warnings.push(ConfigWarning::NiceWithoutProcessControl {
                    worker_id: worker.worker_id,
                });
            }
            if worker.affinity.is_some() {
                warnings.push(ConfigWarning::AffinityWithoutProcessControl {
                    worker_id: worker.worker_id,
                });
            }
            return;
        };

        options.extend(["--processcontrol".to_string(), mode.clone()]);
        if let Some(nice) = worker.nice {
            options.extend(["--nice".to_string(), nice.to_string()]);
        }
        if let Some(affinity) = &worker.affinity {
            options.extend(["--affinity".to_string(), affinity.to_arg()]);
        }
    }
}

/// `--freeorigin` for a free origin worker alone on its host
#[derive(Debug, Default, Clone, Copy)]
pub struct FreeOriginFlag;

impl OptionAugmenter for FreeOriginFlag {
    fn augment(
        &self,
        worker: &WorkerDescriptor,
        options: &mut Vec<String>,
        _warnings: &mut Vec<ConfigWarning>,
    ) {
        if worker.total_workers_on_host == 1 && worker.free_origin {
            options.push("--freeorigin".to_string());
        }
    }
}

/// Sources the prolog script first
#[derive(Debug, Default, Clone, Copy)]
pub struct Prolog;

impl CommandAugmenter for Prolog {
    fn augment(&self, worker: &WorkerDescriptor, command: &mut RenderedCommand) {
        if let Some(prolog) = &worker.prolog {
            command
                .environment
                .insert(0, format!(". {}", shell_quote(prolog)));
        }
    }
}

/// Composes the base invocation with strategy objects
pub struct WorkerCommandBuilder {
    base: BaseCommandBuilder,
    environment: Vec<Box<dyn EnvironmentDecorator>>,
    options: Vec<Box<dyn OptionAugmenter>>,
    commands: Vec<Box<dyn CommandAugmenter>>,
}

impl WorkerCommandBuilder {
    /// Builder rendering only the base invocation
    pub fn new() -> Self {
        Self {
            base: BaseCommandBuilder,
            environment: Vec::new(),
            options: Vec::new(),
            commands: Vec::new(),
        }
    }

    /// Builder with variable passing, process control, free origin and prolog
    pub fn standard() -> Self {
        Self::new()
            .with_environment(Box::new(PassVariables))
            .with_options(Box::new(ProcessControlOptions))
            .with_options(Box::new(FreeOriginFlag))
            .with_command(Box::new(Prolog))
    }

    /// Add an environment decorator
    pub fn with_environment(mut self, decorator: Box<dyn EnvironmentDecorator>) -> Self {
        self.environment.push(decorator);
        self
    }

    /// Add an option augmenter
    pub fn with_options(mut self, augmenter: Box<dyn OptionAugmenter>) -> Self {
        self.options.push(augmenter);
        self
    }

    /// Add a command augmenter
    pub fn with_command(mut self, augmenter: Box<dyn CommandAugmenter>) -> Self {
        self.commands.push(augmenter);
        self
    }

    /// Render the launch command of one worker
    pub fn render(&self, worker: &WorkerDescriptor, env: &EnvSnapshot) -> RenderedCommand {
        let mut environment = Vec::new();
        for decorator in &self.environment {
            decorator.decorate(worker, env, &mut environment);
        }
        environment.extend(self.base.environment(worker));

        // the bootstrap applies --nice itself
        let bootstrap = self.base.bootstrap(&worker.without_nice());

        let mut options = self.base.options(worker);
        let mut warnings = Vec::new();
        for augmenter in &self.options {
            augmenter.augment(worker, &mut options, &mut warnings);
        }

        let mut command = RenderedCommand {
            environment,
            bootstrap,
            options,
            target: self.base.target(worker),
            warnings,
        };
        for augmenter in &self.commands {
            augmenter.augment(worker, &mut command);
        }
        command
    }
}

impl Default for WorkerCommandBuilder {
    fn default() -> Self {
        Self::standard()
    }
}
