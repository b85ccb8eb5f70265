//! Worker descriptor, host group and placement plan definitions

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::ConfigWarning;

/// Per-worker CPU affinity request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AffinitySpec {
    /// Affinity algorithm name (e.g. "basiccore")
    pub algorithm: String,
    /// Workers sharing the host's cores
    pub total_workers_on_host: u32,
    /// Zero-based index of this worker on its host
    pub worker_idx_on_host: u32,
}

impl AffinitySpec {
    /// Render as `ALGO:TOTAL:IDX`, the form the bootstrap parses
    pub fn to_arg(&self) -> String {
        format!(
            "{}:{}:{}",
            self.algorithm, self.total_workers_on_host, self.worker_idx_on_host
        )
    }
}

/// Broker coordinates handed to every worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerEndpoint {
    /// Broker name
    pub name: String,
    /// Task address, `tcp://host:port`
    pub address: String,
    /// Info address, `tcp://host:port`
    pub meta_address: String,
}

impl BrokerEndpoint {
    /// Create an endpoint for a broker host and its two ports
    pub fn new(name: impl Into<String>, host: &str, port: u16, meta_port: u16) -> Self {
        Self {
            name: name.into(),
            address: tcp_address(host, port),
            meta_address: tcp_address(host, meta_port),
        }
    }
}

impl Default for BrokerEndpoint {
    fn default() -> Self {
        Self::new("broker", "127.0.0.1", 5555, 5556)
    }
}

/// Format a `tcp://host:port` address
pub fn tcp_address(host: &str, port: u16) -> String {
    format!("tcp://{}:{}", host, port)
}

/// Settings shared by every worker of a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerTemplate {
    /// Argv prefix starting the bootstrap program
    pub interpreter: Vec<String>,
    /// Module search path exported to workers
    pub module_path: Option<String>,
    /// Target executable
    pub executable: String,
    /// Arguments for the target executable
    pub arguments: Vec<String>,
    /// Broker coordinates
    pub broker: BrokerEndpoint,
    /// Directory workers change into at startup
    pub start_from: Option<String>,
    /// Script sourced before the bootstrap
    pub prolog: Option<String>,
    /// Requested nice level
    pub nice: Option<i32>,
    /// Process control mode
    pub process_control: Option<String>,
    /// Environment variable allow-list
    pub variables_to_pass: BTreeSet<String>,
    /// Debug mode
    pub debug: bool,
    /// Profiling mode
    pub profile: bool,
    /// Verbosity level
    pub verbosity: u8,
}

impl Default for WorkerTemplate {
    fn default() -> Self {
        Self {
            interpreter: vec!["scooplet-bootstrap".to_string()],
            module_path: None,
            executable: String::new(),
            arguments: Vec::new(),
            broker: BrokerEndpoint::default(),
            start_from: None,
            prolog: None,
            nice: None,
            process_control: None,
            variables_to_pass: BTreeSet::new(),
            debug: false,
            profile: false,
            verbosity: 1,
        }
    }
}

/// Everything needed to start one worker process
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerDescriptor {
    /// Globally unique worker id, in spawn order
    pub worker_id: u32,
    /// Host the worker runs on
    pub host_name: String,
    /// Workers on this host taking part in core sharing
    pub total_workers_on_host: u32,
    /// Whether this worker is the origin
    pub is_origin: bool,
    /// Whether the free origin policy applies to this worker's host
    pub free_origin: bool,
    /// Worker pool size
    pub size: u32,
    /// Nice level
    pub nice: Option<i32>,
    /// Affinity request
    pub affinity: Option<AffinitySpec>,
    /// Process control mode
    pub process_control: Option<String>,
    /// Environment variable allow-list
    pub variables_to_pass: BTreeSet<String>,
    /// Argv prefix starting the bootstrap program
    pub interpreter: Vec<String>,
    /// Module search path exported to the worker
    pub module_path: Option<String>,
    /// Target executable
    pub executable: String,
    /// Arguments for the target executable
    pub arguments: Vec<String>,
    /// Broker coordinates
    pub broker: BrokerEndpoint,
    /// Directory to change into at startup
    pub start_from: Option<String>,
    /// Script sourced before the bootstrap
    pub prolog: Option<String>,
    /// Debug mode
    pub debug: bool,
    /// Profiling mode
    pub profile: bool,
    /// Verbosity level
    pub verbosity: u8,
}

impl WorkerDescriptor {
    /// Create a descriptor from the run template
    pub fn from_template(
        template: &WorkerTemplate,
        worker_id: u32,
        host_name: &str,
        total_workers_on_host: u32,
        size: u32,
    ) -> Self {
        Self {
            worker_id,
            host_name: host_name.to_string(),
            total_workers_on_host,
            is_origin: false,
            free_origin: false,
            size,
            nice: template.nice,
            affinity: None,
            process_control: template.process_control.clone(),
            variables_to_pass: template.variables_to_pass.clone(),
            interpreter: template.interpreter.clone(),
            module_path: template.module_path.clone(),
            executable: template.executable.clone(),
            arguments: template.arguments.clone(),
            broker: template.broker.clone(),
            start_from: template.start_from.clone(),
            prolog: template.prolog.clone(),
            debug: template.debug,
            profile: template.profile,
            verbosity: template.verbosity,
        }
    }

    /// Worker name passed to the bootstrap
    pub fn worker_name(&self) -> String {
        format!("worker{}", self.worker_id)
    }

    /// Copy of this descriptor with the nice level cleared
    pub fn without_nice(&self) -> Self {
        Self {
            nice: None,
            ..self.clone()
        }
    }
}

/// Run-length group of consecutive identical hosts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostGroup {
    /// Host name
    pub host_name: String,
    /// Number of worker slots
    pub worker_count: u32,
}

impl HostGroup {
    /// Create a new host group
    pub fn new(host_name: impl Into<String>, worker_count: u32) -> Self {
        Self {
            host_name: host_name.into(),
            worker_count,
        }
    }
}

/// Ordered worker descriptors for one run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlacementPlan {
    /// Descriptors in spawn order
    pub descriptors: Vec<WorkerDescriptor>,
    /// Host groups the plan was built from, after division
    pub host_groups: Vec<HostGroup>,
    /// Policy warnings raised while planning
    pub warnings: Vec<ConfigWarning>,
}

impl PlacementPlan {
    /// Number of workers
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    /// Whether the plan is empty
    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// The origin worker: the marked one, else the last planned
    pub fn origin(&self) -> Option<&WorkerDescriptor> {
        self.descriptors
            .iter()
            .find(|d| d.is_origin)
            .or_else(|| self.descriptors.last())
    }

    /// Copy of the plan with the last descriptor marked as origin when none is
    pub fn with_origin(&self) -> Self {
        let mut plan = self.clone();
        if !plan.descriptors.iter().any(|d| d.is_origin) {
            if let Some(last) = plan.descriptors.last_mut() {
                last.is_origin = true;
            }
        }
        plan
    }

    /// Descriptors placed on a host
    pub fn on_host<'a>(&'a self, host: &'a str) -> impl Iterator<Item = &'a WorkerDescriptor> {
        self.descriptors.iter().filter(move |d| d.host_name == host)
    }
}

/// Exit status of a worker or a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitStatus(pub i32);

impl ExitStatus {
    /// Successful completion
    pub const SUCCESS: ExitStatus = ExitStatus(0);
    /// Generic failure
    pub const FAILURE: ExitStatus = ExitStatus(1);
    /// The worker module could not be loaded
    pub const LOAD_FAILURE: ExitStatus = ExitStatus(-1);

    /// Numeric exit code
    pub fn code(&self) -> i32 {
        self.0
    }

    /// Whether this is a success
    pub fn success(&self) -> bool {
        self.0 == 0
    }
}

impl std::fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
