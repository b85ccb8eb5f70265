//! Broker launcher contract
//!
//! A [`BrokerLauncher`] turns [`LaunchParameters`] into a running
//! [`BrokerApp`]: the broker plus every planned worker. The launcher owns
//! the app and always closes it, whatever `run` returns.

use async_trait::async_trait;
use scooplet_core::{BrokerEndpoint, ExitStatus, HostGroup, PlacementPlan, ScoopletResult};
use serde::Serialize;
use std::collections::BTreeSet;

use crate::command::EnvSnapshot;

/// Everything a broker launcher needs to start a run
#[derive(Debug, Clone, Serialize)]
pub struct LaunchParameters {
    /// Run identifier, for logs
    pub run_id: String,
    /// Placement of every worker
    pub plan: PlacementPlan,
    /// Target executable
    pub executable: String,
    /// Arguments for the target executable
    pub arguments: Vec<String>,
    /// Host groups after division
    pub host_groups: Vec<HostGroup>,
    /// Worker pool size
    pub size: u32,
    /// Argv prefix starting the bootstrap
    pub interpreter: Vec<String>,
    /// Worker start directory
    pub path: Option<String>,
    /// Module search path exported to workers
    pub module_path: Option<String>,
    /// Host the broker runs on
    pub broker_host: String,
    /// Broker coordinates as seen from the broker host
    pub broker: BrokerEndpoint,
    /// Broker task port
    pub broker_port: u16,
    /// Broker info port
    pub meta_port: u16,
    /// Route broker traffic over ssh tunnels
    pub tunnel: bool,
    /// Verbosity level
    pub verbosity: u8,
    /// Process control mode
    pub process_control: Option<String>,
    /// Affinity algorithm
    pub affinity: Option<String>,
    /// Free origin policy
    pub free_origin: bool,
    /// Environment variable allow-list
    pub variables_to_pass: BTreeSet<String>,
    /// Launch environment snapshot
    #[serde(skip)]
    pub environment: EnvSnapshot,
}

/// Starts a broker and its workers
pub trait BrokerLauncher: Send + Sync {
    /// Launcher name, for logs
    fn name(&self) -> &str;

    /// Prepare a run
    fn launch(&self, params: LaunchParameters) -> ScoopletResult<Box<dyn BrokerApp>>;
}

/// A launched run
#[async_trait]
pub trait BrokerApp: Send {
    /// Start the workers and wait for the origin
    async fn run(&mut self) -> ScoopletResult<ExitStatus>;

    /// Stop the broker and every remaining worker
    async fn close(&mut self);
}
