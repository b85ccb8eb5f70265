//! scooplet-launcher: Worker launch for scooplet
//!
//! This crate starts a placement plan on real hosts:
//! - Worker command rendering with composable strategies
//! - Host sources (host lists, hostfiles, the local machine)
//! - Shell and ssh based broker launching
//! - Launch orchestration with guaranteed cleanup

pub mod broker;
pub mod command;
pub mod launcher;
pub mod nodes;
pub mod shell;

pub use broker::{BrokerApp, BrokerLauncher, LaunchParameters};
pub use command::{
    env_snapshot, is_shell_name, shell_quote, BaseCommandBuilder, CommandAugmenter, EnvSnapshot,
    EnvironmentDecorator, FreeOriginFlag, OptionAugmenter, PassVariables, ProcessControlOptions,
    Prolog, RenderedCommand, WorkerCommandBuilder,
};
pub use launcher::{LaunchRequest, Launcher};
pub use nodes::{local_hostname, parse_hosts, read_hostfile, split_hosts, LocalHosts};
pub use shell::{ShellApp, ShellBroker};
