//! scooplet-runtime: Worker-side runtime
//!
//! This crate provides everything a spawned worker runs at startup:
//! - The bootstrap state machine (priority, affinity, start directory)
//! - Worker module resolution and the plugin contract
//! - The native process control backend
//! - A profiling wrapper around the worker runtime

pub mod bootstrap;
pub mod control;
pub mod loader;
pub mod process;
pub mod profile;
pub mod traits;

pub use bootstrap::{Bootstrap, BootstrapArgs, BootstrapOutcome, BootstrapState};
pub use control::native_registry;
pub use loader::{ModuleLoader, PluginLoader, SearchPath};
pub use process::{ProcessPlugin, SimpleShell};
pub use profile::{ProfileRecord, ProfiledRuntime};
pub use traits::{LocalRuntime, WorkerContext, WorkerPlugin, WorkerRuntime};
