//! scooplet-scheduler: Worker placement for scooplet
//!
//! This crate turns a host list into a deterministic placement plan:
//! - Run-length host grouping and worker division
//! - Per-host worker indices for CPU affinity
//! - Free origin placement

pub mod hosts;
pub mod placement;

pub use hosts::{divide_hosts, group_hosts, unique_hosts};
pub use placement::{PlacementOptions, PlacementPlanner};
