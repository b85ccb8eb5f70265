//! scooplet-core: Core types and traits for scooplet
//!
//! This crate provides the fundamental types used throughout the scooplet system:
//! - Worker descriptors, host groups and placement plans
//! - Process control capability lookup
//! - Configuration types
//! - Error and warning handling

pub mod config;
pub mod control;
pub mod error;
pub mod model;

pub use config::*;
pub use control::*;
pub use error::*;
pub use model::*;
