//! Error and warning types for scooplet

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for scooplet
#[derive(Error, Debug)]
pub enum ScoopletError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Placement error
    #[error("Placement error: {0}")]
    Placement(String),

    /// Broker launch error
    #[error("Launch error: {0}")]
    Launch(String),

    /// Worker module could not be loaded
    #[error("Load error: {0}")]
    Load(String),

    /// Process control (priority/affinity) error
    #[error("Process control error: {0}")]
    ProcessControl(String),

    /// Runtime error
    #[error("Runtime error: {0}")]
    Runtime(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type for scooplet operations
pub type ScoopletResult<T> = Result<T, ScoopletError>;

impl From<serde_json::Error> for ScoopletError {
    fn from(err: serde_json::Error) -> Self {
        ScoopletError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for ScoopletError {
    fn from(err: toml::de::Error) -> Self {
        ScoopletError::Config(format!("Failed to parse config: {}", err))
    }
}

/// Non-fatal condition surfaced to the caller instead of aborting.
///
/// Planning, command rendering and worker bootstrap all keep going in a
/// degraded (unconfigured) mode and hand these back for logging.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConfigWarning {
    /// A nice level was requested without a process control mode
    NiceWithoutProcessControl { worker_id: u32 },
    /// An affinity was requested without a process control mode
    AffinityWithoutProcessControl { worker_id: u32 },
    /// No priority backend is registered for the mode
    NoPriorityBackend { mode: Option<String> },
    /// No affinity backend is registered for the mode and algorithm
    NoAffinityBackend {
        mode: Option<String>,
        algorithm: String,
    },
    /// Setting the priority failed
    PriorityFailed { nice: i32, reason: String },
    /// Setting the affinity failed
    AffinityFailed { affinity: String, reason: String },
    /// Changing the working directory failed
    ChdirFailed { path: String, reason: String },
    /// Printing the process group id failed
    EchoGroupFailed { reason: String },
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigWarning::NiceWithoutProcessControl { worker_id } => {
                write!(f, "worker {}: nice is set, but no processcontrol", worker_id)
            }
            ConfigWarning::AffinityWithoutProcessControl { worker_id } => {
                write!(f, "worker {}: affinity is set, but no processcontrol", worker_id)
            }
            ConfigWarning::NoPriorityBackend { mode } => write!(
                f,
                "no priority backend found for processcontrol {}",
                mode.as_deref().unwrap_or("<none>")
            ),
            ConfigWarning::NoAffinityBackend { mode, algorithm } => write!(
                f,
                "no affinity backend found for processcontrol {} and algorithm {}",
                mode.as_deref().unwrap_or("<none>"),
                algorithm
            ),
            ConfigWarning::PriorityFailed { nice, reason } => {
                write!(f, "failed to set nice level {}: {}", nice, reason)
            }
            ConfigWarning::AffinityFailed { affinity, reason } => {
                write!(f, "failed to set affinity {}: {}", affinity, reason)
            }
            ConfigWarning::ChdirFailed { path, reason } => {
                write!(f, "failed to change directory to {}: {}", path, reason)
            }
            ConfigWarning::EchoGroupFailed { reason } => {
                write!(f, "failed to print the process group id: {}", reason)
            }
        }
    }
}
