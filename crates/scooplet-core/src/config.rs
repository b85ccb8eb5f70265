//! Configuration types for scooplet

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Process control mode registered by the native backend
pub const DEFAULT_PROCESS_CONTROL: &str = "native";
/// Default affinity algorithm
pub const DEFAULT_AFFINITY_ALGORITHM: &str = "basiccore";
/// Environment variable carrying the worker module search path
pub const MODULE_PATH_VAR: &str = "SCOOPLET_PATH";

/// Main launcher configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LaunchConfig {
    /// Launch settings
    pub launch: LaunchSettings,
    /// Logging configuration
    pub logging: LoggingConfig,
}

impl LaunchConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, crate::ScoopletError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            crate::ScoopletError::Config(format!("Failed to read config file: {}", e))
        })?;
        Self::from_toml(&content)
    }

    /// Parse configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self, crate::ScoopletError> {
        Ok(toml::from_str(content)?)
    }
}

/// Settings for one launch
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LaunchSettings {
    /// Externally routable broker host (defaults to the first unique node)
    pub broker: Option<String>,
    /// Broker name
    pub broker_name: String,
    /// Broker task port
    pub broker_port: u16,
    /// Broker info port
    pub meta_port: u16,
    /// Command starting the broker on the control host, if any
    pub broker_command: Option<Vec<String>>,
    /// Workers per unique node, used for the default size
    pub workers_per_node: Option<u32>,
    /// Argv prefix starting the bootstrap on workers
    pub interpreter: Vec<String>,
    /// Module search path exported to workers
    pub module_path: Option<String>,
    /// Worker start directory (defaults to the current directory)
    pub path: Option<PathBuf>,
    /// Process control mode
    pub process_control: Option<String>,
    /// Nice level
    pub nice: i32,
    /// Affinity algorithm
    pub affinity: Option<String>,
    /// Run the origin as an extra process
    pub free_origin: bool,
    /// Route broker traffic over ssh tunnels
    pub tunnel: bool,
    /// Profile every worker
    pub profile: bool,
    /// Script sourced before the bootstrap on every worker
    pub prolog: Option<String>,
    /// Variables passed to workers when set
    pub pass_variables: Vec<String>,
    /// Variable prefixes passed to workers
    pub pass_prefixes: Vec<String>,
    /// Remote shell program
    pub ssh: Vec<String>,
}

impl Default for LaunchSettings {
    fn default() -> Self {
        Self {
            broker: None,
            broker_name: "broker".to_string(),
            broker_port: 5555,
            meta_port: 5556,
            broker_command: None,
            workers_per_node: None,
            interpreter: vec!["scooplet-bootstrap".to_string()],
            module_path: None,
            path: None,
            process_control: Some(DEFAULT_PROCESS_CONTROL.to_string()),
            nice: 0,
            affinity: Some(DEFAULT_AFFINITY_ALGORITHM.to_string()),
            free_origin: false,
            tunnel: false,
            profile: false,
            prolog: None,
            pass_variables: vec![
                "PATH".to_string(),
                "LD_LIBRARY_PATH".to_string(),
                MODULE_PATH_VAR.to_string(),
            ],
            pass_prefixes: vec!["SCOOPLET_".to_string()],
            ssh: vec![
                "ssh".to_string(),
                "-x".to_string(),
                "-oBatchMode=yes".to_string(),
            ],
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level
    pub level: String,
    /// Log format (json or text)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_launch_config() {
        let config = LaunchConfig::default();
        assert_eq!(config.launch.broker_port, 5555);
        assert_eq!(config.launch.meta_port, 5556);
        assert_eq!(config.launch.process_control.as_deref(), Some("native"));
        assert_eq!(config.launch.affinity.as_deref(), Some("basiccore"));
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_launch_config_parse() {
        let toml_str = r#"
[launch]
broker = "node001"
broker_port = 7000
workers_per_node = 8
free_origin = true
nice = 5
pass_variables = ["PATH", "OMP_NUM_THREADS"]

[logging]
level = "debug"
"#;
        let config = LaunchConfig::from_toml(toml_str).unwrap();
        assert_eq!(config.launch.broker.as_deref(), Some("node001"));
        assert_eq!(config.launch.broker_port, 7000);
        assert_eq!(config.launch.meta_port, 5556);
        assert_eq!(config.launch.workers_per_node, Some(8));
        assert!(config.launch.free_origin);
        assert_eq!(config.launch.nice, 5);
        assert_eq!(config.launch.pass_variables.len(), 2);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_launch_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scooplet.toml");
        std::fs::write(&path, "[launch]\ntunnel = true\n").unwrap();

        let config = LaunchConfig::from_file(&path).unwrap();
        assert!(config.launch.tunnel);

        let missing = LaunchConfig::from_file(&dir.path().join("missing.toml"));
        assert!(matches!(missing, Err(crate::ScoopletError::Config(_))));
    }

    #[test]
    fn test_launch_config_parse_error() {
        let result = LaunchConfig::from_toml("[launch]\nnice = \"high\"\n");
        match result {
            Err(crate::ScoopletError::Config(msg)) => {
                assert!(msg.starts_with("Failed to parse config"))
            }
            other => panic!("expected a config error, got {:?}", other),
        }
    }
}
