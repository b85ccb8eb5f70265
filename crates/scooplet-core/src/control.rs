//! Process control capability lookup
//!
//! Priority and affinity backends are registered per process control mode
//! (and, for affinity, per algorithm). Callers never pick a backend
//! directly; they ask the registry, which returns zero or one match.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::{ScoopletError, ScoopletResult};

/// Backend able to change the priority of the current process
pub trait PriorityControl: Send + Sync {
    /// Set the nice level of the current process
    fn set_priority(&self, nice: i32) -> ScoopletResult<()>;
}

/// Backend able to pin the current process to a set of cores
pub trait AffinityControl: Send + Sync {
    /// Apply the algorithm with its positional parameters
    fn apply(&self, params: &[String]) -> ScoopletResult<()>;
}

/// Parsed `ALGO:PARAM1:PARAM2:...` affinity argument
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AffinityRequest {
    /// Algorithm name
    pub algorithm: String,
    /// Algorithm parameters, in order
    pub params: Vec<String>,
}

impl AffinityRequest {
    /// Parse an affinity argument
    pub fn parse(value: &str) -> ScoopletResult<Self> {
        let mut parts = value.split(':');
        let algorithm = parts.next().unwrap_or_default().trim();
        if algorithm.is_empty() {
            return Err(ScoopletError::Config(format!(
                "affinity '{}' has no algorithm",
                value
            )));
        }
        Ok(Self {
            algorithm: algorithm.to_string(),
            params: parts.map(str::to_string).collect(),
        })
    }
}

/// Registry of process control backends
#[derive(Default, Clone)]
pub struct ControlRegistry {
    priority: BTreeMap<String, Arc<dyn PriorityControl>>,
    affinity: BTreeMap<(String, String), Arc<dyn AffinityControl>>,
}

impl ControlRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a priority backend for a mode
    pub fn register_priority(
        &mut self,
        mode: impl Into<String>,
        control: Arc<dyn PriorityControl>,
    ) -> &mut Self {
        self.priority.insert(mode.into(), control);
        self
    }

    /// Register an affinity backend for a mode and algorithm
    pub fn register_affinity(
        &mut self,
        mode: impl Into<String>,
        algorithm: impl Into<String>,
        control: Arc<dyn AffinityControl>,
    ) -> &mut Self {
        self.affinity
            .insert((mode.into(), algorithm.into()), control);
        self
    }

    /// Priority backend for a mode
    pub fn what_priority(&self, mode: Option<&str>) -> Option<Arc<dyn PriorityControl>> {
        self.priority.get(mode?).cloned()
    }

    /// Affinity backend for a mode and algorithm
    pub fn what_affinity(
        &self,
        mode: Option<&str>,
        algorithm: &str,
    ) -> Option<Arc<dyn AffinityControl>> {
        self.affinity
            .get(&(mode?.to_string(), algorithm.to_string()))
            .cloned()
    }

    /// Registered modes, for diagnostics
    pub fn modes(&self) -> Vec<String> {
        let mut modes: Vec<String> = self
            .priority
            .keys()
            .chain(self.affinity.keys().map(|(mode, _)| mode))
            .cloned()
            .collect();
        modes.sort();
        modes.dedup();
        modes
    }
}

impl std::fmt::Debug for ControlRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlRegistry")
            .field("priority", &self.priority.keys().collect::<Vec<_>>())
            .field("affinity", &self.affinity.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;

    impl PriorityControl for Noop {
        fn set_priority(&self, _nice: i32) -> ScoopletResult<()> {
            Ok(())
        }
    }

    impl AffinityControl for Noop {
        fn apply(&self, _params: &[String]) -> ScoopletResult<()> {
            Ok(())
        }
    }

    #[test]
    fn test_affinity_request_parse() {
        let req = AffinityRequest::parse("basiccore:4:1").unwrap();
        assert_eq!(req.algorithm, "basiccore");
        assert_eq!(req.params, vec!["4".to_string(), "1".to_string()]);

        let bare = AffinityRequest::parse("spread").unwrap();
        assert!(bare.params.is_empty());

        assert!(AffinityRequest::parse(":1:2").is_err());
        assert!(AffinityRequest::parse("").is_err());
    }

    #[test]
    fn test_lookup_by_mode() {
        let mut registry = ControlRegistry::new();
        registry.register_priority("native", Arc::new(Noop));
        registry.register_affinity("native", "basiccore", Arc::new(Noop));

        assert!(registry.what_priority(Some("native")).is_some());
        assert!(registry.what_priority(Some("other")).is_none());
        assert!(registry.what_priority(None).is_none());

        assert!(registry.what_affinity(Some("native"), "basiccore").is_some());
        assert!(registry.what_affinity(Some("native"), "spread").is_none());
        assert!(registry.what_affinity(None, "basiccore").is_none());
    }

    #[test]
    fn test_modes() {
        let mut registry = ControlRegistry::new();
        registry
            .register_priority("native", Arc::new(Noop))
            .register_affinity("native", "basiccore", Arc::new(Noop))
            .register_affinity("cgroup", "basiccore", Arc::new(Noop));
        assert_eq!(registry.modes(), vec!["cgroup", "native"]);
    }
}
