//! Worker placement decisions
//!
//! Turns an ordered host list into one [`WorkerDescriptor`] per worker.
//! Host groups are visited last-to-first, so the final planned worker (the
//! origin) always lands on the first host. Under the free origin policy the
//! first host is listed once more, the origin takes that extra slot, and it
//! is carved out of its host's core-sharing accounting.

use scooplet_core::{
    AffinitySpec, ConfigWarning, ControlRegistry, PlacementPlan, ScoopletError, ScoopletResult,
    WorkerDescriptor, WorkerTemplate,
};
use tracing::{debug, info, warn};

use crate::hosts::{divide_hosts, group_hosts};

/// Global options a plan is derived from
#[derive(Debug, Clone, Default)]
pub struct PlacementOptions {
    /// Requested number of workers
    pub size: u32,
    /// Run the origin as an extra, affinity-excluded process
    pub free_origin: bool,
    /// Affinity algorithm, if workers should be pinned
    pub affinity_algorithm: Option<String>,
    /// Settings shared by every worker
    pub template: WorkerTemplate,
}

/// Computes placement plans
pub struct PlacementPlanner {
    options: PlacementOptions,
    registry: Option<ControlRegistry>,
}

impl PlacementPlanner {
    /// Create a new planner
    pub fn new(options: PlacementOptions) -> Self {
        Self {
            options,
            registry: None,
        }
    }

    /// Check requested process control against a registry while planning
    pub fn with_registry(mut self, registry: ControlRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Build the plan for an ordered host list
    pub fn plan(&self, hosts: &[String]) -> ScoopletResult<PlacementPlan> {
        let mut hosts = hosts.to_vec();
        let mut size = self.options.size;

        if hosts.is_empty() {
            if size == 0 {
                return Ok(PlacementPlan::default());
            }
            return Err(ScoopletError::Placement(format!(
                "no hosts to place {} workers on",
                size
            )));
        }

        if self.options.free_origin {
            // the origin takes an extra slot on the first host
            hosts.insert(0, hosts[0].clone());
            size += 1;
        }

        let host_groups = divide_hosts(group_hosts(&hosts), size);

        let mut descriptors: Vec<WorkerDescriptor> = Vec::with_capacity(size as usize);
        let mut origin_group = 0..0;

        for group in host_groups.iter().rev() {
            let start = descriptors.len();
            for worker_idx in 0..group.worker_count {
                let worker_id = descriptors.len() as u32;
                let mut descriptor = WorkerDescriptor::from_template(
                    &self.options.template,
                    worker_id,
                    &group.host_name,
                    group.worker_count,
                    size,
                );
                descriptor.affinity =
                    self.options
                        .affinity_algorithm
                        .as_ref()
                        .map(|algorithm| AffinitySpec {
                            algorithm: algorithm.clone(),
                            total_workers_on_host: group.worker_count,
                            worker_idx_on_host: worker_idx,
                        });

                debug!(
                    worker_id = worker_id,
                    host = %group.host_name,
                    worker_idx_on_host = worker_idx,
                    "Worker placed"
                );
                descriptors.push(descriptor);
            }
            origin_group = start..descriptors.len();
        }

        if self.options.free_origin {
            carve_out_origin(&mut descriptors[origin_group]);
        }

        let warnings = self.policy_warnings();
        for warning in &warnings {
            warn!(warning = %warning, "Process control policy");
        }

        info!(
            workers = descriptors.len(),
            host_groups = host_groups.len(),
            free_origin = self.options.free_origin,
            "Placement plan computed"
        );

        Ok(PlacementPlan {
            descriptors,
            host_groups,
            warnings,
        })
    }

    /// Requested process control without a matching backend
    fn policy_warnings(&self) -> Vec<ConfigWarning> {
        let (Some(registry), Some(mode)) = (
            self.registry.as_ref(),
            self.options.template.process_control.as_deref(),
        ) else {
            return Vec::new();
        };

        let mut warnings = Vec::new();
        if self.options.template.nice.is_some_and(|nice| nice != 0)
            && registry.what_priority(Some(mode)).is_none()
        {
            warnings.push(ConfigWarning::NoPriorityBackend {
                mode: Some(mode.to_string()),
            });
        }
        if let Some(algorithm) = self.options.affinity_algorithm.as_deref() {
            if registry.what_affinity(Some(mode), algorithm).is_none() {
                warnings.push(ConfigWarning::NoAffinityBackend {
                    mode: Some(mode.to_string()),
                    algorithm: algorithm.to_string(),
                });
            }
        }
        warnings
    }
}

/// Mark the last descriptor of a host group as the free origin
///
/// Its siblings stop counting it when sharing cores; their index on the
/// host is unchanged since the origin holds the largest one.
fn carve_out_origin(group: &mut [WorkerDescriptor]) {
    let Some((origin, siblings)) = group.split_last_mut() else {
        return;
    };

    origin.is_origin = true;
    origin.free_origin = true;
    origin.affinity = None;

    for sibling in siblings {
        sibling.total_workers_on_host -= 1;
        sibling.free_origin = true;
        if let Some(affinity) = sibling.affinity.as_mut() {
            affinity.total_workers_on_host -= 1;
        }
    }

    debug!(
        worker_id = origin.worker_id,
        host = %origin.host_name,
        "Free origin carved out"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use scooplet_core::{AffinityControl, PriorityControl};
    use std::sync::Arc;

    fn hosts(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn options(size: u32, free_origin: bool) -> PlacementOptions {
        PlacementOptions {
            size,
            free_origin,
            affinity_algorithm: Some("basiccore".to_string()),
            template: WorkerTemplate {
                process_control: Some("native".to_string()),
                nice: Some(10),
                ..Default::default()
            },
        }
    }

    fn indices(plan: &PlacementPlan, host: &str) -> Vec<u32> {
        plan.on_host(host)
            .map(|d| d.affinity.as_ref().unwrap().worker_idx_on_host)
            .collect()
    }

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
    fn test_plan_two_hosts() {
        let planner = PlacementPlanner::new(options(4, false));
        let plan = planner.plan(&hosts(&["a", "a", "b", "b"])).unwrap();

        assert_eq!(plan.len(), 4);
        assert_eq!(indices(&plan, "a"), vec![0, 1]);
        assert_eq!(indices(&plan, "b"), vec![0, 1]);
        assert!(plan.descriptors.iter().all(|d| !d.is_origin));
        assert!(plan.descriptors.iter().all(|d| !d.free_origin));
        assert!(plan.descriptors.iter().all(|d| d.total_workers_on_host == 2));
    }

    #[test]
    fn test_plan_worker_ids_unique_and_ordered() {
        let planner = PlacementPlanner::new(options(6, false));
        let plan = planner.plan(&hosts(&["a", "b", "b", "c"])).unwrap();

        let ids: Vec<u32> = plan.descriptors.iter().map(|d| d.worker_id).collect();
        assert_eq!(ids, vec![0, 1, 2, 3, 4, 5]);
        // last host group is spawned first, origin slot ends on the first host
        assert_eq!(plan.descriptors[0].host_name, "c");
        assert_eq!(plan.descriptors.last().unwrap().host_name, "a");
    }

    #[test]
    fn test_plan_exact_size_for_any_host_list() {
        let host_list = hosts(&["a", "b", "a"]);
        for size in 0..10 {
            let planner = PlacementPlanner::new(options(size, false));
            let plan = planner.plan(&host_list).unwrap();
            assert_eq!(plan.len(), size as usize);
            for descriptor in &plan.descriptors {
                assert_eq!(descriptor.size, size);
            }
        }
    }

    #[test]
    fn test_plan_index_resets_per_group() {
        let planner = PlacementPlanner::new(options(5, false));
        let plan = planner.plan(&hosts(&["a", "a", "b", "b", "b"])).unwrap();

        // spawn order is b, b, b, a, a
        let idx: Vec<u32> = plan
            .descriptors
            .iter()
            .map(|d| d.affinity.as_ref().unwrap().worker_idx_on_host)
            .collect();
        assert_eq!(idx, vec![0, 1, 2, 0, 1]);
    }

    #[test]
    fn test_plan_free_origin() {
        let planner = PlacementPlanner::new(options(4, true));
        let plan = planner.plan(&hosts(&["a", "a", "b", "b"])).unwrap();

        assert_eq!(plan.len(), 5);

        let origins: Vec<&WorkerDescriptor> =
            plan.descriptors.iter().filter(|d| d.is_origin).collect();
        assert_eq!(origins.len(), 1);

        let origin = plan.descriptors.last().unwrap();
        assert!(origin.is_origin);
        assert!(origin.free_origin);
        assert_eq!(origin.host_name, "a");
        assert_eq!(origin.worker_id, 4);
        assert!(origin.affinity.is_none());

        let baseline = PlacementPlanner::new(options(5, false))
            .plan(&hosts(&["a", "a", "a", "b", "b"]))
            .unwrap();
        let baseline_total = baseline.on_host("a").next().unwrap().total_workers_on_host;
        assert_eq!(baseline_total, 3);

        let regular_a: Vec<&WorkerDescriptor> =
            plan.on_host("a").filter(|d| !d.is_origin).collect();
        assert_eq!(regular_a.len(), 2);
        for (idx, d) in regular_a.iter().enumerate() {
            assert_eq!(d.total_workers_on_host, baseline_total - 1);
            assert!(d.free_origin);
            let affinity = d.affinity.as_ref().unwrap();
            assert_eq!(affinity.total_workers_on_host, baseline_total - 1);
            assert_eq!(affinity.worker_idx_on_host, idx as u32);
        }

        for d in plan.on_host("b") {
            assert!(!d.free_origin);
            assert_eq!(d.total_workers_on_host, 2);
        }
    }

    #[test]
    fn test_plan_free_origin_single_host() {
        let planner = PlacementPlanner::new(options(1, true));
        let plan = planner.plan(&hosts(&["a"])).unwrap();

        assert_eq!(plan.len(), 2);
        assert_eq!(plan.descriptors[0].total_workers_on_host, 1);
        assert!(plan.descriptors[0].free_origin);
        assert!(plan.descriptors[1].is_origin);
    }

    #[test]
    fn test_plan_is_deterministic() {
        let planner = PlacementPlanner::new(options(7, true));
        let host_list = hosts(&["a", "a", "b", "c", "c"]);
        let first = planner.plan(&host_list).unwrap();
        let second = planner.plan(&host_list).unwrap();
        assert_eq!(first.descriptors, second.descriptors);
    }

    #[test]
    fn test_plan_without_affinity() {
        let mut opts = options(2, false);
        opts.affinity_algorithm = None;
        let plan = PlacementPlanner::new(opts).plan(&hosts(&["a", "a"])).unwrap();
        assert!(plan.descriptors.iter().all(|d| d.affinity.is_none()));
    }

    #[test]
    fn test_plan_empty_hosts() {
        let planner = PlacementPlanner::new(options(2, false));
        assert!(matches!(
            planner.plan(&[]),
            Err(ScoopletError::Placement(_))
        ));

        let planner = PlacementPlanner::new(options(0, false));
        assert!(planner.plan(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_plan_missing_backend_is_warning() {
        let planner = PlacementPlanner::new(options(2, false)).with_registry(ControlRegistry::new());
        let plan = planner.plan(&hosts(&["a", "a"])).unwrap();

        assert_eq!(plan.len(), 2);
        assert_eq!(
            plan.warnings,
            vec![
                ConfigWarning::NoPriorityBackend {
                    mode: Some("native".to_string())
                },
                ConfigWarning::NoAffinityBackend {
                    mode: Some("native".to_string()),
                    algorithm: "basiccore".to_string()
                },
            ]
        );
    }

    #[test]
    fn test_plan_matching_backend_no_warning() {
        let mut registry = ControlRegistry::new();
        registry
            .register_priority("native", Arc::new(Noop))
            .register_affinity("native", "basiccore", Arc::new(Noop));

        let planner = PlacementPlanner::new(options(2, false)).with_registry(registry);
        let plan = planner.plan(&hosts(&["a", "a"])).unwrap();
        assert!(plan.warnings.is_empty());
    }
}
