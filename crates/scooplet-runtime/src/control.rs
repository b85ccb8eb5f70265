//! Native process control backend
//!
//! Registered under the `native` process control mode. Priority goes
//! through `setpriority(2)`; the `basiccore` affinity algorithm pins each
//! worker to a contiguous block of cores through `sched_setaffinity(2)`.

use scooplet_core::{
    AffinityControl, ControlRegistry, PriorityControl, ScoopletError, ScoopletResult,
    DEFAULT_AFFINITY_ALGORITHM, DEFAULT_PROCESS_CONTROL,
};
use std::sync::Arc;
use tracing::debug;

/// Registry with the native backends for this platform
pub fn native_registry() -> ControlRegistry {
    let mut registry = ControlRegistry::new();

    #[cfg(unix)]
    registry.register_priority(DEFAULT_PROCESS_CONTROL, Arc::new(NativePriority));

    #[cfg(target_os = "linux")]
    registry.register_affinity(
        DEFAULT_PROCESS_CONTROL,
        DEFAULT_AFFINITY_ALGORITHM,
        Arc::new(BasicCoreAffinity),
    );

    registry
}

/// Priority through `setpriority(2)` on the current process
#[derive(Debug, Default, Clone, Copy)]
pub struct NativePriority;

#[cfg(unix)]
impl PriorityControl for NativePriority {
    fn set_priority(&self, nice: i32) -> ScoopletResult<()> {
        // SAFETY: setpriority only reads its scalar arguments.
        let rc = unsafe { libc::setpriority(libc::PRIO_PROCESS, 0, nice) };
        if rc != 0 {
            return Err(ScoopletError::ProcessControl(format!(
                "setpriority({}): {}",
                nice,
                std::io::Error::last_os_error()
            )));
        }
        debug!(nice = nice, "Priority set");
        Ok(())
    }
}

/// Cores for worker `idx` out of `total` workers sharing `ncpu` cores
///
/// Each worker gets `max(1, ncpu / total)` consecutive cores starting at
/// `idx * block`, wrapping around when workers outnumber cores.
pub fn basiccore_cores(ncpu: usize, total: usize, idx: usize) -> ScoopletResult<Vec<usize>> {
    if ncpu == 0 || total == 0 {
        return Err(ScoopletError::ProcessControl(format!(
            "basiccore needs cores and workers (ncpu {}, total {})",
            ncpu, total
        )));
    }
    if idx >= total {
        return Err(ScoopletError::ProcessControl(format!(
            "basiccore worker index {} out of range for {} workers",
            idx, total
        )));
    }

    let block = (ncpu / total).max(1);
    let start = (idx * block) % ncpu;
    Ok((0..block).map(|i| (start + i) % ncpu).collect())
}

/// Parse the `TOTAL:IDX` parameters of `basiccore`
pub fn basiccore_params(params: &[String]) -> ScoopletResult<(usize, usize)> {
    let parse = |name: &str, value: Option<&String>| -> ScoopletResult<usize> {
        value
            .ok_or_else(|| ScoopletError::ProcessControl(format!("basiccore: missing {}", name)))?
            .parse::<usize>()
            .map_err(|e| ScoopletError::ProcessControl(format!("basiccore: bad {}: {}", name, e)))
    };
    Ok((parse("total", params.first())?, parse("index", params.get(1))?))
}

/// Cores addressable through a `cpu_set_t`, out of `online`
#[cfg(target_os = "linux")]
pub fn usable_cpus(online: i64) -> usize {
    (online.max(1) as usize).min(libc::CPU_SETSIZE as usize)
}

/// `basiccore` affinity through `sched_setaffinity(2)`
#[derive(Debug, Default, Clone, Copy)]
pub struct BasicCoreAffinity;

#[cfg(target_os = "linux")]
impl AffinityControl for BasicCoreAffinity {
    fn apply(&self, params: &[String]) -> ScoopletResult<()> {
        let (total, idx) = basiccore_params(params)?;

        // SAFETY: sysconf has no memory-safety preconditions.
        let online = unsafe { libc::sysconf(libc::_SC_NPROCESSORS_ONLN) };
        let ncpu = usable_cpus(online as i64);
        let cores = basiccore_cores(ncpu, total, idx)?;

        // SAFETY: cpu_set_t is plain data; every index is below ncpu, which
        // usable_cpus caps at CPU_SETSIZE.
        let rc = unsafe {
            let mut set: libc::cpu_set_t = std::mem::zeroed();
            libc::CPU_ZERO(&mut set);
            for core in &cores {
                libc::CPU_SET(*core, &mut set);
            }
            libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &set)
        };
        if rc != 0 {
            return Err(ScoopletError::ProcessControl(format!(
                "sched_setaffinity({:?}): {}",
                cores,
                std::io::Error::last_os_error()
            )));
        }

        debug!(cores = ?cores, total = total, idx = idx, "Affinity set");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_basiccore_even_split() {
        assert_eq!(basiccore_cores(8, 4, 0).unwrap(), vec![0, 1]);
        assert_eq!(basiccore_cores(8, 4, 3).unwrap(), vec![6, 7]);
    }

    #[test]
    fn test_basiccore_more_workers_than_cores() {
        assert_eq!(basiccore_cores(2, 4, 0).unwrap(), vec![0]);
        assert_eq!(basiccore_cores(2, 4, 3).unwrap(), vec![1]);
    }

    #[test]
    fn test_basiccore_rejects_bad_input() {
        assert!(basiccore_cores(0, 1, 0).is_err());
        assert!(basiccore_cores(4, 0, 0).is_err());
        assert!(basiccore_cores(4, 2, 2).is_err());
    }

    #[test]
    fn test_basiccore_params() {
        assert_eq!(basiccore_params(&params(&["4", "1"])).unwrap(), (4, 1));
        assert!(basiccore_params(&params(&["4"])).is_err());
        assert!(basiccore_params(&params(&["four", "1"])).is_err());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_usable_cpus_fits_cpu_set() {
        assert_eq!(usable_cpus(8), 8);
        assert_eq!(usable_cpus(-1), 1);
        assert_eq!(usable_cpus(4096), libc::CPU_SETSIZE as usize);

        let cores = basiccore_cores(usable_cpus(4096), 2, 1).unwrap();
        assert!(cores.iter().all(|c| *c < libc::CPU_SETSIZE as usize));
    }

    #[test]
    fn test_native_registry_modes() {
        let registry = native_registry();
        #[cfg(unix)]
        assert!(registry.what_priority(Some("native")).is_some());
        #[cfg(target_os = "linux")]
        assert!(registry.what_affinity(Some("native"), "basiccore").is_some());
        assert!(registry.what_affinity(Some("native"), "unknown").is_none());
        assert!(registry.what_priority(Some("other")).is_none());
    }
}
