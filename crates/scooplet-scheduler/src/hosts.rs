//! Host list grouping and worker division

use scooplet_core::HostGroup;
use tracing::debug;

/// Run-length group an ordered host list, preserving order
///
/// A host listed twice in a row gets two slots; the same host appearing
/// again after another one starts a new group.
pub fn group_hosts(hosts: &[String]) -> Vec<HostGroup> {
    let mut groups: Vec<HostGroup> = Vec::new();
    for host in hosts {
        match groups.last_mut() {
            Some(group) if group.host_name == *host => group.worker_count += 1,
            _ => groups.push(HostGroup::new(host.clone(), 1)),
        }
    }
    groups
}

/// Fit host group slots to exactly `size` workers
///
/// Surplus workers are added one at a time round-robin from the first
/// group; a deficit is taken from the last group, dropping it once empty.
pub fn divide_hosts(mut groups: Vec<HostGroup>, size: u32) -> Vec<HostGroup> {
    if groups.is_empty() {
        return groups;
    }

    let mut slots: u32 = groups.iter().map(|g| g.worker_count).sum();

    if size > slots {
        let mut index = 0;
        while size > slots {
            groups[index].worker_count += 1;
            index = (index + 1) % groups.len();
            slots += 1;
        }
    } else {
        while size < slots {
            let Some(last) = groups.last_mut() else {
                break;
            };
            if last.worker_count > 1 {
                last.worker_count -= 1;
            } else {
                groups.pop();
            }
            slots -= 1;
        }
    }

    debug!(size = size, groups = groups.len(), "Divided workers over hosts");
    groups
}

/// Unique host names in first-appearance order
pub fn unique_hosts(hosts: &[String]) -> Vec<String> {
    let mut unique: Vec<String> = Vec::new();
    for host in hosts {
        if !unique.contains(host) {
            unique.push(host.clone());
        }
    }
    unique
}
