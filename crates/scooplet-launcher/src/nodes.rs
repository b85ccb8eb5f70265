//! Host list sources and local host detection

use scooplet_core::{ScoopletError, ScoopletResult};
use std::collections::BTreeSet;
use std::path::Path;

/// Parse hostfile text
///
/// One host per line, optionally followed by a slot count
/// (`node001 4` or `node001 slots=4`). Blank lines and `#` comments are
/// skipped. A host with `n` slots appears `n` times, consecutively.
pub fn parse_hosts(text: &str) -> ScoopletResult<Vec<String>> {
    let mut hosts = Vec::new();
    for (lineno, line) in text.lines().enumerate() {
        let line = line.split('#').next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }

        let mut fields = line.split_whitespace();
        let Some(host) = fields.next() else {
            continue;
        };
        let slots = match fields.next() {
            None => 1,
            Some(field) => {
                let count = field.strip_prefix("slots=").unwrap_or(field);
                count.parse::<u32>().map_err(|e| {
                    ScoopletError::Config(format!(
                        "hostfile line {}: bad slot count {:?}: {}",
                        lineno + 1,
                        field,
                        e
                    ))
                })?
            }
        };

        hosts.extend(std::iter::repeat(host.to_string()).take(slots as usize));
    }
    Ok(hosts)
}

/// Read a hostfile
pub fn read_hostfile(path: &Path) -> ScoopletResult<Vec<String>> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        ScoopletError::Config(format!("Failed to read hostfile {}: {}", path.display(), e))
    })?;
    parse_hosts(&text)
}

/// Split a comma separated host list
pub fn split_hosts(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .map(str::to_string)
        .collect()
}

/// Name of this machine
pub fn local_hostname() -> ScoopletResult<String> {
    let mut buf = [0u8; 256];
    // SAFETY: the buffer is valid for `buf.len()` bytes.
    let rc = unsafe { libc::gethostname(buf.as_mut_ptr() as *mut libc::c_char, buf.len()) };
    if rc != 0 {
        return Err(ScoopletError::Io(std::io::Error::last_os_error()));
    }
    let end = buf.iter().position(|b| *b == 0).unwrap_or(buf.len());
    let name = String::from_utf8_lossy(&buf[..end]).into_owned();
    if name.is_empty() {
        return Err(ScoopletError::Config("empty local hostname".to_string()));
    }
    Ok(name)
}

/// Workers per node when none is configured
pub fn default_workers_per_node() -> u32 {
    std::thread::available_parallelism()
        .map(|n| n.get() as u32)
        .unwrap_or(1)
}

/// Names that refer to this machine
#[derive(Debug, Clone, Default)]
pub struct LocalHosts {
    names: BTreeSet<String>,
}

impl LocalHosts {
    /// Loopback names only
    pub fn loopback() -> Self {
        let names = ["localhost", "127.0.0.1", "::1"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        Self { names }
    }

    /// Loopback names plus this machine's hostname
    pub fn detect() -> Self {
        let mut hosts = Self::loopback();
        if let Ok(name) = local_hostname() {
            hosts.add(&name);
        }
        hosts
    }

    /// Add a name, and its short form when it is qualified
    pub fn add(&mut self, name: &str) {
        self.names.insert(name.to_string());
        if let Some((short, _)) = name.split_once('.') {
            if short.parse::<u8>().is_err() {
                self.names.insert(short.to_string());
            }
        }
    }

    /// Whether a host is this machine
    pub fn is_local(&self, host: &str) -> bool {
        self.names.contains(host)
    }
}
