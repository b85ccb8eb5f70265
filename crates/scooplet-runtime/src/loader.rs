//! Worker module resolution

use scooplet_core::{ScoopletError, ScoopletResult, MODULE_PATH_VAR};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use crate::process::{ProcessPlugin, SimpleShell};
use crate::traits::WorkerPlugin;

/// Ordered directories searched for worker modules
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchPath {
    dirs: Vec<PathBuf>,
}

impl SearchPath {
    /// Create a search path from directories
    pub fn new(dirs: Vec<PathBuf>) -> Self {
        Self { dirs }
    }

    /// Search path from `SCOOPLET_PATH`
    pub fn from_env() -> Self {
        let dirs = std::env::var_os(MODULE_PATH_VAR)
            .map(|value| {
                std::env::split_paths(&value)
                    .filter(|p| !p.as_os_str().is_empty())
                    .collect()
            })
            .unwrap_or_default();
        Self { dirs }
    }

    /// Append a directory unless already present
    pub fn push_if_absent(&mut self, dir: PathBuf) -> bool {
        if self.dirs.contains(&dir) {
            return false;
        }
        self.dirs.push(dir);
        true
    }

    /// Directories in search order
    pub fn dirs(&self) -> &[PathBuf] {
        &self.dirs
    }

    /// Last directory, reported on load failures
    pub fn last(&self) -> Option<&Path> {
        self.dirs.last().map(PathBuf::as_path)
    }
}

impl std::fmt::Display for SearchPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let joined: Vec<String> = self.dirs.iter().map(|d| d.display().to_string()).collect();
        write!(f, "{}", joined.join(":"))
    }
}

/// Module name of an executable: its file name without extension
pub fn module_name(executable: &str) -> String {
    Path::new(executable)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Resolves an executable to a loadable worker plugin
pub trait PluginLoader: Send + Sync {
    /// Load the module named by `executable` from the search path
    fn load(&self, executable: &str, search_path: &SearchPath)
        -> ScoopletResult<Arc<dyn WorkerPlugin>>;
}

/// Loader consulting built-in modules, then the search path
pub struct ModuleLoader {
    builtins: BTreeMap<String, Arc<dyn WorkerPlugin>>,
}

impl ModuleLoader {
    /// Create a loader with the standard built-in modules
    pub fn new() -> Self {
        let mut loader = Self::empty();
        loader.register(SimpleShell::NAME, Arc::new(SimpleShell));
        loader
    }

    /// Create a loader without built-in modules
    pub fn empty() -> Self {
        Self {
            builtins: BTreeMap::new(),
        }
    }

    /// Register a named in-process module
    pub fn register(&mut self, name: impl Into<String>, plugin: Arc<dyn WorkerPlugin>) {
        self.builtins.insert(name.into(), plugin);
    }

    /// Find a file for the module in one directory
    ///
    /// The exact file name wins; otherwise any file with the same stem,
    /// in name order.
    fn find_in(dir: &Path, file_name: &str, module: &str) -> Option<PathBuf> {
        let exact = dir.join(file_name);
        if exact.is_file() {
            return Some(exact);
        }

        let mut candidates: Vec<PathBuf> = std::fs::read_dir(dir)
            .ok()?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.is_file()
                    && path
                        .file_stem()
                        .is_some_and(|stem| stem.to_string_lossy() == module)
            })
            .collect();
        candidates.sort();
        candidates.into_iter().next()
    }
}

impl Default for ModuleLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl PluginLoader for ModuleLoader {
    fn load(
        &self,
        executable: &str,
        search_path: &SearchPath,
    ) -> ScoopletResult<Arc<dyn WorkerPlugin>> {
        let module = module_name(executable);
        if module.is_empty() {
            return Err(ScoopletError::Load(format!(
                "'{}' does not name a module",
                executable
            )));
        }

        if let Some(plugin) = self.builtins.get(&module) {
            debug!(module = %module, "Loaded built-in module");
            return Ok(plugin.clone());
        }

        let file_name = Path::new(executable)
            .file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| module.clone());

        for dir in search_path.dirs() {
            if let Some(path) = Self::find_in(dir, &file_name, &module) {
                debug!(module = %module, path = %path.display(), "Loaded module");
                return Ok(Arc::new(ProcessPlugin::new(module, path)));
            }
        }

        Err(ScoopletError::Load(format!("No module named {}", module)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_module_name() {
        assert_eq!(module_name("/home/user/job.py"), "job");
        assert_eq!(module_name("runner"), "runner");
        assert_eq!(module_name("dir/archive.tar.gz"), "archive.tar");
        assert_eq!(module_name(""), "");
    }

    #[test]
    fn test_search_path_push_if_absent() {
        let mut path = SearchPath::new(vec![PathBuf::from("/a")]);
        assert!(path.push_if_absent(PathBuf::from("/b")));
        assert!(!path.push_if_absent(PathBuf::from("/a")));
        assert_eq!(path.dirs().len(), 2);
        assert_eq!(path.last(), Some(Path::new("/b")));
        assert_eq!(path.to_string(), "/a:/b");
    }

    #[test]
    fn test_load_builtin() {
        let loader = ModuleLoader::new();
        let plugin = loader.load("simple_shell", &SearchPath::default()).unwrap();
        assert_eq!(plugin.name(), "simple_shell");
    }

    #[test]
    fn test_load_from_search_path() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("job.sh"), "#!/bin/sh\n").unwrap();

        let loader = ModuleLoader::empty();
        let search_path = SearchPath::new(vec![dir.path().to_path_buf()]);

        let plugin = loader.load("job.sh", &search_path).unwrap();
        assert_eq!(plugin.name(), "job");

        // same stem, other extension
        let plugin = loader.load("elsewhere/job.py", &search_path).unwrap();
        assert_eq!(plugin.name(), "job");
    }

    #[test]
    fn test_load_missing_module() {
        let dir = tempfile::tempdir().unwrap();
        let loader = ModuleLoader::new();
        let search_path = SearchPath::new(vec![dir.path().to_path_buf()]);

        let result = loader.load("/nonexistent/missing.py", &search_path);
        match result {
            Err(ScoopletError::Load(msg)) => assert_eq!(msg, "No module named missing"),
            _ => panic!("expected load error"),
        }
    }
}
