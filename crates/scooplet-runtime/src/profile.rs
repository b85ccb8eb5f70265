//! Profiling wrapper around a worker runtime

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use scooplet_core::{ExitStatus, ScoopletResult};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

use crate::traits::{WorkerContext, WorkerPlugin, WorkerRuntime};

/// Profile of one worker run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileRecord {
    /// Worker name
    pub worker_name: String,
    /// Plugin name
    pub plugin: String,
    /// Start timestamp
    pub started_at: DateTime<Utc>,
    /// Wall-clock duration in milliseconds
    pub elapsed_ms: u64,
    /// Exit code, if the run completed
    pub exit_code: Option<i32>,
    /// Error message, if the run failed
    pub error: Option<String>,
}

/// Profile file name for a worker
pub fn profile_file_name(worker_name: &str) -> String {
    format!("{}.prof", worker_name)
}

/// Runtime that records a [`ProfileRecord`] for every startup
pub struct ProfiledRuntime<R> {
    inner: R,
    output_dir: PathBuf,
}

impl<R: WorkerRuntime> ProfiledRuntime<R> {
    /// Wrap a runtime, writing profiles into the working directory
    pub fn new(inner: R) -> Self {
        Self::with_output_dir(inner, PathBuf::from("."))
    }

    /// Wrap a runtime, writing profiles into `output_dir`
    pub fn with_output_dir(inner: R, output_dir: PathBuf) -> Self {
        Self { inner, output_dir }
    }
}

#[async_trait]
impl<R: WorkerRuntime> WorkerRuntime for ProfiledRuntime<R> {
    async fn startup(
        &self,
        plugin: Arc<dyn WorkerPlugin>,
        ctx: WorkerContext,
        args: Vec<String>,
    ) -> ScoopletResult<ExitStatus> {
        let worker_name = ctx.worker_name.clone();
        let plugin_name = plugin.name().to_string();
        let started_at = Utc::now();
        let start = Instant::now();

        let result = self.inner.startup(plugin, ctx, args).await;

        let record = ProfileRecord {
            worker_name: worker_name.clone(),
            plugin: plugin_name,
            started_at,
            elapsed_ms: start.elapsed().as_millis() as u64,
            exit_code: result.as_ref().ok().map(ExitStatus::code),
            error: result.as_ref().err().map(|e| e.to_string()),
        };

        let path = self.output_dir.join(profile_file_name(&worker_name));
        match serde_json::to_vec_pretty(&record) {
            Ok(bytes) => match tokio::fs::write(&path, bytes).await {
                Ok(()) => info!(path = %path.display(), "Profile saved"),
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to save profile"),
            },
            Err(e) => warn!(error = %e, "Failed to encode profile"),
        }

        result
    }

    fn name(&self) -> &'static str {
        "profiled"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::LocalRuntime;

    struct Sleepy;

    #[async_trait]
    impl WorkerPlugin for Sleepy {
        fn name(&self) -> &str {
            "sleepy"
        }

        async fn run(&self, _ctx: &WorkerContext, _args: &[String]) -> ScoopletResult<ExitStatus> {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            Ok(ExitStatus(4))
        }
    }

    fn context() -> WorkerContext {
        WorkerContext {
            worker_name: "worker12".to_string(),
            broker_name: "broker".to_string(),
            broker_address: "tcp://127.0.0.1:5555".to_string(),
            meta_address: "tcp://127.0.0.1:5556".to_string(),
            size: 16,
            is_origin: false,
            free_origin: false,
            debug: false,
        }
    }

    #[test]
    fn test_profile_file_name() {
        assert_eq!(profile_file_name("worker3"), "worker3.prof");
    }

    #[tokio::test]
    async fn test_profiled_runtime_writes_record() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = ProfiledRuntime::with_output_dir(LocalRuntime, dir.path().to_path_buf());

        let status = runtime
            .startup(Arc::new(Sleepy), context(), Vec::new())
            .await
            .unwrap();
        assert_eq!(status, ExitStatus(4));

        let bytes = std::fs::read(dir.path().join("worker12.prof")).unwrap();
        let record: ProfileRecord = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(record.worker_name, "worker12");
        assert_eq!(record.plugin, "sleepy");
        assert_eq!(record.exit_code, Some(4));
        assert!(record.error.is_none());
        assert!(record.elapsed_ms >= 5);
    }
}
