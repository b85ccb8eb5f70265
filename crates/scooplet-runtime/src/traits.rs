//! Worker plugin and runtime trait definitions

use async_trait::async_trait;
use scooplet_core::{ExitStatus, ScoopletError, ScoopletResult};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error};

/// Run configuration handed to worker code
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerContext {
    /// Worker name
    pub worker_name: String,
    /// Broker name
    pub broker_name: String,
    /// Broker task address
    pub broker_address: String,
    /// Broker info address
    pub meta_address: String,
    /// Worker pool size
    pub size: u32,
    /// Whether this worker is the origin
    pub is_origin: bool,
    /// Whether the free origin policy applies
    pub free_origin: bool,
    /// Debug mode
    pub debug: bool,
}

impl WorkerContext {
    /// Environment variables describing this context
    pub fn env_vars(&self) -> Vec<(&'static str, String)> {
        vec![
            ("SCOOPLET_WORKER_NAME", self.worker_name.clone()),
            ("SCOOPLET_WORKER_ORIGIN", u8::from(self.is_origin).to_string()),
            (
                "SCOOPLET_WORKER_FREEORIGIN",
                u8::from(self.free_origin).to_string(),
            ),
            ("SCOOPLET_BROKER_NAME", self.broker_name.clone()),
            ("SCOOPLET_BROKER_ADDRESS", self.broker_address.clone()),
            ("SCOOPLET_META_ADDRESS", self.meta_address.clone()),
            ("SCOOPLET_SIZE", self.size.to_string()),
            ("SCOOPLET_DEBUG", u8::from(self.debug).to_string()),
        ]
    }
}

/// A loadable unit of worker code
#[async_trait]
pub trait WorkerPlugin: Send + Sync {
    /// Plugin name
    fn name(&self) -> &str;

    /// Run the worker code to completion
    async fn run(&self, ctx: &WorkerContext, args: &[String]) -> ScoopletResult<ExitStatus>;
}

/// Startup entry point of the distributed execution runtime
#[async_trait]
pub trait WorkerRuntime: Send + Sync {
    /// Hand control to the plugin as the program's main unit
    async fn startup(
        &self,
        plugin: Arc<dyn WorkerPlugin>,
        ctx: WorkerContext,
        args: Vec<String>,
    ) -> ScoopletResult<ExitStatus>;

    /// Get the runtime name
    fn name(&self) -> &'static str;
}

/// Runs the plugin on a task of the current tokio runtime
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalRuntime;

#[async_trait]
impl WorkerRuntime for LocalRuntime {
    async fn startup(
        &self,
        plugin: Arc<dyn WorkerPlugin>,
        ctx: WorkerContext,
        args: Vec<String>,
    ) -> ScoopletResult<ExitStatus> {
        debug!(
            worker = %ctx.worker_name,
            plugin = plugin.name(),
            "Starting worker plugin"
        );

        let handle = tokio::spawn(async move { plugin.run(&ctx, &args).await });

        match handle.await {
            Ok(result) => result,
            Err(e) if e.is_panic() => {
                error!(error = %e, "Worker plugin panicked");
                Err(ScoopletError::Runtime(format!("worker plugin panicked: {}", e)))
            }
            Err(e) => Err(ScoopletError::Runtime(format!(
                "worker plugin was cancelled: {}",
                e
            ))),
        }
    }

    fn name(&self) -> &'static str {
        "local"
    }
}
