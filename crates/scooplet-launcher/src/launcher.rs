//! Launch orchestration
//!
//! Resolves hosts and defaults, computes the placement plan, hands it to a
//! [`BrokerLauncher`] and guarantees the launched run is closed on every
//! path.

use scooplet_core::{
    BrokerEndpoint, ControlRegistry, ExitStatus, LaunchSettings, ScoopletError, ScoopletResult,
    WorkerTemplate,
};
use scooplet_scheduler::{unique_hosts, PlacementOptions, PlacementPlanner};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::broker::{BrokerLauncher, LaunchParameters};
use crate::command::{env_snapshot, EnvSnapshot};
use crate::nodes::{default_workers_per_node, local_hostname};

/// One launch request
#[derive(Debug, Clone, Default)]
pub struct LaunchRequest {
    /// Target executable
    pub executable: String,
    /// Arguments for the target executable
    pub arguments: Vec<String>,
    /// Ordered host list, empty for the local machine
    pub hosts: Vec<String>,
    /// Worker pool size
    pub size: Option<u32>,
    /// Run the executable through this worker module
    pub module: Option<String>,
    /// Debug mode
    pub debug: bool,
    /// Verbosity level
    pub verbosity: u8,
}

/// Launches runs from settings and requests
pub struct Launcher {
    settings: LaunchSettings,
    registry: Option<ControlRegistry>,
    broker_launcher: Arc<dyn BrokerLauncher>,
    environment: Option<EnvSnapshot>,
}

impl Launcher {
    /// Create a new launcher
    pub fn new(settings: LaunchSettings, broker_launcher: Arc<dyn BrokerLauncher>) -> Self {
        Self {
            settings,
            registry: None,
            broker_launcher,
            environment: None,
        }
    }

    /// Check process control requests against a registry while planning
    pub fn with_registry(mut self, registry: ControlRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Use a fixed environment instead of the process environment
    pub fn with_environment(mut self, environment: EnvSnapshot) -> Self {
        self.environment = Some(environment);
        self
    }

    /// Launch settings
    pub fn settings(&self) -> &LaunchSettings {
        &self.settings
    }

    /// Hosts for a request: the given list, else this machine once per slot
    pub fn resolve_hosts(&self, request: &LaunchRequest) -> ScoopletResult<Vec<String>> {
        if !request.hosts.is_empty() {
            return Ok(request.hosts.clone());
        }
        let ppn = self
            .settings
            .workers_per_node
            .unwrap_or_else(default_workers_per_node);
        Ok(vec![local_hostname()?; ppn as usize])
    }

    /// Worker pool size: requested, else workers per node times unique hosts
    ///
    /// Without a workers-per-node setting every host entry is one slot.
    pub fn resolve_size(&self, request: &LaunchRequest, hosts: &[String]) -> u32 {
        if let Some(size) = request.size {
            return size;
        }
        match self.settings.workers_per_node {
            Some(ppn) => ppn * unique_hosts(hosts).len() as u32,
            None => hosts.len() as u32,
        }
    }

    /// Variables passed to workers: the allow-list plus prefixed names
    pub fn variables_to_pass(&self, environment: &EnvSnapshot) -> BTreeSet<String> {
        let mut names: BTreeSet<String> = self.settings.pass_variables.iter().cloned().collect();
        for name in environment.keys() {
            if self
                .settings
                .pass_prefixes
                .iter()
                .any(|prefix| name.starts_with(prefix.as_str()))
            {
                names.insert(name.clone());
            }
        }
        names
    }

    /// Resolve a request into launch parameters
    pub fn prepare(&self, request: &LaunchRequest) -> ScoopletResult<LaunchParameters> {
        if request.executable.is_empty() {
            return Err(ScoopletError::Config("no executable given".to_string()));
        }

        let environment = self.environment.clone().unwrap_or_else(env_snapshot);
        let hosts = self.resolve_hosts(request)?;
        let size = self.resolve_size(request, &hosts);

        let broker_host = match &self.settings.broker {
            Some(host) => host.clone(),
            None => unique_hosts(&hosts)
                .into_iter()
                .next()
                .ok_or_else(|| ScoopletError::Config("no broker host".to_string()))?,
        };
        let broker = BrokerEndpoint::new(
            self.settings.broker_name.clone(),
            &broker_host,
            self.settings.broker_port,
            self.settings.meta_port,
        );

        let (executable, arguments) = match &request.module {
            Some(module) => {
                let mut arguments = vec![request.executable.clone()];
                arguments.extend(request.arguments.iter().cloned());
                (module.clone(), arguments)
            }
            None => (request.executable.clone(), request.arguments.clone()),
        };

        let start_from = match &self.settings.path {
            Some(path) => Some(path.display().to_string()),
            None => std::env::current_dir()
                .ok()
                .map(|path| path.display().to_string()),
        };

        let variables_to_pass = self.variables_to_pass(&environment);
        let template = WorkerTemplate {
            interpreter: self.settings.interpreter.clone(),
            module_path: self.settings.module_path.clone(),
            executable: executable.clone(),
            arguments: arguments.clone(),
            broker: broker.clone(),
            start_from: start_from.clone(),
            prolog: self.settings.prolog.clone(),
            nice: (self.settings.nice != 0).then_some(self.settings.nice),
            process_control: self.settings.process_control.clone(),
            variables_to_pass: variables_to_pass.clone(),
            debug: request.debug,
            profile: self.settings.profile,
            verbosity: request.verbosity,
        };

        let mut planner = PlacementPlanner::new(PlacementOptions {
            size,
            free_origin: self.settings.free_origin,
            affinity_algorithm: self.settings.affinity.clone(),
            template,
        });
        if let Some(registry) = &self.registry {
            planner = planner.with_registry(registry.clone());
        }
        let plan = planner.plan(&hosts)?;

        Ok(LaunchParameters {
            run_id: Uuid::new_v4().to_string(),
            host_groups: plan.host_groups.clone(),
            plan,
            executable,
            arguments,
            size,
            interpreter: self.settings.interpreter.clone(),
            path: start_from,
            module_path: self.settings.module_path.clone(),
            broker_host,
            broker,
            broker_port: self.settings.broker_port,
            meta_port: self.settings.meta_port,
            tunnel: self.settings.tunnel,
            verbosity: request.verbosity,
            process_control: self.settings.process_control.clone(),
            affinity: self.settings.affinity.clone(),
            free_origin: self.settings.free_origin,
            variables_to_pass,
            environment,
        })
    }

    /// Launch a run and wait for its origin
    pub async fn run(&self, request: LaunchRequest) -> ScoopletResult<ExitStatus> {
        let params = match self.prepare(&request) {
            Ok(params) => params,
            Err(e) => {
                error!(executable = %request.executable, error = %e, "Failed to prepare launch");
                return Err(e);
            }
        };

        let span = info_span!("launch", run_id = %params.run_id);
        self.run_prepared(params).instrument(span).await
    }

    async fn run_prepared(&self, params: LaunchParameters) -> ScoopletResult<ExitStatus> {
        for warning in &params.plan.warnings {
            warn!("{}", warning);
        }
        info!(
            executable = %params.executable,
            workers = params.plan.len(),
            hosts = params.host_groups.len(),
            broker = %params.broker.address,
            launcher = self.broker_launcher.name(),
            "Launching"
        );

        let executable = params.executable.clone();
        let mut app = match self.broker_launcher.launch(params) {
            Ok(app) => app,
            Err(e) => {
                error!(executable = %executable, error = %e, "Failed to launch");
                return Err(e);
            }
        };

        let result = app.run().await;
        app.close().await;
        debug!("Launch closed");

        match &result {
            Ok(status) if status.success() => info!(exit_code = status.code(), "Run finished"),
            Ok(status) => warn!(exit_code = status.code(), "Origin exited with failure"),
            Err(e) => error!(executable = %executable, error = %e, "Run failed"),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::BrokerApp;
    use async_trait::async_trait;
    use scooplet_core::ConfigWarning;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Record {
        params: Option<LaunchParameters>,
        ran: bool,
        closed: bool,
    }

    struct FakeLauncher {
        record: Arc<Mutex<Record>>,
        outcome: fn() -> ScoopletResult<ExitStatus>,
        refuse: bool,
    }

    struct FakeApp {
        record: Arc<Mutex<Record>>,
        outcome: fn() -> ScoopletResult<ExitStatus>,
    }

    impl BrokerLauncher for FakeLauncher {
        fn name(&self) -> &str {
            "fake"
        }

        fn launch(&self, params: LaunchParameters) -> ScoopletResult<Box<dyn BrokerApp>> {
            if self.refuse {
                return Err(ScoopletError::Launch("refused".to_string()));
            }
            self.record.lock().unwrap().params = Some(params);
            Ok(Box::new(FakeApp {
                record: self.record.clone(),
                outcome: self.outcome,
            }))
        }
    }

    #[async_trait]
    impl BrokerApp for FakeApp {
        async fn run(&mut self) -> ScoopletResult<ExitStatus> {
            self.record.lock().unwrap().ran = true;
            (self.outcome)()
        }

        async fn close(&mut self) {
            self.record.lock().unwrap().closed = true;
        }
    }

    fn fake_launcher(
        settings: LaunchSettings,
        outcome: fn() -> ScoopletResult<ExitStatus>,
        refuse: bool,
    ) -> (Launcher, Arc<Mutex<Record>>) {
        let record = Arc::new(Mutex::new(Record::default()));
        let fake = FakeLauncher {
            record: record.clone(),
            outcome,
            refuse,
        };
        let environment: EnvSnapshot = [
            ("PATH", "/usr/bin"),
            ("HOME", "/home/user"),
            ("SCOOPLET_LOG", "debug"),
        ]
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        let launcher = Launcher::new(settings, Arc::new(fake)).with_environment(environment);
        (launcher, record)
    }

    fn request(hosts: &[&str]) -> LaunchRequest {
        LaunchRequest {
            executable: "job.sh".to_string(),
            arguments: vec!["--fast".to_string()],
            hosts: hosts.iter().map(|h| h.to_string()).collect(),
            verbosity: 1,
            ..Default::default()
        }
    }

    fn ok_three() -> ScoopletResult<ExitStatus> {
        Ok(ExitStatus(3))
    }

    fn failing() -> ScoopletResult<ExitStatus> {
        Err(ScoopletError::Launch("worker died".to_string()))
    }

    #[test]
    fn test_default_size_and_broker() {
        let (launcher, _) = fake_launcher(LaunchSettings::default(), ok_three, false);
        let params = launcher.prepare(&request(&["a", "a", "b", "b"])).unwrap();

        assert_eq!(params.size, 4);
        assert_eq!(params.plan.len(), 4);
        assert_eq!(params.broker_host, "a");
        assert_eq!(params.broker.address, "tcp://a:5555");
        assert_eq!(params.broker.meta_address, "tcp://a:5556");
    }

    #[test]
    fn test_size_defaults_to_host_slots() {
        let (launcher, _) = fake_launcher(LaunchSettings::default(), ok_three, false);
        let hosts: Vec<String> = ["a", "a", "a", "b"].iter().map(|h| h.to_string()).collect();

        assert_eq!(launcher.resolve_size(&LaunchRequest::default(), &hosts), 4);
        let params = launcher.prepare(&request(&["a", "a", "a", "b"])).unwrap();
        assert_eq!(params.plan.len(), 4);
        assert_eq!(params.plan.on_host("a").count(), 3);
    }

    #[test]
    fn test_size_from_workers_per_node() {
        let settings = LaunchSettings {
            workers_per_node: Some(3),
            broker: Some("head".to_string()),
            ..Default::default()
        };
        let (launcher, _) = fake_launcher(settings, ok_three, false);
        let params = launcher.prepare(&request(&["a", "b"])).unwrap();

        assert_eq!(params.size, 6);
        assert_eq!(params.broker_host, "head");

        let mut explicit = request(&["a", "b"]);
        explicit.size = Some(5);
        assert_eq!(launcher.prepare(&explicit).unwrap().plan.len(), 5);
    }

    #[test]
    fn test_module_wraps_executable() {
        let (launcher, _) = fake_launcher(LaunchSettings::default(), ok_three, false);
        let mut req = request(&["a"]);
        req.module = Some("simple_shell".to_string());

        let params = launcher.prepare(&req).unwrap();
        assert_eq!(params.executable, "simple_shell");
        assert_eq!(params.arguments, vec!["job.sh", "--fast"]);
        assert_eq!(params.plan.descriptors[0].executable, "simple_shell");
    }

    #[test]
    fn test_variables_to_pass() {
        let (launcher, _) = fake_launcher(LaunchSettings::default(), ok_three, false);
        let params = launcher.prepare(&request(&["a"])).unwrap();

        assert!(params.variables_to_pass.contains("PATH"));
        assert!(params.variables_to_pass.contains("SCOOPLET_LOG"));
        assert!(!params.variables_to_pass.contains("HOME"));
    }

    #[test]
    fn test_zero_nice_is_not_requested() {
        let (launcher, _) = fake_launcher(LaunchSettings::default(), ok_three, false);
        let params = launcher.prepare(&request(&["a"])).unwrap();
        assert!(params.plan.descriptors.iter().all(|d| d.nice.is_none()));

        let settings = LaunchSettings {
            nice: 5,
            ..Default::default()
        };
        let (launcher, _) = fake_launcher(settings, ok_three, false);
        let params = launcher.prepare(&request(&["a"])).unwrap();
        assert!(params.plan.descriptors.iter().all(|d| d.nice == Some(5)));
    }

    #[test]
    fn test_registry_warnings_reach_plan() {
        let settings = LaunchSettings {
            nice: 5,
            ..Default::default()
        };
        let (launcher, _) = fake_launcher(settings, ok_three, false);
        let launcher = launcher.with_registry(ControlRegistry::new());
        let params = launcher.prepare(&request(&["a"])).unwrap();

        assert!(params.plan.warnings.contains(&ConfigWarning::NoPriorityBackend {
            mode: Some("native".to_string())
        }));
    }

    #[test]
    fn test_missing_executable() {
        let (launcher, _) = fake_launcher(LaunchSettings::default(), ok_three, false);
        let mut req = request(&["a"]);
        req.executable.clear();
        assert!(launcher.prepare(&req).is_err());
    }

    #[tokio::test]
    async fn test_run_returns_origin_status_and_closes() {
        let (launcher, record) = fake_launcher(LaunchSettings::default(), ok_three, false);
        let status = launcher.run(request(&["a", "b"])).await.unwrap();

        assert_eq!(status, ExitStatus(3));
        let record = record.lock().unwrap();
        assert!(record.ran);
        assert!(record.closed);
        assert_eq!(record.params.as_ref().map(|p| p.plan.len()), Some(2));
    }

    #[tokio::test]
    async fn test_run_failure_still_closes() {
        let (launcher, record) = fake_launcher(LaunchSettings::default(), failing, false);
        assert!(launcher.run(request(&["a"])).await.is_err());

        let record = record.lock().unwrap();
        assert!(record.ran);
        assert!(record.closed);
    }

    #[tokio::test]
    async fn test_launch_refused() {
        let (launcher, record) = fake_launcher(LaunchSettings::default(), ok_three, true);
        assert!(launcher.run(request(&["a"])).await.is_err());
        assert!(!record.lock().unwrap().ran);
    }
}
