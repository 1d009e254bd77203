//! Cluster bootstrap
//!
//! Brings freshly provisioned nodes to a running cluster:
//! 1. Runtime dependencies (cached by command-list digest)
//! 2. Head runtime on node 0
//! 3. Worker runtimes on every other node
//! 4. Skylet on every node
//!
//! Stages run strictly in order. A failing stage stops the bootstrap and
//! leaves [`ClusterBootstrap::state`] at the last stage that completed, so
//! calling [`ClusterBootstrap::run`] again resumes from there.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use stix_config::{Config, CoordinatorSettings, ProvisionSettings, SkyletSettings};
use stix_utils::{default_parallelism, CommandRunner, NodeRunner, SshCommandRunner};

use crate::exceptions::{Result, SkyError};

pub mod cache;
pub mod instance_setup;

pub use cache::{KeyValueStore, MemoryStore, ProvisioningCache, SqliteStore};
pub use instance_setup::{
    setup_dependencies, start_coordinator, start_skylet, start_workers, SETUP_DEPENDENCIES_STAGE,
};

/// How far a cluster has been brought up
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum BootstrapState {
    /// Nothing done yet
    Unprovisioned,
    /// Setup commands applied on every node
    DependenciesInstalled,
    /// Head runtime running
    CoordinatorRunning,
    /// Every worker joined the head
    WorkersRunning,
    /// Skylet running on every node
    ManagementDaemonInstalled,
}

impl fmt::Display for BootstrapState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unprovisioned => "unprovisioned",
            Self::DependenciesInstalled => "dependencies-installed",
            Self::CoordinatorRunning => "coordinator-running",
            Self::WorkersRunning => "workers-running",
            Self::ManagementDaemonInstalled => "management-daemon-installed",
        };
        f.write_str(name)
    }
}

/// SSH runners for `ips`, head first, configured from `settings`
pub fn runners_from_ips(ips: &[String], settings: &ProvisionSettings) -> Vec<Arc<dyn NodeRunner>> {
    ips.iter()
        .map(|ip| {
            let mut command_runner = CommandRunner::new();
            if let Some(secs) = settings.command_timeout_secs {
                command_runner = command_runner.timeout(Duration::from_secs(secs));
            }

            let mut runner = SshCommandRunner::new(ip.as_str(), settings.ssh_user.as_str())
                .port(settings.ssh_port)
                .connect_timeout(Duration::from_secs(settings.connect_timeout_secs))
                .with_runner(command_runner);
            if let Some(ref key) = settings.ssh_private_key {
                runner = runner.private_key(key);
            }
            Arc::new(runner) as Arc<dyn NodeRunner>
        })
        .collect()
}

/// Drives one cluster through the bootstrap stages
#[derive(Debug)]
pub struct ClusterBootstrap {
    cluster_name: String,
    runners: Vec<Arc<dyn NodeRunner>>,
    head_private_ip: String,
    setup_commands: Vec<String>,
    cache: Arc<ProvisioningCache>,
    coordinator: CoordinatorSettings,
    skylet: SkyletSettings,
    check_started: bool,
    parallelism: usize,
    state: BootstrapState,
}

impl ClusterBootstrap {
    /// Bootstrap for `runners` (head first). Workers join the head at
    /// `head_private_ip`.
    pub fn new(
        cluster_name: impl Into<String>,
        runners: Vec<Arc<dyn NodeRunner>>,
        head_private_ip: impl Into<String>,
        cache: Arc<ProvisioningCache>,
    ) -> Result<Self> {
        let cluster_name = cluster_name.into();
        if runners.is_empty() {
            return Err(SkyError::ProvisioningError(format!(
                "cluster {cluster_name} has no nodes"
            )));
        }

        let coordinator = CoordinatorSettings::default();
        Ok(Self {
            cluster_name,
            runners,
            head_private_ip: head_private_ip.into(),
            setup_commands: Vec::new(),
            cache,
            check_started: coordinator.check_started,
            coordinator,
            skylet: SkyletSettings::default(),
            parallelism: default_parallelism(),
            state: BootstrapState::Unprovisioned,
        })
    }

    /// Commands run on every node in the dependency stage
    pub fn with_setup_commands(mut self, commands: Vec<String>) -> Self {
        self.setup_commands = commands;
        self
    }

    /// Take coordinator, skylet and fan-out settings from `config`
    pub fn with_config(mut self, config: &Config) -> Self {
        self.coordinator = config.coordinator.clone();
        self.check_started = config.coordinator.check_started;
        self.skylet = config.skylet.clone();
        if let Some(limit) = config.provision.max_parallelism {
            self.parallelism = limit.max(1);
        }
        self
    }

    /// Upper bound on concurrent node operations
    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism.max(1);
        self
    }

    /// Last stage that completed
    pub fn state(&self) -> BootstrapState {
        self.state
    }

    /// Cluster name
    pub fn cluster_name(&self) -> &str {
        &self.cluster_name
    }

    /// Head node runner
    pub fn head(&self) -> &Arc<dyn NodeRunner> {
        &self.runners[0]
    }

    /// Worker runners
    pub fn workers(&self) -> &[Arc<dyn NodeRunner>] {
        &self.runners[1..]
    }

    /// Stage 1: apply setup commands on every node.
    ///
    /// Returns whether any command ran (`false` on a cache hit).
    pub async fn install_dependencies(&mut self) -> Result<bool> {
        self.expect_state("setup_dependencies", BootstrapState::Unprovisioned)?;
        info!(
            cluster = %self.cluster_name,
            "Phase 1/4: Installing dependencies on {} nodes",
            self.runners.len()
        );

        let ran = setup_dependencies(
            &self.cache,
            &self.cluster_name,
            &self.setup_commands,
            &self.runners,
            self.parallelism,
        )
        .await
        .map_err(|e| self.stage_failed("setup_dependencies", e))?;

        self.state = BootstrapState::DependenciesInstalled;
        Ok(ran)
    }

    /// Stage 2: start the head runtime.
    ///
    /// Returns whether it was started (`false` when `ray status` found it up).
    pub async fn start_coordinator(&mut self) -> Result<bool> {
        self.expect_state("start_coordinator", BootstrapState::DependenciesInstalled)?;
        info!(cluster = %self.cluster_name, "Phase 2/4: Starting head runtime");

        let started = start_coordinator(self.head().as_ref(), &self.coordinator, self.check_started)
            .await
            .map_err(|e| self.stage_failed("start_coordinator", e))?;

        self.state = BootstrapState::CoordinatorRunning;
        Ok(started)
    }

    /// Stage 3: join every worker to the head.
    pub async fn start_workers(&mut self) -> Result<()> {
        self.expect_state("start_workers", BootstrapState::CoordinatorRunning)?;
        info!(
            cluster = %self.cluster_name,
            "Phase 3/4: Starting {} worker runtimes",
            self.workers().len()
        );

        start_workers(
            self.workers(),
            &self.head_private_ip,
            &self.coordinator,
            self.parallelism,
        )
        .await
        .map_err(|e| self.stage_failed("start_workers", e))?;

        self.state = BootstrapState::WorkersRunning;
        Ok(())
    }

    /// Stage 4: start the skylet on every node.
    pub async fn install_management_daemon(&mut self) -> Result<()> {
        self.expect_state("start_skylet", BootstrapState::WorkersRunning)?;
        info!(cluster = %self.cluster_name, "Phase 4/4: Starting skylet");

        start_skylet(&self.runners, &self.skylet, self.parallelism)
            .await
            .map_err(|e| self.stage_failed("start_skylet", e))?;

        self.state = BootstrapState::ManagementDaemonInstalled;
        Ok(())
    }

    /// Run every remaining stage in order
    pub async fn run(&mut self) -> Result<BootstrapState> {
        loop {
            match self.state {
                BootstrapState::Unprovisioned => {
                    self.install_dependencies().await?;
                }
                BootstrapState::DependenciesInstalled => {
                    self.start_coordinator().await?;
                }
                BootstrapState::CoordinatorRunning => self.start_workers().await?,
                BootstrapState::WorkersRunning => self.install_management_daemon().await?,
                BootstrapState::ManagementDaemonInstalled => break,
            }
        }

        info!(cluster = %self.cluster_name, "Cluster is ready");
        Ok(self.state)
    }

    fn expect_state(&self, stage: &str, required: BootstrapState) -> Result<()> {
        if self.state != required {
            return Err(SkyError::ProvisioningError(format!(
                "stage {stage} needs cluster {} in state {required}, but it is {}",
                self.cluster_name, self.state
            )));
        }
        Ok(())
    }

    fn stage_failed(&self, stage: &'static str, source: SkyError) -> SkyError {
        error!(
            cluster = %self.cluster_name,
            stage,
            failed_nodes = ?source.failed_nodes(),
            "Bootstrap stage failed: {source}"
        );
        SkyError::StageFailed {
            stage,
            source: Box::new(source),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use stix_utils::{CommandOutput, CommandResult};

    /// Shared log of (node, command) across a whole cluster
    type Journal = Arc<Mutex<Vec<(String, String)>>>;

    #[derive(Debug)]
    struct JournalNode {
        id: String,
        fail_on: Option<&'static str>,
        journal: Journal,
    }

    #[async_trait]
    impl NodeRunner for JournalNode {
        fn node_id(&self) -> &str {
            &self.id
        }

        async fn execute(&self, command: &str, _stream_logs: bool) -> CommandResult<CommandOutput> {
            self.journal
                .lock()
                .unwrap()
                .push((self.id.clone(), command.to_string()));
            let failed = self.fail_on.is_some_and(|p| command.contains(p));
            Ok(CommandOutput {
                node: self.id.clone(),
                command: command.to_string(),
                exit_code: i32::from(failed),
                stdout: String::new(),
                stderr: String::new(),
                duration: Duration::ZERO,
            })
        }
    }

    fn cluster(size: usize, failing: Option<(usize, &'static str)>) -> (Vec<Arc<dyn NodeRunner>>, Journal) {
        let journal: Journal = Arc::default();
        let runners = (0..size)
            .map(|i| {
                Arc::new(JournalNode {
                    id: format!("10.0.0.{}", i + 1),
                    fail_on: failing.filter(|(idx, _)| *idx == i).map(|(_, p)| p),
                    journal: Arc::clone(&journal),
                }) as Arc<dyn NodeRunner>
            })
            .collect();
        (runners, journal)
    }

    fn bootstrap(runners: Vec<Arc<dyn NodeRunner>>, cache: Arc<ProvisioningCache>) -> ClusterBootstrap {
        ClusterBootstrap::new("c1", runners, "10.0.0.1", cache)
            .unwrap()
            .with_setup_commands(vec!["pip install ray".to_string()])
            .with_parallelism(4)
    }

    #[test]
    fn test_runners_from_ips() {
        let settings = ProvisionSettings {
            ssh_user: "gcpuser".to_string(),
            ..Default::default()
        };
        let ips = vec!["10.0.0.1".to_string(), "10.0.0.2".to_string()];
        let runners = runners_from_ips(&ips, &settings);
        let ids: Vec<&str> = runners.iter().map(|r| r.node_id()).collect();
        assert_eq!(ids, vec!["10.0.0.1", "10.0.0.2"]);
    }

    #[test]
    fn test_empty_cluster_rejected() {
        let cache = Arc::new(ProvisioningCache::in_memory());
        let err = ClusterBootstrap::new("c1", Vec::new(), "10.0.0.1", cache).unwrap_err();
        assert!(matches!(err, SkyError::ProvisioningError(_)));
    }

    #[tokio::test]
    async fn test_full_run_orders_stages() {
        let (runners, journal) = cluster(3, None);
        let mut bootstrap = bootstrap(runners, Arc::new(ProvisioningCache::in_memory()));

        assert_eq!(bootstrap.run().await.unwrap(), BootstrapState::ManagementDaemonInstalled);

        let journal = journal.lock().unwrap().clone();
        let last_setup = journal.iter().rposition(|(_, c)| c == "pip install ray").unwrap();
        let head_start = journal
            .iter()
            .position(|(n, c)| n == "10.0.0.1" && c.contains("--head"))
            .unwrap();
        let first_worker = journal
            .iter()
            .position(|(_, c)| c.contains("--address=10.0.0.1:6379"))
            .unwrap();
        let first_skylet = journal
            .iter()
            .position(|(_, c)| c.contains("sky.skylet.skylet"))
            .unwrap();

        assert!(last_setup < head_start);
        assert!(head_start < first_worker);
        assert!(first_worker < first_skylet);

        let workers: Vec<_> = journal.iter().filter(|(_, c)| c.contains("--address=")).collect();
        assert_eq!(workers.len(), 2);
        assert!(workers.iter().all(|(n, _)| n != "10.0.0.1"));
        assert_eq!(journal.iter().filter(|(_, c)| c.contains("skylet")).count(), 3);
    }

    #[tokio::test]
    async fn test_second_bootstrap_skips_cached_dependencies() {
        let cache = Arc::new(ProvisioningCache::in_memory());

        let (runners, _) = cluster(2, None);
        let mut first = bootstrap(runners, Arc::clone(&cache));
        assert!(first.install_dependencies().await.unwrap());

        let (runners, journal) = cluster(2, None);
        let mut second = bootstrap(runners, cache);
        assert!(!second.install_dependencies().await.unwrap());
        assert!(journal.lock().unwrap().is_empty());
        assert_eq!(second.state(), BootstrapState::DependenciesInstalled);
    }

    #[tokio::test]
    async fn test_failing_worker_stops_before_skylet() {
        let (runners, journal) = cluster(4, Some((2, "ray start")));
        let mut bootstrap = bootstrap(runners, Arc::new(ProvisioningCache::in_memory()));

        let err = bootstrap.run().await.unwrap_err();
        assert_eq!(err.failed_nodes(), vec!["10.0.0.3"]);
        assert!(matches!(err, SkyError::StageFailed { stage: "start_workers", .. }));
        assert_eq!(bootstrap.state(), BootstrapState::CoordinatorRunning);
        assert!(!journal.lock().unwrap().iter().any(|(_, c)| c.contains("skylet")));

        // Resuming retries the failed stage only.
        let before = journal.lock().unwrap().len();
        assert!(bootstrap.run().await.is_err());
        let retried = journal.lock().unwrap()[before..].to_vec();
        assert_eq!(retried.len(), 3);
        assert!(retried.iter().all(|(_, c)| c.contains("--address=")));
    }

    #[tokio::test]
    async fn test_stages_must_run_in_order() {
        let (runners, _) = cluster(1, None);
        let mut bootstrap = bootstrap(runners, Arc::new(ProvisioningCache::in_memory()));

        let err = bootstrap.start_workers().await.unwrap_err();
        assert!(matches!(err, SkyError::ProvisioningError(_)));
        assert_eq!(bootstrap.state(), BootstrapState::Unprovisioned);
    }

    #[tokio::test]
    async fn test_status_check_skips_running_head() {
        let (runners, journal) = cluster(1, None);
        let mut config = Config::default();
        config.coordinator.check_started = true;
        let mut bootstrap = bootstrap(runners, Arc::new(ProvisioningCache::in_memory())).with_config(&config);

        bootstrap.install_dependencies().await.unwrap();
        assert!(!bootstrap.start_coordinator().await.unwrap());
        assert!(!journal.lock().unwrap().iter().any(|(_, c)| c.contains("--head")));
    }

    #[test]
    fn test_state_order() {
        assert!(BootstrapState::Unprovisioned < BootstrapState::DependenciesInstalled);
        assert!(BootstrapState::WorkersRunning < BootstrapState::ManagementDaemonInstalled);
        assert_eq!(BootstrapState::CoordinatorRunning.to_string(), "coordinator-running");
    }
}
