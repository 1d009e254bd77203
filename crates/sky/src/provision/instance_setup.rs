//! Instance setup: runtime dependencies, the Ray cluster and the skylet
//!
//! Each function here is one bootstrap stage acting on already-reachable
//! nodes. Node 0 of a cluster is the head; the rest are workers.

use std::sync::Arc;
use tracing::{debug, info, warn};

use stix_config::{CoordinatorSettings, SkyletSettings};
use stix_utils::{run_in_parallel, stage_digest, NodeRunner};

use crate::exceptions::Result;
use crate::provision::cache::ProvisioningCache;

/// Cache stage name for [`setup_dependencies`]
pub const SETUP_DEPENDENCIES_STAGE: &str = "setup_dependencies";

/// Liveness check for the head runtime
pub const RAY_STATUS_COMMAND: &str = "ray status";

/// Raise the open-file limit of every running raylet. Never fails.
pub fn raise_nofile_command(settings: &CoordinatorSettings) -> String {
    let limit = settings.nofile_limit;
    format!(
        "which prlimit && for id in $(pgrep -f raylet/raylet); \
         do sudo prlimit --nofile={limit}:{limit} --pid=$id || true; done"
    )
}

/// Stop-then-start the head runtime, then raise raylet limits.
///
/// The command's exit status is the one of `ray start`.
pub fn coordinator_start_command(settings: &CoordinatorSettings) -> String {
    format!(
        "ray stop; ray start --disable-usage-stats --head --port={} \
         --object-manager-port={} && ({}; true)",
        settings.control_port,
        settings.object_manager_port,
        raise_nofile_command(settings)
    )
}

/// Stop-then-start a worker runtime joined to `head_private_ip`.
pub fn worker_start_command(head_private_ip: &str, settings: &CoordinatorSettings) -> String {
    format!(
        "ray stop; ray start --disable-usage-stats --address={head_private_ip}:{} && ({}; true)",
        settings.control_port,
        raise_nofile_command(settings)
    )
}

/// Start the skylet unless a copy is already running.
///
/// The daemon is launched from a nested, backgrounded login shell so it
/// outlives the SSH session that started it.
pub fn skylet_start_command(settings: &SkyletSettings) -> String {
    let daemon = &settings.command;
    format!(
        "(ps aux | grep -v nohup | grep -v grep | grep -q -- \"{daemon}\") || \
         (bash -c 'source ~/.bashrc && nohup {daemon} >> {log} 2>&1 &' &> /dev/null &)",
        log = settings.log_path,
    )
}

/// Run `commands` in order on every node, once per distinct command list.
///
/// Returns `true` when the commands ran, `false` when the cache already had
/// this exact list recorded for `cluster`. Every node runs to completion
/// even if another fails; any failure is reported with all failing nodes
/// and leaves the cache untouched.
pub async fn setup_dependencies(
    cache: &ProvisioningCache,
    cluster: &str,
    commands: &[String],
    runners: &[Arc<dyn NodeRunner>],
    parallelism: usize,
) -> Result<bool> {
    let digest = stage_digest(commands);
    let commands: Arc<[String]> = commands.into();

    cache
        .with_cache_check(cluster, SETUP_DEPENDENCIES_STAGE, &digest, || async move {
            info!(cluster, nodes = runners.len(), commands = commands.len(), "Installing dependencies");
            run_in_parallel(runners, parallelism, move |runner| {
                let commands = Arc::clone(&commands);
                async move {
                    for command in commands.iter() {
                        runner.run_checked(command, false).await?;
                    }
                    Ok::<_, stix_utils::Error>(())
                }
            })
            .await
            .into_result()?;
            Ok(())
        })
        .await
}

/// Start the head runtime.
///
/// With `check_started`, a healthy `ray status` on the head skips the start
/// and returns `false`. A check that cannot run counts as unhealthy; the
/// start command stops any stale runtime first.
pub async fn start_coordinator(
    head: &dyn NodeRunner,
    settings: &CoordinatorSettings,
    check_started: bool,
) -> Result<bool> {
    if check_started {
        match head.run(RAY_STATUS_COMMAND, false).await {
            Ok(0) => {
                info!(node = head.node_id(), "Head runtime already running");
                return Ok(false);
            }
            Ok(code) => debug!(node = head.node_id(), exit_code = code, "Head runtime not running"),
            Err(e) => warn!(
                node = head.node_id(),
                error = %e,
                "Could not check head runtime, restarting it"
            ),
        }
    }

    info!(node = head.node_id(), "Starting head runtime");
    head.run_checked(&coordinator_start_command(settings), true)
        .await?;
    Ok(true)
}

/// Start the worker runtime on every worker, concurrently.
pub async fn start_workers(
    workers: &[Arc<dyn NodeRunner>],
    head_private_ip: &str,
    settings: &CoordinatorSettings,
    parallelism: usize,
) -> Result<()> {
    if workers.is_empty() {
        return Ok(());
    }

    info!(workers = workers.len(), head = head_private_ip, "Starting worker runtimes");
    let command: Arc<str> = worker_start_command(head_private_ip, settings).into();
    run_in_parallel(workers, parallelism, move |runner| {
        let command = Arc::clone(&command);
        async move { runner.run_checked(&command, false).await.map(|_| ()) }
    })
    .await
    .into_result()?;
    Ok(())
}

/// Make sure the skylet runs on every node.
pub async fn start_skylet(
    runners: &[Arc<dyn NodeRunner>],
    settings: &SkyletSettings,
    parallelism: usize,
) -> Result<()> {
    let command: Arc<str> = skylet_start_command(settings).into();
    run_in_parallel(runners, parallelism, move |runner| {
        let command = Arc::clone(&command);
        async move { runner.run_checked(&command, false).await.map(|_| ()) }
    })
    .await
    .into_result()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exceptions::SkyError;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;
    use stix_utils::{CommandOutput, CommandResult};

    /// Records commands; exits non-zero for commands containing `fail_on`
    /// and errors out for those containing `unreachable_on`.
    #[derive(Debug, Default)]
    struct ScriptedNode {
        id: String,
        fail_on: Option<String>,
        unreachable_on: Option<String>,
        log: Mutex<Vec<String>>,
    }

    impl ScriptedNode {
        fn new(id: &str) -> Arc<Self> {
            Arc::new(Self {
                id: id.to_string(),
                ..Default::default()
            })
        }

        fn failing(id: &str, pattern: &str) -> Arc<Self> {
            Arc::new(Self {
                id: id.to_string(),
                fail_on: Some(pattern.to_string()),
                ..Default::default()
            })
        }

        fn unreachable(id: &str, pattern: &str) -> Arc<Self> {
            Arc::new(Self {
                id: id.to_string(),
                unreachable_on: Some(pattern.to_string()),
                ..Default::default()
            })
        }

        fn commands(&self) -> Vec<String> {
            self.log.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl NodeRunner for ScriptedNode {
        fn node_id(&self) -> &str {
            &self.id
        }

        async fn execute(&self, command: &str, _stream_logs: bool) -> CommandResult<CommandOutput> {
            self.log.lock().unwrap().push(command.to_string());
            if self.unreachable_on.as_deref().is_some_and(|p| command.contains(p)) {
                return Err(stix_utils::Error::command_timeout(10));
            }
            let failed = self.fail_on.as_deref().is_some_and(|p| command.contains(p));
            Ok(CommandOutput {
                node: self.id.clone(),
                command: command.to_string(),
                exit_code: if failed { 1 } else { 0 },
                stdout: String::new(),
                stderr: String::new(),
                duration: Duration::ZERO,
            })
        }
    }

    fn as_runners(nodes: &[Arc<ScriptedNode>]) -> Vec<Arc<dyn NodeRunner>> {
        nodes
            .iter()
            .map(|n| Arc::clone(n) as Arc<dyn NodeRunner>)
            .collect()
    }

    #[test]
    fn test_coordinator_command() {
        let cmd = coordinator_start_command(&CoordinatorSettings::default());
        assert!(cmd.starts_with("ray stop; ray start --disable-usage-stats --head --port=6379 --object-manager-port=8076"));
        assert!(cmd.contains("--nofile=1048576:1048576"));
        assert!(cmd.contains("pgrep -f raylet/raylet"));
    }

    #[test]
    fn test_worker_command() {
        let settings = CoordinatorSettings {
            control_port: 7000,
            ..Default::default()
        };
        let cmd = worker_start_command("10.0.0.1", &settings);
        assert!(cmd.starts_with("ray stop; ray start --disable-usage-stats --address=10.0.0.1:7000"));
        assert!(!cmd.contains("--head"));
    }

    #[test]
    fn test_skylet_command() {
        let cmd = skylet_start_command(&SkyletSettings::default());
        assert!(cmd.starts_with(
            "(ps aux | grep -v nohup | grep -v grep | grep -q -- \"python3 -m sky.skylet.skylet\")"
        ));
        assert!(cmd.contains("nohup python3 -m sky.skylet.skylet >> ~/.sky/skylet.log 2>&1 &"));
        assert!(cmd.ends_with("&> /dev/null &)"));
    }

    #[tokio::test]
    async fn test_setup_dependencies_runs_once_per_command_list() {
        let nodes = vec![ScriptedNode::new("n1"), ScriptedNode::new("n2")];
        let runners = as_runners(&nodes);
        let cache = ProvisioningCache::in_memory();
        let commands = vec!["pip install ray".to_string(), "mkdir -p ~/.sky".to_string()];

        assert!(setup_dependencies(&cache, "c1", &commands, &runners, 4).await.unwrap());
        assert!(!setup_dependencies(&cache, "c1", &commands, &runners, 4).await.unwrap());

        for node in &nodes {
            assert_eq!(node.commands(), commands);
        }

        // Reordering changes the digest.
        let reordered: Vec<String> = commands.iter().rev().cloned().collect();
        assert!(setup_dependencies(&cache, "c1", &reordered, &runners, 4).await.unwrap());
        assert_eq!(nodes[0].commands().len(), 4);
    }

    #[tokio::test]
    async fn test_setup_dependencies_failure_reports_nodes_and_is_retried() {
        let nodes = vec![
            ScriptedNode::new("n1"),
            ScriptedNode::failing("n2", "pip"),
            ScriptedNode::new("n3"),
        ];
        let runners = as_runners(&nodes);
        let cache = ProvisioningCache::in_memory();
        let commands = vec!["pip install ray".to_string(), "echo done".to_string()];

        let err = setup_dependencies(&cache, "c1", &commands, &runners, 2)
            .await
            .unwrap_err();
        assert_eq!(err.failed_nodes(), vec!["n2"]);

        // Healthy nodes ran everything; the failing one stopped at its first error.
        assert_eq!(nodes[0].commands().len(), 2);
        assert_eq!(nodes[1].commands().len(), 1);
        assert_eq!(nodes[2].commands().len(), 2);
        assert!(cache.stored_digest("c1", SETUP_DEPENDENCIES_STAGE).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_start_coordinator_status_check() {
        let healthy = ScriptedNode::new("head");
        assert!(!start_coordinator(&*healthy, &CoordinatorSettings::default(), true)
            .await
            .unwrap());
        assert_eq!(healthy.commands(), vec![RAY_STATUS_COMMAND.to_string()]);

        let down = ScriptedNode::failing("head", "ray status");
        assert!(start_coordinator(&*down, &CoordinatorSettings::default(), true)
            .await
            .unwrap());
        assert_eq!(down.commands().len(), 2);
        assert!(down.commands()[1].contains("--head"));

        let unchecked = ScriptedNode::new("head");
        assert!(start_coordinator(&*unchecked, &CoordinatorSettings::default(), false)
            .await
            .unwrap());
        assert_eq!(unchecked.commands().len(), 1);
    }

    #[tokio::test]
    async fn test_start_coordinator_status_error_restarts() {
        let head = ScriptedNode::unreachable("head", "ray status");
        assert!(start_coordinator(&*head, &CoordinatorSettings::default(), true)
            .await
            .unwrap());
        let commands = head.commands();
        assert_eq!(commands.len(), 2);
        assert_eq!(commands[0], RAY_STATUS_COMMAND);
        assert!(commands[1].starts_with("ray stop; ray start"));
        assert!(commands[1].contains("--head"));
    }

    #[tokio::test]
    async fn test_start_coordinator_failure() {
        let head = ScriptedNode::failing("head", "ray start");
        let err = start_coordinator(&*head, &CoordinatorSettings::default(), false)
            .await
            .unwrap_err();
        assert!(matches!(err, SkyError::Command(stix_utils::Error::NonZeroExit { .. })));
        assert_eq!(err.failed_nodes(), vec!["head"]);
    }

    #[tokio::test]
    async fn test_start_workers_reports_failing_worker() {
        let nodes = vec![
            ScriptedNode::new("w1"),
            ScriptedNode::failing("w2", "ray start"),
            ScriptedNode::new("w3"),
        ];
        let err = start_workers(&as_runners(&nodes), "10.0.0.1", &CoordinatorSettings::default(), 4)
            .await
            .unwrap_err();
        assert_eq!(err.failed_nodes(), vec!["w2"]);
        for node in &nodes {
            assert!(node.commands()[0].contains("--address=10.0.0.1:6379"));
        }

        start_workers(&[], "10.0.0.1", &CoordinatorSettings::default(), 4)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_start_skylet_on_every_node() {
        let nodes = vec![ScriptedNode::new("n1"), ScriptedNode::new("n2")];
        start_skylet(&as_runners(&nodes), &SkyletSettings::default(), 4)
            .await
            .unwrap();
        for node in &nodes {
            assert_eq!(node.commands().len(), 1);
            assert!(node.commands()[0].contains("sky.skylet.skylet"));
        }
    }
}
