//! Parallel fan-out over cluster nodes
//!
//! Every provisioning step that touches more than one node goes through
//! [`run_in_parallel`]: one task per node, bounded by a semaphore, joined
//! before returning. A failing node never stops the others from running;
//! the caller gets a [`FanoutReport`] describing which nodes succeeded and
//! which failed.

use std::cmp::max;
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::command::NodeRunner;
use crate::error::{Error, NodeFailure, Result};

/// Default fan-out width: at least 4, otherwise one less than the CPU count.
pub fn default_parallelism() -> usize {
    max(4, num_cpus::get().saturating_sub(1))
}

/// Outcome of a fan-out, indexed by input position
#[derive(Debug)]
pub struct FanoutReport<T> {
    /// Successful nodes with their values, sorted by index
    pub succeeded: Vec<(usize, T)>,
    /// Failed nodes, sorted by index
    pub failures: Vec<NodeFailure>,
}

impl<T> FanoutReport<T> {
    /// Number of nodes the operation was attempted on
    pub fn total(&self) -> usize {
        self.succeeded.len() + self.failures.len()
    }

    /// True when no node failed
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// Values in input order, or [`Error::PartialFailure`] naming every failed node.
    pub fn into_result(self) -> Result<Vec<T>> {
        if self.failures.is_empty() {
            Ok(self.succeeded.into_iter().map(|(_, value)| value).collect())
        } else {
            let total = self.total();
            Err(Error::PartialFailure {
                failures: self.failures,
                total,
            })
        }
    }
}

/// Runs `op` once per runner, concurrently, and waits for all of them.
///
/// At most `max_concurrency` operations are in flight at once (0 is treated
/// as 1). Errors and panics are recorded per node.
pub async fn run_in_parallel<T, E, F, Fut>(
    runners: &[Arc<dyn NodeRunner>],
    max_concurrency: usize,
    op: F,
) -> FanoutReport<T>
where
    T: Send + 'static,
    E: Display + Send + 'static,
    F: Fn(Arc<dyn NodeRunner>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<T, E>> + Send + 'static,
{
    let semaphore = Arc::new(Semaphore::new(max_concurrency.max(1)));
    let op = Arc::new(op);
    let mut join_set = JoinSet::new();

    debug!(nodes = runners.len(), max_concurrency, "Fanning out");

    for (index, runner) in runners.iter().enumerate() {
        let runner = Arc::clone(runner);
        let semaphore = Arc::clone(&semaphore);
        let op = Arc::clone(&op);
        join_set.spawn(async move {
            let node = runner.node_id().to_string();
            // The semaphore is never closed.
            let _permit = semaphore.acquire_owned().await;
            let result = op(runner).await.map_err(|e| e.to_string());
            (index, node, result)
        });
    }

    let mut succeeded = Vec::with_capacity(runners.len());
    let mut failures = Vec::new();
    let mut finished = vec![false; runners.len()];

    while let Some(joined) = join_set.join_next().await {
        match joined {
            Ok((index, _, Ok(value))) => {
                finished[index] = true;
                succeeded.push((index, value));
            }
            Ok((index, node, Err(message))) => {
                finished[index] = true;
                warn!(node = %node, error = %message, "Node operation failed");
                failures.push(NodeFailure {
                    index,
                    node,
                    message,
                });
            }
            Err(join_error) => {
                warn!(error = %join_error, "Node task aborted");
            }
        }
    }

    // Panicked tasks never report their index; recover it from the gaps.
    for (index, done) in finished.iter().enumerate() {
        if !done {
            failures.push(NodeFailure {
                index,
                node: runners[index].node_id().to_string(),
                message: "task panicked".to_string(),
            });
        }
    }

    succeeded.sort_by_key(|(index, _)| *index);
    failures.sort_by_key(|f| f.index);

    FanoutReport {
        succeeded,
        failures,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{CommandOutput, CommandResult};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Debug)]
    struct FakeNode {
        id: String,
        exit_code: i32,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl NodeRunner for FakeNode {
        fn node_id(&self) -> &str {
            &self.id
        }

        async fn execute(&self, command: &str, _stream_logs: bool) -> CommandResult<CommandOutput> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            Ok(CommandOutput {
                node: self.id.clone(),
                command: command.to_string(),
                exit_code: self.exit_code,
                stdout: String::new(),
                stderr: String::new(),
                duration: Duration::from_millis(5),
            })
        }
    }

    fn nodes(exit_codes: &[i32], calls: &Arc<AtomicUsize>) -> Vec<Arc<dyn NodeRunner>> {
        exit_codes
            .iter()
            .enumerate()
            .map(|(i, code)| {
                Arc::new(FakeNode {
                    id: format!("node-{}", i + 1),
                    exit_code: *code,
                    calls: Arc::clone(calls),
                }) as Arc<dyn NodeRunner>
            })
            .collect()
    }

    #[test]
    fn test_default_parallelism() {
        assert!(default_parallelism() >= 4);
    }

    #[tokio::test]
    async fn test_one_failure_does_not_stop_others() {
        let calls = Arc::new(AtomicUsize::new(0));
        let runners = nodes(&[0, 0, 1, 0, 0], &calls);

        let report = run_in_parallel(&runners, 2, |runner| async move {
            runner.run_checked("setup", false).await.map(|_| ())
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 5);
        assert_eq!(report.total(), 5);
        assert_eq!(report.succeeded.len(), 4);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].node, "node-3");
        assert_eq!(report.failures[0].index, 2);

        let err = report.into_result().unwrap_err();
        assert_eq!(err.failed_nodes(), vec!["node-3"]);
    }

    #[tokio::test]
    async fn test_values_in_input_order() {
        let calls = Arc::new(AtomicUsize::new(0));
        let runners = nodes(&[0, 0, 0], &calls);

        let values = run_in_parallel(&runners, 8, |runner| async move {
            Ok::<_, Error>(runner.node_id().to_string())
        })
        .await
        .into_result()
        .unwrap();

        assert_eq!(values, vec!["node-1", "node-2", "node-3"]);
    }

    #[tokio::test]
    async fn test_panicking_node_is_reported() {
        let calls = Arc::new(AtomicUsize::new(0));
        let runners = nodes(&[0, 0], &calls);

        let report = run_in_parallel(&runners, 0, |runner| async move {
            if runner.node_id() == "node-2" {
                panic!("boom");
            }
            Ok::<_, Error>(())
        })
        .await;

        assert_eq!(report.succeeded.len(), 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].node, "node-2");
    }

    #[tokio::test]
    async fn test_empty_fanout() {
        let runners: Vec<Arc<dyn NodeRunner>> = Vec::new();
        let report = run_in_parallel(&runners, 4, |_runner| async move { Ok::<_, Error>(()) }).await;
        assert!(report.is_success());
        assert_eq!(report.total(), 0);
    }
}
