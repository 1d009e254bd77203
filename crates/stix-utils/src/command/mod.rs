//! Command execution on cluster nodes
//!
//! [`NodeRunner`] is the capability the provisioner drives: run one shell
//! command on one node and report its exit status. Two runners ship here:
//! [`LocalCommandRunner`] (this machine, used for on-prem nodes and tests)
//! and [`SshCommandRunner`] (OpenSSH client).

mod output;
mod runner;

pub use output::{CommandOutput, CommandResult};
pub use runner::CommandRunner;

use async_trait::async_trait;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Runs shell commands on a single node.
#[async_trait]
pub trait NodeRunner: Send + Sync + fmt::Debug {
    /// Identifier used in logs and failure reports
    fn node_id(&self) -> &str;

    /// Runs `command` through the node's shell and returns the full output.
    async fn execute(&self, command: &str, stream_logs: bool) -> CommandResult<CommandOutput>;

    /// Runs `command` and returns its exit code. Transport failures are errors.
    async fn run(&self, command: &str, stream_logs: bool) -> CommandResult<i32> {
        Ok(self.execute(command, stream_logs).await?.exit_code)
    }

    /// Runs `command`, failing with [`crate::Error::NonZeroExit`] unless it exits 0.
    async fn run_checked(&self, command: &str, stream_logs: bool) -> CommandResult<CommandOutput> {
        self.execute(command, stream_logs).await?.check()
    }
}

/// Runs commands with `bash -c` on the local machine.
#[derive(Debug, Clone)]
pub struct LocalCommandRunner {
    node_id: String,
    runner: CommandRunner,
}

impl LocalCommandRunner {
    /// Create a local runner reporting itself as `node_id`
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            runner: CommandRunner::new(),
        }
    }

    /// Replace the underlying process executor (timeout, env, working dir)
    pub fn with_runner(mut self, runner: CommandRunner) -> Self {
        self.runner = runner;
        self
    }
}

#[async_trait]
impl NodeRunner for LocalCommandRunner {
    fn node_id(&self) -> &str {
        &self.node_id
    }

    async fn execute(&self, command: &str, stream_logs: bool) -> CommandResult<CommandOutput> {
        let args = vec!["-c".to_string(), command.to_string()];
        self.runner
            .execute(&self.node_id, command, "bash", &args, stream_logs)
            .await
    }
}

/// Runs commands on a remote node through the `ssh` client.
#[derive(Debug, Clone)]
pub struct SshCommandRunner {
    ip: String,
    user: String,
    port: u16,
    private_key: Option<PathBuf>,
    connect_timeout: Duration,
    runner: CommandRunner,
}

impl SshCommandRunner {
    /// Create a runner for `user@ip` on port 22
    pub fn new(ip: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            ip: ip.into(),
            user: user.into(),
            port: 22,
            private_key: None,
            connect_timeout: Duration::from_secs(10),
            runner: CommandRunner::new(),
        }
    }

    /// Override the SSH port
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Authenticate with this private key
    pub fn private_key(mut self, path: impl Into<PathBuf>) -> Self {
        self.private_key = Some(path.into());
        self
    }

    /// TCP connect timeout passed to `ssh -o ConnectTimeout`
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Replace the underlying process executor
    pub fn with_runner(mut self, runner: CommandRunner) -> Self {
        self.runner = runner;
        self
    }

    /// Address this runner connects to
    pub fn ip(&self) -> &str {
        &self.ip
    }

    /// Full `ssh` argument vector for `command`
    pub fn ssh_args(&self, command: &str) -> Vec<String> {
        let mut args = vec![
            "-T".to_string(),
            "-o".to_string(),
            "StrictHostKeyChecking=no".to_string(),
            "-o".to_string(),
            "UserKnownHostsFile=/dev/null".to_string(),
            "-o".to_string(),
            "LogLevel=ERROR".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.connect_timeout.as_secs()),
            "-p".to_string(),
            self.port.to_string(),
        ];
        if let Some(ref key) = self.private_key {
            args.push("-i".to_string());
            args.push(key.display().to_string());
        }
        args.push(format!("{}@{}", self.user, self.ip));
        args.push(format!("bash --login -c {}", shell_quote(command)));
        args
    }
}

#[async_trait]
impl NodeRunner for SshCommandRunner {
    fn node_id(&self) -> &str {
        &self.ip
    }

    async fn execute(&self, command: &str, stream_logs: bool) -> CommandResult<CommandOutput> {
        let args = self.ssh_args(command);
        self.runner
            .execute(&self.ip, command, "ssh", &args, stream_logs)
            .await
    }
}

/// Single-quotes `s` for a POSIX shell.
pub fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r#"'"'"'"#))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("ray status"), "'ray status'");
        assert_eq!(shell_quote("echo 'hi'"), r#"'echo '"'"'hi'"'"''"#);
    }

    #[test]
    fn test_ssh_args() {
        let runner = SshCommandRunner::new("10.0.0.2", "ubuntu")
            .port(2222)
            .private_key("/home/me/.ssh/sky-key");
        let args = runner.ssh_args("ray status");

        assert_eq!(runner.node_id(), "10.0.0.2");
        assert!(args.contains(&"2222".to_string()));
        assert!(args.contains(&"/home/me/.ssh/sky-key".to_string()));
        assert!(args.contains(&"ubuntu@10.0.0.2".to_string()));
        assert_eq!(args.last().unwrap(), "bash --login -c 'ray status'");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_local_runner_exit_codes() {
        let runner = LocalCommandRunner::new("local-0");
        assert_eq!(runner.run("true", false).await.unwrap(), 0);
        assert_eq!(runner.run("exit 3", false).await.unwrap(), 3);
        assert!(runner.run_checked("exit 3", false).await.is_err());
    }
}
