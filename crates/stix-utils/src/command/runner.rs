//! Process executor shared by the local and SSH runners

use super::output::{CommandOutput, CommandResult};
use crate::Error;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info, trace, warn};

/// Spawns a program, captures (and optionally streams) its output
#[derive(Debug, Clone, Default)]
pub struct CommandRunner {
    /// Working directory for command execution
    working_dir: Option<PathBuf>,

    /// Environment variables
    env_vars: HashMap<String, String>,

    /// Timeout duration
    timeout: Option<Duration>,
}

impl CommandRunner {
    /// Create a new command runner
    pub fn new() -> Self {
        Self::default()
    }

    /// Set working directory
    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Add environment variable
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env_vars.insert(key.into(), value.into());
        self
    }

    /// Set timeout
    pub fn timeout(mut self, duration: Duration) -> Self {
        self.timeout = Some(duration);
        self
    }

    /// Configured timeout, if any
    pub fn timeout_duration(&self) -> Option<Duration> {
        self.timeout
    }

    /// Run `program args...` on behalf of `node`.
    ///
    /// `command_line` is what gets recorded in the output and in errors.
    /// With `stream_logs` every output line is also emitted at `info` level
    /// as it arrives.
    pub async fn execute(
        &self,
        node: &str,
        command_line: &str,
        program: &str,
        args: &[String],
        stream_logs: bool,
    ) -> CommandResult<CommandOutput> {
        debug!(node, command = %command_line, "Executing command");

        let start = Instant::now();

        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(ref dir) = self.working_dir {
            cmd.current_dir(dir);
        }
        for (key, value) in &self.env_vars {
            cmd.env(key, value);
        }

        let result = match self.timeout {
            Some(limit) => match timeout(limit, Self::run_command(cmd, node, stream_logs)).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(node, command = %command_line, "Command timed out after {:?}", limit);
                    return Err(Error::command_timeout(limit.as_secs()));
                }
            },
            None => Self::run_command(cmd, node, stream_logs).await,
        };

        let (exit_code, stdout, stderr) = result?;
        let duration = start.elapsed();

        if exit_code == 0 {
            trace!(node, "Command succeeded in {:?}", duration);
        } else {
            warn!(node, command = %command_line, exit_code, "Command failed in {:?}", duration);
        }

        Ok(CommandOutput {
            node: node.to_string(),
            command: command_line.to_string(),
            exit_code,
            stdout,
            stderr,
            duration,
        })
    }

    async fn run_command(
        mut cmd: Command,
        node: &str,
        stream_logs: bool,
    ) -> CommandResult<(i32, String, String)> {
        let mut child = cmd
            .spawn()
            .map_err(|e| Error::command_execution(format!("failed to spawn on {node}: {e}")))?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let (stdout, stderr) = tokio::join!(
            collect_lines(stdout, node, stream_logs),
            collect_lines(stderr, node, stream_logs)
        );
        let (stdout, stderr) = (stdout?, stderr?);

        let status = child.wait().await?;
        Ok((status.code().unwrap_or(-1), stdout, stderr))
    }
}

async fn collect_lines<R>(pipe: Option<R>, node: &str, stream_logs: bool) -> CommandResult<String>
where
    R: AsyncRead + Unpin,
{
    let Some(pipe) = pipe else {
        return Ok(String::new());
    };

    let mut reader = BufReader::new(pipe);
    let mut output = String::new();
    let mut line = Vec::new();

    // Output is not guaranteed to be UTF-8 (progress bars, locales).
    while reader.read_until(b'\n', &mut line).await? > 0 {
        let text = String::from_utf8_lossy(&line);
        if stream_logs {
            info!(node, "{}", text.trim_end());
        } else {
            trace!(node, "{}", text.trim_end());
        }
        output.push_str(&text);
        line.clear();
    }

    Ok(output)
}
