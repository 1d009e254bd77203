//! Command output structures

use serde::Serialize;
use std::time::Duration;

use crate::Error;

/// Result of command execution
pub type CommandResult<T> = std::result::Result<T, Error>;

/// Output of one command on one node
#[derive(Debug, Clone, Serialize)]
pub struct CommandOutput {
    /// Node the command ran on
    pub node: String,

    /// Command line as given by the caller
    pub command: String,

    /// Exit code of the command (-1 when killed by a signal)
    pub exit_code: i32,

    /// Captured stdout, also when streamed; invalid UTF-8 is replaced
    pub stdout: String,

    /// Captured stderr, also when streamed; invalid UTF-8 is replaced
    pub stderr: String,

    /// Wall-clock duration
    pub duration: Duration,
}

impl CommandOutput {
    /// Whether the command exited with status 0
    pub fn is_success(&self) -> bool {
        self.exit_code == 0
    }

    /// Trimmed stdout
    pub fn stdout_trimmed(&self) -> &str {
        self.stdout.trim()
    }

    /// Trimmed stderr
    pub fn stderr_trimmed(&self) -> &str {
        self.stderr.trim()
    }

    /// Turns a non-zero exit into [`Error::NonZeroExit`].
    pub fn check(self) -> CommandResult<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(Error::NonZeroExit {
                node: self.node,
                command: self.command,
                exit_code: self.exit_code,
            })
        }
    }
}
