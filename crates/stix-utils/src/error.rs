//! Error types for stix-utils

use std::fmt;

use thiserror::Error;

/// Result type alias for stix-utils operations
pub type Result<T> = std::result::Result<T, Error>;

/// Utility error types
#[derive(Error, Debug)]
pub enum Error {
    /// Command could not be spawned or its output could not be read
    #[error("Command execution failed: {0}")]
    CommandExecution(String),

    /// Command timeout error
    #[error("Command timed out after {0} seconds")]
    CommandTimeout(u64),

    /// Command ran but exited with a non-zero status
    #[error("Command on {node} exited with status {exit_code}: {command}")]
    NonZeroExit {
        /// Node the command ran on
        node: String,
        /// The command line
        command: String,
        /// Exit status reported by the node
        exit_code: i32,
    },

    /// One or more nodes of a fan-out failed
    #[error("{} of {total} nodes failed: {}", .failures.len(), format_failures(.failures))]
    PartialFailure {
        /// Nodes that failed, in input order
        failures: Vec<NodeFailure>,
        /// Number of nodes the operation was attempted on
        total: usize,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

}

/// A single node's failure inside a fan-out
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeFailure {
    /// Position of the node in the fan-out input
    pub index: usize,
    /// Node identifier
    pub node: String,
    /// Rendered error
    pub message: String,
}

impl fmt::Display for NodeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.node, self.message)
    }
}

fn format_failures(failures: &[NodeFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

impl Error {
    /// Create a command execution error
    pub fn command_execution(msg: impl Into<String>) -> Self {
        Self::CommandExecution(msg.into())
    }

    /// Create a command timeout error
    pub fn command_timeout(seconds: u64) -> Self {
        Self::CommandTimeout(seconds)
    }

    /// Identifiers of the nodes that failed, if this is a fan-out failure
    pub fn failed_nodes(&self) -> Vec<&str> {
        match self {
            Self::PartialFailure { failures, .. } => {
                failures.iter().map(|f| f.node.as_str()).collect()
            }
            Self::NonZeroExit { node, .. } => vec![node.as_str()],
            _ => Vec::new(),
        }
    }
}
