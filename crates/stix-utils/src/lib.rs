//! # STIX Utilities
//!
//! Shared building blocks for cluster provisioning: running commands on
//! remote nodes, fanning an operation out across every node of a cluster,
//! hashing declarative setup stages, and logging setup.
//!
//! ## Modules
//!
//! - [`command`] - Local and SSH command runners behind the [`NodeRunner`] trait
//! - [`parallel`] - Concurrent fan-out with per-node failure reporting
//! - [`hash`] - Order-sensitive stage digests
//! - [`logging`] - `tracing` subscriber setup

#![warn(missing_docs)]

/// Module version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// Core modules
pub mod command;
pub mod error;
pub mod hash;
pub mod logging;
pub mod parallel;

// Re-exports
pub use command::{
    CommandOutput, CommandResult, CommandRunner, LocalCommandRunner, NodeRunner, SshCommandRunner,
};
pub use error::{Error, NodeFailure, Result};
pub use hash::stage_digest;
pub use parallel::{default_parallelism, run_in_parallel, FanoutReport};
