//! # STIX Configuration
//!
//! Provisioning configuration loaded from `.stix/config.yaml` (project) or
//! `~/.stix/config.yaml` (global), falling back to built-in defaults.
//!
//! ## Modules
//!
//! - [`config`] - Configuration structures
//! - [`loader`] - Configuration loader

#![warn(missing_docs)]

/// Module version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// Core modules
pub mod config;
pub mod error;
pub mod loader;

// Re-exports
pub use config::{Config, CoordinatorSettings, ProvisionSettings, SkyletSettings};
pub use error::{Error, Result};
pub use loader::ConfigLoader;
