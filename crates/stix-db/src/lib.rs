//! # STIX Database Layer
//!
//! SQLite persistence (sqlx) for the provisioning cache: one digest per
//! (cluster, stage) pair.
//!
//! ## Modules
//!
//! - [`pool`] - Database connection pool
//! - [`models`] - Database models
//! - [`repo`] - Provisioning cache repository
//! - [`error`] - Database error types

#![warn(missing_docs)]

/// Module version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// Core modules
pub mod error;
pub mod models;
pub mod pool;
pub mod repo;

// Re-exports
pub use error::DbError;
pub use models::CacheRow;
pub use pool::DbPool;
pub use repo::CacheRepo;

/// Result type alias
pub type Result<T> = std::result::Result<T, DbError>;
