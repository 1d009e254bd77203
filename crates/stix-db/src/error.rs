//! Error types for stix-db

use thiserror::Error;

/// Database operation errors
#[derive(Error, Debug)]
pub enum DbError {
    /// Query or connection failure
    #[error("SQLx error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// Schema migration failure
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Could not prepare the database location
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
