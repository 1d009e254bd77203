//! Database models

use serde::{Deserialize, Serialize};

/// Row of the `provision_cache` table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct CacheRow {
    /// Cluster the stage was applied to
    pub cluster_name: String,
    /// Stage identifier, e.g. `setup_dependencies`
    pub stage: String,
    /// Hex digest of the stage's declarative input
    pub digest: String,
    /// SQLite `datetime('now')` of the last write
    pub updated_at: String,
}
