//! Provisioning cache repository

use crate::error::DbError;
use crate::models::CacheRow;
use crate::pool::DbPool;
use sqlx::Row;

/// CRUD over the `provision_cache` table
#[derive(Debug, Clone)]
pub struct CacheRepo {
    pool: DbPool,
}

impl CacheRepo {
    /// Create new repository
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Digest last applied for (`cluster_name`, `stage`)
    pub async fn get_digest(&self, cluster_name: &str, stage: &str) -> Result<Option<String>, DbError> {
        let row = sqlx::query("SELECT digest FROM provision_cache WHERE cluster_name = ? AND stage = ?")
            .bind(cluster_name)
            .bind(stage)
            .fetch_optional(self.pool.inner())
            .await?;

        Ok(row.map(|r| r.get(0)))
    }

    /// Insert or overwrite the digest for (`cluster_name`, `stage`)
    pub async fn set_digest(&self, cluster_name: &str, stage: &str, digest: &str) -> Result<(), DbError> {
        sqlx::query(
            r#"
            INSERT INTO provision_cache (cluster_name, stage, digest, updated_at)
            VALUES (?, ?, ?, datetime('now'))
            ON CONFLICT (cluster_name, stage)
            DO UPDATE SET digest = excluded.digest, updated_at = excluded.updated_at
            "#,
        )
        .bind(cluster_name)
        .bind(stage)
        .bind(digest)
        .execute(self.pool.inner())
        .await?;
        Ok(())
    }

    /// Remove one stage entry
    pub async fn delete_digest(&self, cluster_name: &str, stage: &str) -> Result<(), DbError> {
        sqlx::query("DELETE FROM provision_cache WHERE cluster_name = ? AND stage = ?")
            .bind(cluster_name)
            .bind(stage)
            .execute(self.pool.inner())
            .await?;
        Ok(())
    }

    /// Remove every entry of a cluster (cluster teardown)
    pub async fn delete_cluster(&self, cluster_name: &str) -> Result<u64, DbError> {
        let result = sqlx::query("DELETE FROM provision_cache WHERE cluster_name = ?")
            .bind(cluster_name)
            .execute(self.pool.inner())
            .await?;
        Ok(result.rows_affected())
    }

    /// All stage entries of a cluster, ordered by stage
    pub async fn list_cluster(&self, cluster_name: &str) -> Result<Vec<CacheRow>, DbError> {
        let rows = sqlx::query_as::<_, CacheRow>(
            "SELECT * FROM provision_cache WHERE cluster_name = ? ORDER BY stage",
        )
        .bind(cluster_name)
        .fetch_all(self.pool.inner())
        .await?;
        Ok(rows)
    }
}
