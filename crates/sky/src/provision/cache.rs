//! Provisioning cache
//!
//! Remembers, per (cluster, stage), the digest of the declarative input that
//! was last applied successfully. Re-running a stage with the same input is
//! a no-op; changing the input re-runs it.

use async_trait::async_trait;
use dashmap::DashMap;
use std::ffi::OsString;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};

use stix_config::ProvisionSettings;
use stix_db::{CacheRepo, DbPool};
use stix_utils::stage_digest;

use crate::exceptions::Result;

/// Held while a stage runs; dropping it releases the store-side lock
pub type StoreLock = Box<dyn fmt::Debug + Send + Sync>;

const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Persistent (cluster, stage) -> digest mapping
#[async_trait]
pub trait KeyValueStore: Send + Sync + fmt::Debug {
    /// Digest last stored for the key
    async fn get(&self, cluster: &str, stage: &str) -> Result<Option<String>>;

    /// Store or overwrite the digest
    async fn set(&self, cluster: &str, stage: &str, digest: &str) -> Result<()>;

    /// Drop the key; used by cluster teardown
    async fn remove(&self, cluster: &str, stage: &str) -> Result<()>;

    /// Exclusive hold on the key against other processes sharing the store.
    ///
    /// Stores private to one process need nothing beyond the in-process
    /// lock of [`ProvisioningCache`], which is the default.
    async fn lock(&self, _cluster: &str, _stage: &str) -> Result<StoreLock> {
        Ok(Box::new(()))
    }
}

/// Process-local store, lost on exit
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<(String, String), String>,
}

impl MemoryStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, cluster: &str, stage: &str) -> Result<Option<String>> {
        let key = (cluster.to_string(), stage.to_string());
        Ok(self.entries.get(&key).map(|entry| entry.value().clone()))
    }

    async fn set(&self, cluster: &str, stage: &str, digest: &str) -> Result<()> {
        self.entries
            .insert((cluster.to_string(), stage.to_string()), digest.to_string());
        Ok(())
    }

    async fn remove(&self, cluster: &str, stage: &str) -> Result<()> {
        self.entries.remove(&(cluster.to_string(), stage.to_string()));
        Ok(())
    }
}

/// SQLite-backed store shared across processes.
///
/// Cross-process exclusion uses one `flock` file per key in a directory
/// next to the database (`<db>.locks/`). The kernel drops the lock when
/// the holder exits, so a crashed run never wedges the key.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    repo: CacheRepo,
    lock_dir: Option<PathBuf>,
}

impl SqliteStore {
    /// Wrap an open pool; without a lock directory only in-process
    /// callers are serialized
    pub fn new(pool: DbPool) -> Self {
        Self {
            repo: CacheRepo::new(pool),
            lock_dir: None,
        }
    }

    /// Serialize callers across processes through lock files in `dir`
    pub fn with_lock_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.lock_dir = Some(dir.into());
        self
    }

    /// Open (creating if needed) the database file at `path`
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut lock_dir = OsString::from(path.as_os_str());
        lock_dir.push(".locks");
        Ok(Self::new(DbPool::open(path).await?).with_lock_dir(lock_dir))
    }

    /// Throwaway in-memory database
    pub async fn in_memory() -> Result<Self> {
        Ok(Self::new(DbPool::in_memory().await?))
    }
}

#[async_trait]
impl KeyValueStore for SqliteStore {
    async fn get(&self, cluster: &str, stage: &str) -> Result<Option<String>> {
        Ok(self.repo.get_digest(cluster, stage).await?)
    }

    async fn set(&self, cluster: &str, stage: &str, digest: &str) -> Result<()> {
        Ok(self.repo.set_digest(cluster, stage, digest).await?)
    }

    async fn remove(&self, cluster: &str, stage: &str) -> Result<()> {
        Ok(self.repo.delete_digest(cluster, stage).await?)
    }

    async fn lock(&self, cluster: &str, stage: &str) -> Result<StoreLock> {
        let Some(ref dir) = self.lock_dir else {
            return Ok(Box::new(()));
        };
        // Hashed so arbitrary cluster names make valid, distinct file names.
        let path = dir.join(format!("{}.lock", stage_digest([cluster, stage])));
        Ok(Box::new(FileLock::acquire(&path).await?))
    }
}

/// Exclusive `flock` on a file, released on drop
#[derive(Debug)]
#[cfg_attr(not(unix), allow(dead_code))]
struct FileLock {
    file: File,
}

impl FileLock {
    async fn acquire(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(path)?;

        let mut waiting = false;
        loop {
            if try_lock_exclusive(&file)? {
                return Ok(Self { file });
            }
            if !waiting {
                debug!(path = %path.display(), "Stage is locked by another process, waiting");
                waiting = true;
            }
            tokio::time::sleep(LOCK_POLL_INTERVAL).await;
        }
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        #[cfg(unix)]
        {
            use std::os::unix::io::AsRawFd;
            let _ = unsafe { libc::flock(self.file.as_raw_fd(), libc::LOCK_UN) };
        }
    }
}

#[cfg(unix)]
fn try_lock_exclusive(file: &File) -> std::io::Result<bool> {
    use std::os::unix::io::AsRawFd;

    let ret = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
    if ret == 0 {
        return Ok(true);
    }
    let err = std::io::Error::last_os_error();
    match err.raw_os_error() {
        Some(code) if code == libc::EWOULDBLOCK || code == libc::EINTR => Ok(false),
        _ => Err(err),
    }
}

// No advisory locks here; only in-process callers are serialized.
#[cfg(not(unix))]
fn try_lock_exclusive(_file: &File) -> std::io::Result<bool> {
    Ok(true)
}

/// Digest-gated execution of provisioning stages
#[derive(Debug)]
pub struct ProvisioningCache {
    store: Arc<dyn KeyValueStore>,
    locks: DashMap<(String, String), Arc<Mutex<()>>>,
}

impl ProvisioningCache {
    /// Cache over an arbitrary store
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            locks: DashMap::new(),
        }
    }

    /// Cache over a fresh [`MemoryStore`]
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    /// Cache over the SQLite file at `path`
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new(Arc::new(SqliteStore::open(path).await?)))
    }

    /// Cache over the configured database file
    pub async fn from_settings(settings: &ProvisionSettings) -> Result<Self> {
        Self::open(settings.cache_db_path()).await
    }

    /// Run `work` unless `digest` is already recorded for (`cluster`, `stage`).
    ///
    /// Returns `Ok(true)` when `work` ran and succeeded, `Ok(false)` when it
    /// was skipped. The digest is recorded only after `work` succeeds; an
    /// error from `work` is returned unchanged and leaves the old digest in
    /// place. Concurrent callers on the same key are serialized for the whole
    /// check/work/record sequence, within this process by a per-key mutex
    /// and across processes by [`KeyValueStore::lock`].
    pub async fn with_cache_check<F, Fut>(
        &self,
        cluster: &str,
        stage: &str,
        digest: &str,
        work: F,
    ) -> Result<bool>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let lock = self.lock_for(cluster, stage);
        let _guard = lock.lock().await;
        let _store_lock = self.store.lock(cluster, stage).await?;

        let stored = self.store.get(cluster, stage).await?;
        if stored.as_deref() == Some(digest) {
            info!(cluster, stage, "Stage is up to date, skipping");
            return Ok(false);
        }

        debug!(cluster, stage, previous = ?stored, digest, "Stage input changed");
        work().await?;
        self.store.set(cluster, stage, digest).await?;
        Ok(true)
    }

    /// Digest currently recorded for (`cluster`, `stage`)
    pub async fn stored_digest(&self, cluster: &str, stage: &str) -> Result<Option<String>> {
        self.store.get(cluster, stage).await
    }

    /// Forget (`cluster`, `stage`) so the next check re-runs it
    pub async fn forget(&self, cluster: &str, stage: &str) -> Result<()> {
        let lock = self.lock_for(cluster, stage);
        let _guard = lock.lock().await;
        let _store_lock = self.store.lock(cluster, stage).await?;
        self.store.remove(cluster, stage).await
    }

    fn lock_for(&self, cluster: &str, stage: &str) -> Arc<Mutex<()>> {
        let key = (cluster.to_string(), stage.to_string());
        Arc::clone(self.locks.entry(key).or_default().value())
    }
}
