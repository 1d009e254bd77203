//! Configuration loader

use crate::config::stix_home;
use crate::{Config, Error, Result};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

/// Configuration loader
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from file
    pub async fn load_from_file(path: impl AsRef<Path>) -> Result<Config> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(Error::FileNotFound(path.display().to_string()));
        }

        let content = fs::read_to_string(path).await?;
        let config: Config = serde_yaml::from_str(&content)?;
        Self::validate(&config)?;

        debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Load `.stix/config.yaml`, then `~/.stix/config.yaml`, else defaults
    pub async fn load_default() -> Result<Config> {
        for path in Self::default_paths() {
            if path.exists() {
                return Self::load_from_file(&path).await;
            }
        }
        Ok(Config::default())
    }

    /// Candidate locations, highest priority first
    pub fn default_paths() -> Vec<PathBuf> {
        vec![
            PathBuf::from(".stix/config.yaml"),
            stix_home().join("config.yaml"),
        ]
    }

    /// Save configuration to file
    pub async fn save_to_file(config: &Config, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let yaml = serde_yaml::to_string(config)?;
        fs::write(path, yaml).await?;

        Ok(())
    }

    fn validate(config: &Config) -> Result<()> {
        if config.provision.ssh_user.is_empty() {
            return Err(Error::InvalidFormat("provision.ssh_user is empty".to_string()));
        }
        if config.provision.max_parallelism == Some(0) {
            return Err(Error::InvalidFormat(
                "provision.max_parallelism must be at least 1".to_string(),
            ));
        }
        if config.coordinator.control_port == config.coordinator.object_manager_port {
            return Err(Error::InvalidFormat(format!(
                "coordinator ports must differ (both {})",
                config.coordinator.control_port
            )));
        }
        Ok(())
    }
}
