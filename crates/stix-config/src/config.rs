//! Configuration structures

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Version of the config format
    #[serde(default = "default_version")]
    pub version: String,

    /// Node access and fan-out settings
    #[serde(default)]
    pub provision: ProvisionSettings,

    /// Head-node runtime settings
    #[serde(default)]
    pub coordinator: CoordinatorSettings,

    /// Node management daemon settings
    #[serde(default)]
    pub skylet: SkyletSettings,

    /// Enable verbose logging
    #[serde(default)]
    pub verbose: bool,
}

fn default_version() -> String {
    "1.0".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: default_version(),
            provision: ProvisionSettings::default(),
            coordinator: CoordinatorSettings::default(),
            skylet: SkyletSettings::default(),
            verbose: false,
        }
    }
}

/// How nodes are reached and how wide fan-outs go
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvisionSettings {
    /// SSH login user
    pub ssh_user: String,

    /// SSH port
    pub ssh_port: u16,

    /// Private key for SSH
    pub ssh_private_key: Option<PathBuf>,

    /// SSH connect timeout in seconds
    pub connect_timeout_secs: u64,

    /// Per-command timeout in seconds; unset means no limit
    pub command_timeout_secs: Option<u64>,

    /// Upper bound on concurrent node operations; unset means CPU-derived
    pub max_parallelism: Option<usize>,

    /// SQLite file backing the provisioning cache; unset means
    /// `~/.stix/provision_cache.db`
    pub cache_db: Option<PathBuf>,
}

impl Default for ProvisionSettings {
    fn default() -> Self {
        Self {
            ssh_user: "ubuntu".to_string(),
            ssh_port: 22,
            ssh_private_key: None,
            connect_timeout_secs: 10,
            command_timeout_secs: None,
            max_parallelism: None,
            cache_db: None,
        }
    }
}

impl ProvisionSettings {
    /// Resolved cache database path
    pub fn cache_db_path(&self) -> PathBuf {
        self.cache_db.clone().unwrap_or_else(|| stix_home().join("provision_cache.db"))
    }
}

/// Ray head/worker startup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorSettings {
    /// GCS / control port on the head node
    pub control_port: u16,

    /// Object manager port
    pub object_manager_port: u16,

    /// Soft and hard `nofile` limit applied to raylet processes
    pub nofile_limit: u64,

    /// Check `ray status` on the head and skip startup if healthy
    pub check_started: bool,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            control_port: 6379,
            object_manager_port: 8076,
            nofile_limit: 1_048_576,
            check_started: false,
        }
    }
}

/// Skylet (per-node management daemon)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SkyletSettings {
    /// Command that runs the daemon in the foreground
    pub command: String,

    /// Node-local log file the daemon appends to
    pub log_path: String,
}

impl Default for SkyletSettings {
    fn default() -> Self {
        Self {
            command: "python3 -m sky.skylet.skylet".to_string(),
            log_path: "~/.sky/skylet.log".to_string(),
        }
    }
}

/// `~/.stix`, or `.stix` when no home directory is known
pub fn stix_home() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(".stix"))
        .unwrap_or_else(|| PathBuf::from(".stix"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.version, "1.0");
        assert_eq!(config.provision.ssh_user, "ubuntu");
        assert_eq!(config.coordinator.control_port, 6379);
        assert_eq!(config.coordinator.object_manager_port, 8076);
    }

    #[test]
    fn test_partial_yaml_fills_defaults() {
        let yaml = r#"
provision:
  ssh_user: ec2-user
  max_parallelism: 16
coordinator:
  check_started: true
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.provision.ssh_user, "ec2-user");
        assert_eq!(config.provision.ssh_port, 22);
        assert_eq!(config.provision.max_parallelism, Some(16));
        assert!(config.coordinator.check_started);
        assert_eq!(config.coordinator.nofile_limit, 1_048_576);
        assert_eq!(config.skylet, SkyletSettings::default());
    }

    #[test]
    fn test_cache_db_path() {
        let mut settings = ProvisionSettings::default();
        assert!(settings.cache_db_path().ends_with("provision_cache.db"));

        settings.cache_db = Some(PathBuf::from("/tmp/cache.db"));
        assert_eq!(settings.cache_db_path(), PathBuf::from("/tmp/cache.db"));
    }
}
