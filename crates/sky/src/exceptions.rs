//! Exceptions - Error types for STIX Sky

use thiserror::Error;

/// Main error type for STIX Sky
#[derive(Error, Debug)]
pub enum SkyError {
    /// Resource specification rejected at construction
    #[error("Invalid resources: {0}")]
    InvalidResources(String),

    /// Explicit accelerators exceed what the instance type provides
    #[error("Infeasible resource demands: {0}")]
    InfeasibleResources(String),

    /// Operation needs a cloud and an instance type
    #[error("Resources are not launchable: {0}")]
    NotLaunchable(String),

    /// Instance type or accelerator missing from the catalog
    #[error("Resources unavailable: {0}")]
    ResourcesUnavailable(String),

    /// Spot pricing requested where none exists
    #[error("Spot instance not supported: {0}")]
    SpotInstanceNotSupported(String),

    /// Bootstrap called out of order or with an unusable cluster description
    #[error("Provisioning error: {0}")]
    ProvisioningError(String),

    /// A bootstrap stage failed; later stages were not attempted
    #[error("Bootstrap stage '{stage}' failed: {source}")]
    StageFailed {
        /// Stage that failed
        stage: &'static str,
        /// Underlying failure
        #[source]
        source: Box<SkyError>,
    },

    /// Remote command or fan-out failure
    #[error(transparent)]
    Command(#[from] stix_utils::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] stix_config::Error),

    /// Provisioning cache database error
    #[error("Cache database error: {0}")]
    Db(#[from] stix_db::DbError),

    /// Local filesystem error (cache lock files)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Error raised by an external collaborator (custom stores, adapters)
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Result type for STIX Sky
pub type Result<T> = std::result::Result<T, SkyError>;

impl SkyError {
    /// Nodes blamed by this error, looking through stage wrappers
    pub fn failed_nodes(&self) -> Vec<&str> {
        match self {
            Self::StageFailed { source, .. } => source.failed_nodes(),
            Self::Command(err) => err.failed_nodes(),
            _ => Vec::new(),
        }
    }
}

/// InvalidResources
pub fn invalid_resources(msg: impl Into<String>) -> SkyError {
    SkyError::InvalidResources(msg.into())
}

/// ResourcesUnavailable
pub fn resources_unavailable(msg: impl Into<String>) -> SkyError {
    SkyError::ResourcesUnavailable(msg.into())
}

/// NotLaunchable
pub fn not_launchable(msg: impl Into<String>) -> SkyError {
    SkyError::NotLaunchable(msg.into())
}
