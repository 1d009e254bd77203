//! Cloud adapters
//!
//! The matching algebra only needs a narrow view of a provider: whether two
//! adapters denote the same cloud, which accelerators an instance type
//! carries, and what things cost per hour. [`Cloud`] is that view.

pub mod aws;
pub mod azure;
pub mod gcp;
pub mod local;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::exceptions::{invalid_resources, Result};
use crate::resources::Accelerators;

/// Provider identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CloudKind {
    Aws,
    Gcp,
    Azure,
    /// On-prem machines addressed by IP
    Local,
}

impl CloudKind {
    /// Canonical lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Aws => "aws",
            Self::Gcp => "gcp",
            Self::Azure => "azure",
            Self::Local => "local",
        }
    }
}

/// Cloud adapter capability consumed by [`crate::Resources`]
pub trait Cloud: fmt::Debug + fmt::Display + Send + Sync {
    /// Which provider this adapter talks to
    fn kind(&self) -> CloudKind;

    /// Same provider, regardless of adapter instance
    fn is_same_cloud(&self, other: &dyn Cloud) -> bool {
        self.kind() == other.kind()
    }

    /// Accelerators an instance type comes with, if any
    fn accelerators_from_instance_type(&self, instance_type: &str) -> Option<Accelerators>;

    /// Hourly price of the bare instance
    fn instance_type_to_hourly_cost(&self, instance_type: &str, use_spot: bool) -> Result<f64>;

    /// Hourly price of the accelerators on top of the instance
    fn accelerators_to_hourly_cost(&self, accelerators: &Accelerators) -> Result<f64>;
}

/// Resolve a provider name (`aws`, `gcp`, `azure`, `local`; any case)
pub fn cloud_from_name(name: &str) -> Result<Arc<dyn Cloud>> {
    let cloud: Arc<dyn Cloud> = match name.to_ascii_lowercase().as_str() {
        "aws" => Arc::new(AWS::new()),
        "gcp" => Arc::new(GCP::new()),
        "azure" => Arc::new(Azure::new()),
        "local" => Arc::new(Local::new()),
        other => return Err(invalid_resources(format!("unknown cloud: {other:?}"))),
    };
    Ok(cloud)
}

// Re-exports
pub use aws::AWS;
pub use azure::Azure;
pub use gcp::GCP;
pub use local::Local;
