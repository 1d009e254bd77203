//! STIX Sky - resource matching and cluster bootstrap
//!
//! Turns abstract compute requirements into launchable, costed offers and
//! brings freshly provisioned nodes up to a running cluster.
//!
//! # Architecture
//!
//! ```text
//! stix-sky/
//! ├── resources   - Resource requirements, validation and the matching algebra
//! ├── clouds      - Cloud adapters (AWS, GCP, Azure, Local)
//! ├── catalog     - Instance types, bundled accelerators and prices
//! ├── provision   - Provisioning cache and cluster bootstrap stages
//! └── exceptions  - Error types
//! ```

// Core modules
pub mod exceptions;
pub mod resources;

// Cloud and infrastructure
pub mod catalog;
pub mod clouds;
pub mod provision;

// Re-exports for convenience
pub use crate::clouds::{cloud_from_name, Cloud, CloudKind};
pub use crate::exceptions::{Result, SkyError};
pub use crate::provision::{BootstrapState, ClusterBootstrap, ProvisioningCache};
pub use crate::resources::{Accelerators, Resources, ResourcesBuilder, ResourcesConfig};

/// Version of STIX Sky
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
