//! Azure

use std::fmt;

use crate::catalog::CATALOG;
use crate::clouds::{Cloud, CloudKind};
use crate::exceptions::{resources_unavailable, Result, SkyError};
use crate::resources::Accelerators;

/// Microsoft Azure
#[derive(Debug, Clone, Default)]
pub struct Azure;

impl Azure {
    /// Creates new Azure adapter
    pub fn new() -> Self {
        Self
    }
}

impl fmt::Display for Azure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Azure")
    }
}

impl Cloud for Azure {
    fn kind(&self) -> CloudKind {
        CloudKind::Azure
    }

    fn accelerators_from_instance_type(&self, instance_type: &str) -> Option<Accelerators> {
        CATALOG.accelerators_for(CloudKind::Azure, instance_type)
    }

    fn instance_type_to_hourly_cost(&self, instance_type: &str, use_spot: bool) -> Result<f64> {
        let instance = CATALOG
            .get_instance(CloudKind::Azure, instance_type)
            .ok_or_else(|| resources_unavailable(format!("Azure instance type {instance_type}")))?;
        instance.price(use_spot).ok_or_else(|| {
            SkyError::SpotInstanceNotSupported(format!("Azure {instance_type}"))
        })
    }

    fn accelerators_to_hourly_cost(&self, _accelerators: &Accelerators) -> Result<f64> {
        Ok(0.0)
    }
}
