//! AWS

use std::fmt;

use crate::catalog::CATALOG;
use crate::clouds::{Cloud, CloudKind};
use crate::exceptions::{resources_unavailable, Result, SkyError};
use crate::resources::Accelerators;

/// Amazon Web Services
#[derive(Debug, Clone, Default)]
pub struct AWS;

impl AWS {
    /// Creates new AWS adapter
    pub fn new() -> Self {
        Self
    }
}

impl fmt::Display for AWS {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AWS")
    }
}

impl Cloud for AWS {
    fn kind(&self) -> CloudKind {
        CloudKind::Aws
    }

    fn accelerators_from_instance_type(&self, instance_type: &str) -> Option<Accelerators> {
        CATALOG.accelerators_for(CloudKind::Aws, instance_type)
    }

    fn instance_type_to_hourly_cost(&self, instance_type: &str, use_spot: bool) -> Result<f64> {
        let instance = CATALOG
            .get_instance(CloudKind::Aws, instance_type)
            .ok_or_else(|| resources_unavailable(format!("AWS instance type {instance_type}")))?;
        instance.price(use_spot).ok_or_else(|| {
            SkyError::SpotInstanceNotSupported(format!("AWS {instance_type}"))
        })
    }

    fn accelerators_to_hourly_cost(&self, _accelerators: &Accelerators) -> Result<f64> {
        // Included in the instance price.
        Ok(0.0)
    }
}
