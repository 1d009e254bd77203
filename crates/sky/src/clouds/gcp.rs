//! GCP
//!
//! Accelerators are attached to a host VM rather than implied by its
//! instance type, so they are priced separately.

use std::fmt;

use crate::catalog::CATALOG;
use crate::clouds::{Cloud, CloudKind};
use crate::exceptions::{resources_unavailable, Result, SkyError};
use crate::resources::Accelerators;

/// Google Cloud Platform
#[derive(Debug, Clone, Default)]
pub struct GCP;

impl GCP {
    /// Creates new GCP adapter
    pub fn new() -> Self {
        Self
    }
}

impl fmt::Display for GCP {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("GCP")
    }
}

impl Cloud for GCP {
    fn kind(&self) -> CloudKind {
        CloudKind::Gcp
    }

    fn accelerators_from_instance_type(&self, instance_type: &str) -> Option<Accelerators> {
        CATALOG.accelerators_for(CloudKind::Gcp, instance_type)
    }

    fn instance_type_to_hourly_cost(&self, instance_type: &str, use_spot: bool) -> Result<f64> {
        let instance = CATALOG
            .get_instance(CloudKind::Gcp, instance_type)
            .ok_or_else(|| resources_unavailable(format!("GCP instance type {instance_type}")))?;
        instance.price(use_spot).ok_or_else(|| {
            SkyError::SpotInstanceNotSupported(format!("GCP {instance_type}"))
        })
    }

    fn accelerators_to_hourly_cost(&self, accelerators: &Accelerators) -> Result<f64> {
        accelerators.iter().try_fold(0.0, |total, (name, count)| {
            let unit = CATALOG
                .accelerator_unit_price(CloudKind::Gcp, name)
                .ok_or_else(|| resources_unavailable(format!("GCP accelerator {name}")))?;
            Ok(total + unit * count)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attached_accelerator_pricing() {
        let gcp = GCP::new();
        let accs = Accelerators::from([("V100".to_string(), 2.0)]);
        assert!((gcp.accelerators_to_hourly_cost(&accs).unwrap() - 4.96).abs() < 1e-9);

        let unknown = Accelerators::from([("H200".to_string(), 1.0)]);
        assert!(gcp.accelerators_to_hourly_cost(&unknown).is_err());
    }

    #[test]
    fn test_host_types_carry_no_accelerators() {
        assert!(GCP::new().accelerators_from_instance_type("n1-standard-8").is_none());
    }
}
