//! Local / on-prem

use std::fmt;

use crate::clouds::{Cloud, CloudKind};
use crate::exceptions::Result;
use crate::resources::Accelerators;

/// Pre-existing machines addressed by IP; no instance types, no billing
#[derive(Debug, Clone, Default)]
pub struct Local;

impl Local {
    /// Creates new on-prem adapter
    pub fn new() -> Self {
        Self
    }
}

impl fmt::Display for Local {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Local")
    }
}

impl Cloud for Local {
    fn kind(&self) -> CloudKind {
        CloudKind::Local
    }

    fn accelerators_from_instance_type(&self, _instance_type: &str) -> Option<Accelerators> {
        None
    }

    fn instance_type_to_hourly_cost(&self, _instance_type: &str, _use_spot: bool) -> Result<f64> {
        Ok(0.0)
    }

    fn accelerators_to_hourly_cost(&self, _accelerators: &Accelerators) -> Result<f64> {
        Ok(0.0)
    }
}
