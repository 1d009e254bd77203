//! Resource catalog
//!
//! Built-in instance types, default accelerators and hourly prices used by
//! the cloud adapters in [`crate::clouds`].

use once_cell::sync::Lazy;
use std::collections::HashMap;

use crate::clouds::CloudKind;
use crate::resources::Accelerators;

/// Process-wide catalog
pub static CATALOG: Lazy<Catalog> = Lazy::new(Catalog::new);

/// Instance type catalog entry
#[derive(Debug, Clone)]
pub struct InstanceType {
    pub name: String,
    pub cpus: f64,
    pub memory_gb: f64,
    /// Accelerators that come with the instance type, if any
    pub accelerator: Option<(String, f64)>,
    pub hourly_cost: f64,
    pub spot_hourly_cost: Option<f64>,
}

impl InstanceType {
    fn new(name: &str, cpus: f64, memory_gb: f64, hourly_cost: f64, spot: Option<f64>) -> Self {
        Self {
            name: name.to_string(),
            cpus,
            memory_gb,
            accelerator: None,
            hourly_cost,
            spot_hourly_cost: spot,
        }
    }

    fn with_accelerator(mut self, name: &str, count: f64) -> Self {
        self.accelerator = Some((name.to_string(), count));
        self
    }

    /// Hourly price for on-demand or spot capacity
    pub fn price(&self, use_spot: bool) -> Option<f64> {
        if use_spot {
            self.spot_hourly_cost
        } else {
            Some(self.hourly_cost)
        }
    }
}

/// Resource catalog
pub struct Catalog {
    instances: HashMap<CloudKind, Vec<InstanceType>>,
    /// Per-unit hourly prices of accelerators attached independently of the
    /// instance type
    attachable_accelerators: HashMap<CloudKind, HashMap<String, f64>>,
}

impl Catalog {
    /// Create new catalog with built-in data
    pub fn new() -> Self {
        let mut catalog = Self {
            instances: HashMap::new(),
            attachable_accelerators: HashMap::new(),
        };

        catalog.load_aws();
        catalog.load_gcp();
        catalog.load_azure();

        catalog
    }

    fn load_aws(&mut self) {
        let instances = vec![
            InstanceType::new("p3.2xlarge", 8.0, 61.0, 3.06, Some(0.918)).with_accelerator("V100", 1.0),
            InstanceType::new("p3.8xlarge", 32.0, 244.0, 12.24, Some(3.672)).with_accelerator("V100", 4.0),
            InstanceType::new("p3.16xlarge", 64.0, 488.0, 24.48, Some(7.344)).with_accelerator("V100", 8.0),
            InstanceType::new("p2.xlarge", 4.0, 61.0, 0.9, Some(0.27)).with_accelerator("K80", 1.0),
            InstanceType::new("g4dn.xlarge", 4.0, 16.0, 0.526, Some(0.158)).with_accelerator("T4", 1.0),
            InstanceType::new("p4d.24xlarge", 96.0, 1152.0, 32.77, Some(9.83)).with_accelerator("A100", 8.0),
            InstanceType::new("m5.xlarge", 4.0, 16.0, 0.192, Some(0.0576)),
            InstanceType::new("t3.medium", 2.0, 4.0, 0.0416, Some(0.0125)),
        ];
        self.instances.insert(CloudKind::Aws, instances);
    }

    fn load_gcp(&mut self) {
        // GCP attaches GPUs/TPUs to a host VM; host types carry none.
        let instances = vec![
            InstanceType::new("n1-standard-4", 4.0, 15.0, 0.19, Some(0.04)),
            InstanceType::new("n1-standard-8", 8.0, 30.0, 0.38, Some(0.08)),
            InstanceType::new("n1-highmem-8", 8.0, 52.0, 0.4736, Some(0.1)),
            InstanceType::new("a2-highgpu-1g", 12.0, 85.0, 3.67, Some(1.1)).with_accelerator("A100", 1.0),
        ];
        self.instances.insert(CloudKind::Gcp, instances);

        let accelerators = HashMap::from([
            ("K80".to_string(), 0.45),
            ("T4".to_string(), 0.35),
            ("V100".to_string(), 2.48),
            ("P100".to_string(), 1.46),
            ("tpu-v2-8".to_string(), 4.5),
            ("tpu-v3-8".to_string(), 8.0),
        ]);
        self.attachable_accelerators.insert(CloudKind::Gcp, accelerators);
    }

    fn load_azure(&mut self) {
        let instances = vec![
            InstanceType::new("Standard_NC6s_v3", 6.0, 112.0, 3.06, Some(0.918)).with_accelerator("V100", 1.0),
            InstanceType::new("Standard_NC24s_v3", 24.0, 448.0, 12.24, Some(3.672)).with_accelerator("V100", 4.0),
            InstanceType::new("Standard_D4s_v3", 4.0, 16.0, 0.192, Some(0.0384)),
        ];
        self.instances.insert(CloudKind::Azure, instances);
    }

    /// Get instance by name
    pub fn get_instance(&self, cloud: CloudKind, name: &str) -> Option<&InstanceType> {
        self.instances.get(&cloud)?.iter().find(|i| i.name == name)
    }

    /// List all instances for a cloud
    pub fn list_instances(&self, cloud: CloudKind) -> Vec<&InstanceType> {
        self.instances
            .get(&cloud)
            .map(|instances| instances.iter().collect())
            .unwrap_or_default()
    }

    /// Accelerators bundled with `instance_type`
    pub fn accelerators_for(&self, cloud: CloudKind, instance_type: &str) -> Option<Accelerators> {
        let (name, count) = self.get_instance(cloud, instance_type)?.accelerator.clone()?;
        Some(Accelerators::from([(name, count)]))
    }

    /// Per-unit hourly price of an independently attached accelerator
    pub fn accelerator_unit_price(&self, cloud: CloudKind, name: &str) -> Option<f64> {
        self.attachable_accelerators.get(&cloud)?.get(name).copied()
    }
}

impl Default for Catalog {
    fn default() -> Self {
        Self::new()
    }
}
