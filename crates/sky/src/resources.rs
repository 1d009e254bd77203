//! Resources - compute requirements and concrete offers
//!
//! A [`Resources`] value plays three roles:
//!
//! * a request attached to a task (`accelerators = "V100:2"`),
//! * a filter that candidate offers are matched against,
//! * a launchable offer (cloud + instance type) that can be costed and
//!   provisioned.
//!
//! Values are built once through [`ResourcesBuilder`], which either returns a
//! fully validated object or an error. The only mutation afterwards is
//! [`Resources::set_accelerators`].
//!
//! ```ignore
//! let request = Resources::builder().accelerators("V100:1").build()?;
//! let offer = Resources::builder()
//!     .cloud(AWS::new())
//!     .instance_type("p3.2xlarge")
//!     .build()?;
//! assert!(request.less_demanding_than(&offer));
//! ```

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use crate::clouds::{cloud_from_name, Cloud, CloudKind, GCP};
use crate::exceptions::{invalid_resources, not_launchable, Result, SkyError};

/// Default disk size in GB
pub const DEFAULT_DISK_SIZE_GB: u32 = 256;

/// Smallest accepted OS disk in GB
pub const MIN_DISK_SIZE_GB: u32 = 50;

/// Runtime version pinned for TPUs when none is given
pub const DEFAULT_TPU_TF_VERSION: &str = "2.5.0";

/// Accelerator name to count; counts may be fractional.
pub type Accelerators = BTreeMap<String, f64>;

/// Compute requirement or concrete offer
#[derive(Debug, Clone)]
pub struct Resources {
    cloud: Option<Arc<dyn Cloud>>,
    instance_type: Option<String>,
    /// Explicitly requested accelerators; see [`Resources::accelerators`]
    accelerators: Option<Accelerators>,
    accelerator_args: Option<BTreeMap<String, String>>,
    use_spot: Option<bool>,
    disk_size: Option<u32>,
    ips: Option<Vec<String>>,
}

/// Accelerators as given by the user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AcceleratorRequest {
    /// `"<name>"` or `"<name>:<count>"`
    Spec(String),
    /// `{name: count}`
    Map(Accelerators),
}

/// Builder for [`Resources`]
#[derive(Debug, Clone, Default)]
pub struct ResourcesBuilder {
    cloud: Option<Arc<dyn Cloud>>,
    instance_type: Option<String>,
    accelerators: Option<AcceleratorRequest>,
    accelerator_args: Option<BTreeMap<String, String>>,
    use_spot: Option<bool>,
    disk_size: Option<f64>,
    ips: Option<Vec<String>>,
}

impl ResourcesBuilder {
    /// Pin the cloud provider
    pub fn cloud<C: Cloud + 'static>(mut self, cloud: C) -> Self {
        self.cloud = Some(Arc::new(cloud));
        self
    }

    /// Pin the cloud provider with a shared adapter
    pub fn shared_cloud(mut self, cloud: Arc<dyn Cloud>) -> Self {
        self.cloud = Some(cloud);
        self
    }

    /// Instance type; requires a cloud
    pub fn instance_type(mut self, instance_type: impl Into<String>) -> Self {
        self.instance_type = Some(instance_type.into());
        self
    }

    /// Accelerators in string form: `"V100"`, `"V100:4"`, `"tpu-v2-8:0.5"`
    pub fn accelerators(mut self, spec: impl Into<String>) -> Self {
        self.accelerators = Some(AcceleratorRequest::Spec(spec.into()));
        self
    }

    /// Accelerators in mapping form
    pub fn accelerator_map(mut self, accelerators: Accelerators) -> Self {
        self.accelerators = Some(AcceleratorRequest::Map(accelerators));
        self
    }

    /// Accelerators in either form
    pub fn accelerator_request(mut self, request: AcceleratorRequest) -> Self {
        self.accelerators = Some(request);
        self
    }

    /// Provider-specific accelerator tuning (e.g. `tf_version`)
    pub fn accelerator_args(mut self, args: BTreeMap<String, String>) -> Self {
        self.accelerator_args = Some(args);
        self
    }

    /// Spot vs. on-demand
    pub fn use_spot(mut self, use_spot: bool) -> Self {
        self.use_spot = Some(use_spot);
        self
    }

    /// OS disk size in GB; must be integral and at least 50
    pub fn disk_size(mut self, size_gb: impl Into<f64>) -> Self {
        self.disk_size = Some(size_gb.into());
        self
    }

    /// Node addresses; only for the Local provider
    pub fn ips<I, S>(mut self, ips: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ips = Some(ips.into_iter().map(Into::into).collect());
        self
    }

    /// Validate and build
    pub fn build(self) -> Result<Resources> {
        let ResourcesBuilder {
            mut cloud,
            instance_type,
            accelerators,
            mut accelerator_args,
            use_spot,
            disk_size,
            ips,
        } = self;

        let is_local = cloud.as_ref().map(|c| c.kind()) == Some(CloudKind::Local);
        if is_local {
            let has_ips = ips.as_ref().is_some_and(|ips| !ips.is_empty());
            if instance_type.is_some() || use_spot.is_some() || disk_size.is_some() || !has_ips {
                return Err(invalid_resources(
                    "Local/on-prem resources take only `ips` (non-empty); \
                     instance_type, use_spot and disk_size must be unset",
                ));
            }
        } else if ips.is_some() {
            return Err(invalid_resources("`ips` is only valid for the Local cloud"));
        }

        if instance_type.is_some() && cloud.is_none() {
            return Err(invalid_resources(format!(
                "instance_type {:?} requires a cloud",
                instance_type.unwrap_or_default()
            )));
        }

        let accelerators = match accelerators {
            None => None,
            Some(request) => Some(normalize_accelerators(request)?),
        };

        if let Some(ref accs) = accelerators {
            if accs.keys().any(|name| is_tpu(name)) {
                match cloud.as_ref().map(|c| c.kind()) {
                    None => {
                        debug!("TPU requested without a cloud; binding to GCP");
                        cloud = Some(Arc::new(GCP::new()));
                    }
                    Some(CloudKind::Gcp) => {}
                    Some(other) => {
                        return Err(invalid_resources(format!(
                            "TPU accelerators require GCP, got cloud {}",
                            other.as_str()
                        )));
                    }
                }
                let args = accelerator_args.get_or_insert_with(BTreeMap::new);
                if !args.contains_key("tf_version") {
                    debug!("Missing tf_version in accelerator_args, using {DEFAULT_TPU_TF_VERSION}");
                    args.insert("tf_version".to_string(), DEFAULT_TPU_TF_VERSION.to_string());
                }
            }
        }

        let disk_size = disk_size.map(validate_disk_size).transpose()?;

        let resources = Resources {
            cloud,
            instance_type,
            accelerators,
            accelerator_args,
            use_spot,
            disk_size,
            ips,
        };
        resources.validate_accelerators()?;
        Ok(resources)
    }
}

fn is_tpu(name: &str) -> bool {
    name.to_ascii_lowercase().contains("tpu")
}

fn validate_disk_size(size: f64) -> Result<u32> {
    if !(size >= MIN_DISK_SIZE_GB as f64) {
        return Err(invalid_resources(format!(
            "OS disk size must be at least {MIN_DISK_SIZE_GB}GB. Got: {size}"
        )));
    }
    if size.fract() != 0.0 || size > u32::MAX as f64 {
        return Err(invalid_resources(format!(
            "OS disk size must be an integer. Got: {size}"
        )));
    }
    Ok(size as u32)
}

/// Parse `"<name>"` or `"<name>:<count>"` into a single-entry map.
///
/// The count is read as an integer first, then as a float.
pub fn parse_accelerators(spec: &str) -> Result<Accelerators> {
    let parse_error = || {
        invalid_resources(format!(
            "accelerators as a string must be <name> or <name>:<count>. Found: {spec:?}"
        ))
    };

    let mut parts = spec.split(':');
    let name = parts.next().unwrap_or_default();
    let count = match (parts.next(), parts.next()) {
        (None, _) => 1.0,
        (Some(count), None) => match count.parse::<i64>() {
            Ok(n) => n as f64,
            Err(_) => count.parse::<f64>().map_err(|_| parse_error())?,
        },
        (Some(_), Some(_)) => return Err(parse_error()),
    };
    if name.is_empty() {
        return Err(parse_error());
    }

    Ok(Accelerators::from([(name.to_string(), count)]))
}

fn normalize_accelerators(request: AcceleratorRequest) -> Result<Accelerators> {
    let accelerators = match request {
        AcceleratorRequest::Spec(spec) => parse_accelerators(&spec)?,
        AcceleratorRequest::Map(map) => map,
    };

    if accelerators.len() != 1 {
        return Err(invalid_resources(format!(
            "exactly one accelerator type may be requested, got {}",
            format_accelerators(&accelerators)
        )));
    }
    for (name, count) in &accelerators {
        if !count.is_finite() || *count <= 0.0 {
            return Err(invalid_resources(format!(
                "accelerator count for {name} must be positive, got {count}"
            )));
        }
    }
    Ok(accelerators)
}

/// `requested` fits in `offered`: every name present with at least the count.
fn accelerators_fit(requested: &Accelerators, offered: Option<&Accelerators>) -> bool {
    let Some(offered) = offered else {
        return false;
    };
    requested
        .iter()
        .all(|(name, count)| offered.get(name).is_some_and(|have| count <= have))
}

fn format_accelerators(accelerators: &Accelerators) -> String {
    let entries: Vec<String> = accelerators
        .iter()
        .map(|(name, count)| format!("{name}: {count}"))
        .collect();
    format!("{{{}}}", entries.join(", "))
}

impl Resources {
    /// Start building resources
    pub fn builder() -> ResourcesBuilder {
        ResourcesBuilder::default()
    }

    /// Empty request: everything unconstrained
    pub fn new() -> Self {
        Self {
            cloud: None,
            instance_type: None,
            accelerators: None,
            accelerator_args: None,
            use_spot: None,
            disk_size: None,
            ips: None,
        }
    }

    // ========== Getters ==========

    /// Cloud adapter, if pinned
    pub fn cloud(&self) -> Option<&Arc<dyn Cloud>> {
        self.cloud.as_ref()
    }

    /// Instance type, if pinned
    pub fn instance_type(&self) -> Option<&str> {
        self.instance_type.as_deref()
    }

    /// Explicitly requested accelerators, without inference
    pub fn explicit_accelerators(&self) -> Option<&Accelerators> {
        self.accelerators.as_ref()
    }

    /// Effective accelerators.
    ///
    /// The explicit field if set; otherwise what the cloud adapter reports
    /// for the instance type (e.g. `AWS p3.2xlarge` yields `{V100: 1}`).
    pub fn accelerators(&self) -> Option<Accelerators> {
        if let Some(ref accelerators) = self.accelerators {
            return Some(accelerators.clone());
        }
        match (&self.cloud, &self.instance_type) {
            (Some(cloud), Some(instance_type)) => cloud.accelerators_from_instance_type(instance_type),
            _ => None,
        }
    }

    /// Replace the explicit accelerators without re-validating
    pub fn set_accelerators(&mut self, accelerators: Option<Accelerators>) {
        self.accelerators = accelerators;
    }

    /// Accelerator tuning arguments
    pub fn accelerator_args(&self) -> Option<&BTreeMap<String, String>> {
        self.accelerator_args.as_ref()
    }

    /// Spot requested; unspecified counts as on-demand
    pub fn use_spot(&self) -> bool {
        self.use_spot.unwrap_or(false)
    }

    /// Whether `use_spot` was given at all
    pub fn use_spot_specified(&self) -> bool {
        self.use_spot.is_some()
    }

    /// OS disk size in GB
    pub fn disk_size(&self) -> u32 {
        self.disk_size.unwrap_or(DEFAULT_DISK_SIZE_GB)
    }

    /// On-prem node addresses
    pub fn ips(&self) -> Option<&[String]> {
        self.ips.as_deref()
    }

    /// Cloud and instance type are both pinned
    pub fn is_launchable(&self) -> bool {
        self.cloud.is_some() && self.instance_type.is_some()
    }

    /// Nothing was requested
    pub fn is_empty(&self) -> bool {
        self.cloud.is_none()
            && self.instance_type.is_none()
            && self.accelerators.is_none()
            && self.accelerator_args.is_none()
            && !self.use_spot_specified()
    }

    fn is_local(&self) -> bool {
        self.cloud.as_ref().is_some_and(|c| c.kind() == CloudKind::Local)
    }

    /// Explicit accelerators must fit in what the instance type provides.
    ///
    /// GCP is exempt: accelerators are attached independently of the VM.
    /// The explicit field is kept even when smaller than the instance's
    /// (a task may use 1 of 4 GPUs).
    fn validate_accelerators(&self) -> Result<()> {
        let (Some(cloud), Some(instance_type), Some(requested)) =
            (&self.cloud, &self.instance_type, &self.accelerators)
        else {
            return Ok(());
        };
        if cloud.kind() == CloudKind::Gcp {
            return Ok(());
        }

        let from_instance = cloud.accelerators_from_instance_type(instance_type);
        if !accelerators_fit(requested, from_instance.as_ref()) {
            return Err(SkyError::InfeasibleResources(format!(
                "instance type {instance_type} provides {}, but {} were requested. \
                 Either only specify instance_type, or change accelerators to be consistent.",
                from_instance
                    .as_ref()
                    .map(format_accelerators)
                    .unwrap_or_else(|| "no accelerators".to_string()),
                format_accelerators(requested),
            )));
        }
        Ok(())
    }

    // ========== Matching ==========

    /// Exact equality: same provider, instance type, effective accelerators,
    /// accelerator args and spot flag.
    pub fn is_same_resources(&self, other: &Resources) -> bool {
        match (&self.cloud, &other.cloud) {
            (None, None) => {}
            (Some(a), Some(b)) if a.is_same_cloud(b.as_ref()) => {}
            _ => return false,
        }
        self.instance_type == other.instance_type
            && self.accelerators() == other.accelerators()
            && self.accelerator_args == other.accelerator_args
            && self.use_spot() == other.use_spot()
    }

    /// Whether this request fits within `other`.
    ///
    /// A partial order: neither total, antisymmetric nor transitive. Either
    /// side being Local/on-prem makes the answer `true` unconditionally, so
    /// on-prem capacity is never rejected here.
    pub fn less_demanding_than(&self, other: &Resources) -> bool {
        if self.is_local() || other.is_local() {
            return true;
        }

        if let Some(ref cloud) = self.cloud {
            match other.cloud {
                Some(ref theirs) if cloud.is_same_cloud(theirs.as_ref()) => {}
                _ => return false,
            }
        }

        if self.instance_type.is_some() && self.instance_type != other.instance_type {
            return false;
        }

        if let Some(requested) = self.accelerators() {
            if !accelerators_fit(&requested, other.accelerators().as_ref()) {
                return false;
            }
        }

        if self.accelerator_args.is_some() && self.accelerator_args != other.accelerator_args {
            return false;
        }

        self.use_spot() == other.use_spot()
    }

    /// Coarse equality used to blacklist launch targets that failed.
    ///
    /// Instance types decide when either side has one. Otherwise two
    /// requests match when they name the same accelerator types, whatever
    /// the counts: a smaller count of a type that failed for capacity
    /// reasons fails too. Both sides must have a cloud.
    pub fn is_launchable_fuzzy_equal(&self, other: &Resources) -> Result<bool> {
        let (Some(mine), Some(theirs)) = (&self.cloud, &other.cloud) else {
            return Err(not_launchable(format!(
                "fuzzy launch comparison needs a cloud on both sides: {self} vs {other}"
            )));
        };
        if !mine.is_same_cloud(theirs.as_ref()) {
            return Ok(false);
        }
        if self.instance_type.is_some() || other.instance_type.is_some() {
            return Ok(self.instance_type == other.instance_type);
        }

        let names = |accs: Option<Accelerators>| -> Option<BTreeSet<String>> {
            accs.map(|accs| accs.into_keys().collect())
        };
        Ok(names(self.accelerators()) == names(other.accelerators()))
    }

    /// Cost in USD of running for `seconds`
    pub fn cost(&self, seconds: f64) -> Result<f64> {
        let (Some(cloud), Some(instance_type)) = (&self.cloud, &self.instance_type) else {
            return Err(not_launchable(format!("cannot price {self}")));
        };

        let mut hourly = cloud.instance_type_to_hourly_cost(instance_type, self.use_spot())?;
        if let Some(accelerators) = self.accelerators() {
            hourly += cloud.accelerators_to_hourly_cost(&accelerators)?;
        }
        Ok(hourly * seconds / 3600.0)
    }

    // ========== YAML ==========

    /// Build from the declarative form, with full validation
    pub fn from_config(config: ResourcesConfig) -> Result<Self> {
        let mut builder = Resources::builder();
        if let Some(ref name) = config.cloud {
            builder = builder.shared_cloud(cloud_from_name(name)?);
        }
        builder.instance_type = config.instance_type;
        builder.accelerators = config.accelerators;
        builder.accelerator_args = config.accelerator_args;
        builder.use_spot = config.use_spot;
        builder.disk_size = config.disk_size;
        builder.ips = config.ips;
        builder.build()
    }

    /// Declarative form of the explicitly set fields
    pub fn to_config(&self) -> ResourcesConfig {
        ResourcesConfig {
            cloud: self.cloud.as_ref().map(|c| c.kind().as_str().to_string()),
            instance_type: self.instance_type.clone(),
            accelerators: self.accelerators.clone().map(AcceleratorRequest::Map),
            accelerator_args: self.accelerator_args.clone(),
            use_spot: self.use_spot,
            disk_size: self.disk_size.map(f64::from),
            ips: self.ips.clone(),
        }
    }

    /// Parse and validate a YAML resources block
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Self::from_config(serde_yaml::from_str(yaml)?)
    }

    /// Serialize the explicit fields as YAML
    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(&self.to_config())?)
    }
}

impl Default for Resources {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for Resources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.cloud {
            Some(ref cloud) => write!(f, "{cloud}(")?,
            None => f.write_str("None(")?,
        }
        f.write_str(self.instance_type.as_deref().unwrap_or("None"))?;
        if self.use_spot() {
            f.write_str("[Spot]")?;
        }
        if let Some(accelerators) = self.accelerators() {
            write!(f, ", {}", format_accelerators(&accelerators))?;
            if let Some(ref args) = self.accelerator_args {
                write!(f, ", accelerator_args={args:?}")?;
            }
        }
        f.write_str(")")
    }
}

/// Serializable resources block as found in task files
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResourcesConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloud: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accelerators: Option<AcceleratorRequest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accelerator_args: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_spot: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disk_size: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ips: Option<Vec<String>>,
}
