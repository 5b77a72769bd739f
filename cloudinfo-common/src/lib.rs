use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub mod bus;
pub mod keys;

pub use keys::{CacheKey, EntityKind};

/// Name of the service every provider scrapes first; other services inherit its zones.
pub const COMPUTE_SERVICE: &str = "compute";

// -----------------------------------------------------------------------------
// Attribute names / categories
// -----------------------------------------------------------------------------

pub const ATTR_CPU: &str = "cpu";
pub const ATTR_MEMORY: &str = "memory";
pub const ATTR_NETWORK_PERF_CATEGORY: &str = "networkPerfCategory";
pub const ATTR_INSTANCE_TYPE_CATEGORY: &str = "instanceTypeCategory";

pub const NTW_LOW: &str = "low";
pub const NTW_MEDIUM: &str = "medium";
pub const NTW_HIGH: &str = "high";
pub const NTW_EXTRA: &str = "extra";

pub const CATEGORY_GENERAL: &str = "General purpose";
pub const CATEGORY_COMPUTE: &str = "Compute optimized";
pub const CATEGORY_MEMORY: &str = "Memory optimized";
pub const CATEGORY_GPU: &str = "GPU instance";
pub const CATEGORY_STORAGE: &str = "Storage optimized";

/// Builds the free-form attribute map attached to every VM record.
pub fn attributes(cpu: &str, memory: &str, ntw_perf_cat: &str, vm_category: &str) -> HashMap<String, String> {
    HashMap::from([
        (ATTR_CPU.to_string(), cpu.to_string()),
        (ATTR_MEMORY.to_string(), memory.to_string()),
        (ATTR_NETWORK_PERF_CATEGORY.to_string(), ntw_perf_cat.to_string()),
        (ATTR_INSTANCE_TYPE_CATEGORY.to_string(), vm_category.to_string()),
    ])
}

// --- Prices ---

/// Spot (short-lived) price per availability zone.
pub type SpotPriceInfo = HashMap<String, f64>;

/// Region id -> human readable region name.
pub type RegionMap = HashMap<String, String>;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct Price {
    #[serde(rename = "onDemandPrice")]
    pub on_demand_price: f64,
    #[serde(rename = "spotPrice", default)]
    pub spot_price: SpotPriceInfo,
}

impl Price {
    pub fn on_demand(price: f64) -> Self {
        Self {
            on_demand_price: price,
            spot_price: SpotPriceInfo::new(),
        }
    }
}

// --- Entities ---

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct VmInfo {
    #[serde(default)]
    pub category: String,
    #[serde(rename = "type")]
    pub instance_type: String,
    #[serde(rename = "onDemandPrice", default)]
    pub on_demand_price: f64,
    #[serde(rename = "spotPrice", default)]
    pub spot_price: SpotPriceInfo,
    #[serde(rename = "cpusPerVm", default)]
    pub cpus: f64,
    #[serde(rename = "memPerVm", default)]
    pub mem: f64,
    #[serde(rename = "gpusPerVm", default)]
    pub gpus: f64,
    #[serde(rename = "ntwPerf", default)]
    pub ntw_perf: String,
    #[serde(rename = "ntwPerfCategory", default)]
    pub ntw_perf_cat: String,
    #[serde(default)]
    pub zones: Vec<String>,
    #[serde(default)]
    pub attributes: HashMap<String, String>,
    // Only meaningful for providers that publish instance generations.
    #[serde(rename = "currentGen", default)]
    pub current_gen: bool,
    #[serde(default)]
    pub burst: bool,
}

impl VmInfo {
    /// Burst-type vCPUs are recognised by their `t*` family prefix.
    pub fn is_burst(&self) -> bool {
        self.instance_type
            .chars()
            .next()
            .map(|c| c.eq_ignore_ascii_case(&'t'))
            .unwrap_or(false)
    }

    /// Fills the derived fields (burst flag, attribute map) from the raw figures.
    pub fn with_derived_fields(mut self) -> Self {
        self.burst = self.is_burst();
        if self.attributes.is_empty() {
            self.attributes = attributes(
                &self.cpus.to_string(),
                &self.mem.to_string(),
                &self.ntw_perf_cat,
                &self.category,
            );
        }
        self
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct Image {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
    #[serde(rename = "gpu", default, skip_serializing_if = "std::ops::Not::not")]
    pub gpu_available: bool,
}

impl Image {
    pub fn new(name: &str, version: &str, gpu_available: bool) -> Self {
        Self {
            name: name.to_string(),
            version: version.to_string(),
            gpu_available,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct LocationVersion {
    pub location: String,
    #[serde(default)]
    pub versions: Vec<String>,
    #[serde(default)]
    pub default: String,
}

impl LocationVersion {
    /// The first listed version becomes the default when none is given.
    pub fn new(location: &str, versions: Vec<String>, default: &str) -> Self {
        let default = match (default.is_empty(), versions.first()) {
            (true, Some(first)) => first.clone(),
            _ => default.to_string(),
        };
        Self {
            location: location.to_string(),
            versions,
            default,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Service {
    #[serde(rename = "service")]
    pub name: String,
    #[serde(rename = "isStatic", default)]
    pub is_static: bool,
}

impl Service {
    pub fn dynamic(name: &str) -> Self {
        Self {
            name: name.to_string(),
            is_static: false,
        }
    }

    pub fn static_service(name: &str) -> Self {
        Self {
            name: name.to_string(),
            is_static: true,
        }
    }

    pub fn is_compute(&self) -> bool {
        self.name == COMPUTE_SERVICE
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Provider {
    pub provider: String,
    #[serde(default)]
    pub services: Vec<Service>,
}
