use anyhow::Result;
use async_trait::async_trait;
use cloudinfo_common::{Image, LocationVersion, Price, RegionMap, VmInfo};
use std::collections::HashMap;

/// Region -> instance type -> price, as returned by the bulk price download.
pub type PriceIndex = HashMap<String, HashMap<String, Price>>;

/// Instance type -> current price for a single region.
pub type RegionPrices = HashMap<String, Price>;

/// Everything the renewal pipeline needs from one cloud vendor.
///
/// Implementations own the vendor specifics (clients, credentials, paging);
/// the pipeline only sequences these calls and persists what they return.
#[async_trait]
pub trait CloudInfoer: Send + Sync {
    /// Called once per full renewal; may download a large price descriptor.
    async fn initialize(&self) -> Result<PriceIndex>;

    /// Instance types available in a region.
    async fn get_virtual_machines(&self, region: &str) -> Result<Vec<VmInfo>>;

    /// Service specific products, derived from the compute VMs of the region.
    async fn get_products(&self, vms: &[VmInfo], service: &str, region: &str) -> Result<Vec<VmInfo>>;

    async fn get_regions(&self, service: &str) -> Result<RegionMap>;

    async fn get_zones(&self, region: &str) -> Result<Vec<String>>;

    /// Current (possibly short-lived) prices in a region.
    async fn get_current_prices(&self, region: &str) -> Result<RegionPrices>;

    // Optional: frequently changing prices (spot) refreshed on the fast schedule.
    // Default is false so providers with static price lists stay off that schedule.
    fn has_short_lived_price_info(&self) -> bool {
        false
    }

    // Optional: image catalog support.
    fn has_images(&self) -> bool {
        false
    }

    async fn get_service_images(&self, _service: &str, _region: &str) -> Result<Vec<Image>> {
        Ok(vec![])
    }

    async fn get_versions(&self, service: &str, region: &str) -> Result<Vec<LocationVersion>>;
}

#[cfg(feature = "mock")]
pub mod mock;
