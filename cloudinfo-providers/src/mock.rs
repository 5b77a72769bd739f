use crate::{CloudInfoer, PriceIndex, RegionPrices};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use cloudinfo_common::{Image, LocationVersion, Price, RegionMap, VmInfo, COMPUTE_SERVICE};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// Static catalog served by [`DummyInfoer`].
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DummyFixture {
    pub regions: RegionMap,
    /// Regions per non-compute service; services missing here get the compute regions.
    #[serde(default)]
    pub service_regions: HashMap<String, RegionMap>,
    #[serde(default)]
    pub zones: HashMap<String, Vec<String>>,
    #[serde(default)]
    pub vms: HashMap<String, Vec<VmInfo>>,
    /// Bulk price index returned by `initialize`.
    #[serde(default)]
    pub prices: PriceIndex,
    /// Short-lived prices returned by `get_current_prices`.
    #[serde(default)]
    pub current_prices: PriceIndex,
    #[serde(default)]
    pub short_lived: bool,
    #[serde(default)]
    pub images: HashMap<String, Vec<Image>>,
    #[serde(default)]
    pub versions: HashMap<String, Vec<LocationVersion>>,
}

impl DummyFixture {
    /// One region, one instance type priced at 0.10.
    pub fn sample() -> Self {
        let vm = VmInfo {
            instance_type: "t1".to_string(),
            cpus: 2.0,
            mem: 4.0,
            ntw_perf: "1 Gbit/s".to_string(),
            ntw_perf_cat: cloudinfo_common::NTW_LOW.to_string(),
            category: cloudinfo_common::CATEGORY_GENERAL.to_string(),
            zones: vec!["r1a".to_string()],
            current_gen: true,
            ..Default::default()
        }
        .with_derived_fields();

        Self {
            regions: HashMap::from([("r1".to_string(), "Region One".to_string())]),
            zones: HashMap::from([("r1".to_string(), vec!["r1a".to_string()])]),
            vms: HashMap::from([("r1".to_string(), vec![vm])]),
            prices: HashMap::from([(
                "r1".to_string(),
                HashMap::from([("t1".to_string(), Price::on_demand(0.10))]),
            )]),
            versions: HashMap::from([(
                "r1".to_string(),
                vec![LocationVersion::new("r1", vec!["1.29".to_string()], "")],
            )]),
            ..Default::default()
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read dummy fixture {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse dummy fixture {}", path.display()))
    }
}

/// In-memory provider used by tests and local runs.
///
/// Failures can be injected per region (every region scoped call fails) or
/// per service (`get_regions` fails), and every call is recorded.
pub struct DummyInfoer {
    fixture: DummyFixture,
    fail_initialize: AtomicBool,
    failing_regions: Mutex<HashSet<String>>,
    failing_services: Mutex<HashSet<String>>,
    calls: Mutex<Vec<String>>,
}

impl DummyInfoer {
    pub fn new(fixture: DummyFixture) -> Self {
        Self {
            fixture,
            fail_initialize: AtomicBool::new(false),
            failing_regions: Mutex::new(HashSet::new()),
            failing_services: Mutex::new(HashSet::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn fixture(&self) -> &DummyFixture {
        &self.fixture
    }

    pub fn fail_initialize(&self, fail: bool) {
        self.fail_initialize.store(fail, Ordering::SeqCst);
    }

    pub fn fail_region(&self, region: &str) {
        if let Ok(mut set) = self.failing_regions.lock() {
            set.insert(region.to_string());
        }
    }

    pub fn fail_service(&self, service: &str) {
        if let Ok(mut set) = self.failing_services.lock() {
            set.insert(service.to_string());
        }
    }

    pub fn heal(&self) {
        self.fail_initialize(false);
        if let Ok(mut set) = self.failing_regions.lock() {
            set.clear();
        }
        if let Ok(mut set) = self.failing_services.lock() {
            set.clear();
        }
    }

    /// Recorded calls, formatted as `<method>:<args>`.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn call_count(&self, prefix: &str) -> usize {
        self.calls().iter().filter(|c| c.starts_with(prefix)).count()
    }

    fn record(&self, call: String) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
    }

    fn check_region(&self, region: &str) -> Result<()> {
        let failing = self
            .failing_regions
            .lock()
            .map(|set| set.contains(region))
            .unwrap_or(false);
        if failing {
            return Err(anyhow!("dummy provider: region {} unavailable", region));
        }
        Ok(())
    }
}

#[async_trait]
impl CloudInfoer for DummyInfoer {
    async fn initialize(&self) -> Result<PriceIndex> {
        self.record("initialize".to_string());
        if self.fail_initialize.load(Ordering::SeqCst) {
            return Err(anyhow!("dummy provider: price index unavailable"));
        }
        Ok(self.fixture.prices.clone())
    }

    async fn get_virtual_machines(&self, region: &str) -> Result<Vec<VmInfo>> {
        self.record(format!("get_virtual_machines:{}", region));
        self.check_region(region)?;
        Ok(self.fixture.vms.get(region).cloned().unwrap_or_default())
    }

    async fn get_products(&self, vms: &[VmInfo], service: &str, region: &str) -> Result<Vec<VmInfo>> {
        self.record(format!("get_products:{}:{}", service, region));
        self.check_region(region)?;
        Ok(vms.to_vec())
    }

    async fn get_regions(&self, service: &str) -> Result<RegionMap> {
        self.record(format!("get_regions:{}", service));
        let failing = self
            .failing_services
            .lock()
            .map(|set| set.contains(service))
            .unwrap_or(false);
        if failing {
            return Err(anyhow!("dummy provider: regions of service {} unavailable", service));
        }
        if service == COMPUTE_SERVICE {
            return Ok(self.fixture.regions.clone());
        }
        Ok(self
            .fixture
            .service_regions
            .get(service)
            .cloned()
            .unwrap_or_else(|| self.fixture.regions.clone()))
    }

    async fn get_zones(&self, region: &str) -> Result<Vec<String>> {
        self.record(format!("get_zones:{}", region));
        self.check_region(region)?;
        Ok(self.fixture.zones.get(region).cloned().unwrap_or_default())
    }

    async fn get_current_prices(&self, region: &str) -> Result<RegionPrices> {
        self.record(format!("get_current_prices:{}", region));
        self.check_region(region)?;
        Ok(self
            .fixture
            .current_prices
            .get(region)
            .cloned()
            .unwrap_or_default())
    }

    fn has_short_lived_price_info(&self) -> bool {
        self.fixture.short_lived
    }

    fn has_images(&self) -> bool {
        !self.fixture.images.is_empty()
    }

    async fn get_service_images(&self, service: &str, region: &str) -> Result<Vec<Image>> {
        self.record(format!("get_service_images:{}:{}", service, region));
        self.check_region(region)?;
        Ok(self.fixture.images.get(region).cloned().unwrap_or_default())
    }

    async fn get_versions(&self, service: &str, region: &str) -> Result<Vec<LocationVersion>> {
        self.record(format!("get_versions:{}:{}", service, region));
        self.check_region(region)?;
        Ok(self.fixture.versions.get(region).cloned().unwrap_or_default())
    }
}
