//! Service declarations and static service data.
//!
//! Dynamic services are scraped each cycle; static ones are seeded here once
//! from JSON data files. A static region that lists `instanceTypes` follows
//! the provider's compute catalog: after every scraping cycle of the provider
//! the matching priced compute VMs are copied into the static service.

use crate::eventbus::EventBus;
use crate::store::CloudInfoStore;
use anyhow::{Context, Result};
use cloudinfo_common::bus::scraping_complete_topic;
use cloudinfo_common::{Image, LocationVersion, Price, RegionMap, Service, VmInfo, COMPUTE_SERVICE};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceDefinition {
    pub name: String,
    #[serde(default)]
    pub is_static: bool,
    #[serde(default)]
    pub data_file: Option<PathBuf>,
}

impl ServiceDefinition {
    fn as_service(&self) -> Service {
        Service {
            name: self.name.clone(),
            is_static: self.is_static,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceData {
    pub provider: String,
    pub service: String,
    #[serde(default)]
    pub regions: Vec<RegionData>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegionData {
    pub region_id: String,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub zones: Vec<String>,
    #[serde(default)]
    pub images: Vec<Image>,
    #[serde(default)]
    pub versions: Vec<String>,
    #[serde(default)]
    pub vms: Vec<VmInfo>,
    #[serde(default)]
    pub prices: Vec<PriceData>,
    /// Compute instance types this region mirrors after each scrape.
    #[serde(default)]
    pub instance_types: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceData {
    pub instance_type: String,
    pub price: Price,
}

pub struct ServiceManager {
    services: HashMap<String, Vec<ServiceDefinition>>,
    base_dir: PathBuf,
    store: CloudInfoStore,
    event_bus: EventBus,
}

impl ServiceManager {
    /// No declarations: every provider only gets the compute service.
    pub fn new(store: CloudInfoStore, event_bus: EventBus) -> Self {
        Self::with_services(HashMap::new(), PathBuf::from("."), store, event_bus)
    }

    pub fn with_services(
        services: HashMap<String, Vec<ServiceDefinition>>,
        base_dir: PathBuf,
        store: CloudInfoStore,
        event_bus: EventBus,
    ) -> Self {
        Self {
            services,
            base_dir,
            store,
            event_bus,
        }
    }

    /// Reads `{ "<provider>": [ { "name", "isStatic", "dataFile" } ] }`.
    /// Data files resolve relative to the declaration file.
    pub fn from_file(path: &Path, store: CloudInfoStore, event_bus: EventBus) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read service configuration {}", path.display()))?;
        let services: HashMap<String, Vec<ServiceDefinition>> = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse service configuration {}", path.display()))?;
        let base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Ok(Self::with_services(services, base_dir, store, event_bus))
    }

    pub fn services_of(&self, provider: &str) -> Vec<Service> {
        match self.services.get(provider) {
            Some(defs) if !defs.is_empty() => defs.iter().map(ServiceDefinition::as_service).collect(),
            _ => vec![Service::dynamic(COMPUTE_SERVICE)],
        }
    }

    /// Stores the service list of every enabled provider.
    pub async fn configure_services(&self, providers: &[String]) {
        for declared in self.services.keys() {
            if !providers.contains(declared) {
                debug!(provider = %declared, "provider not enabled");
            }
        }
        for provider in providers {
            let services = self.services_of(provider);
            debug!(provider = %provider, services = services.len(), "initialized provider services");
            self.store.store_services(provider, &services).await;
        }
    }

    /// Seeds the static services of the enabled providers; returns how many were loaded.
    pub async fn load_service_information(&self, providers: &[String]) -> Result<usize> {
        info!("triggering cloud information importing");
        let mut loaded = 0;
        for provider in providers {
            let Some(defs) = self.services.get(provider) else {
                continue;
            };
            for def in defs {
                if !def.is_static {
                    debug!(provider = %provider, service = %def.name, "dynamic service, nothing to load");
                    continue;
                }
                let Some(data_file) = &def.data_file else {
                    warn!(provider = %provider, service = %def.name, "static service without data file");
                    continue;
                };
                let path = self.base_dir.join(data_file);
                let raw = std::fs::read_to_string(&path)
                    .with_context(|| format!("failed to read service data {}", path.display()))?;
                let data: ServiceData = serde_json::from_str(&raw)
                    .with_context(|| format!("failed to parse service data {}", path.display()))?;
                if data.provider != *provider || data.service != def.name {
                    warn!(
                        provider = %provider,
                        service = %def.name,
                        file_provider = %data.provider,
                        file_service = %data.service,
                        "service data file declares a different provider/service"
                    );
                }
                self.load_service(provider, &def.name, &data).await;
                loaded += 1;
            }
        }
        info!(loaded, "cloud information imported");
        Ok(loaded)
    }

    async fn load_service(&self, provider: &str, service: &str, data: &ServiceData) {
        let mut regions = RegionMap::new();
        let mut dependents: Vec<(String, HashSet<String>)> = Vec::new();

        for region in &data.regions {
            let region_id = region.region_id.as_str();
            regions.insert(region_id.to_string(), region.region.clone());

            self.store.replace_zones(provider, service, region_id, &region.zones).await;
            self.store.replace_image(provider, service, region_id, &region.images).await;
            let versions = vec![LocationVersion::new(region_id, region.versions.clone(), "")];
            self.store.replace_version(provider, service, region_id, &versions).await;

            for price in &region.prices {
                self.store
                    .store_price(provider, region_id, &price.instance_type, &price.price)
                    .await;
            }

            if region.instance_types.is_empty() {
                let vms: Vec<VmInfo> = region.vms.iter().cloned().map(VmInfo::with_derived_fields).collect();
                self.store.replace_vm(provider, service, region_id, &vms).await;
            } else {
                dependents.push((region_id.to_string(), region.instance_types.iter().cloned().collect()));
            }
        }

        self.store.replace_regions(provider, service, &regions).await;
        info!(provider, service, regions = regions.len(), dependent = dependents.len(), "static service loaded");

        if !dependents.is_empty() {
            self.follow_compute(provider, service, dependents);
        }
    }

    fn follow_compute(&self, provider: &str, service: &str, dependents: Vec<(String, HashSet<String>)>) {
        let store = self.store.clone();
        let provider_name = provider.to_string();
        let service_name = service.to_string();
        self.event_bus
            .subscribe(&scraping_complete_topic(provider), move |_envelope| {
                let store = store.clone();
                let provider = provider_name.clone();
                let service = service_name.clone();
                let dependents = dependents.clone();
                tokio::spawn(async move {
                    for (region, instance_types) in &dependents {
                        copy_compute_vms(&store, &provider, &service, region, instance_types).await;
                    }
                });
            });
    }
}

/// Copies the priced compute VMs of `region` whose type is listed.
pub async fn copy_compute_vms(
    store: &CloudInfoStore,
    provider: &str,
    service: &str,
    region: &str,
    instance_types: &HashSet<String>,
) -> usize {
    let Some(compute) = store.get_vm(provider, COMPUTE_SERVICE, region).await else {
        warn!(provider, service, region, "compute VMs not yet cached; dependent region not updated");
        return 0;
    };
    let vms: Vec<VmInfo> = compute
        .into_iter()
        .filter(|vm| vm.on_demand_price > 0.0 && instance_types.contains(&vm.instance_type))
        .collect();
    store.replace_vm(provider, service, region, &vms).await;
    debug!(provider, service, region, vms = vms.len(), "dependent region refreshed from compute");
    vms.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryBackend;
    use cloudinfo_common::bus::CloudInfoEvent;
    use std::sync::Arc;
    use std::time::Duration;

    fn store() -> CloudInfoStore {
        CloudInfoStore::new(Arc::new(MemoryBackend::new(Duration::from_secs(60))))
    }

    fn scratch_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("cloudinfo-loader-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn vm(instance_type: &str, price: f64) -> VmInfo {
        VmInfo {
            instance_type: instance_type.to_string(),
            on_demand_price: price,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn undeclared_providers_get_compute_only() {
        let store = store();
        let manager = ServiceManager::new(store.clone(), EventBus::new());
        manager.configure_services(&["dummy".to_string()]).await;
        assert_eq!(
            store.get_services("dummy").await,
            Some(vec![Service::dynamic(COMPUTE_SERVICE)])
        );
    }

    #[tokio::test]
    async fn static_service_is_seeded_and_follows_compute() {
        let dir = scratch_dir();
        std::fs::write(
            dir.join("services.json"),
            r#"{
                "amazon": [
                    {"name": "compute"},
                    {"name": "eks", "isStatic": true, "dataFile": "eks.json"}
                ],
                "google": [{"name": "compute"}]
            }"#,
        )
        .unwrap();
        std::fs::write(
            dir.join("eks.json"),
            r#"{
                "provider": "amazon",
                "service": "eks",
                "regions": [
                    {"regionId": "eu-west-1", "region": "EU (Ireland)", "zones": ["eu-west-1a"],
                     "versions": ["1.29", "1.28"], "instanceTypes": ["m5.large"]},
                    {"regionId": "us-east-1", "region": "US East", "vms": [{"type": "m5.xlarge", "onDemandPrice": 0.2}]}
                ]
            }"#,
        )
        .unwrap();

        let store = store();
        let bus = EventBus::new();
        let manager = ServiceManager::from_file(&dir.join("services.json"), store.clone(), bus.clone()).unwrap();
        let providers = vec!["amazon".to_string()];

        manager.configure_services(&providers).await;
        assert_eq!(
            store.get_services("amazon").await,
            Some(vec![Service::dynamic("compute"), Service::static_service("eks")])
        );
        assert_eq!(store.get_services("google").await, None);

        assert_eq!(manager.load_service_information(&providers).await.unwrap(), 1);
        assert_eq!(store.get_regions("amazon", "eks").await.unwrap().len(), 2);
        assert_eq!(
            store.get_version("amazon", "eks", "eu-west-1").await.unwrap()[0].default,
            "1.29"
        );
        assert_eq!(store.get_vm("amazon", "eks", "us-east-1").await.unwrap().len(), 1);
        assert_eq!(store.get_vm("amazon", "eks", "eu-west-1").await, None);

        store
            .store_vm(
                "amazon",
                "compute",
                "eu-west-1",
                &[vm("m5.large", 0.1), vm("c5.large", 0.09), vm("m5.large-free", 0.0)],
            )
            .await;
        bus.publish(CloudInfoEvent::ScrapingComplete {
            provider: "amazon".to_string(),
        });

        let mut copied = None;
        for _ in 0..50 {
            copied = store.get_vm("amazon", "eks", "eu-west-1").await;
            if copied.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        let copied = copied.unwrap();
        assert_eq!(copied.len(), 1);
        assert_eq!(copied[0].instance_type, "m5.large");

        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn missing_data_file_is_an_error() {
        let services = HashMap::from([(
            "amazon".to_string(),
            vec![ServiceDefinition {
                name: "eks".to_string(),
                is_static: true,
                data_file: Some(PathBuf::from("does-not-exist.json")),
            }],
        )]);
        let manager = ServiceManager::with_services(services, scratch_dir(), store(), EventBus::new());
        assert!(manager.load_service_information(&["amazon".to_string()]).await.is_err());
    }
}
