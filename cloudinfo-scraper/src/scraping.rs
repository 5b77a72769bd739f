use crate::error::ScrapeError;
use crate::eventbus::EventBus;
use crate::metrics::MetricsReporter;
use crate::store::CloudInfoStore;
use chrono::Utc;
use cloudinfo_common::bus::CloudInfoEvent;
use cloudinfo_common::{EntityKind, RegionMap, Service, VmInfo, COMPUTE_SERVICE};
use cloudinfo_providers::CloudInfoer;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

const NOT_APPLICABLE: &str = "N/A";

/// Renewal pipeline of a single provider.
///
/// One cycle runs: price index, compute discovery, per service region steps,
/// status update, completion event. Cycles of different providers share
/// nothing but the store.
#[derive(Clone)]
pub struct ScrapingManager {
    provider: String,
    infoer: Arc<dyn CloudInfoer>,
    store: CloudInfoStore,
    metrics: Arc<dyn MetricsReporter>,
    event_bus: EventBus,
}

impl ScrapingManager {
    pub fn new(
        provider: &str,
        infoer: Arc<dyn CloudInfoer>,
        store: CloudInfoStore,
        metrics: Arc<dyn MetricsReporter>,
        event_bus: EventBus,
    ) -> Self {
        Self {
            provider: provider.to_string(),
            infoer,
            store,
            metrics,
            event_bus,
        }
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn has_short_lived_price_info(&self) -> bool {
        self.infoer.has_short_lived_price_info()
    }

    /// Loads the bulk price index. Failures only skip this step.
    pub async fn initialize(&self) {
        info!(provider = %self.provider, "initializing cloud product information");
        let prices = match self.infoer.initialize().await {
            Ok(prices) => prices,
            Err(e) => {
                error!(provider = %self.provider, error = %e, "failed to initialize cloud product information");
                return;
            }
        };

        for (region, by_type) in &prices {
            for (instance_type, price) in by_type {
                self.store.store_price(&self.provider, region, instance_type, price).await;
                self.metrics
                    .report_on_demand_price(&self.provider, region, instance_type, price.on_demand_price);
            }
        }
        info!(provider = %self.provider, "finished initializing cloud product information");
    }

    /// Stores the compute regions and, per region, the VM catalog and zones.
    ///
    /// A region that fails is counted and keeps its previous snapshot; only a
    /// missing region list fails the step. Returns the regions discovered in
    /// this cycle, so failed ones are not scraped (and counted) again.
    pub async fn discover_compute(&self) -> Result<RegionMap, ScrapeError> {
        let regions = match self.infoer.get_regions(COMPUTE_SERVICE).await {
            Ok(regions) => regions,
            Err(e) => {
                self.metrics
                    .report_scrape_failure(&self.provider, COMPUTE_SERVICE, NOT_APPLICABLE);
                return Err(ScrapeError::provider(
                    "failed to retrieve regions",
                    &self.provider,
                    COMPUTE_SERVICE,
                    NOT_APPLICABLE,
                    e,
                ));
            }
        };
        self.store.replace_regions(&self.provider, COMPUTE_SERVICE, &regions).await;

        let mut discovered = RegionMap::new();
        for region in sorted_ids(&regions) {
            match self.discover_compute_region(region).await {
                Ok(()) => {
                    discovered.insert(region.to_string(), regions[region].clone());
                }
                Err(e) => {
                    self.metrics.report_scrape_failure(&self.provider, COMPUTE_SERVICE, region);
                    warn!(provider = %self.provider, service = COMPUTE_SERVICE, region, error = %e, "compute discovery failed for region; keeping previous data");
                }
            }
        }
        Ok(discovered)
    }

    async fn discover_compute_region(&self, region: &str) -> Result<(), ScrapeError> {
        let vms = self.infoer.get_virtual_machines(region).await.map_err(|e| {
            ScrapeError::provider("failed to retrieve virtual machines", &self.provider, COMPUTE_SERVICE, region, e)
        })?;
        self.store.replace_vm(&self.provider, COMPUTE_SERVICE, region, &vms).await;

        let zones = self
            .infoer
            .get_zones(region)
            .await
            .map_err(|e| ScrapeError::provider("failed to retrieve zones", &self.provider, COMPUTE_SERVICE, region, e))?;
        self.store.replace_zones(&self.provider, COMPUTE_SERVICE, region, &zones).await;
        Ok(())
    }

    /// Region step of one service: zones, products, price merge, images, versions.
    pub async fn scrape_service_region(&self, service: &str, region: &str) -> Result<(), ScrapeError> {
        if service != COMPUTE_SERVICE {
            // zones of secondary services always come from compute
            let zones = self
                .store
                .get_zones(&self.provider, COMPUTE_SERVICE, region)
                .await
                .ok_or_else(|| ScrapeError::not_cached(EntityKind::Zones, &self.provider, COMPUTE_SERVICE, region))?;
            self.store.replace_zones(&self.provider, service, region, &zones).await;

            self.scrape_service_region_products(service, region).await?;
        }

        self.update_virtual_machines(service, region).await?;

        if self.infoer.has_images() {
            let images = self
                .infoer
                .get_service_images(service, region)
                .await
                .map_err(|e| ScrapeError::provider("failed to retrieve service images", &self.provider, service, region, e))?;
            self.store.replace_image(&self.provider, service, region, &images).await;
        }

        let versions = self
            .infoer
            .get_versions(service, region)
            .await
            .map_err(|e| ScrapeError::provider("failed to retrieve service versions", &self.provider, service, region, e))?;
        self.store.replace_version(&self.provider, service, region, &versions).await;

        Ok(())
    }

    async fn scrape_service_region_products(&self, service: &str, region: &str) -> Result<(), ScrapeError> {
        debug!(provider = %self.provider, service, region, "retrieving regional product information");
        let vms = self
            .store
            .get_vm(&self.provider, COMPUTE_SERVICE, region)
            .await
            .ok_or_else(|| ScrapeError::not_cached(EntityKind::Vms, &self.provider, COMPUTE_SERVICE, region))?;

        let products = self
            .infoer
            .get_products(&vms, service, region)
            .await
            .map_err(|e| ScrapeError::provider("failed to retrieve products", &self.provider, service, region, e))?;

        for vm in products.iter().filter(|vm| vm.on_demand_price > 0.0) {
            self.metrics
                .report_on_demand_price(&self.provider, region, &vm.instance_type, vm.on_demand_price);
        }
        self.store.replace_vm(&self.provider, service, region, &products).await;
        Ok(())
    }

    /// Overlays cached prices on the cached VMs of a service region and drops
    /// the ones left without an on-demand price. Returns the number kept.
    pub async fn update_virtual_machines(&self, service: &str, region: &str) -> Result<usize, ScrapeError> {
        let vms = self
            .store
            .get_vm(&self.provider, service, region)
            .await
            .ok_or_else(|| ScrapeError::not_cached(EntityKind::Vms, &self.provider, service, region))?;

        let mut seen = HashSet::new();
        let mut priced: Vec<VmInfo> = Vec::with_capacity(vms.len());
        for mut vm in vms {
            if seen.contains(&vm.instance_type) {
                debug!(provider = %self.provider, service, region, instance_type = %vm.instance_type, "duplicate instance type dropped");
                continue;
            }
            if let Some(price) = self.store.get_price(&self.provider, region, &vm.instance_type).await {
                if price.on_demand_price > 0.0 {
                    vm.on_demand_price = price.on_demand_price;
                }
            }
            // an unpriced record does not claim its type
            if vm.on_demand_price > 0.0 {
                seen.insert(vm.instance_type.clone());
                priced.push(vm);
            }
        }

        self.store.replace_vm(&self.provider, service, region, &priced).await;
        Ok(priced.len())
    }

    /// Scrapes every dynamic service declared for the provider.
    pub async fn scrape_service_information(&self) -> Result<(), ScrapeError> {
        let services: Vec<Service> = match self.store.get_services(&self.provider).await {
            Some(services) => services,
            None => {
                self.metrics
                    .report_scrape_failure(&self.provider, NOT_APPLICABLE, NOT_APPLICABLE);
                return Err(ScrapeError::not_cached(
                    EntityKind::Services,
                    &self.provider,
                    NOT_APPLICABLE,
                    NOT_APPLICABLE,
                ));
            }
        };

        let compute_regions = self.discover_compute().await?;

        info!(provider = %self.provider, "start to scrape service region information");
        for service in &services {
            if service.is_static {
                debug!(provider = %self.provider, service = %service.name, "service is static, skipping");
                continue;
            }

            let regions = if service.is_compute() {
                compute_regions.clone()
            } else {
                match self.infoer.get_regions(&service.name).await {
                    Ok(regions) => {
                        self.store.replace_regions(&self.provider, &service.name, &regions).await;
                        regions
                    }
                    Err(e) => {
                        self.metrics
                            .report_scrape_failure(&self.provider, &service.name, NOT_APPLICABLE);
                        return Err(ScrapeError::provider(
                            "failed to retrieve regions",
                            &self.provider,
                            &service.name,
                            NOT_APPLICABLE,
                            e,
                        ));
                    }
                }
            };

            for region in sorted_ids(&regions) {
                let start = Instant::now();
                match self.scrape_service_region(&service.name, region).await {
                    Ok(()) => self.metrics.report_scrape_region_completed(
                        &self.provider,
                        &service.name,
                        region,
                        start.elapsed(),
                    ),
                    Err(e) => {
                        self.metrics.report_scrape_failure(&self.provider, &service.name, region);
                        warn!(provider = %self.provider, service = %service.name, region, error = %e, "region scrape failed; keeping previous data");
                    }
                }
            }
        }
        Ok(())
    }

    /// Writes the freshness marker (epoch millis); it never goes backwards.
    pub async fn update_status(&self) -> String {
        let now = Utc::now().timestamp_millis();
        let previous = self
            .store
            .get_status(&self.provider)
            .await
            .and_then(|s| s.parse::<i64>().ok());
        let status = match previous {
            Some(prev) if now <= prev => prev + 1,
            _ => now,
        }
        .to_string();

        info!(provider = %self.provider, status = %status, "updating status for provider");
        self.store.store_status(&self.provider, &status).await;
        status
    }

    /// One full renewal cycle. The completion event is published even when
    /// the service step failed, so dependents always get a chance to run.
    pub async fn scrape(&self) -> Result<(), ScrapeError> {
        info!(provider = %self.provider, "start scraping for provider information");
        let start = Instant::now();

        self.initialize().await;

        let result = self.scrape_service_information().await;
        match &result {
            Ok(()) => {
                self.update_status().await;
            }
            Err(e) => {
                error!(provider = %self.provider, error = %e, "failed to load service region information");
            }
        }

        self.event_bus.publish(CloudInfoEvent::ScrapingComplete {
            provider: self.provider.clone(),
        });
        self.metrics
            .report_scrape_provider_completed(&self.provider, start.elapsed());
        info!(provider = %self.provider, elapsed_ms = start.elapsed().as_millis() as u64, "finished scraping for provider information");
        result
    }

    /// Short-lived price cycle: one task per compute region, no cap.
    pub async fn scrape_prices_in_all_regions(&self) {
        info!(provider = %self.provider, "start scraping prices");
        let start = Instant::now();

        let regions = match self.infoer.get_regions(COMPUTE_SERVICE).await {
            Ok(regions) => regions,
            Err(e) => {
                self.metrics
                    .report_scrape_short_lived_failure(&self.provider, NOT_APPLICABLE);
                error!(provider = %self.provider, service = COMPUTE_SERVICE, error = %e, "failed to retrieve regions");
                return;
            }
        };

        let mut tasks = JoinSet::new();
        for region in regions.into_keys() {
            let manager = self.clone();
            tasks.spawn(async move { manager.scrape_prices_in_region(&region).await });
        }
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!(provider = %self.provider, error = %e, "price scraping task aborted");
            }
        }

        self.metrics
            .report_scrape_short_lived_provider_completed(&self.provider, start.elapsed());
    }

    async fn scrape_prices_in_region(&self, region: &str) {
        let start = Instant::now();
        match self.infoer.get_current_prices(region).await {
            Ok(prices) => {
                for (instance_type, price) in &prices {
                    self.store.store_price(&self.provider, region, instance_type, price).await;
                    for (zone, spot) in &price.spot_price {
                        self.metrics
                            .report_spot_price(&self.provider, region, zone, instance_type, *spot);
                    }
                }
            }
            Err(e) => {
                self.metrics.report_scrape_short_lived_failure(&self.provider, region);
                error!(provider = %self.provider, region, error = %e, "failed to scrape spot prices in region");
            }
        }
        self.metrics
            .report_scrape_short_lived_region_completed(&self.provider, region, start.elapsed());
    }
}

fn sorted_ids(regions: &RegionMap) -> Vec<&str> {
    let mut ids: Vec<&str> = regions.keys().map(String::as_str).collect();
    ids.sort_unstable();
    ids
}
