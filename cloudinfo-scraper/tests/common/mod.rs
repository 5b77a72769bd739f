// Common test utilities and fixtures
#![allow(dead_code)]

use cloudinfo_common::{Price, Service, VmInfo};
use cloudinfo_providers::mock::{DummyFixture, DummyInfoer};
use cloudinfo_scraper::metrics::MetricsReporter;
use cloudinfo_scraper::store::MemoryBackend;
use cloudinfo_scraper::{CloudInfoStore, EventBus, ScrapingManager};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub struct Harness {
    pub store: CloudInfoStore,
    pub infoer: Arc<DummyInfoer>,
    pub manager: ScrapingManager,
    pub bus: EventBus,
    pub metrics: Arc<RecordingReporter>,
}

/// Records pipeline outcomes as `<kind>:<labels>`; price gauges are ignored.
#[derive(Default)]
pub struct RecordingReporter {
    events: Mutex<Vec<String>>,
}

impl RecordingReporter {
    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    pub fn sorted_events(&self) -> Vec<String> {
        let mut events = self.events();
        events.sort();
        events
    }

    fn record(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }
}

impl MetricsReporter for RecordingReporter {
    fn report_scrape_provider_completed(&self, provider: &str, _: Duration) {
        self.record(format!("done:{provider}"));
    }

    fn report_scrape_region_completed(&self, provider: &str, service: &str, region: &str, _: Duration) {
        self.record(format!("ok:{provider}:{service}:{region}"));
    }

    fn report_scrape_failure(&self, provider: &str, service: &str, region: &str) {
        self.record(format!("fail:{provider}:{service}:{region}"));
    }

    fn report_scrape_short_lived_provider_completed(&self, provider: &str, _: Duration) {
        self.record(format!("short_lived_done:{provider}"));
    }

    fn report_scrape_short_lived_region_completed(&self, provider: &str, region: &str, _: Duration) {
        self.record(format!("short_lived_ok:{provider}:{region}"));
    }

    fn report_scrape_short_lived_failure(&self, provider: &str, region: &str) {
        self.record(format!("short_lived_fail:{provider}:{region}"));
    }

    fn report_on_demand_price(&self, _: &str, _: &str, _: &str, _: f64) {}

    fn report_spot_price(&self, _: &str, _: &str, _: &str, _: &str, _: f64) {}
}

pub fn memory_store() -> CloudInfoStore {
    CloudInfoStore::new(Arc::new(MemoryBackend::new(Duration::from_secs(600))))
}

/// A manager for `provider` over a fresh memory store, with `services` declared.
pub async fn harness(provider: &str, fixture: DummyFixture, services: &[Service]) -> Harness {
    harness_on(memory_store(), EventBus::new(), provider, fixture, services).await
}

pub async fn harness_on(
    store: CloudInfoStore,
    bus: EventBus,
    provider: &str,
    fixture: DummyFixture,
    services: &[Service],
) -> Harness {
    let infoer = Arc::new(DummyInfoer::new(fixture));
    let metrics = Arc::new(RecordingReporter::default());
    store.store_services(provider, services).await;
    let manager = ScrapingManager::new(
        provider,
        infoer.clone(),
        store.clone(),
        metrics.clone(),
        bus.clone(),
    );
    Harness {
        store,
        infoer,
        manager,
        bus,
        metrics,
    }
}

pub fn compute_only() -> Vec<Service> {
    vec![Service::dynamic("compute")]
}

pub fn vm(instance_type: &str, cpus: f64, mem: f64) -> VmInfo {
    VmInfo {
        instance_type: instance_type.to_string(),
        cpus,
        mem,
        ..Default::default()
    }
    .with_derived_fields()
}

/// Single region `r1` fixture with the given VMs and bulk prices.
pub fn region_fixture(vms: Vec<VmInfo>, prices: &[(&str, f64)], zones: &[&str]) -> DummyFixture {
    DummyFixture {
        regions: HashMap::from([("r1".to_string(), "Region One".to_string())]),
        zones: HashMap::from([(
            "r1".to_string(),
            zones.iter().map(|z| z.to_string()).collect(),
        )]),
        vms: HashMap::from([("r1".to_string(), vms)]),
        prices: HashMap::from([(
            "r1".to_string(),
            prices
                .iter()
                .map(|(t, p)| (t.to_string(), Price::on_demand(*p)))
                .collect(),
        )]),
        ..Default::default()
    }
}

/// Polls `check` until it yields a value or about a second has passed.
pub async fn eventually<T, F, Fut>(mut check: F) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    for _ in 0..50 {
        if let Some(value) = check().await {
            return Some(value);
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    None
}
