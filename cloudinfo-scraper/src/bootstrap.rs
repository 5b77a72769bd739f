use crate::driver::ScrapingDriver;
use crate::eventbus::EventBus;
use crate::loader::ServiceManager;
use crate::management::ManagementState;
use crate::metrics::{MetricsReporter, PrometheusReporter};
use crate::provider_manager::ProviderManager;
use crate::scraping::ScrapingManager;
use crate::settings::{Settings, StoreSettings};
use crate::store::{CloudInfoStore, MemoryBackend, PostgresBackend, RedisBackend, StoreBackend};
use anyhow::{bail, Context, Result};
use prometheus::Registry;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

/// Everything the binary wires together, built once at startup.
pub struct Components {
    pub store: CloudInfoStore,
    pub event_bus: EventBus,
    pub registry: Arc<Registry>,
    pub driver: ScrapingDriver,
    pub services: ServiceManager,
    janitor: Option<JoinHandle<()>>,
}

impl Components {
    pub fn management_state(&self) -> ManagementState {
        ManagementState {
            store: self.store.clone(),
            driver: self.driver.clone(),
            registry: Arc::clone(&self.registry),
        }
    }

    pub fn stop_janitor(&mut self) {
        if let Some(janitor) = self.janitor.take() {
            janitor.abort();
        }
    }
}

pub async fn open_store(settings: &StoreSettings) -> Result<(CloudInfoStore, Option<JoinHandle<()>>)> {
    let (backend, janitor): (Arc<dyn StoreBackend>, Option<JoinHandle<()>>) = match settings {
        StoreSettings::Memory {
            expiration,
            cleanup_interval,
        } => {
            let backend = MemoryBackend::new(*expiration);
            let janitor = backend.spawn_janitor(*cleanup_interval);
            (Arc::new(backend), Some(janitor))
        }
        StoreSettings::Redis { url } => {
            let backend = RedisBackend::connect(url)
                .await
                .context("failed to connect to redis store")?;
            (Arc::new(backend), None)
        }
        StoreSettings::Postgres { database_url, table } => {
            let backend = PostgresBackend::connect(database_url, table)
                .await
                .context("failed to open postgres store")?;
            (Arc::new(backend), None)
        }
    };

    let store = CloudInfoStore::new(backend);
    if !store.is_ready().await {
        bail!("store backend is not ready");
    }
    Ok((store, janitor))
}

pub async fn build(settings: &Settings) -> Result<Components> {
    let (store, janitor) = open_store(&settings.store).await?;
    info!(backend = settings.store.backend_name(), "store ready");

    let mut event_bus = EventBus::new();
    if let Some(url) = &settings.events_redis_url {
        let client = redis::Client::open(url.as_str()).context("invalid EVENTS_REDIS_URL")?;
        event_bus = event_bus.with_redis_mirror(client);
    }

    let registry = Arc::new(Registry::new());
    let reporter: Arc<dyn MetricsReporter> =
        Arc::new(PrometheusReporter::new(&registry).context("failed to register metrics")?);

    let managers = ProviderManager::build_all(settings)?
        .into_iter()
        .map(|(name, infoer)| {
            ScrapingManager::new(&name, infoer, store.clone(), Arc::clone(&reporter), event_bus.clone())
        })
        .collect();
    let driver = ScrapingDriver::new(settings.renewal_interval, managers);

    let services = match &settings.service_config_file {
        Some(path) => ServiceManager::from_file(path, store.clone(), event_bus.clone())?,
        None => ServiceManager::new(store.clone(), event_bus.clone()),
    };

    Ok(Components {
        store,
        event_bus,
        registry,
        driver,
        services,
        janitor,
    })
}
