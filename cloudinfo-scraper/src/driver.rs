use crate::error::ScrapeError;
use crate::executor::PeriodicExecutor;
use crate::scraping::ScrapingManager;
use futures_util::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

/// Interval of the short-lived (spot) price cycle.
pub const SHORT_LIVED_INTERVAL: Duration = Duration::from_secs(4 * 60);

/// Schedules the renewal of every configured provider.
///
/// Ticks never wait for cycles: each provider cycle runs as its own task in a
/// supervised set, so a slow provider does not hold back the others and
/// [`ScrapingDriver::shutdown`] can still join whatever is in flight.
#[derive(Clone)]
pub struct ScrapingDriver {
    inner: Arc<DriverInner>,
}

struct DriverInner {
    managers: Vec<ScrapingManager>,
    renewal_interval: Duration,
    short_lived_interval: Duration,
    in_flight: Mutex<JoinSet<()>>,
    loops: Mutex<Vec<JoinHandle<()>>>,
    shutdown: watch::Sender<bool>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl ScrapingDriver {
    pub fn new(renewal_interval: Duration, managers: Vec<ScrapingManager>) -> Self {
        Self::with_intervals(renewal_interval, SHORT_LIVED_INTERVAL, managers)
    }

    pub fn with_intervals(
        renewal_interval: Duration,
        short_lived_interval: Duration,
        managers: Vec<ScrapingManager>,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            inner: Arc::new(DriverInner {
                managers,
                renewal_interval,
                short_lived_interval,
                in_flight: Mutex::new(JoinSet::new()),
                loops: Mutex::new(Vec::new()),
                shutdown,
            }),
        }
    }

    pub fn providers(&self) -> Vec<String> {
        self.inner
            .managers
            .iter()
            .map(|m| m.provider().to_string())
            .collect()
    }

    pub fn has_provider(&self, provider: &str) -> bool {
        self.manager(provider).is_some()
    }

    fn manager(&self, provider: &str) -> Option<&ScrapingManager> {
        self.inner.managers.iter().find(|m| m.provider() == provider)
    }

    /// Cycles started by the scheduler that have not been reaped yet.
    pub fn in_flight(&self) -> usize {
        lock(&self.inner.in_flight).len()
    }

    /// Starts a full renewal for every provider; returns the number started.
    pub fn renew_all(&self) -> usize {
        let mut tasks = lock(&self.inner.in_flight);
        reap(&mut tasks);
        for manager in &self.inner.managers {
            let manager = manager.clone();
            tasks.spawn(supervised(manager.provider().to_string(), "renewal", async move {
                // outcome is already logged by the manager
                let _ = manager.scrape().await;
            }));
        }
        self.inner.managers.len()
    }

    /// Starts the short-lived price cycle for providers that have one.
    pub fn renew_short_lived(&self) -> usize {
        let mut tasks = lock(&self.inner.in_flight);
        reap(&mut tasks);
        let mut started = 0;
        for manager in &self.inner.managers {
            if !manager.has_short_lived_price_info() {
                debug!(provider = %manager.provider(), "skip scraping for short lived prices (not applicable for provider)");
                continue;
            }
            let manager = manager.clone();
            tasks.spawn(supervised(manager.provider().to_string(), "short-lived", async move {
                manager.scrape_prices_in_all_regions().await;
            }));
            started += 1;
        }
        started
    }

    /// Runs one full cycle for `provider` inline, outside the schedule.
    /// May overlap with a scheduled cycle of the same provider.
    pub async fn refresh_provider(&self, provider: &str) -> Result<(), ScrapeError> {
        let manager = self
            .manager(provider)
            .ok_or_else(|| ScrapeError::UnknownProvider(provider.to_string()))?;
        info!(provider, "refreshing provider out of schedule");
        manager.scrape().await
    }

    /// Starts an out-of-schedule cycle for `provider` in the supervised set,
    /// so [`ScrapingDriver::shutdown`] waits for it like any scheduled cycle.
    pub fn spawn_refresh(&self, provider: &str) -> Result<(), ScrapeError> {
        let manager = self
            .manager(provider)
            .cloned()
            .ok_or_else(|| ScrapeError::UnknownProvider(provider.to_string()))?;
        info!(provider, "scheduling out of schedule refresh");

        let mut tasks = lock(&self.inner.in_flight);
        reap(&mut tasks);
        tasks.spawn(supervised(provider.to_string(), "refresh", async move {
            let _ = manager.scrape().await;
        }));
        Ok(())
    }

    /// Spawns the renewal and short-lived loops. A second call is a no-op.
    pub fn start(&self) {
        let mut loops = lock(&self.inner.loops);
        if !loops.is_empty() {
            warn!("scraping driver already started");
            return;
        }

        info!(
            renewal_interval_secs = self.inner.renewal_interval.as_secs(),
            short_lived_interval_secs = self.inner.short_lived_interval.as_secs(),
            providers = ?self.providers(),
            "starting scraping driver"
        );

        let renewal = PeriodicExecutor::new("renew-all", self.inner.renewal_interval);
        let driver = self.clone();
        let signal = self.shutdown_signal();
        loops.push(tokio::spawn(async move {
            renewal
                .execute(signal, move || {
                    let driver = driver.clone();
                    async move {
                        driver.renew_all();
                    }
                })
                .await;
        }));

        let short_lived = PeriodicExecutor::new("renew-short-lived", self.inner.short_lived_interval);
        let driver = self.clone();
        let signal = self.shutdown_signal();
        loops.push(tokio::spawn(async move {
            short_lived
                .execute(signal, move || {
                    let driver = driver.clone();
                    async move {
                        driver.renew_short_lived();
                    }
                })
                .await;
        }));
    }

    /// Stops scheduling and waits for the cycles already running.
    pub async fn shutdown(&self) {
        self.inner.shutdown.send_replace(true);

        let loops = std::mem::take(&mut *lock(&self.inner.loops));
        for handle in loops {
            if let Err(e) = handle.await {
                warn!(error = %e, "scheduler loop ended abnormally");
            }
        }

        let mut tasks = std::mem::take(&mut *lock(&self.inner.in_flight));
        let pending = tasks.len();
        if pending > 0 {
            info!(pending, "waiting for in-flight scraping cycles");
        }
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "scraping task did not complete");
            }
        }
        info!("scraping driver stopped");
    }

    fn shutdown_signal(&self) -> impl Future<Output = ()> + Send + 'static {
        let mut rx = self.inner.shutdown.subscribe();
        async move {
            let _ = rx.wait_for(|stop| *stop).await;
        }
    }
}

fn reap(tasks: &mut JoinSet<()>) {
    while let Some(joined) = tasks.try_join_next() {
        if let Err(e) = joined {
            warn!(error = %e, "scraping task did not complete");
        }
    }
}

// Keeps a panicking cycle from taking its provider name with it.
async fn supervised<F>(provider: String, cycle: &'static str, work: F)
where
    F: Future<Output = ()>,
{
    if AssertUnwindSafe(work).catch_unwind().await.is_err() {
        error!(provider = %provider, cycle, "scraping cycle panicked");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eventbus::EventBus;
    use crate::metrics::NoOpReporter;
    use crate::store::{CloudInfoStore, MemoryBackend};
    use cloudinfo_common::Service;
    use cloudinfo_providers::mock::{DummyFixture, DummyInfoer};

    fn setup(short_lived: bool) -> (ScrapingDriver, CloudInfoStore) {
        let store = CloudInfoStore::new(Arc::new(MemoryBackend::new(Duration::from_secs(60))));
        let mut fixture = DummyFixture::sample();
        fixture.short_lived = short_lived;
        let manager = ScrapingManager::new(
            "dummy",
            Arc::new(DummyInfoer::new(fixture)),
            store.clone(),
            Arc::new(NoOpReporter),
            EventBus::new(),
        );
        (ScrapingDriver::new(Duration::from_secs(3600), vec![manager]), store)
    }

    #[tokio::test]
    async fn refresh_of_unknown_provider_is_rejected() {
        let (driver, _) = setup(false);
        assert!(driver.has_provider("dummy"));
        let err = driver.refresh_provider("amazon").await.unwrap_err();
        assert!(matches!(err, ScrapeError::UnknownProvider(p) if p == "amazon"));
    }

    #[tokio::test]
    async fn short_lived_cycle_skips_providers_without_spot_prices() {
        let (plain, _) = setup(false);
        assert_eq!(plain.renew_short_lived(), 0);

        let (spot, _) = setup(true);
        assert_eq!(spot.renew_short_lived(), 1);
        spot.shutdown().await;
        assert_eq!(spot.in_flight(), 0);
    }

    #[tokio::test]
    async fn shutdown_waits_for_spawned_refresh() {
        let (driver, store) = setup(false);
        store.store_services("dummy", &[Service::dynamic("compute")]).await;

        assert!(matches!(
            driver.spawn_refresh("amazon"),
            Err(ScrapeError::UnknownProvider(p)) if p == "amazon"
        ));
        driver.spawn_refresh("dummy").unwrap();
        driver.shutdown().await;

        assert_eq!(driver.in_flight(), 0);
        assert!(store.get_status("dummy").await.is_some());
    }

    #[tokio::test]
    async fn shutdown_joins_cycles_started_by_the_scheduler() {
        let (driver, store) = setup(false);
        store.store_services("dummy", &[Service::dynamic("compute")]).await;

        driver.start();
        driver.start();
        tokio::time::sleep(Duration::from_millis(50)).await;
        driver.shutdown().await;

        assert_eq!(driver.in_flight(), 0);
        assert!(store.get_status("dummy").await.is_some());
    }
}
