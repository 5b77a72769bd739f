use super::StoreBackend;
use crate::error::StoreResult;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::debug;

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    // None when the expiry lies beyond what Instant can represent
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

/// In-process store. Every write carries the same fixed expiry; items that are
/// not rewritten within it disappear.
#[derive(Debug, Clone)]
pub struct MemoryBackend {
    items: Arc<DashMap<String, Entry>>,
    expiration: Duration,
}

impl MemoryBackend {
    pub fn new(expiration: Duration) -> Self {
        Self {
            items: Arc::new(DashMap::new()),
            expiration,
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Drops expired items, returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        purge(&self.items)
    }

    /// Periodically purges expired items; stops once the backend is dropped.
    pub fn spawn_janitor(&self, period: Duration) -> JoinHandle<()> {
        let items = Arc::downgrade(&self.items);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                interval.tick().await;
                let Some(items) = items.upgrade() else {
                    break;
                };
                let removed = purge(&items);
                if removed > 0 {
                    debug!(removed, "purged expired store items");
                }
            }
        })
    }

    fn entry(&self, value: String) -> Entry {
        Entry {
            value,
            expires_at: Instant::now().checked_add(self.expiration),
        }
    }
}

fn purge(items: &DashMap<String, Entry>) -> usize {
    let now = Instant::now();
    let before = items.len();
    items.retain(|_, entry| !entry.is_expired(now));
    before.saturating_sub(items.len())
}

#[async_trait]
impl StoreBackend for MemoryBackend {
    async fn get(&self, key: &str) -> Option<String> {
        let now = Instant::now();
        let value = self.items.get(key).and_then(|entry| {
            if entry.is_expired(now) {
                None
            } else {
                Some(entry.value.clone())
            }
        });
        if value.is_none() {
            self.items.remove_if(key, |_, entry| entry.is_expired(now));
        }
        value
    }

    async fn set(&self, key: &str, value: String) {
        self.items.insert(key.to_string(), self.entry(value));
    }

    async fn delete(&self, key: &str) {
        self.items.remove(key);
    }

    // A single insert swaps the value under the shard lock.
    async fn replace(&self, key: &str, value: String) {
        self.items.insert(key.to_string(), self.entry(value));
    }

    async fn entries(&self) -> StoreResult<Vec<(String, String)>> {
        let now = Instant::now();
        Ok(self
            .items
            .iter()
            .filter(|entry| !entry.value().is_expired(now))
            .map(|entry| (entry.key().clone(), entry.value().value.clone()))
            .collect())
    }
}
