//! Typed cloud info store.
//!
//! Backends only move raw JSON text around keyed by the shared key layout;
//! [`CloudInfoStore`] turns that into typed accessors per entity.

pub mod memory;
pub mod postgres;
pub mod redis;

use crate::error::{StoreError, StoreResult};
use async_trait::async_trait;
use cloudinfo_common::{
    CacheKey, EntityKind, Image, LocationVersion, Price, RegionMap, Service, VmInfo,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::sync::Arc;
use tracing::warn;

pub use self::memory::MemoryBackend;
pub use self::postgres::PostgresBackend;
pub use self::redis::RedisBackend;

/// Raw key/value contract every backend implements.
///
/// Per-key writes never fail from the caller's point of view: backends that
/// can fail log and drop the write.
#[async_trait]
pub trait StoreBackend: Send + Sync {
    async fn get(&self, key: &str) -> Option<String>;

    async fn set(&self, key: &str, value: String);

    async fn delete(&self, key: &str);

    /// Invalidates and writes `key` so readers see either the old or the new value.
    async fn replace(&self, key: &str, value: String);

    /// Every key/value pair currently held, for snapshots.
    async fn entries(&self) -> StoreResult<Vec<(String, String)>>;

    async fn is_ready(&self) -> bool {
        true
    }
}

/// One decoded store value; the variant is decided by the key kind.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreValue {
    Regions(RegionMap),
    Zones(Vec<String>),
    Vms(Vec<VmInfo>),
    Price(Price),
    Images(Vec<Image>),
    Versions(Vec<LocationVersion>),
    Status(String),
    Services(Vec<Service>),
}

impl StoreValue {
    pub fn kind(&self) -> EntityKind {
        match self {
            StoreValue::Regions(_) => EntityKind::Regions,
            StoreValue::Zones(_) => EntityKind::Zones,
            StoreValue::Vms(_) => EntityKind::Vms,
            StoreValue::Price(_) => EntityKind::Price,
            StoreValue::Images(_) => EntityKind::Images,
            StoreValue::Versions(_) => EntityKind::Versions,
            StoreValue::Status(_) => EntityKind::Status,
            StoreValue::Services(_) => EntityKind::Services,
        }
    }

    pub fn to_json(&self) -> Result<serde_json::Value, serde_json::Error> {
        match self {
            StoreValue::Regions(v) => serde_json::to_value(v),
            StoreValue::Zones(v) => serde_json::to_value(v),
            StoreValue::Vms(v) => serde_json::to_value(v),
            StoreValue::Price(v) => serde_json::to_value(v),
            StoreValue::Images(v) => serde_json::to_value(v),
            StoreValue::Versions(v) => serde_json::to_value(v),
            StoreValue::Status(v) => serde_json::to_value(v),
            StoreValue::Services(v) => serde_json::to_value(v),
        }
    }

    pub fn from_json(kind: EntityKind, value: serde_json::Value) -> Result<Self, serde_json::Error> {
        Ok(match kind {
            EntityKind::Regions => StoreValue::Regions(serde_json::from_value(value)?),
            EntityKind::Zones => StoreValue::Zones(serde_json::from_value(value)?),
            EntityKind::Vms => StoreValue::Vms(serde_json::from_value(value)?),
            EntityKind::Price => StoreValue::Price(serde_json::from_value(value)?),
            EntityKind::Images => StoreValue::Images(serde_json::from_value(value)?),
            EntityKind::Versions => StoreValue::Versions(serde_json::from_value(value)?),
            EntityKind::Status => StoreValue::Status(serde_json::from_value(value)?),
            EntityKind::Services => StoreValue::Services(serde_json::from_value(value)?),
        })
    }
}

/// Typed facade over a [`StoreBackend`]. Cheap to clone.
#[derive(Clone)]
pub struct CloudInfoStore {
    backend: Arc<dyn StoreBackend>,
}

impl CloudInfoStore {
    pub fn new(backend: Arc<dyn StoreBackend>) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &Arc<dyn StoreBackend> {
        &self.backend
    }

    pub async fn is_ready(&self) -> bool {
        self.backend.is_ready().await
    }

    async fn put<T: Serialize + ?Sized>(&self, key: CacheKey, value: &T, replace: bool) {
        let path = key.path();
        match serde_json::to_string(value) {
            Ok(raw) if replace => self.backend.replace(&path, raw).await,
            Ok(raw) => self.backend.set(&path, raw).await,
            Err(e) => warn!(key = %path, error = %e, "failed to encode store value; write dropped"),
        }
    }

    async fn fetch<T: DeserializeOwned>(&self, key: CacheKey) -> Option<T> {
        let path = key.path();
        let raw = self.backend.get(&path).await?;
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(key = %path, error = %e, "failed to decode store value; treating as missing");
                None
            }
        }
    }

    async fn remove(&self, key: CacheKey) {
        self.backend.delete(&key.path()).await;
    }

    // --- regions ---

    pub async fn store_regions(&self, provider: &str, service: &str, regions: &RegionMap) {
        self.put(CacheKey::regions(provider, service), regions, false).await;
    }

    pub async fn replace_regions(&self, provider: &str, service: &str, regions: &RegionMap) {
        self.put(CacheKey::regions(provider, service), regions, true).await;
    }

    pub async fn get_regions(&self, provider: &str, service: &str) -> Option<RegionMap> {
        self.fetch(CacheKey::regions(provider, service)).await
    }

    pub async fn delete_regions(&self, provider: &str, service: &str) {
        self.remove(CacheKey::regions(provider, service)).await;
    }

    // --- zones ---

    pub async fn store_zones(&self, provider: &str, service: &str, region: &str, zones: &[String]) {
        self.put(CacheKey::zones(provider, service, region), zones, false).await;
    }

    pub async fn replace_zones(&self, provider: &str, service: &str, region: &str, zones: &[String]) {
        self.put(CacheKey::zones(provider, service, region), zones, true).await;
    }

    pub async fn get_zones(&self, provider: &str, service: &str, region: &str) -> Option<Vec<String>> {
        self.fetch(CacheKey::zones(provider, service, region)).await
    }

    pub async fn delete_zones(&self, provider: &str, service: &str, region: &str) {
        self.remove(CacheKey::zones(provider, service, region)).await;
    }

    // --- prices ---

    pub async fn store_price(&self, provider: &str, region: &str, instance_type: &str, price: &Price) {
        self.put(CacheKey::price(provider, region, instance_type), price, false).await;
    }

    pub async fn get_price(&self, provider: &str, region: &str, instance_type: &str) -> Option<Price> {
        self.fetch(CacheKey::price(provider, region, instance_type)).await
    }

    // --- vms ---

    pub async fn store_vm(&self, provider: &str, service: &str, region: &str, vms: &[VmInfo]) {
        self.put(CacheKey::vms(provider, service, region), vms, false).await;
    }

    pub async fn replace_vm(&self, provider: &str, service: &str, region: &str, vms: &[VmInfo]) {
        self.put(CacheKey::vms(provider, service, region), vms, true).await;
    }

    pub async fn get_vm(&self, provider: &str, service: &str, region: &str) -> Option<Vec<VmInfo>> {
        self.fetch(CacheKey::vms(provider, service, region)).await
    }

    pub async fn delete_vm(&self, provider: &str, service: &str, region: &str) {
        self.remove(CacheKey::vms(provider, service, region)).await;
    }

    // --- images ---

    pub async fn store_image(&self, provider: &str, service: &str, region: &str, images: &[Image]) {
        self.put(CacheKey::images(provider, service, region), images, false).await;
    }

    pub async fn replace_image(&self, provider: &str, service: &str, region: &str, images: &[Image]) {
        self.put(CacheKey::images(provider, service, region), images, true).await;
    }

    pub async fn get_image(&self, provider: &str, service: &str, region: &str) -> Option<Vec<Image>> {
        self.fetch(CacheKey::images(provider, service, region)).await
    }

    pub async fn delete_image(&self, provider: &str, service: &str, region: &str) {
        self.remove(CacheKey::images(provider, service, region)).await;
    }

    // --- versions ---

    pub async fn store_version(&self, provider: &str, service: &str, region: &str, versions: &[LocationVersion]) {
        self.put(CacheKey::versions(provider, service, region), versions, false).await;
    }

    pub async fn replace_version(&self, provider: &str, service: &str, region: &str, versions: &[LocationVersion]) {
        self.put(CacheKey::versions(provider, service, region), versions, true).await;
    }

    pub async fn get_version(&self, provider: &str, service: &str, region: &str) -> Option<Vec<LocationVersion>> {
        self.fetch(CacheKey::versions(provider, service, region)).await
    }

    pub async fn delete_version(&self, provider: &str, service: &str, region: &str) {
        self.remove(CacheKey::versions(provider, service, region)).await;
    }

    // --- status / services ---

    pub async fn store_status(&self, provider: &str, status: &str) {
        self.put(CacheKey::status(provider), status, false).await;
    }

    pub async fn get_status(&self, provider: &str) -> Option<String> {
        self.fetch(CacheKey::status(provider)).await
    }

    pub async fn store_services(&self, provider: &str, services: &[Service]) {
        self.put(CacheKey::services(provider), services, false).await;
    }

    pub async fn get_services(&self, provider: &str) -> Option<Vec<Service>> {
        self.fetch(CacheKey::services(provider)).await
    }

    // --- snapshots ---

    /// Writes the whole store as one JSON object `{ "<key>": <value> }`.
    pub async fn export<W: Write>(&self, writer: W) -> StoreResult<usize> {
        let mut snapshot = BTreeMap::new();
        for (path, raw) in self.backend.entries().await? {
            let Some(key) = CacheKey::parse(&path) else {
                continue;
            };
            let value: serde_json::Value = serde_json::from_str(&raw).map_err(|source| {
                StoreError::Serialization {
                    key: key.path(),
                    source,
                }
            })?;
            snapshot.insert(path, value);
        }
        let count = snapshot.len();
        serde_json::to_writer(writer, &snapshot).map_err(StoreError::Snapshot)?;
        Ok(count)
    }

    /// Restores a snapshot written by [`CloudInfoStore::export`].
    ///
    /// The whole snapshot is validated before anything is written.
    pub async fn import<R: Read>(&self, reader: R) -> StoreResult<usize> {
        let snapshot: BTreeMap<String, serde_json::Value> =
            serde_json::from_reader(reader).map_err(StoreError::Snapshot)?;

        let mut decoded = Vec::with_capacity(snapshot.len());
        for (path, value) in snapshot {
            let key = CacheKey::parse(&path).ok_or_else(|| StoreError::UnknownKey(path.clone()))?;
            let value = StoreValue::from_json(key.kind(), value)
                .map_err(|source| StoreError::Serialization { key: path.clone(), source })?;
            decoded.push((key, value));
        }

        let count = decoded.len();
        for (key, value) in decoded {
            let raw = value
                .to_json()
                .map(|v| v.to_string())
                .map_err(|source| StoreError::Serialization { key: key.path(), source })?;
            self.backend.set(&key.path(), raw).await;
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn store() -> CloudInfoStore {
        CloudInfoStore::new(Arc::new(MemoryBackend::new(Duration::from_secs(60))))
    }

    #[tokio::test]
    async fn missing_is_distinct_from_empty() {
        let store = store();
        assert_eq!(store.get_zones("p", "compute", "r1").await, None);

        store.store_zones("p", "compute", "r1", &[]).await;
        assert_eq!(store.get_zones("p", "compute", "r1").await, Some(vec![]));

        store.delete_zones("p", "compute", "r1").await;
        assert_eq!(store.get_zones("p", "compute", "r1").await, None);
    }

    #[tokio::test]
    async fn replace_overwrites_instead_of_merging() {
        let store = store();
        store
            .store_version("p", "svc", "r1", &[LocationVersion::new("r1", vec!["1.0".into()], "")])
            .await;
        let fresh = vec![LocationVersion::new("r1", vec!["2.0".into()], "")];
        store.replace_version("p", "svc", "r1", &fresh).await;
        assert_eq!(store.get_version("p", "svc", "r1").await, Some(fresh));
    }

    #[tokio::test]
    async fn values_are_raw_entity_json() {
        let store = store();
        store.store_price("p", "r1", "t1", &Price::on_demand(0.1)).await;
        let raw = store
            .backend()
            .get("/banzaicloud.com/cloudinfo/providers/p/regions/r1/prices/t1")
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(json["onDemandPrice"], 0.1);
    }

    #[tokio::test]
    async fn export_then_import_restores_the_snapshot() {
        let source = store();
        source.store_status("p", "1700000000000").await;
        source.store_services("p", &[Service::dynamic("compute")]).await;
        source
            .store_regions("p", "compute", &RegionMap::from([("r1".into(), "Region One".into())]))
            .await;

        let mut buf = Vec::new();
        assert_eq!(source.export(&mut buf).await.unwrap(), 3);

        let target = store();
        assert_eq!(target.import(buf.as_slice()).await.unwrap(), 3);
        assert_eq!(target.get_status("p").await.as_deref(), Some("1700000000000"));
        assert_eq!(target.get_services("p").await, Some(vec![Service::dynamic("compute")]));
        assert_eq!(target.get_regions("p", "compute").await.unwrap()["r1"], "Region One");
    }

    #[tokio::test]
    async fn import_rejects_unknown_keys_without_writing() {
        let store = store();
        let snapshot = r#"{
            "/banzaicloud.com/cloudinfo/providers/p/status/": "1",
            "/somewhere/else": 1
        }"#;
        let err = store.import(snapshot.as_bytes()).await.unwrap_err();
        assert!(matches!(err, StoreError::UnknownKey(_)));
        assert_eq!(store.get_status("p").await, None);
    }

    #[tokio::test]
    async fn import_rejects_values_of_the_wrong_shape() {
        let store = store();
        let snapshot = r#"{"/banzaicloud.com/cloudinfo/providers/p/services/compute/regions/r1/zones/": {"a": 1}}"#;
        let err = store.import(snapshot.as_bytes()).await.unwrap_err();
        assert!(matches!(err, StoreError::Serialization { .. }));
    }

    #[test]
    fn store_value_decodes_by_kind() {
        let value = StoreValue::from_json(EntityKind::Zones, serde_json::json!(["z1", "z2"])).unwrap();
        assert_eq!(value, StoreValue::Zones(vec!["z1".into(), "z2".into()]));
        assert_eq!(value.kind(), EntityKind::Zones);
        assert!(StoreValue::from_json(EntityKind::Price, serde_json::json!(["z1"])).is_err());
    }
}
