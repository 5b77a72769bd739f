use super::StoreBackend;
use crate::error::StoreResult;
use async_trait::async_trait;
use cloudinfo_common::keys::KEY_PREFIX;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use tracing::{error, warn};

const SCAN_BATCH: usize = 500;

/// Networked cache backend. Values are the entity JSON as-is, so other
/// readers of the same keys can decode them without this crate.
///
/// Write failures are logged and dropped; reads that fail look like misses.
#[derive(Clone)]
pub struct RedisBackend {
    conn: MultiplexedConnection,
}

impl RedisBackend {
    pub async fn connect(url: &str) -> StoreResult<Self> {
        let client = redis::Client::open(url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        Ok(Self { conn })
    }

    pub fn from_connection(conn: MultiplexedConnection) -> Self {
        Self { conn }
    }
}

/// Pattern matching every key of the shared layout.
pub fn key_pattern() -> String {
    format!("{}*", KEY_PREFIX)
}

/// `MULTI / DEL / SET / EXEC`, so no reader sees the key missing in between.
pub fn replace_pipeline(key: &str, value: &str) -> redis::Pipeline {
    let mut pipe = redis::pipe();
    pipe.atomic().del(key).ignore().set(key, value).ignore();
    pipe
}

#[async_trait]
impl StoreBackend for RedisBackend {
    async fn get(&self, key: &str) -> Option<String> {
        let mut conn = self.conn.clone();
        let result: redis::RedisResult<Option<String>> = conn.get(key).await;
        match result {
            Ok(value) => value,
            Err(e) => {
                warn!(key, error = %e, "redis GET failed");
                None
            }
        }
    }

    async fn set(&self, key: &str, value: String) {
        let mut conn = self.conn.clone();
        let result: redis::RedisResult<()> = conn.set(key, value).await;
        if let Err(e) = result {
            error!(key, error = %e, "redis SET failed; value dropped");
        }
    }

    async fn delete(&self, key: &str) {
        let mut conn = self.conn.clone();
        let result: redis::RedisResult<()> = conn.del(key).await;
        if let Err(e) = result {
            error!(key, error = %e, "redis DEL failed");
        }
    }

    async fn replace(&self, key: &str, value: String) {
        let mut conn = self.conn.clone();
        let result: redis::RedisResult<()> = replace_pipeline(key, &value).query_async(&mut conn).await;
        if let Err(e) = result {
            error!(key, error = %e, "redis replace failed; value dropped");
        }
    }

    async fn entries(&self) -> StoreResult<Vec<(String, String)>> {
        let mut conn = self.conn.clone();
        let pattern = key_pattern();
        let mut keys = Vec::new();
        let mut cursor: u64 = 0;
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        keys.sort();
        keys.dedup();

        let mut entries = Vec::with_capacity(keys.len());
        for key in keys {
            let value: Option<String> = conn.get(&key).await?;
            // expired or deleted between SCAN and GET
            if let Some(value) = value {
                entries.push((key, value));
            }
        }
        Ok(entries)
    }

    async fn is_ready(&self) -> bool {
        let mut conn = self.conn.clone();
        let pong: redis::RedisResult<String> = redis::cmd("PING").query_async(&mut conn).await;
        pong.is_ok()
    }
}
