use super::StoreBackend;
use crate::error::StoreResult;
use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{Pool, Postgres};
use tracing::{error, info, warn};

/// Table-backed store: one row per key, value kept as entity JSON text.
///
/// Uses runtime `query()` so no DATABASE_URL is needed at build time.
#[derive(Clone)]
pub struct PostgresBackend {
    pool: Pool<Postgres>,
    table: String,
}

impl PostgresBackend {
    pub async fn connect(database_url: &str, table: &str) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        let backend = Self::from_pool(pool, table);
        backend.ensure_schema().await?;
        Ok(backend)
    }

    /// `table` must already be a validated SQL identifier.
    pub fn from_pool(pool: Pool<Postgres>, table: &str) -> Self {
        Self {
            pool,
            table: table.to_string(),
        }
    }

    pub async fn ensure_schema(&self) -> StoreResult<()> {
        sqlx::query(&create_table_sql(&self.table))
            .execute(&self.pool)
            .await?;
        info!(table = %self.table, "store table ready");
        Ok(())
    }

    async fn try_replace(&self, key: &str, value: &str) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(&delete_sql(&self.table))
            .bind(key)
            .execute(&mut *tx)
            .await?;
        sqlx::query(&upsert_sql(&self.table))
            .bind(key)
            .bind(value)
            .execute(&mut *tx)
            .await?;
        tx.commit().await
    }
}

pub fn create_table_sql(table: &str) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {table} (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )"
    )
}

pub fn select_sql(table: &str) -> String {
    format!("SELECT value FROM {table} WHERE key = $1")
}

pub fn upsert_sql(table: &str) -> String {
    format!(
        "INSERT INTO {table} (key, value, updated_at) VALUES ($1, $2, NOW())
         ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value, updated_at = NOW()"
    )
}

pub fn delete_sql(table: &str) -> String {
    format!("DELETE FROM {table} WHERE key = $1")
}

pub fn entries_sql(table: &str) -> String {
    format!("SELECT key, value FROM {table} ORDER BY key")
}

#[async_trait]
impl StoreBackend for PostgresBackend {
    async fn get(&self, key: &str) -> Option<String> {
        let row: Result<Option<String>, sqlx::Error> = sqlx::query_scalar(&select_sql(&self.table))
            .bind(key)
            .fetch_optional(&self.pool)
            .await;
        match row {
            Ok(value) => value,
            Err(e) => {
                warn!(key, error = %e, "store read failed");
                None
            }
        }
    }

    async fn set(&self, key: &str, value: String) {
        let result = sqlx::query(&upsert_sql(&self.table))
            .bind(key)
            .bind(&value)
            .execute(&self.pool)
            .await;
        if let Err(e) = result {
            error!(key, error = %e, "store write failed; value dropped");
        }
    }

    async fn delete(&self, key: &str) {
        let result = sqlx::query(&delete_sql(&self.table))
            .bind(key)
            .execute(&self.pool)
            .await;
        if let Err(e) = result {
            error!(key, error = %e, "store delete failed");
        }
    }

    async fn replace(&self, key: &str, value: String) {
        if let Err(e) = self.try_replace(key, &value).await {
            error!(key, error = %e, "store replace failed; value dropped");
        }
    }

    async fn entries(&self) -> StoreResult<Vec<(String, String)>> {
        let rows: Vec<(String, String)> = sqlx::query_as(&entries_sql(&self.table))
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    async fn is_ready(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statements_target_the_configured_table() {
        assert!(create_table_sql("cloudinfo_store").starts_with("CREATE TABLE IF NOT EXISTS cloudinfo_store ("));
        assert_eq!(select_sql("t"), "SELECT value FROM t WHERE key = $1");
        assert_eq!(delete_sql("t"), "DELETE FROM t WHERE key = $1");
        assert_eq!(entries_sql("t"), "SELECT key, value FROM t ORDER BY key");
    }

    #[test]
    fn writes_are_upserts() {
        let sql = upsert_sql("t");
        assert!(sql.starts_with("INSERT INTO t (key, value, updated_at)"));
        assert!(sql.contains("ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value"));
    }
}
