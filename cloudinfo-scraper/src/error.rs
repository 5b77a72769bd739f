use cloudinfo_common::EntityKind;
use thiserror::Error;

/// Failures of one scraping step.
#[derive(Debug, Error)]
pub enum ScrapeError {
    /// A value the step depends on was never written (or expired).
    #[error("{kind} not yet cached for provider={provider} service={service} region={region}")]
    NotCached {
        kind: EntityKind,
        provider: String,
        service: String,
        region: String,
    },

    #[error("{message} (provider={provider} service={service} region={region}): {source:#}")]
    Provider {
        message: String,
        provider: String,
        service: String,
        region: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("provider {0} is not configured")]
    UnknownProvider(String),
}

impl ScrapeError {
    pub fn not_cached(kind: EntityKind, provider: &str, service: &str, region: &str) -> Self {
        ScrapeError::NotCached {
            kind,
            provider: provider.to_string(),
            service: service.to_string(),
            region: region.to_string(),
        }
    }

    pub fn provider(
        message: &str,
        provider: &str,
        service: &str,
        region: &str,
        source: anyhow::Error,
    ) -> Self {
        ScrapeError::Provider {
            message: message.to_string(),
            provider: provider.to_string(),
            service: service.to_string(),
            region: region.to_string(),
            source,
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to (de)serialize value of {key}: {source}")]
    Serialization {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("unknown store key: {0}")]
    UnknownKey(String),

    #[error("malformed snapshot: {0}")]
    Snapshot(#[source] serde_json::Error),

    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_cached_names_the_missing_entity() {
        let err = ScrapeError::not_cached(EntityKind::Zones, "amazon", "compute", "eu-west-1");
        assert_eq!(
            err.to_string(),
            "zones not yet cached for provider=amazon service=compute region=eu-west-1"
        );
    }

    #[test]
    fn provider_error_keeps_the_cause() {
        let err = ScrapeError::provider(
            "failed to retrieve zones",
            "amazon",
            "compute",
            "eu-west-1",
            anyhow::anyhow!("timeout"),
        );
        let text = err.to_string();
        assert!(text.starts_with("failed to retrieve zones"));
        assert!(text.ends_with("timeout"));
    }
}
