use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("invalid value for {var}: {value:?} ({reason})")]
    Invalid {
        var: &'static str,
        value: String,
        reason: &'static str,
    },

    #[error("{var} is required when {context}")]
    Missing {
        var: &'static str,
        context: &'static str,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum StoreSettings {
    Memory {
        expiration: Duration,
        cleanup_interval: Duration,
    },
    Redis {
        url: String,
    },
    Postgres {
        database_url: String,
        table: String,
    },
}

impl StoreSettings {
    pub fn backend_name(&self) -> &'static str {
        match self {
            StoreSettings::Memory { .. } => "memory",
            StoreSettings::Redis { .. } => "redis",
            StoreSettings::Postgres { .. } => "postgres",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub providers: Vec<String>,
    pub scrape_enabled: bool,
    pub renewal_interval: Duration,
    pub store: StoreSettings,
    pub service_config_file: Option<PathBuf>,
    pub management_enabled: bool,
    pub management_addr: SocketAddr,
    pub events_redis_url: Option<String>,
    pub dummy_fixture_file: Option<PathBuf>,
}

impl Settings {
    /// Reads the process environment (after `.env`, if the caller loaded it).
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        };

        let providers: Vec<String> = get("PROVIDERS")
            .unwrap_or_else(|| "dummy".to_string())
            .split(',')
            .map(|p| p.trim().to_lowercase())
            .filter(|p| !p.is_empty())
            .collect();
        if providers.is_empty() {
            return Err(ConfigError::Invalid {
                var: "PROVIDERS",
                value: get("PROVIDERS").unwrap_or_default(),
                reason: "at least one provider must be enabled",
            });
        }

        let scrape_enabled = parse_bool("SCRAPE_ENABLED", get("SCRAPE_ENABLED"), true)?;
        let renewal_interval = parse_secs("RENEWAL_INTERVAL_SECS", get("RENEWAL_INTERVAL_SECS"), 24 * 60 * 60)?;

        let store = match get("STORE_BACKEND").as_deref().unwrap_or("memory") {
            "memory" => StoreSettings::Memory {
                expiration: parse_secs(
                    "STORE_MEMORY_EXPIRATION_SECS",
                    get("STORE_MEMORY_EXPIRATION_SECS"),
                    48 * 60 * 60,
                )?,
                cleanup_interval: parse_secs(
                    "STORE_MEMORY_CLEANUP_SECS",
                    get("STORE_MEMORY_CLEANUP_SECS"),
                    60 * 60,
                )?,
            },
            "redis" => StoreSettings::Redis {
                url: get("REDIS_URL").ok_or(ConfigError::Missing {
                    var: "REDIS_URL",
                    context: "STORE_BACKEND=redis",
                })?,
            },
            "postgres" => StoreSettings::Postgres {
                database_url: get("DATABASE_URL").ok_or(ConfigError::Missing {
                    var: "DATABASE_URL",
                    context: "STORE_BACKEND=postgres",
                })?,
                table: parse_table(get("STORE_TABLE"))?,
            },
            other => {
                return Err(ConfigError::Invalid {
                    var: "STORE_BACKEND",
                    value: other.to_string(),
                    reason: "expected memory, redis or postgres",
                })
            }
        };

        let management_enabled = parse_bool("MANAGEMENT_ENABLED", get("MANAGEMENT_ENABLED"), true)?;
        let raw_addr = get("MANAGEMENT_ADDR").unwrap_or_else(|| "0.0.0.0:8001".to_string());
        let management_addr = raw_addr.parse::<SocketAddr>().map_err(|_| ConfigError::Invalid {
            var: "MANAGEMENT_ADDR",
            value: raw_addr.clone(),
            reason: "expected host:port",
        })?;

        let settings = Settings {
            providers,
            scrape_enabled,
            renewal_interval,
            store,
            service_config_file: get("SERVICE_CONFIG_FILE").map(PathBuf::from),
            management_enabled,
            management_addr,
            events_redis_url: get("EVENTS_REDIS_URL"),
            dummy_fixture_file: get("DUMMY_FIXTURE_FILE").map(PathBuf::from),
        };
        settings.warn_on_short_ttl();
        Ok(settings)
    }

    /// Items of the in-process store vanish when not renewed within their TTL.
    pub fn ttl_shorter_than_renewal(&self) -> bool {
        match &self.store {
            StoreSettings::Memory { expiration, .. } => *expiration <= self.renewal_interval,
            _ => false,
        }
    }

    fn warn_on_short_ttl(&self) {
        if self.ttl_shorter_than_renewal() {
            if let StoreSettings::Memory { expiration, .. } = &self.store {
                warn!(
                    expiration_secs = expiration.as_secs(),
                    renewal_interval_secs = self.renewal_interval.as_secs(),
                    "store item expiration is not larger than the renewal interval; cached data will expire between cycles"
                );
            }
        }
    }
}

fn parse_bool(var: &'static str, raw: Option<String>, default: bool) -> Result<bool, ConfigError> {
    match raw {
        None => Ok(default),
        Some(v) => match v.to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::Invalid {
                var,
                value: v,
                reason: "expected a boolean",
            }),
        },
    }
}

fn parse_secs(var: &'static str, raw: Option<String>, default: u64) -> Result<Duration, ConfigError> {
    let secs = match raw {
        None => default,
        Some(v) => v.parse::<u64>().map_err(|_| ConfigError::Invalid {
            var,
            value: v.clone(),
            reason: "expected a number of seconds",
        })?,
    };
    if secs == 0 {
        return Err(ConfigError::Invalid {
            var,
            value: "0".to_string(),
            reason: "must be greater than zero",
        });
    }
    Ok(Duration::from_secs(secs))
}

// The table name is interpolated into SQL, so only plain identifiers pass.
fn parse_table(raw: Option<String>) -> Result<String, ConfigError> {
    let table = raw.unwrap_or_else(|| "cloudinfo_store".to_string());
    let valid = table
        .chars()
        .next()
        .map(|c| c.is_ascii_alphabetic() || c == '_')
        .unwrap_or(false)
        && table.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !valid {
        return Err(ConfigError::Invalid {
            var: "STORE_TABLE",
            value: table,
            reason: "expected a plain SQL identifier",
        });
    }
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings(vars: &[(&str, &str)]) -> Result<Settings, ConfigError> {
        let env: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Settings::from_lookup(|k| env.get(k).cloned())
    }

    #[test]
    fn defaults_run_the_dummy_provider_in_memory() {
        let s = settings(&[]).unwrap();
        assert_eq!(s.providers, vec!["dummy".to_string()]);
        assert!(s.scrape_enabled);
        assert_eq!(s.renewal_interval, Duration::from_secs(86400));
        assert_eq!(
            s.store,
            StoreSettings::Memory {
                expiration: Duration::from_secs(172800),
                cleanup_interval: Duration::from_secs(3600),
            }
        );
        assert!(s.management_enabled);
        assert_eq!(s.management_addr.port(), 8001);
        assert!(!s.ttl_shorter_than_renewal());
    }

    #[test]
    fn provider_list_is_normalized() {
        let s = settings(&[("PROVIDERS", " Amazon, google ,,")]).unwrap();
        assert_eq!(s.providers, vec!["amazon".to_string(), "google".to_string()]);
    }

    #[test]
    fn networked_backends_require_their_url() {
        assert_eq!(
            settings(&[("STORE_BACKEND", "redis")]).unwrap_err(),
            ConfigError::Missing {
                var: "REDIS_URL",
                context: "STORE_BACKEND=redis"
            }
        );
        let s = settings(&[("STORE_BACKEND", "postgres"), ("DATABASE_URL", "postgres://x/y")]).unwrap();
        assert_eq!(
            s.store,
            StoreSettings::Postgres {
                database_url: "postgres://x/y".to_string(),
                table: "cloudinfo_store".to_string(),
            }
        );
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(settings(&[("RENEWAL_INTERVAL_SECS", "0")]).is_err());
        assert!(settings(&[("RENEWAL_INTERVAL_SECS", "soon")]).is_err());
        assert!(settings(&[("STORE_BACKEND", "cassandra")]).is_err());
        assert!(settings(&[("SCRAPE_ENABLED", "maybe")]).is_err());
        assert!(settings(&[("MANAGEMENT_ADDR", "localhost")]).is_err());
        assert!(settings(&[
            ("STORE_BACKEND", "postgres"),
            ("DATABASE_URL", "postgres://x/y"),
            ("STORE_TABLE", "store; drop table x"),
        ])
        .is_err());
    }

    #[test]
    fn short_ttl_is_detected() {
        let s = settings(&[
            ("RENEWAL_INTERVAL_SECS", "3600"),
            ("STORE_MEMORY_EXPIRATION_SECS", "3600"),
        ])
        .unwrap();
        assert!(s.ttl_shorter_than_renewal());
    }
}
