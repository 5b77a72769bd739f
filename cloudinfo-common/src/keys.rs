use std::fmt;

// -----------------------------------------------------------------------------
// Cache key layout
// -----------------------------------------------------------------------------
//
// These paths are shared with every other reader/writer of the store and must
// stay byte-for-byte stable.

pub const KEY_PREFIX: &str = "/banzaicloud.com/cloudinfo/providers/";

/// Entity stored under a key; decides how a raw value is decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Regions,
    Zones,
    Vms,
    Price,
    Images,
    Versions,
    Status,
    Services,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Regions => "regions",
            EntityKind::Zones => "zones",
            EntityKind::Vms => "vms",
            EntityKind::Price => "price",
            EntityKind::Images => "images",
            EntityKind::Versions => "versions",
            EntityKind::Status => "status",
            EntityKind::Services => "services",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    Regions { provider: String, service: String },
    Zones { provider: String, service: String, region: String },
    Vms { provider: String, service: String, region: String },
    Price { provider: String, region: String, instance_type: String },
    Images { provider: String, service: String, region: String },
    Versions { provider: String, service: String, region: String },
    Status { provider: String },
    Services { provider: String },
}

impl CacheKey {
    pub fn regions(provider: &str, service: &str) -> Self {
        CacheKey::Regions {
            provider: provider.to_string(),
            service: service.to_string(),
        }
    }

    pub fn zones(provider: &str, service: &str, region: &str) -> Self {
        CacheKey::Zones {
            provider: provider.to_string(),
            service: service.to_string(),
            region: region.to_string(),
        }
    }

    pub fn vms(provider: &str, service: &str, region: &str) -> Self {
        CacheKey::Vms {
            provider: provider.to_string(),
            service: service.to_string(),
            region: region.to_string(),
        }
    }

    pub fn price(provider: &str, region: &str, instance_type: &str) -> Self {
        CacheKey::Price {
            provider: provider.to_string(),
            region: region.to_string(),
            instance_type: instance_type.to_string(),
        }
    }

    pub fn images(provider: &str, service: &str, region: &str) -> Self {
        CacheKey::Images {
            provider: provider.to_string(),
            service: service.to_string(),
            region: region.to_string(),
        }
    }

    pub fn versions(provider: &str, service: &str, region: &str) -> Self {
        CacheKey::Versions {
            provider: provider.to_string(),
            service: service.to_string(),
            region: region.to_string(),
        }
    }

    pub fn status(provider: &str) -> Self {
        CacheKey::Status {
            provider: provider.to_string(),
        }
    }

    pub fn services(provider: &str) -> Self {
        CacheKey::Services {
            provider: provider.to_string(),
        }
    }

    pub fn kind(&self) -> EntityKind {
        match self {
            CacheKey::Regions { .. } => EntityKind::Regions,
            CacheKey::Zones { .. } => EntityKind::Zones,
            CacheKey::Vms { .. } => EntityKind::Vms,
            CacheKey::Price { .. } => EntityKind::Price,
            CacheKey::Images { .. } => EntityKind::Images,
            CacheKey::Versions { .. } => EntityKind::Versions,
            CacheKey::Status { .. } => EntityKind::Status,
            CacheKey::Services { .. } => EntityKind::Services,
        }
    }

    pub fn provider(&self) -> &str {
        match self {
            CacheKey::Regions { provider, .. }
            | CacheKey::Zones { provider, .. }
            | CacheKey::Vms { provider, .. }
            | CacheKey::Price { provider, .. }
            | CacheKey::Images { provider, .. }
            | CacheKey::Versions { provider, .. }
            | CacheKey::Status { provider }
            | CacheKey::Services { provider } => provider,
        }
    }

    /// Renders the storage path of the key.
    pub fn path(&self) -> String {
        match self {
            CacheKey::Regions { provider, service } => {
                format!("{KEY_PREFIX}{provider}/services/{service}/regions/")
            }
            CacheKey::Zones { provider, service, region } => {
                format!("{KEY_PREFIX}{provider}/services/{service}/regions/{region}/zones/")
            }
            CacheKey::Vms { provider, service, region } => {
                format!("{KEY_PREFIX}{provider}/services/{service}/regions/{region}/vms")
            }
            CacheKey::Price { provider, region, instance_type } => {
                format!("{KEY_PREFIX}{provider}/regions/{region}/prices/{instance_type}")
            }
            CacheKey::Images { provider, service, region } => {
                format!("{KEY_PREFIX}{provider}/services/{service}/regions/{region}/images")
            }
            CacheKey::Versions { provider, service, region } => {
                format!("{KEY_PREFIX}{provider}/services/{service}/regions/{region}/versions")
            }
            CacheKey::Status { provider } => format!("{KEY_PREFIX}{provider}/status/"),
            CacheKey::Services { provider } => format!("{KEY_PREFIX}{provider}/services"),
        }
    }

    /// Parses a storage path back into a key. Returns `None` for paths outside the layout.
    pub fn parse(path: &str) -> Option<Self> {
        let rest = path.strip_prefix(KEY_PREFIX)?;
        let (provider, rest) = rest.split_once('/')?;
        if provider.is_empty() {
            return None;
        }

        if rest == "status/" {
            return Some(CacheKey::status(provider));
        }
        if rest == "services" {
            return Some(CacheKey::services(provider));
        }

        if let Some(rest) = rest.strip_prefix("regions/") {
            // instance type names may themselves contain '/'
            let (region, instance_type) = rest.split_once("/prices/")?;
            if region.is_empty() || region.contains('/') || instance_type.is_empty() {
                return None;
            }
            return Some(CacheKey::price(provider, region, instance_type));
        }

        let rest = rest.strip_prefix("services/")?;
        let (service, rest) = rest.split_once('/')?;
        if service.is_empty() {
            return None;
        }
        let rest = rest.strip_prefix("regions/")?;
        if rest.is_empty() {
            return Some(CacheKey::regions(provider, service));
        }

        let (region, tail) = rest.split_once('/')?;
        if region.is_empty() {
            return None;
        }
        match tail {
            "zones/" => Some(CacheKey::zones(provider, service, region)),
            "vms" => Some(CacheKey::vms(provider, service, region)),
            "images" => Some(CacheKey::images(provider, service, region)),
            "versions" => Some(CacheKey::versions(provider, service, region)),
            _ => None,
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_match_shared_layout() {
        assert_eq!(
            CacheKey::regions("amazon", "compute").path(),
            "/banzaicloud.com/cloudinfo/providers/amazon/services/compute/regions/"
        );
        assert_eq!(
            CacheKey::zones("amazon", "compute", "eu-west-1").path(),
            "/banzaicloud.com/cloudinfo/providers/amazon/services/compute/regions/eu-west-1/zones/"
        );
        assert_eq!(
            CacheKey::vms("amazon", "eks", "eu-west-1").path(),
            "/banzaicloud.com/cloudinfo/providers/amazon/services/eks/regions/eu-west-1/vms"
        );
        assert_eq!(
            CacheKey::price("amazon", "eu-west-1", "m5.large").path(),
            "/banzaicloud.com/cloudinfo/providers/amazon/regions/eu-west-1/prices/m5.large"
        );
        assert_eq!(
            CacheKey::images("google", "gke", "europe-west1").path(),
            "/banzaicloud.com/cloudinfo/providers/google/services/gke/regions/europe-west1/images"
        );
        assert_eq!(
            CacheKey::versions("google", "gke", "europe-west1").path(),
            "/banzaicloud.com/cloudinfo/providers/google/services/gke/regions/europe-west1/versions"
        );
        assert_eq!(
            CacheKey::status("azure").path(),
            "/banzaicloud.com/cloudinfo/providers/azure/status/"
        );
        assert_eq!(
            CacheKey::services("azure").path(),
            "/banzaicloud.com/cloudinfo/providers/azure/services"
        );
    }

    #[test]
    fn every_key_parses_back() {
        let keys = vec![
            CacheKey::regions("p", "compute"),
            CacheKey::zones("p", "compute", "r1"),
            CacheKey::vms("p", "svc2", "r1"),
            CacheKey::price("p", "r1", "Standard_D2/v3"),
            CacheKey::images("p", "svc2", "r1"),
            CacheKey::versions("p", "svc2", "r1"),
            CacheKey::status("p"),
            CacheKey::services("p"),
        ];
        for key in keys {
            assert_eq!(CacheKey::parse(&key.path()), Some(key.clone()), "{}", key);
        }
    }

    #[test]
    fn foreign_paths_are_rejected() {
        assert_eq!(CacheKey::parse("/other/prefix"), None);
        assert_eq!(CacheKey::parse(KEY_PREFIX), None);
        assert_eq!(CacheKey::parse(&format!("{KEY_PREFIX}p/services/s/regions/r1/attrs")), None);
        assert_eq!(CacheKey::parse(&format!("{KEY_PREFIX}p/services/s/attrValues/cpu")), None);
        assert_eq!(CacheKey::parse(&format!("{KEY_PREFIX}p/regions/r1/prices/")), None);
    }
}
