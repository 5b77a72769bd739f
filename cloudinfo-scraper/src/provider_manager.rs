use crate::settings::Settings;
use anyhow::{bail, Result};
use cloudinfo_providers::CloudInfoer;
use std::sync::Arc;

pub struct ProviderManager;

impl ProviderManager {
    /// Builds one infoer per enabled provider, in configuration order.
    pub fn build_all(settings: &Settings) -> Result<Vec<(String, Arc<dyn CloudInfoer>)>> {
        settings
            .providers
            .iter()
            .map(|name| Ok((name.clone(), Self::get_provider(name, settings)?)))
            .collect()
    }

    pub fn get_provider(provider_name: &str, settings: &Settings) -> Result<Arc<dyn CloudInfoer>> {
        match provider_name.to_lowercase().as_str() {
            #[cfg(feature = "provider-mock")]
            "dummy" => {
                use cloudinfo_providers::mock::{DummyFixture, DummyInfoer};
                let fixture = match &settings.dummy_fixture_file {
                    Some(path) => DummyFixture::from_file(path)?,
                    None => DummyFixture::sample(),
                };
                Ok(Arc::new(DummyInfoer::new(fixture)))
            }
            // Add vendor adapters here.
            other => {
                let _ = settings;
                bail!("unsupported provider: {}", other)
            }
        }
    }
}
