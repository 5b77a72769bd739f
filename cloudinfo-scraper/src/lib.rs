pub mod bootstrap;
pub mod driver;
pub mod error;
pub mod eventbus;
pub mod executor;
pub mod loader;
pub mod management;
pub mod metrics;
pub mod provider_manager;
pub mod scraping;
pub mod settings;
pub mod store;

pub use driver::ScrapingDriver;
pub use error::{ScrapeError, StoreError};
pub use eventbus::EventBus;
pub use executor::PeriodicExecutor;
pub use scraping::ScrapingManager;
pub use store::CloudInfoStore;
