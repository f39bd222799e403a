//! Builds a ready-to-use [`WeatherViewModel`] from configuration.

use std::{fs, sync::Arc};

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::{
    Config,
    catalog::Catalog,
    fetcher::WeatherFetcher,
    jobs::{JobScheduler, NetworkMonitor},
    provider::{WeatherProvider, default_provider_from_config},
    repository::LocationRepository,
    resolver::RemoteResolver,
    store::Store,
    viewmodel::WeatherViewModel,
};

/// Everything one session needs, wired together.
#[derive(Debug)]
pub struct App {
    pub scheduler: JobScheduler,
    pub repository: Arc<LocationRepository>,
    pub view_model: WeatherViewModel,
}

impl App {
    /// Uses the configured default provider and database path.
    pub fn from_config(config: &Config, network: NetworkMonitor) -> Result<Self> {
        let provider = default_provider_from_config(config)?;
        let store = open_store(config)?;
        Ok(Self::with_parts(provider, Arc::new(store), network))
    }

    pub fn with_parts(
        provider: Arc<dyn WeatherProvider>,
        store: Arc<Store>,
        network: NetworkMonitor,
    ) -> Self {
        info!(provider = %provider.id(), "wiring weather flow");

        let scheduler = JobScheduler::new(network);
        let resolver = RemoteResolver::new(scheduler.clone(), Arc::clone(&provider));
        let fetcher = WeatherFetcher::new(scheduler.clone(), provider);
        let repository = Arc::new(LocationRepository::new(store, Arc::new(resolver), Catalog::us()));
        let view_model = WeatherViewModel::new(Arc::clone(&repository), fetcher);

        Self { scheduler, repository, view_model }
    }
}

/// Opens the configured database, creating its directory. Needs no provider.
pub fn open_store(config: &Config) -> Result<Store> {
    let path = config.database_file_path()?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create data directory: {}", parent.display()))?;
    }
    let store = Store::open(&path)
        .with_context(|| format!("Failed to open database: {}", path.display()))?;
    debug!(path = %path.display(), cached = store.location_count()?, "opened database");
    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ProviderId;

    #[test]
    fn missing_provider_is_reported_with_a_hint() {
        let err = App::from_config(&Config::default(), NetworkMonitor::online()).unwrap_err();
        assert!(err.to_string().contains("weatherpin configure"));
    }

    #[test]
    fn opens_database_under_a_fresh_directory() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.upsert_provider_api_key(ProviderId::OpenWeather, "KEY".into());
        config.database_path = Some(dir.path().join("data").join("weatherpin.sqlite3"));

        let app = App::from_config(&config, NetworkMonitor::online()).unwrap();
        assert!(dir.path().join("data").join("weatherpin.sqlite3").exists());
        assert_eq!(app.view_model.state().location.available_regions.len(), 51);
        assert_eq!(app.scheduler.outstanding(), 0);
    }

    #[test]
    fn store_opens_without_provider_credentials() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            database_path: Some(dir.path().join("weatherpin.sqlite3")),
            ..Config::default()
        };

        let store = open_store(&config).unwrap();
        assert!(store.bookmarks().unwrap().is_empty());
        assert!(App::from_config(&config, NetworkMonitor::online()).is_err());
    }
}
