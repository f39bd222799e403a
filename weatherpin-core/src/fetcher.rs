//! Current-conditions lookup run as background work.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::{
    error::{Result, WeatherError},
    jobs::{
        Constraints, ExistingWorkPolicy, JobScheduler, OUTPUT_SUCCESS, WorkData, WorkId, WorkKind,
        WorkOutcome, WorkSubscription, Worker,
    },
    model::ResolvedLocation,
    provider::WeatherProvider,
};

pub const WEATHER_JSON: &str = "weather_json";

pub struct WeatherWorker {
    provider: Arc<dyn WeatherProvider>,
    location: ResolvedLocation,
}

impl WeatherWorker {
    pub fn new(provider: Arc<dyn WeatherProvider>, location: ResolvedLocation) -> Self {
        Self { provider, location }
    }

    async fn fetch(&self) -> Result<WorkData> {
        let snapshot = self.provider.current_conditions(&self.location.place).await?;
        let json = serde_json::to_string(&snapshot)
            .map_err(|e| WeatherError::parse("weather snapshot", e))?;

        let data = WorkData::builder()
            .put_bool(OUTPUT_SUCCESS, true)
            .put_string(WEATHER_JSON, json)
            .build()?;
        debug!(
            location = %self.location.display_name,
            bytes = data.encoded_len(),
            "weather fetch succeeded"
        );
        Ok(data)
    }
}

#[async_trait]
impl Worker for WeatherWorker {
    fn kind(&self) -> WorkKind {
        WorkKind::FetchWeather
    }

    async fn do_work(&self) -> WorkOutcome {
        match self.fetch().await {
            Ok(data) => WorkOutcome::Success(data),
            Err(err) => {
                warn!(location = %self.location.place, error = %err, "weather fetch failed");
                WorkOutcome::failure(err.to_string())
            }
        }
    }
}

/// Submits [`WeatherWorker`]s. Callers fold the status stream themselves.
#[derive(Debug, Clone)]
pub struct WeatherFetcher {
    scheduler: JobScheduler,
    provider: Arc<dyn WeatherProvider>,
}

impl WeatherFetcher {
    pub fn new(scheduler: JobScheduler, provider: Arc<dyn WeatherProvider>) -> Self {
        Self { scheduler, provider }
    }

    pub fn work_name(location: &ResolvedLocation) -> String {
        format!("{}:{}", WorkKind::FetchWeather, location.place.identity())
    }

    /// Enqueues a fetch, replacing any outstanding one for the same place.
    pub fn submit(&self, location: &ResolvedLocation) -> WorkId {
        self.submit_observed(location).id()
    }

    /// Enqueues a fetch and subscribes to it in one step.
    pub fn submit_observed(&self, location: &ResolvedLocation) -> WorkSubscription {
        self.scheduler.enqueue_observed(
            &Self::work_name(location),
            ExistingWorkPolicy::Replace,
            Constraints::network(),
            WeatherWorker::new(Arc::clone(&self.provider), location.clone()),
        )
    }

    pub fn status_of(&self, id: WorkId) -> Option<WorkSubscription> {
        self.scheduler.status_of(id)
    }

    pub fn cancel(&self, id: WorkId) -> bool {
        self.scheduler.cancel(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        jobs::{NetworkMonitor, OUTPUT_ERROR_MESSAGE, WorkState},
        model::{LocationCandidate, LocationRef, WeatherSnapshot},
        provider::ProviderId,
    };

    #[derive(Debug)]
    struct Conditions(fn() -> Result<WeatherSnapshot>);

    #[async_trait]
    impl WeatherProvider for Conditions {
        fn id(&self) -> ProviderId {
            ProviderId::AccuWeather
        }

        async fn search(&self, _query: &str) -> Result<Vec<LocationCandidate>> {
            Ok(Vec::new())
        }

        async fn current_conditions(&self, _place: &LocationRef) -> Result<WeatherSnapshot> {
            (self.0)()
        }
    }

    fn sunny() -> Result<WeatherSnapshot> {
        Ok(WeatherSnapshot {
            description: Some("Sunny".into()),
            temperature_f: 72.5,
            temperature_c: 22.5,
            icon: None,
            observed_at: Some("2025-07-24 09:15".into()),
        })
    }

    fn chatty() -> Result<WeatherSnapshot> {
        Ok(WeatherSnapshot {
            description: Some("a".repeat(crate::jobs::MAX_DATA_BYTES)),
            temperature_f: 50.0,
            temperature_c: 10.0,
            icon: None,
            observed_at: None,
        })
    }

    fn empty() -> Result<WeatherSnapshot> {
        Err(WeatherError::EmptyResponse)
    }

    fn boston() -> ResolvedLocation {
        ResolvedLocation {
            name: "boston, massachusetts".into(),
            display_name: "Boston, MA".into(),
            place: LocationRef::ProviderKey { key: "348735".into() },
        }
    }

    fn fetcher(conditions: fn() -> Result<WeatherSnapshot>) -> WeatherFetcher {
        WeatherFetcher::new(
            JobScheduler::new(NetworkMonitor::online()),
            Arc::new(Conditions(conditions)),
        )
    }

    #[tokio::test]
    async fn snapshot_is_serialized_into_output() {
        let fetcher = fetcher(sunny);
        let id = fetcher.submit(&boston());
        let info = fetcher.status_of(id).unwrap().finished().await.unwrap();

        assert_eq!(info.state, WorkState::Succeeded);
        let json = info.output.get_string(WEATHER_JSON).unwrap();
        let snapshot: WeatherSnapshot = serde_json::from_str(json).unwrap();
        assert_eq!(snapshot, sunny().unwrap());
    }

    #[tokio::test]
    async fn empty_provider_reply_fails_the_job() {
        let fetcher = fetcher(empty);
        let id = fetcher.submit(&boston());
        let info = fetcher.status_of(id).unwrap().finished().await.unwrap();

        assert_eq!(info.state, WorkState::Failed);
        assert_eq!(info.output.get_string(OUTPUT_ERROR_MESSAGE), Some("Empty response from server"));
    }

    #[tokio::test]
    async fn oversized_snapshot_fails_the_job() {
        let fetcher = fetcher(chatty);
        let id = fetcher.submit(&boston());
        let info = fetcher.status_of(id).unwrap().finished().await.unwrap();

        assert_eq!(info.state, WorkState::Failed);
        assert_eq!(info.output.get_string(OUTPUT_ERROR_MESSAGE), Some("Response data too large"));
    }

    #[test]
    fn work_name_uses_location_identity() {
        assert_eq!(WeatherFetcher::work_name(&boston()), "fetch-weather:348735");
    }
}
