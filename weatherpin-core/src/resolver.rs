//! Remote place-name resolution run as background work.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, warn};

use crate::{
    error::{Result, WeatherError},
    jobs::{
        Constraints, ExistingWorkPolicy, JobScheduler, OUTPUT_ERROR_MESSAGE, OUTPUT_SUCCESS,
        WorkData, WorkId, WorkKind, WorkOutcome, WorkState, WorkSubscription, Worker,
    },
    model::{ResolvedLocation, normalize_query},
    provider::WeatherProvider,
};

pub const LOCATION_JSON: &str = "location_json";

/// Anything that can turn a place name into a [`ResolvedLocation`].
#[async_trait]
pub trait LocationSource: Send + Sync {
    async fn resolve(&self, query: &str) -> Result<ResolvedLocation>;
}

/// Searches the provider and keeps the first candidate.
pub struct SearchWorker {
    provider: Arc<dyn WeatherProvider>,
    query: String,
}

impl SearchWorker {
    pub fn new(provider: Arc<dyn WeatherProvider>, query: impl Into<String>) -> Self {
        Self { provider, query: query.into() }
    }

    async fn search(&self) -> Result<WorkData> {
        let candidates = self.provider.search(&self.query).await?;
        let first = candidates
            .into_iter()
            .next()
            .ok_or_else(|| WeatherError::NoLocationFound(self.query.clone()))?;

        let location = ResolvedLocation {
            name: normalize_query(&self.query),
            display_name: first.display_name,
            place: first.place,
        };
        let json = serde_json::to_string(&location)
            .map_err(|e| WeatherError::parse("resolved location", e))?;

        let data = WorkData::builder()
            .put_bool(OUTPUT_SUCCESS, true)
            .put_string(LOCATION_JSON, json)
            .build()?;
        debug!(query = %self.query, bytes = data.encoded_len(), "location search succeeded");
        Ok(data)
    }
}

#[async_trait]
impl Worker for SearchWorker {
    fn kind(&self) -> WorkKind {
        WorkKind::Resolve
    }

    async fn do_work(&self) -> WorkOutcome {
        match self.search().await {
            Ok(data) => WorkOutcome::Success(data),
            Err(err) => {
                warn!(query = %self.query, error = %err, "location search failed");
                WorkOutcome::failure(err.to_string())
            }
        }
    }
}

/// Submits [`SearchWorker`]s and turns their terminal state into a result.
#[derive(Debug, Clone)]
pub struct RemoteResolver {
    scheduler: JobScheduler,
    provider: Arc<dyn WeatherProvider>,
}

impl RemoteResolver {
    pub fn new(scheduler: JobScheduler, provider: Arc<dyn WeatherProvider>) -> Self {
        Self { scheduler, provider }
    }

    pub fn work_name(query: &str) -> String {
        format!("{}:{}", WorkKind::Resolve, normalize_query(query))
    }

    /// Enqueues a search, replacing any outstanding one for the same query.
    pub fn submit(&self, query: &str) -> WorkId {
        self.enqueue(query).id()
    }

    fn enqueue(&self, query: &str) -> WorkSubscription {
        self.scheduler.enqueue_observed(
            &Self::work_name(query),
            ExistingWorkPolicy::Replace,
            Constraints::network(),
            SearchWorker::new(Arc::clone(&self.provider), query),
        )
    }

    pub fn status_of(&self, id: WorkId) -> Option<WorkSubscription> {
        self.scheduler.status_of(id)
    }
}

#[async_trait]
impl LocationSource for RemoteResolver {
    async fn resolve(&self, query: &str) -> Result<ResolvedLocation> {
        let mut status = self.enqueue(query);
        let id = status.id();

        while let Some(info) = status.next().await {
            match info.state {
                WorkState::Succeeded => return decode_location(&info.output),
                WorkState::Failed => {
                    let msg = info.output.get_string(OUTPUT_ERROR_MESSAGE).unwrap_or("Search failed");
                    return Err(WeatherError::WorkFailed(msg.to_string()));
                }
                WorkState::Cancelled => break,
                WorkState::Enqueued | WorkState::Running | WorkState::Blocked => {
                    debug!(%id, state = ?info.state, "waiting on location search");
                }
            }
        }

        Err(WeatherError::Cancelled("Search was cancelled".to_string()))
    }
}

fn decode_location(output: &WorkData) -> Result<ResolvedLocation> {
    let json = output.get_string(LOCATION_JSON).ok_or(WeatherError::EmptyResponse)?;
    serde_json::from_str(json).map_err(|e| {
        error!(error = %e, "location payload from search work is unreadable");
        WeatherError::parse("resolved location", e)
    })
}
