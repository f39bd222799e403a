//! In-process background job scheduler.
//!
//! Work is enqueued under a unique name. Enqueuing a name whose previous job
//! has not finished either replaces (cancels) it or keeps it, depending on
//! [`ExistingWorkPolicy`]. Each job publishes its [`WorkInfo`] on a `watch`
//! channel; a [`WorkSubscription`] is one registered observer and
//! deregisters itself when dropped.
//!
//! Finished jobs are discarded as soon as nobody is observing them.

use std::{
    collections::{BTreeMap, HashMap},
    fmt,
    sync::Arc,
};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::{sync::watch, task::AbortHandle};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::WeatherError;

/// Largest encoded output a job may publish.
pub const MAX_DATA_BYTES: usize = 10 * 1024;

pub const OUTPUT_SUCCESS: &str = "SUCCESS";
pub const OUTPUT_ERROR_MESSAGE: &str = "ERROR_MSG";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkId(Uuid);

impl WorkId {
    pub(crate) fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for WorkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkKind {
    Resolve,
    FetchWeather,
}

impl WorkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkKind::Resolve => "resolve",
            WorkKind::FetchWeather => "fetch-weather",
        }
    }
}

impl fmt::Display for WorkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkState {
    Enqueued,
    Running,
    /// Waiting on an unmet constraint (connectivity).
    Blocked,
    Succeeded,
    Failed,
    Cancelled,
}

impl WorkState {
    pub fn is_finished(self) -> bool {
        matches!(self, WorkState::Succeeded | WorkState::Failed | WorkState::Cancelled)
    }
}

/// Small key/value payload a job hands back to its observers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkData(BTreeMap<String, serde_json::Value>);

impl WorkData {
    pub fn builder() -> WorkDataBuilder {
        WorkDataBuilder::default()
    }

    /// Failure payload: `SUCCESS = false` plus the message.
    pub fn failure(message: impl Into<String>) -> Self {
        let mut values = BTreeMap::new();
        values.insert(OUTPUT_SUCCESS.to_string(), serde_json::Value::Bool(false));
        values.insert(OUTPUT_ERROR_MESSAGE.to_string(), serde_json::Value::String(message.into()));
        Self(values)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.0.get(key).and_then(serde_json::Value::as_bool)
    }

    pub fn get_string(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(serde_json::Value::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn encoded_len(&self) -> usize {
        serde_json::to_vec(&self.0).map(|bytes| bytes.len()).unwrap_or(usize::MAX)
    }
}

#[derive(Debug, Default)]
pub struct WorkDataBuilder {
    values: BTreeMap<String, serde_json::Value>,
}

impl WorkDataBuilder {
    pub fn put_bool(mut self, key: &str, value: bool) -> Self {
        self.values.insert(key.to_string(), serde_json::Value::Bool(value));
        self
    }

    pub fn put_string(mut self, key: &str, value: impl Into<String>) -> Self {
        self.values.insert(key.to_string(), serde_json::Value::String(value.into()));
        self
    }

    /// Fails with [`WeatherError::PayloadTooLarge`] instead of truncating.
    pub fn build(self) -> Result<WorkData, WeatherError> {
        let data = WorkData(self.values);
        if data.encoded_len() > MAX_DATA_BYTES {
            return Err(WeatherError::PayloadTooLarge);
        }
        Ok(data)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WorkInfo {
    pub id: WorkId,
    pub kind: WorkKind,
    pub state: WorkState,
    pub output: WorkData,
}

#[derive(Debug, Clone, PartialEq)]
pub enum WorkOutcome {
    Success(WorkData),
    Failure(WorkData),
}

impl WorkOutcome {
    pub fn failure(message: impl Into<String>) -> Self {
        WorkOutcome::Failure(WorkData::failure(message))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Constraints {
    pub requires_network: bool,
}

impl Constraints {
    pub fn network() -> Self {
        Self { requires_network: true }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExistingWorkPolicy {
    /// Cancel the unfinished job and run the new one.
    Replace,
    /// Leave the unfinished job alone and hand back its id.
    Keep,
}

/// A unit of background work.
#[async_trait]
pub trait Worker: Send + Sync + 'static {
    fn kind(&self) -> WorkKind;

    async fn do_work(&self) -> WorkOutcome;
}

/// Connectivity as seen by the scheduler.
#[derive(Debug, Clone)]
pub struct NetworkMonitor {
    state: Arc<watch::Sender<bool>>,
}

impl NetworkMonitor {
    pub fn new(online: bool) -> Self {
        let (tx, _rx) = watch::channel(online);
        Self { state: Arc::new(tx) }
    }

    pub fn online() -> Self {
        Self::new(true)
    }

    pub fn offline() -> Self {
        Self::new(false)
    }

    pub fn set_online(&self, online: bool) {
        self.state.send_if_modified(|current| {
            if *current == online {
                return false;
            }
            *current = online;
            true
        });
    }

    pub fn is_online(&self) -> bool {
        *self.state.borrow()
    }

    pub async fn wait_online(&self) {
        let mut rx = self.state.subscribe();
        // The sender lives in `self`, so this only returns once we're online.
        let _ = rx.wait_for(|online| *online).await;
    }
}

impl Default for NetworkMonitor {
    fn default() -> Self {
        Self::online()
    }
}

struct Job {
    status: Arc<watch::Sender<WorkInfo>>,
    abort: AbortHandle,
}

impl Job {
    fn state(&self) -> WorkState {
        self.status.borrow().state
    }

    fn subscribe(&self, id: WorkId) -> WorkSubscription {
        WorkSubscription::new(id, self.status.subscribe())
    }

    fn cancel(&self) -> bool {
        self.abort.abort();
        self.status.send_if_modified(|info| {
            if info.state.is_finished() {
                return false;
            }
            info.state = WorkState::Cancelled;
            true
        })
    }

    fn is_discardable(&self) -> bool {
        self.state().is_finished() && self.status.receiver_count() == 0
    }
}

#[derive(Default)]
struct Registry {
    jobs: HashMap<WorkId, Job>,
    unique: HashMap<String, WorkId>,
}

impl Registry {
    fn prune(&mut self) {
        self.jobs.retain(|_, job| !job.is_discardable());
        let jobs = &self.jobs;
        self.unique.retain(|_, id| jobs.contains_key(id));
    }
}

/// Runs [`Worker`]s on the tokio runtime and tracks their status.
#[derive(Clone)]
pub struct JobScheduler {
    network: NetworkMonitor,
    registry: Arc<Mutex<Registry>>,
}

impl fmt::Debug for JobScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobScheduler")
            .field("online", &self.network.is_online())
            .field("jobs", &self.registry.lock().jobs.len())
            .finish()
    }
}

impl JobScheduler {
    pub fn new(network: NetworkMonitor) -> Self {
        Self { network, registry: Arc::default() }
    }

    pub fn network(&self) -> &NetworkMonitor {
        &self.network
    }

    /// Enqueues `worker` under `name`. Must be called within a tokio runtime.
    pub fn enqueue_unique<W: Worker>(
        &self,
        name: &str,
        policy: ExistingWorkPolicy,
        constraints: Constraints,
        worker: W,
    ) -> WorkId {
        self.enqueue_observed(name, policy, constraints, worker).id()
    }

    /// Same as [`enqueue_unique`](Self::enqueue_unique), but hands back an
    /// observer registered before the job can be discarded.
    pub fn enqueue_observed<W: Worker>(
        &self,
        name: &str,
        policy: ExistingWorkPolicy,
        constraints: Constraints,
        worker: W,
    ) -> WorkSubscription {
        let mut registry = self.registry.lock();
        registry.prune();

        if let Some(existing) = registry.unique.get(name).copied() {
            if let Some(job) = registry.jobs.get(&existing) {
                if !job.state().is_finished() {
                    match policy {
                        ExistingWorkPolicy::Keep => {
                            debug!(%existing, name, "keeping outstanding work");
                            return job.subscribe(existing);
                        }
                        ExistingWorkPolicy::Replace => {
                            debug!(%existing, name, "replacing outstanding work");
                            job.cancel();
                        }
                    }
                }
            }
        }

        let id = WorkId::new();
        let kind = worker.kind();
        let (tx, rx) = watch::channel(WorkInfo {
            id,
            kind,
            state: WorkState::Enqueued,
            output: WorkData::default(),
        });
        let status = Arc::new(tx);

        let handle = tokio::spawn(run_job(
            Arc::clone(&status),
            self.network.clone(),
            constraints,
            worker,
        ));

        registry.jobs.insert(id, Job { status, abort: handle.abort_handle() });
        registry.unique.insert(name.to_string(), id);

        debug!(%id, %kind, name, "enqueued work");
        WorkSubscription::new(id, rx)
    }

    /// Registers an observer for `id`. `None` once the job has been discarded.
    pub fn status_of(&self, id: WorkId) -> Option<WorkSubscription> {
        self.registry.lock().jobs.get(&id).map(|job| job.subscribe(id))
    }

    pub fn info(&self, id: WorkId) -> Option<WorkInfo> {
        self.registry.lock().jobs.get(&id).map(|job| job.status.borrow().clone())
    }

    /// Cancels `id`. Returns false if it was unknown or already finished.
    pub fn cancel(&self, id: WorkId) -> bool {
        self.registry.lock().jobs.get(&id).is_some_and(Job::cancel)
    }

    /// Unfinished job currently registered under `name`.
    pub fn active_for(&self, name: &str) -> Option<WorkId> {
        let registry = self.registry.lock();
        let id = registry.unique.get(name)?;
        registry.jobs.get(id).filter(|job| !job.state().is_finished()).map(|_| *id)
    }

    /// Number of unfinished jobs.
    pub fn outstanding(&self) -> usize {
        self.registry.lock().jobs.values().filter(|job| !job.state().is_finished()).count()
    }

    pub fn observer_count(&self, id: WorkId) -> usize {
        self.registry.lock().jobs.get(&id).map_or(0, |job| job.status.receiver_count())
    }

    /// Jobs still tracked, finished or not.
    pub fn tracked(&self) -> usize {
        self.registry.lock().jobs.len()
    }
}

async fn run_job<W: Worker>(
    status: Arc<watch::Sender<WorkInfo>>,
    network: NetworkMonitor,
    constraints: Constraints,
    worker: W,
) {
    if constraints.requires_network && !network.is_online() {
        if !advance(&status, WorkState::Blocked) {
            return;
        }
        debug!(id = %status.borrow().id, "waiting for connectivity");
        network.wait_online().await;
    }

    if !advance(&status, WorkState::Running) {
        return;
    }

    let (state, output) = match worker.do_work().await {
        WorkOutcome::Success(data) if data.encoded_len() > MAX_DATA_BYTES => {
            warn!(bytes = data.encoded_len(), "work output exceeds {MAX_DATA_BYTES} bytes");
            (WorkState::Failed, WorkData::failure(WeatherError::PayloadTooLarge.to_string()))
        }
        WorkOutcome::Success(data) => (WorkState::Succeeded, data),
        WorkOutcome::Failure(data) => (WorkState::Failed, data),
    };

    status.send_if_modified(|info| {
        if info.state.is_finished() {
            return false;
        }
        info.state = state;
        info.output = output;
        true
    });
}

/// Moves an unfinished job to `next`. False if it already finished.
fn advance(status: &watch::Sender<WorkInfo>, next: WorkState) -> bool {
    let mut live = false;
    status.send_if_modified(|info| {
        if info.state.is_finished() {
            return false;
        }
        live = true;
        if info.state == next {
            return false;
        }
        info.state = next;
        true
    });
    live
}

/// One observer of a job's status.
///
/// Yields the current state first, then every change the observer gets to
/// see, and ends after the terminal state.
#[derive(Debug)]
pub struct WorkSubscription {
    id: WorkId,
    rx: watch::Receiver<WorkInfo>,
    primed: bool,
    done: bool,
}

impl WorkSubscription {
    fn new(id: WorkId, rx: watch::Receiver<WorkInfo>) -> Self {
        Self { id, rx, primed: false, done: false }
    }

    pub fn id(&self) -> WorkId {
        self.id
    }

    pub async fn next(&mut self) -> Option<WorkInfo> {
        if self.done {
            return None;
        }

        if self.primed && self.rx.changed().await.is_err() {
            self.done = true;
            return None;
        }
        self.primed = true;

        let info = self.rx.borrow_and_update().clone();
        if info.state.is_finished() {
            self.done = true;
        }
        Some(info)
    }

    /// Drains the subscription and returns the terminal info.
    pub async fn finished(mut self) -> Option<WorkInfo> {
        let mut last = None;
        while let Some(info) = self.next().await {
            last = Some(info);
        }
        last.filter(|info| info.state.is_finished())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::{sync::Notify, time::timeout};

    struct Echo(WorkOutcome);

    #[async_trait]
    impl Worker for Echo {
        fn kind(&self) -> WorkKind {
            WorkKind::Resolve
        }

        async fn do_work(&self) -> WorkOutcome {
            self.0.clone()
        }
    }

    struct Gate(Arc<Notify>);

    #[async_trait]
    impl Worker for Gate {
        fn kind(&self) -> WorkKind {
            WorkKind::FetchWeather
        }

        async fn do_work(&self) -> WorkOutcome {
            self.0.notified().await;
            WorkOutcome::Success(WorkData::builder().put_bool(OUTPUT_SUCCESS, true).build().unwrap())
        }
    }

    fn ok_output() -> WorkOutcome {
        WorkOutcome::Success(
            WorkData::builder()
                .put_bool(OUTPUT_SUCCESS, true)
                .put_string("location_json", "{}")
                .build()
                .unwrap(),
        )
    }

    async fn wait_for_state(sub: &mut WorkSubscription, wanted: WorkState) -> WorkInfo {
        timeout(Duration::from_secs(5), async {
            loop {
                let info = sub.next().await.expect("subscription ended early");
                if info.state == wanted {
                    return info;
                }
            }
        })
        .await
        .expect("timed out waiting for state")
    }

    #[tokio::test]
    async fn successful_work_publishes_output() {
        let scheduler = JobScheduler::new(NetworkMonitor::online());
        let id = scheduler.enqueue_unique(
            "resolve:boston",
            ExistingWorkPolicy::Replace,
            Constraints::network(),
            Echo(ok_output()),
        );

        let sub = scheduler.status_of(id).unwrap();
        let info = timeout(Duration::from_secs(5), sub.finished()).await.unwrap().unwrap();

        assert_eq!(info.id, id);
        assert_eq!(info.kind, WorkKind::Resolve);
        assert_eq!(info.state, WorkState::Succeeded);
        assert_eq!(info.output.get_bool(OUTPUT_SUCCESS), Some(true));
        assert_eq!(info.output.get_string("location_json"), Some("{}"));
    }

    #[tokio::test]
    async fn failure_keeps_error_message() {
        let scheduler = JobScheduler::new(NetworkMonitor::online());
        let id = scheduler.enqueue_unique(
            "resolve:nowhere",
            ExistingWorkPolicy::Replace,
            Constraints::default(),
            Echo(WorkOutcome::failure("Empty response from server")),
        );

        let info = scheduler.status_of(id).unwrap().finished().await.unwrap();
        assert_eq!(info.state, WorkState::Failed);
        assert_eq!(info.output.get_bool(OUTPUT_SUCCESS), Some(false));
        assert_eq!(info.output.get_string(OUTPUT_ERROR_MESSAGE), Some("Empty response from server"));
    }

    #[tokio::test]
    async fn resubmitting_a_name_replaces_outstanding_work() {
        let scheduler = JobScheduler::new(NetworkMonitor::online());
        let gate = Arc::new(Notify::new());

        let first = scheduler.enqueue_unique(
            "fetch-weather:1,2",
            ExistingWorkPolicy::Replace,
            Constraints::default(),
            Gate(Arc::clone(&gate)),
        );
        let mut first_sub = scheduler.status_of(first).unwrap();

        let second = scheduler.enqueue_unique(
            "fetch-weather:1,2",
            ExistingWorkPolicy::Replace,
            Constraints::default(),
            Gate(Arc::clone(&gate)),
        );

        assert_ne!(first, second);
        assert_eq!(wait_for_state(&mut first_sub, WorkState::Cancelled).await.id, first);
        assert_eq!(scheduler.outstanding(), 1);
        assert_eq!(scheduler.active_for("fetch-weather:1,2"), Some(second));

        gate.notify_one();
        let info = scheduler.status_of(second).unwrap().finished().await.unwrap();
        assert_eq!(info.state, WorkState::Succeeded);
    }

    #[tokio::test]
    async fn keep_policy_returns_outstanding_id() {
        let scheduler = JobScheduler::new(NetworkMonitor::online());
        let gate = Arc::new(Notify::new());

        let first = scheduler.enqueue_unique(
            "resolve:keep",
            ExistingWorkPolicy::Keep,
            Constraints::default(),
            Gate(Arc::clone(&gate)),
        );
        let second = scheduler.enqueue_unique(
            "resolve:keep",
            ExistingWorkPolicy::Keep,
            Constraints::default(),
            Gate(Arc::clone(&gate)),
        );

        assert_eq!(first, second);
        assert_eq!(scheduler.outstanding(), 1);
        assert!(scheduler.cancel(first));
    }

    #[tokio::test]
    async fn offline_work_waits_for_connectivity() {
        let network = NetworkMonitor::offline();
        let scheduler = JobScheduler::new(network.clone());
        let id = scheduler.enqueue_unique(
            "resolve:offline",
            ExistingWorkPolicy::Replace,
            Constraints::network(),
            Echo(ok_output()),
        );

        let mut sub = scheduler.status_of(id).unwrap();
        wait_for_state(&mut sub, WorkState::Blocked).await;
        assert_eq!(scheduler.info(id).unwrap().state, WorkState::Blocked);

        network.set_online(true);
        wait_for_state(&mut sub, WorkState::Succeeded).await;
    }

    #[tokio::test]
    async fn oversized_output_fails_instead_of_truncating() {
        let mut values = BTreeMap::new();
        values.insert(OUTPUT_SUCCESS.to_string(), serde_json::Value::Bool(true));
        values.insert("weather_json".to_string(), serde_json::Value::String("x".repeat(MAX_DATA_BYTES)));
        let huge = WorkOutcome::Success(WorkData(values));

        let scheduler = JobScheduler::new(NetworkMonitor::online());
        let id = scheduler.enqueue_unique(
            "fetch-weather:big",
            ExistingWorkPolicy::Replace,
            Constraints::default(),
            Echo(huge),
        );

        let info = scheduler.status_of(id).unwrap().finished().await.unwrap();
        assert_eq!(info.state, WorkState::Failed);
        assert_eq!(info.output.get_string(OUTPUT_ERROR_MESSAGE), Some("Response data too large"));
    }

    #[test]
    fn builder_rejects_oversized_payload() {
        let err = WorkData::builder()
            .put_string("weather_json", "y".repeat(MAX_DATA_BYTES + 1))
            .build()
            .unwrap_err();
        assert!(matches!(err, WeatherError::PayloadTooLarge));
    }

    #[tokio::test]
    async fn dropping_a_subscription_deregisters_the_observer() {
        let scheduler = JobScheduler::new(NetworkMonitor::online());
        let gate = Arc::new(Notify::new());
        let id = scheduler.enqueue_unique(
            "fetch-weather:observe",
            ExistingWorkPolicy::Replace,
            Constraints::default(),
            Gate(gate),
        );

        let sub = scheduler.status_of(id).unwrap();
        let other = scheduler.status_of(id).unwrap();
        assert_eq!(scheduler.observer_count(id), 2);

        drop(sub);
        assert_eq!(scheduler.observer_count(id), 1);
        drop(other);
        assert_eq!(scheduler.observer_count(id), 0);

        assert!(scheduler.cancel(id));
        assert!(!scheduler.cancel(id));
    }

    #[tokio::test]
    async fn finished_work_without_observers_is_discarded() {
        let scheduler = JobScheduler::new(NetworkMonitor::online());
        let mut ids = Vec::new();
        for n in 0..50 {
            let sub = scheduler.enqueue_observed(
                &format!("fetch-weather:{n}"),
                ExistingWorkPolicy::Replace,
                Constraints::default(),
                Echo(ok_output()),
            );
            ids.push(sub.id());
        }
        timeout(Duration::from_secs(5), async {
            while scheduler.outstanding() > 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        scheduler.enqueue_unique(
            "fetch-weather:last",
            ExistingWorkPolicy::Replace,
            Constraints::default(),
            Echo(ok_output()),
        );

        assert_eq!(scheduler.tracked(), 1);
        assert!(ids.iter().all(|id| scheduler.info(*id).is_none()));
    }

    #[tokio::test]
    async fn observed_work_survives_pruning() {
        let scheduler = JobScheduler::new(NetworkMonitor::online());
        let mut sub = scheduler.enqueue_observed(
            "resolve:kept",
            ExistingWorkPolicy::Replace,
            Constraints::default(),
            Echo(ok_output()),
        );
        let id = sub.id();
        timeout(Duration::from_secs(5), async {
            while scheduler.outstanding() > 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        scheduler.enqueue_unique(
            "resolve:other",
            ExistingWorkPolicy::Replace,
            Constraints::default(),
            Echo(ok_output()),
        );

        let info = wait_for_state(&mut sub, WorkState::Succeeded).await;
        assert_eq!(info.id, id);
        assert_eq!(scheduler.info(id).map(|info| info.state), Some(WorkState::Succeeded));
    }

    #[tokio::test]
    async fn consumed_work_is_discarded() {
        let scheduler = JobScheduler::new(NetworkMonitor::online());
        let id = scheduler.enqueue_unique(
            "resolve:once",
            ExistingWorkPolicy::Replace,
            Constraints::default(),
            Echo(ok_output()),
        );
        scheduler.status_of(id).unwrap().finished().await.unwrap();

        scheduler.enqueue_unique(
            "resolve:other",
            ExistingWorkPolicy::Replace,
            Constraints::default(),
            Echo(ok_output()),
        );

        assert!(scheduler.status_of(id).is_none());
        assert!(scheduler.active_for("resolve:once").is_none());
    }
}
