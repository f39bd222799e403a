//! The reducer that owns [`WeatherUiState`].
//!
//! The view model is the only writer of the state. Intents come in as method
//! calls; repository results and fetch job status are folded into the state
//! as they arrive. Subscribers read snapshots through a `watch` receiver.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use crate::{
    catalog::filter_localities,
    error::WeatherError,
    fetcher::{WEATHER_JSON, WeatherFetcher},
    jobs::{OUTPUT_ERROR_MESSAGE, OUTPUT_SUCCESS, WorkId, WorkInfo, WorkState},
    model::{Bookmark, NewBookmark, PlaceQuery, TemperatureUnit, WeatherSnapshot},
    repository::LocationRepository,
    state::{BookmarkNotice, FlowPhase, LocationKind, WeatherDisplayData, WeatherUiState},
};

const NOTICE_CAPACITY: usize = 16;

#[derive(Debug, Default)]
struct FlowGuard {
    /// Normalized key of the search being resolved or fetched.
    in_flight: Option<String>,
    /// Fetch job whose status may still touch the state.
    current_work: Option<WorkId>,
    generation: u64,
}

pub struct WeatherViewModel {
    repository: Arc<LocationRepository>,
    fetcher: WeatherFetcher,
    state: watch::Sender<WeatherUiState>,
    notices: broadcast::Sender<BookmarkNotice>,
    flow: Mutex<FlowGuard>,
}

impl std::fmt::Debug for WeatherViewModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let phase = self.state.borrow().weather.phase;
        f.debug_struct("WeatherViewModel")
            .field("phase", &phase)
            .field("flow", &*self.flow.lock())
            .finish_non_exhaustive()
    }
}

impl WeatherViewModel {
    /// Loads the region list and bookmarks. No selection is made.
    pub fn new(repository: Arc<LocationRepository>, fetcher: WeatherFetcher) -> Self {
        let (state, _) = watch::channel(WeatherUiState::default());
        let (notices, _) = broadcast::channel(NOTICE_CAPACITY);

        let vm = Self {
            repository,
            fetcher,
            state,
            notices,
            flow: Mutex::new(FlowGuard::default()),
        };
        vm.load_regions();
        vm.refresh_bookmarks();
        vm
    }

    pub fn subscribe(&self) -> watch::Receiver<WeatherUiState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> WeatherUiState {
        self.state.borrow().clone()
    }

    /// Notices sent after this call. Earlier ones are not replayed.
    pub fn subscribe_bookmark_notices(&self) -> broadcast::Receiver<BookmarkNotice> {
        self.notices.subscribe()
    }

    fn load_regions(&self) {
        self.state.send_modify(|s| {
            s.location.is_loading_regions = true;
            s.location.selected_region = None;
            s.location.selected_locality = None;
            s.error = None;
        });

        let regions = self.repository.regions().to_vec();
        debug!(count = regions.len(), "loaded regions");

        self.state.send_modify(|s| {
            s.location.filtered_regions = regions.clone();
            s.location.available_regions = regions;
            s.location.is_loading_regions = false;
        });
    }

    fn refresh_bookmarks(&self) {
        match self.repository.bookmarks() {
            Ok(bookmarks) => self.state.send_modify(|s| s.location.bookmarks = bookmarks),
            Err(err) => warn!(error = %err, "failed to load bookmarks"),
        }
    }

    // ── Selection ──

    /// Unknown names and the already-selected region are ignored.
    pub fn select_region(&self, name: &str) {
        let Some(region) = self.repository.region_by_name(name).cloned() else {
            debug!(name, "ignoring unknown region");
            return;
        };
        if self.state.borrow().location.selected_region.as_ref() == Some(&region) {
            return;
        }

        self.state.send_modify(|s| {
            let loc = &mut s.location;
            loc.region_query = region.name.clone();
            loc.selected_region = Some(region.clone());
            loc.selected_locality = None;
            loc.locality_query.clear();
            loc.available_localities.clear();
            loc.filtered_localities.clear();
            loc.is_loading_localities = true;
            clear_weather(s);
        });

        let localities = self.repository.major_localities(&region.abbreviation).to_vec();
        self.state.send_modify(|s| {
            s.location.filtered_localities = localities.clone();
            s.location.available_localities = localities;
            s.location.is_loading_localities = false;
        });
    }

    pub fn select_locality(&self, name: &str) {
        self.state.send_if_modified(|s| {
            if s.location.selected_locality.as_deref() == Some(name) {
                return false;
            }
            s.location.selected_locality = Some(name.to_string());
            s.location.locality_query = name.to_string();
            clear_weather(s);
            true
        });
    }

    pub fn clear_selection(&self, kind: LocationKind) {
        self.state.send_modify(|s| {
            let loc = &mut s.location;
            match kind {
                LocationKind::Region => {
                    loc.selected_region = None;
                    loc.region_query.clear();
                    loc.filtered_regions = loc.available_regions.clone();
                    loc.is_loading_regions = false;
                    loc.selected_locality = None;
                    loc.locality_query.clear();
                    loc.available_localities.clear();
                    loc.filtered_localities.clear();
                    loc.is_loading_localities = false;
                }
                LocationKind::Locality => {
                    loc.selected_locality = None;
                    loc.locality_query.clear();
                    loc.filtered_localities = loc.available_localities.clone();
                    loc.is_loading_localities = false;
                }
            }
            clear_weather(s);
        });
    }

    /// Filters a dropdown by case-insensitive substring. Blank text restores
    /// the full region list or the selected region's major cities.
    pub fn search_dropdown(&self, kind: LocationKind, text: &str) {
        match kind {
            LocationKind::Region => {
                let filtered = self.repository.catalog().filter_regions(text);
                self.state.send_modify(|s| {
                    s.location.region_query = text.to_string();
                    s.location.filtered_regions = filtered;
                    s.error = None;
                });
            }
            LocationKind::Locality => {
                let repository = &self.repository;
                self.state.send_if_modified(|s| {
                    if s.location.locality_query == text {
                        return false;
                    }
                    s.location.filtered_localities = if text.trim().is_empty() {
                        s.location.available_localities.clone()
                    } else {
                        s.location
                            .selected_region
                            .as_ref()
                            .map(|r| filter_localities(repository.all_localities(&r.abbreviation), text))
                            .unwrap_or_default()
                    };
                    s.location.locality_query = text.to_string();
                    s.error = None;
                    true
                });
            }
        }
    }

    // ── Units ──

    pub fn change_unit(&self, unit: TemperatureUnit) {
        self.state.send_if_modified(|s| {
            if s.weather.unit == unit {
                return false;
            }
            s.weather.unit = unit;
            true
        });
    }

    // ── Search ──

    /// Resolves the selected region (and locality) and fetches its weather.
    /// Does nothing without a selected region.
    pub async fn search_location(&self) {
        let query = {
            let state = self.state.borrow();
            let Some(region) = &state.location.selected_region else {
                debug!("search requested without a selected region");
                return;
            };
            PlaceQuery::from_selection(&region.name, state.location.selected_locality.as_deref())
        };
        self.run_search(query).await;
    }

    pub async fn search_free_text(&self, text: &str) {
        if text.trim().is_empty() {
            return;
        }
        self.run_search(PlaceQuery::free_text(text)).await;
    }

    async fn run_search(&self, query: PlaceQuery) {
        let key = query.normalized();
        let generation = {
            let mut flow = self.flow.lock();
            if flow.in_flight.as_deref() == Some(key.as_str()) {
                debug!(%key, "identical search already in flight");
                return;
            }
            if let Some(stale) = flow.current_work.take() {
                self.fetcher.cancel(stale);
            }
            flow.in_flight = Some(key.clone());
            flow.generation += 1;
            flow.generation
        };
        let _scope = SearchScope { vm: self, generation };

        self.state.send_modify(|s| {
            s.weather.phase = FlowPhase::ResolvingLocation;
            s.weather.is_loading = true;
            s.weather.display = None;
            s.error = None;
        });

        let resolved = self.repository.resolve_or_fetch(&query.text).await;

        let location = {
            let flow = self.flow.lock();
            if flow.generation != generation {
                debug!(%key, "dropping superseded resolution");
                return;
            }
            match resolved {
                Ok(location) => location,
                Err(err) => {
                    warn!(%key, error = %err, "location resolution failed");
                    self.state.send_modify(|s| fail(s, err.to_string()));
                    return;
                }
            }
        };

        info!(%key, place = %location.place, "location resolved");
        self.state.send_modify(|s| {
            s.weather.phase = FlowPhase::LocationResolved;
            s.weather.display = None;
            s.error = None;
        });

        let mut status = {
            let mut flow = self.flow.lock();
            if flow.generation != generation {
                return;
            }
            let status = self.fetcher.submit_observed(&location);
            flow.current_work = Some(status.id());
            status
        };
        let id = status.id();

        while let Some(info) = status.next().await {
            let flow = self.flow.lock();
            if flow.current_work != Some(id) {
                debug!(%id, "ignoring status of superseded weather fetch");
                return;
            }
            self.state.send_if_modified(|s| reduce_weather_status(s, &info));
        }
    }

    // ── Bookmarks ──

    /// Bookmarks the selected region and locality. Needs both to be selected.
    pub fn add_bookmark(&self) {
        let bookmark = {
            let state = self.state.borrow();
            let (Some(region), Some(locality)) =
                (&state.location.selected_region, &state.location.selected_locality)
            else {
                return;
            };
            NewBookmark {
                region_name: region.name.clone(),
                region_abbreviation: region.abbreviation.clone(),
                locality_name: locality.clone(),
            }
        };

        let notice = match self.save_bookmark(bookmark) {
            Ok(saved) => {
                info!(id = saved.id, "bookmark added");
                self.refresh_bookmarks();
                BookmarkNotice::added()
            }
            Err(WeatherError::DuplicateBookmark { .. }) => BookmarkNotice::duplicate(),
            Err(err) => {
                warn!(error = %err, "failed to add bookmark");
                BookmarkNotice::Error(err.to_string())
            }
        };
        self.notify(notice);
    }

    fn save_bookmark(&self, bookmark: NewBookmark) -> crate::error::Result<Bookmark> {
        if self
            .repository
            .is_bookmark_duplicate(&bookmark.region_name, &bookmark.locality_name)?
        {
            return Err(WeatherError::DuplicateBookmark {
                region: bookmark.region_name,
                locality: bookmark.locality_name,
            });
        }
        self.repository.add_bookmark(bookmark)
    }

    pub fn remove_bookmark(&self, id: i64) {
        match self.repository.remove_bookmark(id) {
            Ok(_) => {
                self.refresh_bookmarks();
                self.notify(BookmarkNotice::removed());
            }
            Err(err) => {
                warn!(id, error = %err, "failed to remove bookmark");
                self.notify(BookmarkNotice::Error(err.to_string()));
            }
        }
    }

    /// Same as picking the bookmark's region and then its locality.
    pub fn load_bookmark(&self, bookmark: &Bookmark) {
        self.select_region(&bookmark.region_name);
        self.select_locality(&bookmark.locality_name);
    }

    fn notify(&self, notice: BookmarkNotice) {
        if self.notices.send(notice).is_err() {
            debug!("no bookmark notice subscribers");
        }
    }
}

/// Releases the flow guard when a search ends, including when its future is
/// dropped. Only the newest search touches the guard.
struct SearchScope<'a> {
    vm: &'a WeatherViewModel,
    generation: u64,
}

impl Drop for SearchScope<'_> {
    fn drop(&mut self) {
        let mut flow = self.vm.flow.lock();
        if flow.generation != self.generation {
            return;
        }
        flow.in_flight = None;
        if let Some(id) = flow.current_work.take() {
            self.vm.fetcher.cancel(id);
        }
        self.vm.state.send_if_modified(|s| {
            if !s.weather.is_loading {
                return false;
            }
            debug!("search abandoned before it finished");
            s.weather.is_loading = false;
            s.weather.phase = FlowPhase::Idle;
            true
        });
    }
}

fn clear_weather(state: &mut WeatherUiState) {
    state.weather.display = None;
    state.weather.phase = FlowPhase::Idle;
    state.error = None;
}

fn fail(state: &mut WeatherUiState, message: String) {
    state.weather.is_loading = false;
    state.weather.display = None;
    state.weather.phase = FlowPhase::Error;
    state.error = Some(message);
}

/// Folds one fetch status update into the state. Returns whether anything changed.
fn reduce_weather_status(state: &mut WeatherUiState, info: &WorkInfo) -> bool {
    let output = &info.output;

    match info.state {
        WorkState::Enqueued | WorkState::Running | WorkState::Blocked => {
            debug!(id = %info.id, state = ?info.state, "weather fetch pending");
            if state.weather.is_loading && state.weather.phase == FlowPhase::FetchingWeather {
                return false;
            }
            state.weather.is_loading = true;
            state.weather.phase = FlowPhase::FetchingWeather;
            state.error = None;
        }
        WorkState::Succeeded if output.get_bool(OUTPUT_SUCCESS) == Some(true) => {
            match output.get_string(WEATHER_JSON) {
                None => {
                    warn!(id = %info.id, "weather fetch succeeded without a payload");
                    fail(state, "Received empty success response.".to_string());
                }
                Some(json) => match serde_json::from_str::<WeatherSnapshot>(json) {
                    Ok(snapshot) => {
                        state.weather.display = Some(WeatherDisplayData::from(snapshot));
                        state.weather.is_loading = false;
                        state.weather.phase = FlowPhase::WeatherDisplayed;
                        state.error = None;
                    }
                    Err(err) => {
                        warn!(id = %info.id, error = %err, "weather payload is unreadable");
                        fail(state, "Failed to parse weather data.".to_string());
                    }
                },
            }
        }
        WorkState::Succeeded => {
            let msg = output.get_string(OUTPUT_ERROR_MESSAGE).unwrap_or("Worker reported failure.");
            fail(state, msg.to_string());
        }
        WorkState::Failed => {
            let msg = output.get_string(OUTPUT_ERROR_MESSAGE).unwrap_or("Unknown error");
            fail(state, msg.to_string());
        }
        WorkState::Cancelled => {
            warn!(id = %info.id, "weather fetch cancelled");
            fail(state, "Weather fetch cancelled.".to_string());
        }
    }
    true
}
