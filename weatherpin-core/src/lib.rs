//! Core library for the `weatherpin` CLI.
//!
//! This crate defines:
//! - Configuration & credentials handling
//! - Weather providers (search + current conditions)
//! - A background job scheduler with observable status
//! - Location caching and bookmarks on SQLite
//! - The view model that folds everything into one UI state
//!
//! It is used by `weatherpin-cli`, but can also drive any other front end.

pub mod app;
pub mod catalog;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod jobs;
pub mod model;
pub mod provider;
pub mod repository;
pub mod resolver;
pub mod state;
pub mod store;
pub mod viewmodel;

pub use app::App;
pub use config::{Config, ProviderConfig};
pub use error::{Result, WeatherError};
pub use model::{Bookmark, LocationRef, ResolvedLocation, TemperatureUnit, WeatherSnapshot};
pub use provider::{ProviderId, WeatherProvider};
pub use state::{BookmarkNotice, FlowPhase, LocationKind, WeatherDisplayData, WeatherUiState};
pub use viewmodel::WeatherViewModel;
