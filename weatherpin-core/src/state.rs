//! UI state published by [`crate::viewmodel::WeatherViewModel`].

use serde::Serialize;

use crate::{
    catalog::Region,
    model::{Bookmark, TemperatureUnit, WeatherSnapshot},
};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WeatherUiState {
    pub location: LocationSelectionState,
    pub weather: WeatherDataState,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LocationSelectionState {
    pub is_loading_regions: bool,
    pub available_regions: Vec<Region>,
    pub filtered_regions: Vec<Region>,
    pub selected_region: Option<Region>,
    pub region_query: String,

    pub is_loading_localities: bool,
    pub available_localities: Vec<String>,
    pub filtered_localities: Vec<String>,
    pub selected_locality: Option<String>,
    pub locality_query: String,

    pub bookmarks: Vec<Bookmark>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WeatherDataState {
    pub is_loading: bool,
    pub display: Option<WeatherDisplayData>,
    pub unit: TemperatureUnit,
    pub phase: FlowPhase,
}

/// Where the resolve/fetch flow currently stands.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowPhase {
    #[default]
    Idle,
    ResolvingLocation,
    LocationResolved,
    FetchingWeather,
    WeatherDisplayed,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeatherDisplayData {
    pub temperature_fahrenheit: String,
    pub temperature_celsius: String,
    pub description: String,
    pub icon: Option<String>,
    pub observed_at: String,
}

impl WeatherDisplayData {
    pub fn temperature(&self, unit: TemperatureUnit) -> &str {
        match unit {
            TemperatureUnit::Celsius => &self.temperature_celsius,
            TemperatureUnit::Fahrenheit => &self.temperature_fahrenheit,
        }
    }
}

impl From<WeatherSnapshot> for WeatherDisplayData {
    fn from(snapshot: WeatherSnapshot) -> Self {
        Self {
            temperature_fahrenheit: format!("{:?}°F", snapshot.temperature_f),
            temperature_celsius: format!("{:.2}°C", snapshot.temperature_c),
            description: snapshot.description.unwrap_or_else(|| "No description".to_string()),
            icon: snapshot.icon,
            observed_at: snapshot.observed_at.unwrap_or_else(|| "N/A".to_string()),
        }
    }
}

/// Which dropdown an intent targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocationKind {
    Region,
    Locality,
}

/// One-shot bookmark feedback. Not replayed to late subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BookmarkNotice {
    Success(String),
    Error(String),
    Deleted(String),
}

impl BookmarkNotice {
    pub fn added() -> Self {
        BookmarkNotice::Success("Bookmark successfully added!".to_string())
    }

    pub fn duplicate() -> Self {
        BookmarkNotice::Error("Cannot save duplicate Bookmark!".to_string())
    }

    pub fn removed() -> Self {
        BookmarkNotice::Deleted("Bookmark removed.".to_string())
    }

    pub fn message(&self) -> &str {
        match self {
            BookmarkNotice::Success(msg) | BookmarkNotice::Error(msg) | BookmarkNotice::Deleted(msg) => msg,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_formats_both_units() {
        let display = WeatherDisplayData::from(WeatherSnapshot {
            description: Some("Sunny".into()),
            temperature_f: 72.5,
            temperature_c: 22.5,
            icon: None,
            observed_at: None,
        });

        assert_eq!(display.temperature_fahrenheit, "72.5°F");
        assert_eq!(display.temperature_celsius, "22.50°C");
        assert_eq!(display.temperature(TemperatureUnit::Celsius), "22.50°C");
        assert_eq!(display.observed_at, "N/A");
    }

    #[test]
    fn fahrenheit_is_not_rounded() {
        let display = WeatherDisplayData::from(WeatherSnapshot {
            description: None,
            temperature_f: 72.55,
            temperature_c: 22.527,
            icon: None,
            observed_at: None,
        });
        assert_eq!(display.temperature_fahrenheit, "72.55°F");
        assert_eq!(display.temperature_celsius, "22.53°C");
    }

    #[test]
    fn missing_description_gets_placeholder() {
        let display = WeatherDisplayData::from(WeatherSnapshot {
            description: None,
            temperature_f: 0.0,
            temperature_c: -17.78,
            icon: Some("https://openweathermap.org/img/wn/01d@2x.png".into()),
            observed_at: Some("2025-01-01 08:00".into()),
        });
        assert_eq!(display.description, "No description");
        assert_eq!(display.temperature_celsius, "-17.78°C");
    }

    #[test]
    fn default_state_is_idle_and_empty() {
        let state = WeatherUiState::default();
        assert_eq!(state.weather.phase, FlowPhase::Idle);
        assert_eq!(state.weather.unit, TemperatureUnit::Celsius);
        assert!(state.location.selected_region.is_none());
        assert!(state.error.is_none());
    }
}
