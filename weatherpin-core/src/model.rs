use serde::{Deserialize, Serialize};
use std::fmt;

/// What the user asked for: free text, optionally backed by a dropdown selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaceQuery {
    pub text: String,
    pub selection: Option<PlaceSelection>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaceSelection {
    pub region: String,
    pub locality: Option<String>,
}

impl PlaceQuery {
    pub fn free_text(text: impl Into<String>) -> Self {
        Self { text: text.into(), selection: None }
    }

    /// Builds `"<city>, <state>"`, or just the state when no city is picked.
    pub fn from_selection(region: &str, locality: Option<&str>) -> Self {
        let text = match locality {
            Some(city) if !city.trim().is_empty() => format!("{city}, {region}"),
            _ => region.to_string(),
        };

        Self {
            text,
            selection: Some(PlaceSelection {
                region: region.to_string(),
                locality: locality.map(str::to_string),
            }),
        }
    }

    pub fn normalized(&self) -> String {
        normalize_query(&self.text)
    }
}

/// Cache key for a place name: trimmed, single-spaced, lowercase.
pub fn normalize_query(query: &str) -> String {
    query.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

/// How a provider addresses a place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LocationRef {
    Coordinates { lat: f64, lon: f64 },
    ProviderKey { key: String },
}

impl LocationRef {
    /// Stable identity used to name fetch jobs.
    pub fn identity(&self) -> String {
        match self {
            LocationRef::Coordinates { lat, lon } => format!("{lat},{lon}"),
            LocationRef::ProviderKey { key } => key.clone(),
        }
    }
}

impl fmt::Display for LocationRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LocationRef::Coordinates { lat, lon } => write!(f, "({lat:.4}, {lon:.4})"),
            LocationRef::ProviderKey { key } => write!(f, "key {key}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedLocation {
    /// Normalized query this location was resolved from.
    pub name: String,
    pub display_name: String,
    pub place: LocationRef,
}

/// One search hit from a provider, before it becomes a [`ResolvedLocation`].
#[derive(Debug, Clone, PartialEq)]
pub struct LocationCandidate {
    pub display_name: String,
    pub place: LocationRef,
}

/// Current conditions as reported by a provider, normalized across providers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherSnapshot {
    #[serde(default)]
    pub description: Option<String>,
    pub temperature_f: f64,
    pub temperature_c: f64,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub observed_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bookmark {
    pub id: i64,
    pub region_name: String,
    pub region_abbreviation: String,
    pub locality_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewBookmark {
    pub region_name: String,
    pub region_abbreviation: String,
    pub locality_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TemperatureUnit {
    #[default]
    Celsius,
    Fahrenheit,
}

impl fmt::Display for TemperatureUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TemperatureUnit::Celsius => f.write_str("Celsius"),
            TemperatureUnit::Fahrenheit => f.write_str("Fahrenheit"),
        }
    }
}

pub fn fahrenheit_to_celsius(f: f64) -> f64 {
    (f - 32.0) * 5.0 / 9.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_collapses_case_and_whitespace() {
        assert_eq!(normalize_query("  New   York City,  New York "), "new york city, new york");
    }

    #[test]
    fn selection_query_puts_city_first() {
        let q = PlaceQuery::from_selection("New York", Some("New York City"));
        assert_eq!(q.text, "New York City, New York");

        let q = PlaceQuery::from_selection("Ohio", None);
        assert_eq!(q.text, "Ohio");
    }

    #[test]
    fn location_identity() {
        let c = LocationRef::Coordinates { lat: 40.7128, lon: -74.006 };
        assert_eq!(c.identity(), "40.7128,-74.006");

        let k = LocationRef::ProviderKey { key: "349727".into() };
        assert_eq!(k.identity(), "349727");
    }

    #[test]
    fn freezing_point() {
        assert!((fahrenheit_to_celsius(32.0)).abs() < f64::EPSILON);
        assert!((fahrenheit_to_celsius(212.0) - 100.0).abs() < 1e-9);
    }
}
