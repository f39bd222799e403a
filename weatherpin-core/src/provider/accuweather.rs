use async_trait::async_trait;
use chrono::DateTime;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use crate::{
    error::{Result, WeatherError},
    model::{LocationCandidate, LocationRef, WeatherSnapshot, fahrenheit_to_celsius},
    provider::{ProviderId, local_time, normalize_base_url, read_json},
};

use super::WeatherProvider;

pub const DEFAULT_BASE_URL: &str = "https://dataservice.accuweather.com";

/// Key-based provider. Places resolve to AccuWeather location keys;
/// coordinates are turned into a key via geoposition search first.
#[derive(Debug, Clone)]
pub struct AccuWeatherProvider {
    api_key: String,
    base_url: String,
    country: Option<String>,
    http: Client,
}

impl AccuWeatherProvider {
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            base_url: DEFAULT_BASE_URL.to_string(),
            country: None,
            http: Client::new(),
        }
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = normalize_base_url(base_url);
        self
    }

    pub fn with_country(mut self, country: Option<String>) -> Self {
        self.country = country;
        self
    }

    fn search_text(&self, query: &str) -> String {
        match &self.country {
            Some(code) => format!("{query}, {code}"),
            None => query.to_string(),
        }
    }

    async fn key_for_position(&self, lat: f64, lon: f64) -> Result<String> {
        let url = format!("{}/locations/v1/cities/geoposition/search", self.base_url);

        let res = self
            .http
            .get(url)
            .query(&[("q", format!("{lat},{lon}")), ("apikey", self.api_key.clone())])
            .send()
            .await?;

        let location: AwLocation = read_json(res, "AccuWeather geoposition").await?;
        location.key.filter(|key| !key.is_empty()).ok_or(WeatherError::EmptyResponse)
    }

    async fn fetch_conditions(&self, key: &str) -> Result<WeatherSnapshot> {
        let url = format!("{}/currentconditions/v1/{key}", self.base_url);

        let res = self
            .http
            .get(url)
            .query(&[("apikey", self.api_key.as_str()), ("details", "true")])
            .send()
            .await?;

        let rows: Vec<AwCondition> = read_json(res, "AccuWeather current conditions").await?;
        let current = rows.into_iter().next().ok_or(WeatherError::EmptyResponse)?;
        debug!(key, text = ?current.weather_text, "AccuWeather current conditions received");

        current.into_snapshot()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AwArea {
    #[serde(rename = "ID", default)]
    id: Option<String>,
    #[serde(default)]
    localized_name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AwLocation {
    #[serde(default)]
    key: Option<String>,
    #[serde(default)]
    localized_name: Option<String>,
    #[serde(default)]
    english_name: Option<String>,
    #[serde(default)]
    administrative_area: Option<AwArea>,
}

impl AwLocation {
    fn display_name(&self) -> String {
        let name = self
            .localized_name
            .as_deref()
            .or(self.english_name.as_deref())
            .unwrap_or("Unknown");
        let area = self
            .administrative_area
            .as_ref()
            .and_then(|a| a.id.as_deref().or(a.localized_name.as_deref()));

        match area {
            Some(area) => format!("{name}, {area}"),
            None => name.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AwValue {
    #[serde(default)]
    value: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AwTemperature {
    #[serde(default)]
    metric: Option<AwValue>,
    #[serde(default)]
    imperial: Option<AwValue>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AwCondition {
    #[serde(default)]
    local_observation_date_time: Option<String>,
    #[serde(default)]
    weather_text: Option<String>,
    #[serde(default)]
    weather_icon: Option<u32>,
    #[serde(default)]
    temperature: Option<AwTemperature>,
}

impl AwCondition {
    fn into_snapshot(self) -> Result<WeatherSnapshot> {
        let temperature = self.temperature.as_ref();
        let metric = temperature.and_then(|t| t.metric.as_ref()).and_then(|v| v.value);
        let imperial = temperature.and_then(|t| t.imperial.as_ref()).and_then(|v| v.value);

        let (temperature_f, temperature_c) = match (imperial, metric) {
            (Some(f), Some(c)) => (f, c),
            (Some(f), None) => (f, fahrenheit_to_celsius(f)),
            (None, Some(c)) => (c * 9.0 / 5.0 + 32.0, c),
            (None, None) => return Err(WeatherError::EmptyResponse),
        };

        let observed_at = self.local_observation_date_time.map(|raw| {
            DateTime::parse_from_rfc3339(&raw).map(local_time).unwrap_or(raw)
        });

        Ok(WeatherSnapshot {
            description: self.weather_text,
            temperature_f,
            temperature_c,
            icon: self.weather_icon.map(icon_url),
            observed_at,
        })
    }
}

fn icon_url(icon: u32) -> String {
    format!("https://developer.accuweather.com/sites/default/files/{icon:02}-s.png")
}

#[async_trait]
impl WeatherProvider for AccuWeatherProvider {
    fn id(&self) -> ProviderId {
        ProviderId::AccuWeather
    }

    async fn search(&self, query: &str) -> Result<Vec<LocationCandidate>> {
        let url = format!("{}/locations/v1/search", self.base_url);
        let q = self.search_text(query);

        let res = self
            .http
            .get(url)
            .query(&[("q", q.as_str()), ("apikey", self.api_key.as_str())])
            .send()
            .await?;

        let rows: Vec<AwLocation> = read_json(res, "AccuWeather location search").await?;
        debug!(query = %q, rows = rows.len(), "AccuWeather search answered");

        // Rows without a key can't be used for a conditions lookup.
        Ok(rows
            .into_iter()
            .filter_map(|row| {
                let display_name = row.display_name();
                let key = row.key.filter(|key| !key.is_empty())?;
                Some(LocationCandidate { display_name, place: LocationRef::ProviderKey { key } })
            })
            .collect())
    }

    async fn current_conditions(&self, place: &LocationRef) -> Result<WeatherSnapshot> {
        match place {
            LocationRef::ProviderKey { key } => self.fetch_conditions(key).await,
            LocationRef::Coordinates { lat, lon } => {
                let key = self.key_for_position(*lat, *lon).await?;
                self.fetch_conditions(&key).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn condition_with_both_units() {
        let json = r#"[{
            "LocalObservationDateTime": "2025-07-24T09:15:00-04:00",
            "EpochTime": 1753362900,
            "WeatherText": "Sunny",
            "WeatherIcon": 1,
            "HasPrecipitation": false,
            "IsDayTime": true,
            "Temperature": {
                "Metric": {"Value": 25.6, "Unit": "C", "UnitType": 17},
                "Imperial": {"Value": 78.0, "Unit": "F", "UnitType": 18}
            },
            "Link": "http://www.accuweather.com/en/us/new-york-ny/10007/current-weather/349727"
        }]"#;

        let rows: Vec<AwCondition> = serde_json::from_str(json).unwrap();
        let snapshot = rows.into_iter().next().unwrap().into_snapshot().unwrap();

        assert_eq!(snapshot.description.as_deref(), Some("Sunny"));
        assert_eq!(snapshot.temperature_f, 78.0);
        assert_eq!(snapshot.temperature_c, 25.6);
        assert_eq!(snapshot.observed_at.as_deref(), Some("2025-07-24 09:15"));
        assert_eq!(
            snapshot.icon.as_deref(),
            Some("https://developer.accuweather.com/sites/default/files/01-s.png")
        );
    }

    #[test]
    fn condition_without_temperature_is_empty() {
        let row: AwCondition = serde_json::from_str(r#"{"WeatherText": "Cloudy"}"#).unwrap();
        assert!(matches!(row.into_snapshot(), Err(WeatherError::EmptyResponse)));
    }

    #[test]
    fn location_display_uses_admin_area_code() {
        let json = r#"{
            "Key": "349727",
            "LocalizedName": "New York",
            "EnglishName": "New York",
            "AdministrativeArea": {"ID": "NY", "LocalizedName": "New York", "Level": 1}
        }"#;
        let location: AwLocation = serde_json::from_str(json).unwrap();
        assert_eq!(location.display_name(), "New York, NY");
    }
}
