use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use crate::{
    error::{Result, WeatherError},
    model::{LocationCandidate, LocationRef, WeatherSnapshot, fahrenheit_to_celsius},
    provider::{ProviderId, local_time, normalize_base_url, read_json},
};

use super::WeatherProvider;

pub const DEFAULT_BASE_URL: &str = "https://api.openweathermap.org";

const SEARCH_LIMIT: &str = "5";

/// Coordinate-based provider: geocodes with `/geo/1.0/direct`, reads
/// conditions from `/data/2.5/weather` in imperial units.
#[derive(Debug, Clone)]
pub struct OpenWeatherProvider {
    api_key: String,
    base_url: String,
    country: Option<String>,
    http: Client,
}

impl OpenWeatherProvider {
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

    /// Country code appended to search queries, e.g. `US`.
    pub fn with_country(mut self, country: Option<String>) -> Self {
        self.country = country;
        self
    }

    fn search_text(&self, query: &str) -> String {
        match &self.country {
            Some(code) => format!("{query},{code}"),
            None => query.to_string(),
        }
    }

    async fn fetch_current(&self, params: &[(&str, String)]) -> Result<WeatherSnapshot> {
        let url = format!("{}/data/2.5/weather", self.base_url);

        let res = self
            .http
            .get(url)
            .query(params)
            .query(&[("appid", self.api_key.as_str()), ("units", "imperial")])
            .send()
            .await?;

        let parsed: OwCurrentResponse = read_json(res, "OpenWeather current conditions").await?;
        debug!(location = ?parsed.name, "OpenWeather current conditions received");

        let weather = parsed.weather.into_iter().next();
        let icon = weather
            .as_ref()
            .and_then(|w| w.icon.as_deref())
            .filter(|icon| !icon.trim().is_empty())
            .map(|icon| format!("https://openweathermap.org/img/wn/{icon}@2x.png"));

        let observed_at = parsed.dt.and_then(|dt| observed_local(dt, parsed.timezone.unwrap_or(0)));

        Ok(WeatherSnapshot {
            description: weather.and_then(|w| w.description),
            temperature_f: parsed.main.temp,
            temperature_c: fahrenheit_to_celsius(parsed.main.temp),
            icon,
            observed_at,
        })
    }
}

#[derive(Debug, Deserialize)]
struct OwGeocode {
    name: String,
    lat: f64,
    lon: f64,
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    country: Option<String>,
}

impl OwGeocode {
    fn display_name(&self) -> String {
        match self.state.as_ref().or(self.country.as_ref()) {
            Some(area) => format!("{}, {}", self.name, area),
            None => self.name.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct OwMain {
    temp: f64,
}

#[derive(Debug, Deserialize)]
struct OwWeather {
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    icon: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OwCurrentResponse {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    dt: Option<i64>,
    /// Shift in seconds from UTC.
    #[serde(default)]
    timezone: Option<i32>,
    main: OwMain,
    #[serde(default)]
    weather: Vec<OwWeather>,
}

#[async_trait]
impl WeatherProvider for OpenWeatherProvider {
    fn id(&self) -> ProviderId {
        ProviderId::OpenWeather
    }

    async fn search(&self, query: &str) -> Result<Vec<LocationCandidate>> {
        let url = format!("{}/geo/1.0/direct", self.base_url);
        let q = self.search_text(query);

        let res = self
            .http
            .get(url)
            .query(&[("q", q.as_str()), ("limit", SEARCH_LIMIT), ("appid", self.api_key.as_str())])
            .send()
            .await?;

        let rows: Vec<OwGeocode> = read_json(res, "OpenWeather geocoding").await?;
        debug!(query = %q, rows = rows.len(), "OpenWeather geocoding answered");

        Ok(rows
            .into_iter()
            .map(|row| LocationCandidate {
                display_name: row.display_name(),
                place: LocationRef::Coordinates { lat: row.lat, lon: row.lon },
            })
            .collect())
    }

    async fn current_conditions(&self, place: &LocationRef) -> Result<WeatherSnapshot> {
        match place {
            LocationRef::Coordinates { lat, lon } => {
                self.fetch_current(&[("lat", lat.to_string()), ("lon", lon.to_string())]).await
            }
            // OpenWeather city ids double as provider keys.
            LocationRef::ProviderKey { key } => {
                if key.trim().is_empty() {
                    return Err(WeatherError::EmptyResponse);
                }
                self.fetch_current(&[("id", key.clone())]).await
            }
        }
    }
}

fn observed_local(dt: i64, offset_secs: i32) -> Option<String> {
    let offset = FixedOffset::east_opt(offset_secs)?;
    let utc = DateTime::from_timestamp(dt, 0)?;
    Some(local_time(utc.with_timezone(&offset)))
}
