use crate::{
    Config,
    error::{Result, WeatherError},
    model::{LocationCandidate, LocationRef, WeatherSnapshot},
    provider::{accuweather::AccuWeatherProvider, openweather::OpenWeatherProvider},
};
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use serde::de::DeserializeOwned;
use std::{convert::TryFrom, fmt::Debug, sync::Arc};

pub mod accuweather;
pub mod openweather;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderId {
    AccuWeather,
    OpenWeather,
}

impl ProviderId {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderId::AccuWeather => "accuweather",
            ProviderId::OpenWeather => "openweather",
        }
    }

    pub const fn all() -> &'static [ProviderId] {
        &[ProviderId::AccuWeather, ProviderId::OpenWeather]
    }
}

impl std::fmt::Display for ProviderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for ProviderId {
    type Error = anyhow::Error;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let lower = value.to_lowercase();

        match lower.as_str() {
            "accuweather" => Ok(ProviderId::AccuWeather),
            "openweather" => Ok(ProviderId::OpenWeather),
            _ => Err(anyhow::anyhow!(
                "Unknown provider '{value}'. Supported providers: accuweather, openweather."
            )),
        }
    }
}

/// A weather backend able to geocode a place name and report current conditions.
#[async_trait]
pub trait WeatherProvider: Send + Sync + Debug {
    fn id(&self) -> ProviderId;

    /// Candidates in the order the provider returned them.
    async fn search(&self, query: &str) -> Result<Vec<LocationCandidate>>;

    async fn current_conditions(&self, place: &LocationRef) -> Result<WeatherSnapshot>;
}

/// Construct a provider from config and explicit ProviderId.
pub fn provider_from_config(
    id: ProviderId,
    config: &Config,
) -> anyhow::Result<Arc<dyn WeatherProvider>> {
    let api_key = config.provider_api_key(id).ok_or_else(|| {
        anyhow::anyhow!(
            "No API key configured for provider '{id}'.\n\
                 Hint: run `weatherpin configure {id}` and enter your API key."
        )
    })?;
    let base_url = config.provider_base_url(id);
    let country = config.country_code().map(str::to_owned);

    let provider: Arc<dyn WeatherProvider> = match id {
        ProviderId::AccuWeather => {
            let mut provider = AccuWeatherProvider::new(api_key.to_owned()).with_country(country);
            if let Some(url) = base_url {
                provider = provider.with_base_url(url);
            }
            Arc::new(provider)
        }
        ProviderId::OpenWeather => {
            let mut provider = OpenWeatherProvider::new(api_key.to_owned()).with_country(country);
            if let Some(url) = base_url {
                provider = provider.with_base_url(url);
            }
            Arc::new(provider)
        }
    };

    Ok(provider)
}

/// Construct the default provider from config, using `default_provider` field.
pub fn default_provider_from_config(config: &Config) -> anyhow::Result<Arc<dyn WeatherProvider>> {
    let id = config.default_provider_id()?;
    provider_from_config(id, config)
}

/// Reads a response body, mapping non-2xx and empty bodies onto [`WeatherError`].
pub(crate) async fn read_json<T: DeserializeOwned>(
    res: reqwest::Response,
    context: &'static str,
) -> Result<T> {
    let status = res.status();
    let body = res.text().await?;

    if !status.is_success() {
        let reason = status
            .canonical_reason()
            .map_or_else(|| truncate_body(&body), str::to_string);
        return Err(WeatherError::Status { code: status.as_u16(), reason });
    }

    if body.trim().is_empty() {
        return Err(WeatherError::EmptyResponse);
    }

    serde_json::from_str(&body).map_err(|e| WeatherError::parse(context, e))
}

pub(crate) fn normalize_base_url(url: &str) -> String {
    url.trim_end_matches('/').to_string()
}

/// Formats an observation instant in the place's own offset.
pub(crate) fn local_time(ts: DateTime<FixedOffset>) -> String {
    ts.format("%Y-%m-%d %H:%M").to_string()
}

fn truncate_body(body: &str) -> String {
    const MAX: usize = 200;
    if body.chars().count() > MAX {
        format!("{}...", body.chars().take(MAX).collect::<String>())
    } else {
        body.to_string()
    }
}
