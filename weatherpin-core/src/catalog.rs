//! Bundled US state and city lists backing the location picker.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Result, WeatherError};

const US_STATES: &str = include_str!("../assets/us_states.json");
const US_STATE_CITIES: &str = include_str!("../assets/us_state_cities.json");

/// Administrative region, e.g. a US state.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Region {
    pub name: String,
    #[serde(rename = "code")]
    pub abbreviation: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct RegionLocalities {
    #[serde(default)]
    pub major_cities: Vec<String>,
    #[serde(default)]
    pub all_cities: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct Catalog {
    regions: Vec<Region>,
    localities: HashMap<String, RegionLocalities>,
}

impl Catalog {
    /// The bundled US catalogue. Falls back to an empty one if the assets are corrupt.
    pub fn us() -> Self {
        Self::from_json(US_STATES, US_STATE_CITIES).unwrap_or_else(|err| {
            warn!(error = %err, "failed to load bundled region catalogue");
            Self::default()
        })
    }

    pub fn from_json(regions_json: &str, localities_json: &str) -> Result<Self> {
        let regions = serde_json::from_str(regions_json)
            .map_err(|e| WeatherError::parse("region list", e))?;
        let localities = serde_json::from_str(localities_json)
            .map_err(|e| WeatherError::parse("locality list", e))?;
        Ok(Self { regions, localities })
    }

    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    pub fn region_by_name(&self, name: &str) -> Option<&Region> {
        let name = name.trim();
        self.regions.iter().find(|r| r.name.eq_ignore_ascii_case(name))
    }

    /// Matches a full name or an abbreviation.
    pub fn find_region(&self, text: &str) -> Option<&Region> {
        let text = text.trim();
        self.region_by_name(text)
            .or_else(|| self.regions.iter().find(|r| r.abbreviation.eq_ignore_ascii_case(text)))
    }

    pub fn major_localities(&self, abbreviation: &str) -> &[String] {
        self.localities.get(abbreviation).map(|l| l.major_cities.as_slice()).unwrap_or_default()
    }

    pub fn all_localities(&self, abbreviation: &str) -> &[String] {
        self.localities.get(abbreviation).map(|l| l.all_cities.as_slice()).unwrap_or_default()
    }

    /// Regions whose name contains `text`, ignoring case. Blank text matches all.
    pub fn filter_regions(&self, text: &str) -> Vec<Region> {
        let needle = text.trim().to_lowercase();
        self.regions
            .iter()
            .filter(|r| needle.is_empty() || r.name.to_lowercase().contains(&needle))
            .cloned()
            .collect()
    }
}

/// Case-insensitive substring filter over locality names.
pub fn filter_localities(localities: &[String], text: &str) -> Vec<String> {
    let needle = text.trim().to_lowercase();
    localities
        .iter()
        .filter(|city| city.to_lowercase().contains(&needle))
        .cloned()
        .collect()
}
