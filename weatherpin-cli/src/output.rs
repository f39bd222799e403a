//! Plain-text rendering of core state.

use anyhow::{Result, bail};
use weatherpin_core::{
    Bookmark, BookmarkNotice, TemperatureUnit, WeatherUiState, catalog::Region,
};

pub fn print_weather(label: &str, state: &WeatherUiState) -> Result<()> {
    if let Some(error) = &state.error {
        bail!("{error}");
    }
    let Some(display) = &state.weather.display else {
        bail!("No weather data for {label}");
    };

    let unit = state.weather.unit;
    let other = match unit {
        TemperatureUnit::Celsius => TemperatureUnit::Fahrenheit,
        TemperatureUnit::Fahrenheit => TemperatureUnit::Celsius,
    };

    println!("{label}");
    println!("  Temperature: {} ({})", display.temperature(unit), display.temperature(other));
    println!("  Conditions:  {}", display.description);
    println!("  Observed:    {}", display.observed_at);
    if let Some(icon) = &display.icon {
        println!("  Icon:        {icon}");
    }
    Ok(())
}

pub fn print_regions(regions: &[Region]) {
    for region in regions {
        println!("{:<4}{}", region.abbreviation, region.name);
    }
}

pub fn print_localities(region: &Region, localities: &[String]) {
    println!("{} ({}):", region.name, region.abbreviation);
    for city in localities {
        println!("  {city}");
    }
}

pub fn print_bookmarks(bookmarks: &[Bookmark]) {
    if bookmarks.is_empty() {
        println!("No bookmarks yet. Add one with `weatherpin bookmark add --state <S> --city <C>`.");
        return;
    }
    for b in bookmarks {
        println!("{:>4}  {}, {}", b.id, b.locality_name, b.region_abbreviation);
    }
}

pub fn print_notice(notice: &BookmarkNotice) {
    match notice {
        BookmarkNotice::Error(_) => eprintln!("{}", notice.message()),
        BookmarkNotice::Success(_) | BookmarkNotice::Deleted(_) => println!("{}", notice.message()),
    }
}
