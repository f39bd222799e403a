use anyhow::{Context, Result, anyhow, bail};
use clap::{Args, Parser, Subcommand, ValueEnum};
use inquire::{Confirm, Password, PasswordDisplayMode};
use tracing::debug;
use weatherpin_core::{
    App, BookmarkNotice, Config, ProviderId, TemperatureUnit, WeatherViewModel, app::open_store,
    catalog::Catalog, jobs::NetworkMonitor, model::NewBookmark, store::Store,
};

use crate::output;

/// Top-level CLI struct.
#[derive(Debug, Parser)]
#[command(name = "weatherpin", version, about = "Current weather for US places, with bookmarks")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Configure credentials for a specific provider.
    Configure {
        /// Provider short name, e.g. "openweather" or "accuweather".
        provider: String,
    },

    /// Show current weather for a place name or a state/city selection.
    Show {
        /// Free-text place name, e.g. "Portland, Maine".
        query: Option<String>,

        #[command(flatten)]
        place: PlaceArgs,

        #[arg(long, value_enum, default_value_t = UnitArg::Celsius)]
        unit: UnitArg,
    },

    /// List US states.
    States,

    /// List cities for a state (name or abbreviation).
    Cities {
        state: String,

        /// Every known city instead of the major ones.
        #[arg(long)]
        all: bool,
    },

    /// Manage bookmarked places.
    #[command(subcommand)]
    Bookmark(BookmarkCommand),
}

#[derive(Debug, Subcommand)]
pub enum BookmarkCommand {
    /// Bookmark a state/city pair.
    Add {
        #[arg(long)]
        state: String,
        #[arg(long)]
        city: String,
    },

    List,

    Remove { id: i64 },

    /// Show current weather for a bookmark.
    Show {
        id: i64,

        #[arg(long, value_enum, default_value_t = UnitArg::Celsius)]
        unit: UnitArg,
    },
}

#[derive(Debug, Args)]
pub struct PlaceArgs {
    /// State name or abbreviation.
    #[arg(long)]
    state: Option<String>,

    /// City within --state.
    #[arg(long, requires = "state")]
    city: Option<String>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum UnitArg {
    Celsius,
    Fahrenheit,
}

impl From<UnitArg> for TemperatureUnit {
    fn from(unit: UnitArg) -> Self {
        match unit {
            UnitArg::Celsius => TemperatureUnit::Celsius,
            UnitArg::Fahrenheit => TemperatureUnit::Fahrenheit,
        }
    }
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        match self.command {
            Command::Configure { provider } => configure(&provider),
            Command::Show { query, place, unit } => show(query, place, unit).await,
            Command::States => {
                output::print_regions(Catalog::us().regions());
                Ok(())
            }
            Command::Cities { state, all } => {
                let catalog = Catalog::us();
                let region = catalog
                    .find_region(&state)
                    .ok_or_else(|| anyhow!("Unknown state '{state}'"))?;
                let cities = if all {
                    catalog.all_localities(&region.abbreviation)
                } else {
                    catalog.major_localities(&region.abbreviation)
                };
                output::print_localities(region, cities);
                Ok(())
            }
            Command::Bookmark(cmd) => bookmark(cmd).await,
        }
    }
}

fn configure(provider: &str) -> Result<()> {
    let id = ProviderId::try_from(provider)?;
    let mut config = Config::load()?;

    let api_key = Password::new(&format!("{id} API key:"))
        .with_display_mode(PasswordDisplayMode::Masked)
        .without_confirmation()
        .prompt()
        .context("Failed to read API key")?;
    if api_key.trim().is_empty() {
        bail!("API key must not be empty");
    }

    config.upsert_provider_api_key(id, api_key.trim().to_string());

    let current = config.default_provider_id().ok();
    if current != Some(id) {
        let make_default = Confirm::new(&format!("Make {id} the default provider?"))
            .with_default(false)
            .prompt()
            .context("Failed to read answer")?;
        if make_default {
            config.set_default_provider(id);
        }
    }

    config.save()?;
    println!("Saved configuration to {}", Config::config_file_path()?.display());
    Ok(())
}

fn open_app() -> Result<App> {
    let config = Config::load()?;
    debug!(provider = ?config.default_provider, "loaded configuration");
    App::from_config(&config, NetworkMonitor::online())
}

async fn show(query: Option<String>, place: PlaceArgs, unit: UnitArg) -> Result<()> {
    let app = open_app()?;
    let vm = &app.view_model;
    vm.change_unit(unit.into());

    let label = match (place.state, query) {
        (Some(state), _) => {
            select(vm, &app, &state, place.city.as_deref())?;
            vm.search_location().await;
            selection_label(vm)
        }
        (None, Some(query)) => {
            vm.search_free_text(&query).await;
            query
        }
        (None, None) => bail!("Give a place name, or --state (and optionally --city)"),
    };

    output::print_weather(&label, &vm.state())
}

fn select(vm: &WeatherViewModel, app: &App, state: &str, city: Option<&str>) -> Result<()> {
    let region = app
        .repository
        .catalog()
        .find_region(state)
        .ok_or_else(|| anyhow!("Unknown state '{state}'"))?;
    vm.select_region(&region.name);
    if let Some(city) = city {
        vm.select_locality(city);
    }
    Ok(())
}

fn selection_label(vm: &WeatherViewModel) -> String {
    let state = vm.state();
    let region = state.location.selected_region.map(|r| r.name).unwrap_or_default();
    match state.location.selected_locality {
        Some(city) => format!("{city}, {region}"),
        None => region,
    }
}

async fn bookmark(cmd: BookmarkCommand) -> Result<()> {
    match cmd {
        BookmarkCommand::List => {
            let path = Config::load()?.database_file_path()?;
            if !path.exists() {
                output::print_bookmarks(&[]);
                return Ok(());
            }
            let store = Store::open(&path).context("Failed to open bookmark database")?;
            output::print_bookmarks(&store.bookmarks()?);
        }
        BookmarkCommand::Add { state, city } => {
            let catalog = Catalog::us();
            let region = catalog
                .find_region(&state)
                .ok_or_else(|| anyhow!("Unknown state '{state}'"))?;
            let city = city.trim();
            if city.is_empty() {
                bail!("City must not be empty");
            }

            let store = open_store(&Config::load()?)?;
            let bookmark = NewBookmark {
                region_name: region.name.clone(),
                region_abbreviation: region.abbreviation.clone(),
                locality_name: city.to_string(),
            };
            let notice = match store.insert_bookmark(&bookmark)? {
                Some(saved) => {
                    debug!(id = saved.id, "bookmark added");
                    BookmarkNotice::added()
                }
                None => BookmarkNotice::duplicate(),
            };
            output::print_notice(&notice);
        }
        BookmarkCommand::Remove { id } => {
            let store = open_store(&Config::load()?)?;
            if !store.delete_bookmark(id)? {
                bail!("No bookmark with id {id}");
            }
            output::print_notice(&BookmarkNotice::removed());
        }
        BookmarkCommand::Show { id, unit } => {
            let app = open_app()?;
            let bookmark = app
                .repository
                .bookmark(id)?
                .ok_or_else(|| anyhow!("No bookmark with id {id}"))?;

            let vm = &app.view_model;
            vm.change_unit(unit.into());
            vm.load_bookmark(&bookmark);
            vm.search_location().await;

            let label = format!("{}, {}", bookmark.locality_name, bookmark.region_name);
            output::print_weather(&label, &vm.state())?;
        }
    }

    Ok(())
}
