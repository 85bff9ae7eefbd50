use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use std::time::Duration;
use weatherwise_weather::{Coordinate, DisplaySource, LoadStatus, PermissionState, WeatherViewState};

use crate::app::App;

/// Top-level CLI struct.
#[derive(Debug, Parser)]
#[command(name = "weatherwise", version, about = "Current and forecast weather for a location")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Location permission to simulate for this session
    #[arg(long, value_enum, global = true, default_value_t = Permission::Authorized)]
    pub permission: Permission,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Show weather for a coordinate (default: last known location)
    Show {
        #[arg(long, requires = "lon", allow_negative_numbers = true)]
        lat: Option<f64>,

        #[arg(long, requires = "lat", allow_negative_numbers = true)]
        lon: Option<f64>,
    },

    /// Search for a place by name
    Search {
        query: String,

        /// Resolve the n-th result (1-based) into a map region
        #[arg(long)]
        select: Option<usize>,
    },

    /// Remove the cached forecast
    ClearCache,

    /// Print the configuration and any validation problems
    Config,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum Permission {
    Authorized,
    Denied,
    Restricted,
    NotDetermined,
}

impl From<Permission> for PermissionState {
    fn from(p: Permission) -> Self {
        match p {
            Permission::Authorized => PermissionState::Authorized,
            Permission::Denied => PermissionState::Denied,
            Permission::Restricted => PermissionState::Restricted,
            Permission::NotDetermined => PermissionState::NotDetermined,
        }
    }
}

impl Cli {
    pub async fn run(self, app: &App) -> Result<()> {
        match self.command.unwrap_or(Command::Show { lat: None, lon: None }) {
            Command::Show { lat, lon } => {
                let fix = lat.zip(lon).map(|(lat, lon)| Coordinate::new(lat, lon));
                if let Some(fix) = fix.filter(|c| !c.is_valid()) {
                    anyhow::bail!("Coordinate out of range: {}", fix);
                }
                show(app, fix).await;
            }
            Command::Search { query, select } => search(app, &query, select).await?,
            Command::ClearCache => {
                if app.clear_cache() {
                    println!("Weather cache cleared");
                } else {
                    anyhow::bail!("Failed to clear the weather cache");
                }
            }
            Command::Config => {
                let config = app.config();
                println!("Config directory: {}", config.config_dir.display());
                println!("Database:         {}", config.storage.database_path().display());
                println!("API endpoint:     {}", config.api.base_url);
                let validation = config.validate();
                for error in &validation.errors {
                    println!("error:   {}", error);
                }
                for warning in &validation.warnings {
                    println!("warning: {}", warning);
                }
            }
        }

        Ok(())
    }
}

async fn show(app: &App, fix: Option<Coordinate>) {
    let region = app.initialize(fix);
    let centre = fix.unwrap_or(region.center);
    match app.place_name(centre).await {
        Some(name) => println!("{} ({})", name, centre),
        None => println!("{}", centre),
    }

    let mut last_source = None;
    let state = app
        .load_weather(|state| {
            let source = state.display.as_ref().map(|d| d.source);
            if source == Some(DisplaySource::Cache) && last_source.is_none() {
                println!("(cached) {}", summary(state));
            }
            last_source = source;
        })
        .await;

    match &state.status {
        LoadStatus::Ready => println!("{}", summary(&state)),
        LoadStatus::Error(e) => {
            eprintln!("{}", state.message.as_deref().unwrap_or(e.user_message()));
            if e.offers_settings_path() {
                eprintln!("Enable location access in system settings, or pass --lat/--lon.");
            }
        }
        LoadStatus::Idle | LoadStatus::Loading => {}
    }
}

fn summary(state: &WeatherViewState) -> String {
    let Some(display) = &state.display else {
        return "No weather data".to_string();
    };
    let record = &display.record;
    let now = &record.currently;
    let condition = now.condition();

    let mut out = format!(
        "{:.1}° (feels {:.1}°) {} [{}], humidity {:.0}%, wind {:.1} gusting {:.1}",
        now.temperature,
        now.apparent_temperature,
        condition,
        condition.symbol_name(),
        now.humidity * 100.0,
        now.wind_speed,
        now.wind_gust,
    );

    if let Some(captured_at) = display.captured_at {
        out.push_str(&format!(", cached {}", captured_at.format("%Y-%m-%d %H:%M UTC")));
    }

    for day in record.daily.data.iter().take(7) {
        let date = day
            .forecast_start
            .and_then(|t| DateTime::<Utc>::from_timestamp(t as i64, 0))
            .map(|d| d.format("%a %d %b").to_string())
            .unwrap_or_else(|| "?".to_string());
        out.push_str(&format!(
            "\n  {}  {:>5.1}° / {:>5.1}°  {}",
            date,
            day.temperature_min.unwrap_or_default(),
            day.temperature_max.unwrap_or_default(),
            day.condition()
        ));
    }

    out
}

async fn search(app: &App, query: &str, select: Option<usize>) -> Result<()> {
    if query.trim().is_empty() {
        anyhow::bail!("Search query is empty");
    }

    let debouncer = app.search();
    let mut rx = debouncer.subscribe();
    debouncer.submit(query);

    let wait = app.debounce() + Duration::from_secs(15);
    let state = tokio::time::timeout(wait, rx.wait_for(|s| s.query == query && !s.searching))
        .await
        .map_err(|_| anyhow::anyhow!("Search timed out"))??
        .clone();

    if let Some(e) = &state.error {
        anyhow::bail!("{}", e);
    }

    for (i, place) in state.results.iter().enumerate() {
        println!("{:>2}. {}  {}", i + 1, place.title, place.subtitle);
    }

    if let Some(n) = select {
        let completion = state
            .results
            .get(n.saturating_sub(1))
            .ok_or_else(|| anyhow::anyhow!("No result number {}", n))?;
        let place = debouncer.select(completion).await?;
        println!(
            "{} at {} (span {:.2}° x {:.2}°)",
            place.name, place.coordinate, place.region.latitude_delta, place.region.longitude_delta
        );
    }

    Ok(())
}
