use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use weatherwise_core::{AppError, Config, WeatherError};
use weatherwise_weather::{
    ChannelLocationProvider, Coordinate, CoordinatorSettings, DenialRegistration, LocationProvider,
    MapRegion, NominatimCompleter, PermissionState, SearchDebouncer, WeatherCache,
    WeatherCoordinator, WeatherProvider, WeatherViewState,
};

/// Owns every pipeline component for one session
pub struct App {
    config: Arc<Config>,
    cache: Arc<WeatherCache>,
    location: Arc<ChannelLocationProvider>,
    coordinator: WeatherCoordinator,
    completer: Arc<NominatimCompleter>,
    denial_hint: Mutex<Option<DenialRegistration>>,
}

impl App {
    pub fn new(config: Config, permission: PermissionState) -> Result<Self, AppError> {
        let config = Arc::new(config);

        let db_path = config.storage.database_path();
        let cache = match WeatherCache::open(&db_path) {
            Ok(cache) => cache,
            Err(e) => {
                tracing::warn!(
                    "Cannot open cache at {} ({}); continuing without persistence",
                    db_path.display(),
                    e
                );
                WeatherCache::open_in_memory()?
            }
        };
        let cache = Arc::new(cache);

        let fetcher = Arc::new(WeatherProvider::new(&config.api).map_err(WeatherError::from)?);
        let location = Arc::new(ChannelLocationProvider::new(permission));
        let coordinator = WeatherCoordinator::new(
            fetcher,
            location.clone(),
            cache.clone(),
            CoordinatorSettings::from(&config.location),
        );
        let completer = Arc::new(NominatimCompleter::new(&config.search)?);

        Ok(Self {
            config,
            cache,
            location,
            coordinator,
            completer,
            denial_hint: Mutex::new(None),
        })
    }

    /// Register session hooks and seed the location stream
    pub fn initialize(&self, fix: Option<Coordinate>) -> MapRegion {
        let registration = self.location.on_authorization_denied(Box::new(|state| {
            tracing::warn!("Location access {:?}; enable it in system settings", state);
        }));
        if let Some(previous) = self.denial_hint.lock().replace(registration) {
            self.location.remove_denial_callback(previous);
        }

        let fallback = Coordinate::new(
            self.config.location.default_latitude,
            self.config.location.default_longitude,
        );
        let region = MapRegion::initial(self.cache.load_last_location(), fallback);

        self.location.publish(fix.unwrap_or(region.center));
        tracing::info!("Application initialized; map centred on {}", region.center);
        region
    }

    /// Run one weather load, calling `on_state` for every published snapshot
    pub async fn load_weather(
        &self,
        mut on_state: impl FnMut(&WeatherViewState),
    ) -> WeatherViewState {
        let mut rx = self.coordinator.subscribe();
        let load = self.coordinator.load_weather();
        tokio::pin!(load);

        loop {
            tokio::select! {
                _ = &mut load => break,
                changed = rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    on_state(&rx.borrow_and_update());
                }
            }
        }
        if rx.has_changed().unwrap_or(false) {
            on_state(&rx.borrow_and_update());
        }

        self.coordinator.state()
    }

    pub fn search(&self) -> SearchDebouncer {
        SearchDebouncer::from_config(self.completer.clone(), &self.config.search)
    }

    pub async fn place_name(&self, coordinate: Coordinate) -> Option<String> {
        self.completer.reverse(coordinate).await
    }

    pub fn clear_cache(&self) -> bool {
        self.cache.clear()
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.config.search.debounce_ms)
    }

    pub fn shutdown(&self) {
        tracing::info!("Shutting down application");
        if let Some(registration) = self.denial_hint.lock().take() {
            self.location.remove_denial_callback(registration);
        }
        self.coordinator.shutdown();
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}
