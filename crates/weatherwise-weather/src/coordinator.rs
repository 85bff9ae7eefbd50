//! Weather acquisition pipeline: cache, permission, location fix, fetch, publish, persist.
//!
//! All view state goes through one `watch` channel. Each `load_weather` call gets a
//! generation number and a cancellation token; only the newest generation may publish,
//! so the last call wins regardless of which fetch finishes first.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use weatherwise_core::{LocationConfig, WeatherError};

use crate::cache::WeatherCache;
use crate::location::{first_fix, DenialRegistration, LocationProvider};
use crate::provider::WeatherFetcher;
use crate::types::{PermissionState, WeatherRecord};

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum LoadStatus {
    #[default]
    Idle,
    Loading,
    Ready,
    Error(WeatherError),
}

/// Where the displayed record came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplaySource {
    Cache,
    Network,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DisplayedWeather {
    pub record: WeatherRecord,
    pub source: DisplaySource,
    /// When a cached record was stored; `None` for fresh network data
    pub captured_at: Option<DateTime<Utc>>,
}

/// Snapshot published to the presentation layer
#[derive(Debug, Clone, PartialEq, Default)]
pub struct WeatherViewState {
    pub status: LoadStatus,
    pub display: Option<DisplayedWeather>,
    /// User-facing message for the current error, if any
    pub message: Option<String>,
}

impl WeatherViewState {
    pub fn is_loading(&self) -> bool {
        self.status == LoadStatus::Loading
    }

    pub fn error(&self) -> Option<&WeatherError> {
        match &self.status {
            LoadStatus::Error(e) => Some(e),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    /// Upper bound on waiting for the first location fix
    pub fix_timeout: Duration,
}

impl From<&LocationConfig> for CoordinatorSettings {
    fn from(config: &LocationConfig) -> Self {
        Self {
            fix_timeout: Duration::from_secs(config.fix_timeout_secs),
        }
    }
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self::from(&LocationConfig::default())
    }
}

struct LoadSlot {
    generation: u64,
    token: CancellationToken,
}

struct Inner {
    fetcher: Arc<dyn WeatherFetcher>,
    location: Arc<dyn LocationProvider>,
    cache: Arc<WeatherCache>,
    settings: CoordinatorSettings,
    state: watch::Sender<WeatherViewState>,
    slot: Mutex<LoadSlot>,
    root: CancellationToken,
}

/// Orchestrates weather loading and publishes [`WeatherViewState`] snapshots.
///
/// Dropping the coordinator (or calling [`shutdown`](Self::shutdown)) cancels any load in
/// flight; nothing is published afterwards.
pub struct WeatherCoordinator {
    inner: Arc<Inner>,
    denial: DenialRegistration,
}

impl WeatherCoordinator {
    pub fn new(
        fetcher: Arc<dyn WeatherFetcher>,
        location: Arc<dyn LocationProvider>,
        cache: Arc<WeatherCache>,
        settings: CoordinatorSettings,
    ) -> Self {
        let (state, _) = watch::channel(WeatherViewState::default());
        let root = CancellationToken::new();
        let inner = Arc::new(Inner {
            fetcher,
            location,
            cache,
            settings,
            state,
            slot: Mutex::new(LoadSlot {
                generation: 0,
                token: root.child_token(),
            }),
            root,
        });

        let weak: Weak<Inner> = Arc::downgrade(&inner);
        let denial = inner
            .location
            .on_authorization_denied(Box::new(move |state| {
                if let Some(inner) = weak.upgrade() {
                    inner.permission_revoked(state);
                }
            }));

        Self { inner, denial }
    }

    pub fn subscribe(&self) -> watch::Receiver<WeatherViewState> {
        self.inner.state.subscribe()
    }

    /// Current snapshot
    pub fn state(&self) -> WeatherViewState {
        self.inner.state.borrow().clone()
    }

    /// Run one load to completion on the calling task.
    ///
    /// Returns early, without publishing, if a newer load starts or the coordinator is
    /// shut down.
    pub async fn load_weather(&self) {
        Inner::load(self.inner.clone()).await;
    }

    /// Start a load in the background
    pub fn spawn_load(&self) -> JoinHandle<()> {
        tokio::spawn(Inner::load(self.inner.clone()))
    }

    pub fn shutdown(&self) {
        {
            let _slot = self.inner.slot.lock();
            if self.inner.root.is_cancelled() {
                return;
            }
            tracing::debug!("Weather coordinator shutting down");
            self.inner.root.cancel();
        }
        self.inner.location.remove_denial_callback(self.denial);
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.root.is_cancelled()
    }
}

impl Drop for WeatherCoordinator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Inner {
    async fn load(self: Arc<Self>) {
        let Some((generation, token)) = self.begin() else {
            return;
        };
        tracing::info!(generation, "Loading weather");

        // Stale-first: show whatever is cached while the network request runs
        let cache = self.cache.clone();
        let cached = match cancellable(&token, tokio::task::spawn_blocking(move || cache.load())).await
        {
            None => return,
            Some(Ok(cached)) => cached,
            Some(Err(e)) => {
                tracing::warn!("Cache load task failed: {}", e);
                None
            }
        };
        if let Some(cached) = cached {
            tracing::debug!(generation, captured_at = %cached.captured_at, "Showing cached weather");
            self.publish(generation, |s| {
                s.display = Some(DisplayedWeather {
                    record: cached.record,
                    source: DisplaySource::Cache,
                    captured_at: Some(cached.captured_at),
                });
            });
        }

        let mut permission = self.location.permission_state();
        if permission == PermissionState::NotDetermined {
            tracing::info!("Requesting location permission");
            permission = match cancellable(&token, self.location.request_permission()).await {
                Some(state) => state,
                None => return,
            };
        }
        if !permission.is_authorized() {
            tracing::info!(generation, ?permission, "Location not authorized");
            self.fail(generation, WeatherError::LocationUnavailable);
            return;
        }

        let mut fixes = self.location.subscribe();
        self.location.request_location();
        let coordinate =
            match cancellable(&token, first_fix(&mut fixes, self.settings.fix_timeout)).await {
                None => return,
                Some(Ok(coordinate)) => coordinate,
                Some(Err(e)) => {
                    tracing::warn!(generation, "No location fix: {}", e);
                    self.fail(generation, e.into());
                    return;
                }
            };

        let cache = self.cache.clone();
        tokio::task::spawn_blocking(move || cache.save_last_location(coordinate));

        let fetched = match cancellable(&token, self.fetcher.fetch(Some(coordinate))).await {
            None => {
                tracing::debug!(generation, "Fetch abandoned");
                return;
            }
            Some(fetched) => fetched,
        };

        match fetched {
            Ok(record) => {
                let to_save = record.clone();
                let published = self.publish(generation, |s| {
                    s.status = LoadStatus::Ready;
                    s.message = None;
                    s.display = Some(DisplayedWeather {
                        record,
                        source: DisplaySource::Network,
                        captured_at: None,
                    });
                });
                if !published {
                    return;
                }
                tracing::info!(generation, "Weather ready");

                let cache = self.cache.clone();
                match tokio::task::spawn_blocking(move || cache.save(&to_save)).await {
                    Ok(true) => {}
                    Ok(false) => tracing::debug!("Weather shown but not cached"),
                    Err(e) => tracing::warn!("Cache save task failed: {}", e),
                }
            }
            Err(e) => {
                tracing::warn!(generation, "Weather fetch failed: {}", e);
                self.fail(generation, e.into());
            }
        }
    }

    /// Start a new generation, cancelling the previous one, and publish `Loading`
    fn begin(&self) -> Option<(u64, CancellationToken)> {
        let mut slot = self.slot.lock();
        if self.root.is_cancelled() {
            return None;
        }

        slot.token.cancel();
        slot.generation += 1;
        slot.token = self.root.child_token();

        self.state.send_modify(|s| {
            s.status = LoadStatus::Loading;
            s.message = None;
        });

        Some((slot.generation, slot.token.clone()))
    }

    /// Apply `update` if `generation` is still current. Returns whether it was applied.
    fn publish(&self, generation: u64, update: impl FnOnce(&mut WeatherViewState)) -> bool {
        let slot = self.slot.lock();
        if self.root.is_cancelled() || slot.generation != generation {
            tracing::debug!(generation, current = slot.generation, "Dropping stale result");
            return false;
        }
        self.state.send_modify(update);
        true
    }

    fn fail(&self, generation: u64, error: WeatherError) {
        self.publish(generation, |s| {
            s.message = Some(error.user_message().to_string());
            s.status = LoadStatus::Error(error);
        });
    }

    /// Abort the pending load and surface the denial
    fn permission_revoked(&self, state: PermissionState) {
        let slot = self.slot.lock();
        if self.root.is_cancelled() {
            return;
        }
        slot.token.cancel();

        let error = WeatherError::LocationUnavailable;
        self.state.send_if_modified(|s| {
            if !s.is_loading() {
                return false;
            }
            tracing::info!(?state, "Location permission revoked during load");
            s.message = Some(error.user_message().to_string());
            s.status = LoadStatus::Error(error);
            true
        });
    }
}

/// Run `fut` unless `token` is cancelled first
async fn cancellable<F: Future>(token: &CancellationToken, fut: F) -> Option<F::Output> {
    tokio::select! {
        biased;
        _ = token.cancelled() => None,
        output = fut => Some(output),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_state_is_idle() {
        let state = WeatherViewState::default();
        assert_eq!(state.status, LoadStatus::Idle);
        assert!(state.display.is_none());
        assert!(state.error().is_none());
    }

    #[test]
    fn test_settings_from_config() {
        let config = LocationConfig {
            fix_timeout_secs: 3,
            ..LocationConfig::default()
        };
        assert_eq!(CoordinatorSettings::from(&config).fix_timeout, Duration::from_secs(3));
    }

    #[test]
    fn test_error_accessor() {
        let state = WeatherViewState {
            status: LoadStatus::Error(WeatherError::DecodingError),
            ..Default::default()
        };
        assert_eq!(state.error(), Some(&WeatherError::DecodingError));
        assert!(!state.is_loading());
    }
}
