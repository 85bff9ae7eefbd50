//! End-to-end tests for WeatherCoordinator with scripted collaborators.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use weatherwise_core::WeatherError;
use weatherwise_weather::{
    ChannelLocationProvider, Coordinate, CoordinatorSettings, DisplaySource, FetchError,
    LoadStatus, LocationProvider, PermissionState, WeatherCache, WeatherCoordinator,
    WeatherFetcher, WeatherIcon, WeatherRecord,
};

const SF: Coordinate = Coordinate {
    latitude: 37.785834,
    longitude: -122.406417,
};

fn record(temperature: f64, icon: &str) -> WeatherRecord {
    serde_json::from_value(serde_json::json!({
        "dt": 1745000000.0,
        "latitude": SF.latitude,
        "longitude": SF.longitude,
        "timezone": "America/Los_Angeles",
        "timezone_abbreviation": "PDT",
        "timezone_offset": -25200,
        "units": "si",
        "currently": {
            "temperature": temperature,
            "apparentTemperature": temperature,
            "humidity": 0.5,
            "cloudCover": 0.3,
            "precipIntensity": 0.0,
            "pressure": 1012.0,
            "windSpeed": 3.0,
            "windGust": 5.0,
            "windDirection": 90,
            "uvIndex": 3,
            "visibility": 10000,
            "dewPoint": 8.0,
            "icon": icon
        },
        "hourly": { "data": [] },
        "daily": { "data": [] }
    }))
    .unwrap()
}

/// Fetcher that answers each call with the next scripted (delay, result) pair
struct ScriptedFetcher {
    script: Mutex<VecDeque<(Duration, Result<WeatherRecord, FetchError>)>>,
    calls: AtomicUsize,
}

impl ScriptedFetcher {
    fn new(script: Vec<(Duration, Result<WeatherRecord, FetchError>)>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    async fn wait_for_calls(&self, n: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.calls() < n {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }
}

#[async_trait]
impl WeatherFetcher for ScriptedFetcher {
    async fn fetch(&self, coordinate: Option<Coordinate>) -> Result<WeatherRecord, FetchError> {
        coordinate.ok_or(FetchError::InvalidInput)?;
        self.calls.fetch_add(1, Ordering::SeqCst);
        let (delay, result) = self
            .script
            .lock()
            .pop_front()
            .unwrap_or((Duration::ZERO, Err(FetchError::EmptyResponse)));
        tokio::time::sleep(delay).await;
        result
    }
}

struct Harness {
    _dir: tempfile::TempDir,
    cache: Arc<WeatherCache>,
    location: Arc<ChannelLocationProvider>,
    fetcher: Arc<ScriptedFetcher>,
    coordinator: WeatherCoordinator,
}

fn harness(
    permission: PermissionState,
    script: Vec<(Duration, Result<WeatherRecord, FetchError>)>,
    fix_timeout: Duration,
) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let cache = Arc::new(WeatherCache::open(&dir.path().join("weatherwise.db")).unwrap());
    let location = Arc::new(ChannelLocationProvider::with_prompt_response(
        permission,
        PermissionState::Denied,
    ));
    let fetcher = ScriptedFetcher::new(script);
    let coordinator = WeatherCoordinator::new(
        fetcher.clone(),
        location.clone(),
        cache.clone(),
        CoordinatorSettings { fix_timeout },
    );

    Harness {
        _dir: dir,
        cache,
        location,
        fetcher,
        coordinator,
    }
}

#[tokio::test]
async fn test_load_publishes_fresh_weather_and_caches_it() {
    let h = harness(
        PermissionState::Authorized,
        vec![(Duration::ZERO, Ok(record(18.5, "Partly Cloudy")))],
        Duration::from_secs(5),
    );
    h.location.publish(SF);

    h.coordinator.load_weather().await;

    let state = h.coordinator.state();
    assert_eq!(state.status, LoadStatus::Ready);
    assert!(state.message.is_none());
    let display = state.display.unwrap();
    assert_eq!(display.source, DisplaySource::Network);
    assert_eq!(display.record.currently.temperature, 18.5);
    assert_eq!(display.record.currently.condition(), WeatherIcon::PartlyCloudy);
    assert_eq!(display.record.currently.condition().as_str(), "partly_cloudy");

    let cached = h.cache.load().unwrap();
    assert_eq!(cached.record.currently.temperature, 18.5);
    assert_eq!(cached.record.currently.icon, "Partly Cloudy");
    assert_eq!(h.location.location_requests(), 1);

    // The last known location is written off the load path
    tokio::time::timeout(Duration::from_secs(2), async {
        while h.cache.load_last_location().is_none() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(h.cache.load_last_location().unwrap().coordinate, SF);
}

#[tokio::test]
async fn test_denied_permission_keeps_cached_value_and_skips_network() {
    let h = harness(PermissionState::Denied, vec![], Duration::from_secs(5));
    h.cache.save(&record(12.0, "Fog"));

    h.coordinator.load_weather().await;

    let state = h.coordinator.state();
    assert_eq!(state.status, LoadStatus::Error(WeatherError::LocationUnavailable));
    assert!(state.error().unwrap().offers_settings_path());
    assert_eq!(
        state.message.as_deref(),
        Some(WeatherError::LocationUnavailable.user_message())
    );

    let display = state.display.unwrap();
    assert_eq!(display.source, DisplaySource::Cache);
    assert_eq!(display.record.currently.temperature, 12.0);
    assert!(display.captured_at.is_some());

    assert_eq!(h.fetcher.calls(), 0);
    assert_eq!(h.location.location_requests(), 0);
}

#[tokio::test]
async fn test_undetermined_permission_prompts_once() {
    let h = harness(PermissionState::NotDetermined, vec![], Duration::from_secs(5));

    h.coordinator.load_weather().await;

    assert_eq!(h.location.permission_state(), PermissionState::Denied);
    assert_eq!(
        h.coordinator.state().status,
        LoadStatus::Error(WeatherError::LocationUnavailable)
    );
    assert_eq!(h.fetcher.calls(), 0);
}

#[tokio::test]
async fn test_no_fix_within_timeout_is_location_unavailable() {
    let h = harness(PermissionState::Authorized, vec![], Duration::from_millis(100));

    h.coordinator.load_weather().await;

    assert_eq!(
        h.coordinator.state().status,
        LoadStatus::Error(WeatherError::LocationUnavailable)
    );
    assert_eq!(h.fetcher.calls(), 0);
}

#[tokio::test]
async fn test_fetch_failure_leaves_cached_display() {
    let h = harness(
        PermissionState::Authorized,
        vec![(Duration::ZERO, Err(FetchError::ServerError(500)))],
        Duration::from_secs(5),
    );
    h.cache.save(&record(12.0, "Fog"));
    h.location.publish(SF);

    h.coordinator.load_weather().await;

    let state = h.coordinator.state();
    assert_eq!(state.status, LoadStatus::Error(WeatherError::ApiError("HTTP 500".into())));
    let display = state.display.unwrap();
    assert_eq!(display.source, DisplaySource::Cache);
    assert_eq!(display.record.currently.temperature, 12.0);
    assert_eq!(h.cache.load().unwrap().record.currently.temperature, 12.0);
}

#[tokio::test]
async fn test_refresh_after_error_recovers() {
    let h = harness(
        PermissionState::Authorized,
        vec![
            (Duration::ZERO, Err(FetchError::NetworkError("offline".into()))),
            (Duration::ZERO, Ok(record(20.0, "Clear"))),
        ],
        Duration::from_secs(5),
    );
    h.location.publish(SF);

    h.coordinator.load_weather().await;
    assert_eq!(h.coordinator.state().status, LoadStatus::Error(WeatherError::NetworkError));

    h.coordinator.load_weather().await;
    let state = h.coordinator.state();
    assert_eq!(state.status, LoadStatus::Ready);
    assert!(state.message.is_none());
    assert_eq!(state.display.unwrap().record.currently.temperature, 20.0);
}

/// Run two overlapping loads and return the fetcher plus every temperature the view displayed.
async fn overlapping_loads(
    first_delay: Duration,
    second_delay: Duration,
) -> (Arc<ScriptedFetcher>, Vec<f64>) {
    let h = harness(
        PermissionState::Authorized,
        vec![
            (first_delay, Ok(record(1.0, "Rain"))),
            (second_delay, Ok(record(2.0, "Clear"))),
        ],
        Duration::from_secs(5),
    );
    h.location.publish(SF);

    let mut rx = h.coordinator.subscribe();
    let seen = tokio::spawn(async move {
        let mut temperatures = Vec::new();
        while rx.changed().await.is_ok() {
            if let Some(display) = &rx.borrow_and_update().display {
                temperatures.push(display.record.currently.temperature);
            }
        }
        temperatures
    });

    let first = h.coordinator.spawn_load();
    h.fetcher.wait_for_calls(1).await;
    let second = h.coordinator.spawn_load();

    first.await.unwrap();
    second.await.unwrap();

    let state = h.coordinator.state();
    assert_eq!(state.status, LoadStatus::Ready);
    assert_eq!(state.display.unwrap().record.currently.temperature, 2.0);
    assert_eq!(h.cache.load().unwrap().record.currently.temperature, 2.0);

    // Dropping the coordinator closes the state channel and ends the observer
    let fetcher = h.fetcher.clone();
    drop(h);
    (fetcher, seen.await.unwrap())
}

#[tokio::test]
async fn test_last_call_wins_when_second_fetch_finishes_first() {
    let (fetcher, seen) =
        overlapping_loads(Duration::from_millis(400), Duration::from_millis(20)).await;

    assert_eq!(fetcher.calls(), 2);
    assert!(!seen.contains(&1.0), "superseded result was published: {:?}", seen);
    assert_eq!(seen.last(), Some(&2.0));
}

#[tokio::test]
async fn test_last_call_wins_when_first_fetch_finishes_first() {
    let (fetcher, seen) =
        overlapping_loads(Duration::from_millis(150), Duration::from_millis(400)).await;

    assert_eq!(fetcher.calls(), 2);
    assert!(!seen.contains(&1.0), "superseded result was published: {:?}", seen);
    assert_eq!(seen.last(), Some(&2.0));
}

#[tokio::test]
async fn test_shutdown_stops_in_flight_load() {
    let h = harness(
        PermissionState::Authorized,
        vec![(Duration::from_millis(300), Ok(record(30.0, "Clear")))],
        Duration::from_secs(5),
    );
    h.location.publish(SF);

    let load = h.coordinator.spawn_load();
    h.fetcher.wait_for_calls(1).await;
    h.coordinator.shutdown();
    load.await.unwrap();

    assert!(h.coordinator.is_shut_down());
    assert_eq!(h.coordinator.state().status, LoadStatus::Loading);
    assert!(h.cache.load().is_none());

    // Loads after shutdown are no-ops
    h.coordinator.load_weather().await;
    assert_eq!(h.fetcher.calls(), 1);
}

#[tokio::test]
async fn test_permission_revoked_while_waiting_for_fix() {
    let h = harness(PermissionState::Authorized, vec![], Duration::from_secs(30));

    let load = h.coordinator.spawn_load();
    tokio::time::timeout(Duration::from_secs(2), async {
        while h.location.location_requests() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    h.location.set_permission(PermissionState::Denied);
    tokio::time::timeout(Duration::from_secs(2), load)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(
        h.coordinator.state().status,
        LoadStatus::Error(WeatherError::LocationUnavailable)
    );
    assert_eq!(h.fetcher.calls(), 0);
}

#[tokio::test]
async fn test_dropped_coordinators_release_denial_callbacks() {
    let h = harness(PermissionState::Authorized, vec![], Duration::from_secs(1));
    assert_eq!(h.location.denial_callback_count(), 1);

    for _ in 0..3 {
        let extra = WeatherCoordinator::new(
            h.fetcher.clone(),
            h.location.clone(),
            h.cache.clone(),
            CoordinatorSettings::default(),
        );
        assert_eq!(h.location.denial_callback_count(), 2);
        drop(extra);
    }
    assert_eq!(h.location.denial_callback_count(), 1);

    h.coordinator.shutdown();
    assert_eq!(h.location.denial_callback_count(), 0);

    // Revoking after shutdown reaches nobody and publishes nothing
    h.location.set_permission(PermissionState::Denied);
    assert_eq!(h.coordinator.state().status, LoadStatus::Idle);
}
