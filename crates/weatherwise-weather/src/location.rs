//! Location provider contract and a channel-backed implementation.
//!
//! The platform location service is outside this crate. A host drives
//! [`ChannelLocationProvider`] by setting the permission state and publishing fixes.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use crate::cache::LastKnownLocation;
use crate::types::{Coordinate, LocationError, PermissionState};

/// Default zoom for a region centred on a single point, in degrees
pub const DEFAULT_SPAN_DEGREES: f64 = 0.02;

pub type DenialCallback = Box<dyn Fn(PermissionState) + Send + Sync>;
type SharedDenialCallback = Arc<dyn Fn(PermissionState) + Send + Sync>;

/// Identifies a registered denial callback so it can be removed again
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DenialRegistration(pub u64);

#[async_trait]
pub trait LocationProvider: Send + Sync {
    fn permission_state(&self) -> PermissionState;

    /// Ask the user for permission and return the resulting state
    async fn request_permission(&self) -> PermissionState;

    /// Ask for a single fix; it arrives on the [`subscribe`](Self::subscribe) stream
    fn request_location(&self);

    fn subscribe(&self) -> watch::Receiver<Option<Coordinate>>;

    /// Register a callback fired whenever permission becomes denied or restricted
    fn on_authorization_denied(&self, callback: DenialCallback) -> DenialRegistration;

    /// Remove a callback; unknown registrations are ignored
    fn remove_denial_callback(&self, registration: DenialRegistration);
}

/// Wait for the first non-empty coordinate on `rx`, bounded by `timeout`.
pub async fn first_fix(
    rx: &mut watch::Receiver<Option<Coordinate>>,
    timeout: Duration,
) -> Result<Coordinate, LocationError> {
    match tokio::time::timeout(timeout, rx.wait_for(Option::is_some)).await {
        Err(_) => Err(LocationError::Timeout),
        Ok(Err(_)) => Err(LocationError::ServiceUnavailable),
        Ok(Ok(fix)) => (*fix).ok_or(LocationError::ServiceUnavailable),
    }
}

pub struct ChannelLocationProvider {
    permission: Mutex<PermissionState>,
    /// State a permission prompt resolves to
    prompt_response: PermissionState,
    sender: watch::Sender<Option<Coordinate>>,
    denial_callbacks: Mutex<Vec<(DenialRegistration, SharedDenialCallback)>>,
    next_registration: AtomicU64,
    location_requests: AtomicUsize,
}

impl ChannelLocationProvider {
    pub fn new(permission: PermissionState) -> Self {
        Self::with_prompt_response(permission, PermissionState::Authorized)
    }

    /// A provider whose permission prompt answers with `prompt_response`
    pub fn with_prompt_response(
        permission: PermissionState,
        prompt_response: PermissionState,
    ) -> Self {
        let (sender, _) = watch::channel(None);
        Self {
            permission: Mutex::new(permission),
            prompt_response,
            sender,
            denial_callbacks: Mutex::new(Vec::new()),
            next_registration: AtomicU64::new(0),
            location_requests: AtomicUsize::new(0),
        }
    }

    pub fn set_permission(&self, state: PermissionState) {
        *self.permission.lock() = state;
        if matches!(state, PermissionState::Denied | PermissionState::Restricted) {
            tracing::info!("Location permission {:?}", state);
            // Callbacks run unlocked so they may register or remove callbacks
            let callbacks: Vec<_> = self
                .denial_callbacks
                .lock()
                .iter()
                .map(|(_, callback)| callback.clone())
                .collect();
            for callback in callbacks {
                callback(state);
            }
        }
    }

    /// Push a new fix to every subscriber
    pub fn publish(&self, coordinate: Coordinate) {
        tracing::debug!("Location fix: {}", coordinate);
        self.sender.send_replace(Some(coordinate));
    }

    /// Number of `request_location` calls so far
    pub fn location_requests(&self) -> usize {
        self.location_requests.load(Ordering::SeqCst)
    }

    pub fn denial_callback_count(&self) -> usize {
        self.denial_callbacks.lock().len()
    }
}

#[async_trait]
impl LocationProvider for ChannelLocationProvider {
    fn permission_state(&self) -> PermissionState {
        *self.permission.lock()
    }

    async fn request_permission(&self) -> PermissionState {
        let current = self.permission_state();
        if current != PermissionState::NotDetermined {
            return current;
        }
        self.set_permission(self.prompt_response);
        self.prompt_response
    }

    fn request_location(&self) {
        self.location_requests.fetch_add(1, Ordering::SeqCst);
    }

    fn subscribe(&self) -> watch::Receiver<Option<Coordinate>> {
        self.sender.subscribe()
    }

    fn on_authorization_denied(&self, callback: DenialCallback) -> DenialRegistration {
        let registration =
            DenialRegistration(self.next_registration.fetch_add(1, Ordering::SeqCst));
        self.denial_callbacks
            .lock()
            .push((registration, Arc::from(callback)));
        registration
    }

    fn remove_denial_callback(&self, registration: DenialRegistration) {
        self.denial_callbacks
            .lock()
            .retain(|(id, _)| *id != registration);
    }
}

/// Visible map area: a centre plus latitude/longitude spans in degrees
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MapRegion {
    pub center: Coordinate,
    pub latitude_delta: f64,
    pub longitude_delta: f64,
}

impl MapRegion {
    pub fn around(center: Coordinate) -> Self {
        Self {
            center,
            latitude_delta: DEFAULT_SPAN_DEGREES,
            longitude_delta: DEFAULT_SPAN_DEGREES,
        }
    }

    /// Where the map opens before a live fix: the last known location, else `fallback`
    pub fn initial(last_known: Option<LastKnownLocation>, fallback: Coordinate) -> Self {
        Self::around(last_known.map_or(fallback, |l| l.coordinate))
    }

    pub fn contains(&self, point: Coordinate) -> bool {
        (point.latitude - self.center.latitude).abs() <= self.latitude_delta / 2.0
            && (point.longitude - self.center.longitude).abs() <= self.longitude_delta / 2.0
    }
}
