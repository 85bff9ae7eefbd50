//! Weather pipeline for WeatherWise
//!
//! Fetches forecasts from the WeatherWise API, keeps the most recent one in a local
//! SQLite cache, and reconciles both into a single published view state. Also provides
//! debounced place search for the map.

pub mod types;
pub mod cache;
pub mod coordinator;
pub mod geocode;
pub mod location;
pub mod provider;
pub mod search;

pub use types::*;
pub use cache::{CachedRecord, LastKnownLocation, WeatherCache};
pub use coordinator::{
    CoordinatorSettings, DisplaySource, DisplayedWeather, LoadStatus, WeatherCoordinator,
    WeatherViewState,
};
pub use geocode::NominatimCompleter;
pub use location::{
    ChannelLocationProvider, DenialCallback, DenialRegistration, LocationProvider, MapRegion,
};
pub use provider::{WeatherFetcher, WeatherProvider};
pub use search::{
    PlaceCompleter, PlaceCompletion, ResolvedPlace, SearchDebouncer, SearchError, SearchState,
};
