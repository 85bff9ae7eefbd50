//! Place lookup against Nominatim (OpenStreetMap) - free, no API key required.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;
use weatherwise_core::{NetworkError, ReqwestErrorExt, SearchConfig};

use crate::location::MapRegion;
use crate::search::{PlaceCompleter, PlaceCompletion, ResolvedPlace, SearchError};
use crate::types::Coordinate;

const REQUEST_TIMEOUT_SECS: u64 = 10;
const USER_AGENT: &str = "WeatherWise/1.0";

#[derive(Debug, Deserialize)]
struct NominatimPlace {
    lat: String,
    lon: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    address: Option<NominatimAddress>,
}

#[derive(Debug, Deserialize)]
struct NominatimReverse {
    address: Option<NominatimAddress>,
}

#[derive(Debug, Deserialize)]
struct NominatimAddress {
    city: Option<String>,
    town: Option<String>,
    village: Option<String>,
    municipality: Option<String>,
    state_district: Option<String>,
    state: Option<String>,
    county: Option<String>,
    country: Option<String>,
}

impl NominatimAddress {
    /// "Seattle, Washington" style label; city > town > village > ... > country
    fn label(self) -> Option<String> {
        let state = self.state.clone();
        let country = self.country.clone();

        let place = self
            .city
            .or(self.town)
            .or(self.village)
            .or(self.municipality)
            .or(self.state_district)
            .or(self.county)
            .or(self.state)
            .or(self.country)?;

        let suffix = state
            .filter(|s| !s.is_empty() && *s != place)
            .or_else(|| country.filter(|c| !c.is_empty() && *c != place));

        Some(match suffix {
            Some(s) => format!("{}, {}", place, s),
            None => place,
        })
    }
}

impl NominatimPlace {
    fn into_completion(self) -> Option<PlaceCompletion> {
        let latitude = self.lat.parse::<f64>().ok()?;
        let longitude = self.lon.parse::<f64>().ok()?;
        let display_name = self.display_name.unwrap_or_default();

        let title = self
            .name
            .filter(|n| !n.trim().is_empty())
            .or_else(|| self.address.and_then(NominatimAddress::label))
            .or_else(|| display_name.split(',').next().map(|s| s.trim().to_string()))
            .unwrap_or_default();

        let subtitle = display_name
            .strip_prefix(title.as_str())
            .map(|rest| rest.trim_start_matches([',', ' ']).to_string())
            .unwrap_or(display_name);

        Some(PlaceCompletion {
            title,
            subtitle,
            coordinate: Some(Coordinate::new(latitude, longitude)),
        })
    }
}

/// [`PlaceCompleter`] backed by the Nominatim search API
#[derive(Debug, Clone)]
pub struct NominatimCompleter {
    client: Arc<Client>,
    base_url: String,
    max_results: u32,
}

impl NominatimCompleter {
    pub fn new(config: &SearchConfig) -> Result<Self, NetworkError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .user_agent(USER_AGENT)
            .build()
            .map_err(ReqwestErrorExt::into_network_error)?;

        Ok(Self {
            client: Arc::new(client),
            base_url: config.nominatim_url.trim_end_matches('/').to_string(),
            max_results: config.max_results,
        })
    }

    async fn search(&self, query: &str) -> Result<Vec<NominatimPlace>, String> {
        let limit = self.max_results.to_string();
        let response = self
            .client
            .get(format!("{}/search", self.base_url))
            .query(&[
                ("q", query),
                ("format", "json"),
                ("addressdetails", "1"),
                ("limit", limit.as_str()),
            ])
            .send()
            .await
            .map_err(|e| e.into_network_error().to_string())?;

        if !response.status().is_success() {
            return Err(format!("Nominatim returned status {}", response.status()));
        }

        response
            .json::<Vec<NominatimPlace>>()
            .await
            .map_err(|e| format!("Nominatim parse error: {}", e))
    }

    /// Human-readable place name for a coordinate (e.g. "Seattle, Washington").
    /// Returns `None` on failure; callers can fall back to the raw coordinate.
    pub async fn reverse(&self, coordinate: Coordinate) -> Option<String> {
        let response = match self
            .client
            .get(format!("{}/reverse", self.base_url))
            .query(&[
                ("lat", coordinate.latitude.to_string()),
                ("lon", coordinate.longitude.to_string()),
                ("format", "json".to_string()),
                ("addressdetails", "1".to_string()),
                ("zoom", "10".to_string()),
            ])
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                tracing::debug!("Reverse geocode request failed: {}", e);
                return None;
            }
        };

        if !response.status().is_success() {
            tracing::debug!("Reverse geocode returned status {}", response.status());
            return None;
        }

        let body: NominatimReverse = match response.json().await {
            Ok(b) => b,
            Err(e) => {
                tracing::debug!("Reverse geocode parse error: {}", e);
                return None;
            }
        };

        let label = body.address?.label()?;
        tracing::info!("Reverse geocoded to: {}", label);
        Some(label)
    }
}

#[async_trait]
impl PlaceCompleter for NominatimCompleter {
    #[instrument(skip(self), level = "debug")]
    async fn complete(&self, query: &str) -> Result<Vec<PlaceCompletion>, SearchError> {
        let places = self.search(query).await.map_err(|e| {
            tracing::warn!("Place completion failed: {}", e);
            SearchError::CompleterFailed(e)
        })?;

        Ok(places
            .into_iter()
            .filter_map(NominatimPlace::into_completion)
            .collect())
    }

    #[instrument(skip(self), level = "debug")]
    async fn resolve(&self, completion: &PlaceCompletion) -> Result<ResolvedPlace, SearchError> {
        if let Some(coordinate) = completion.coordinate {
            return Ok(ResolvedPlace::new(completion.title.clone(), coordinate));
        }

        let query = if completion.subtitle.is_empty() {
            completion.title.clone()
        } else {
            format!("{}, {}", completion.title, completion.subtitle)
        };

        let first = self
            .search(&query)
            .await
            .map_err(SearchError::SearchFailed)?
            .into_iter()
            .find_map(NominatimPlace::into_completion)
            .and_then(|c| c.coordinate)
            .ok_or(SearchError::NoResults)?;

        Ok(ResolvedPlace {
            name: completion.title.clone(),
            coordinate: first,
            region: MapRegion::around(first),
        })
    }
}
