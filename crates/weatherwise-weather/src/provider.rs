use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;
use weatherwise_core::{ApiConfig, ReqwestErrorExt};

use crate::types::{Coordinate, FetchError, WeatherRecord};

const USER_AGENT: &str = "WeatherWise/1.0";
const CONNECT_TIMEOUT_SECS: u64 = 10;
const PAYLOAD_PREVIEW_CHARS: usize = 200;

/// Source of fresh weather records
#[async_trait]
pub trait WeatherFetcher: Send + Sync {
    async fn fetch(&self, coordinate: Option<Coordinate>) -> Result<WeatherRecord, FetchError>;
}

/// `{ success, data, message? }` wrapper around every response
#[derive(Debug, Deserialize)]
struct Envelope {
    success: bool,
    #[serde(default)]
    data: serde_json::Value,
    #[serde(default)]
    message: Option<String>,
}

/// HTTP client for the WeatherWise weather endpoint
#[derive(Debug, Clone)]
pub struct WeatherProvider {
    client: Arc<Client>,
    endpoint: String,
    api_key: String,
}

impl WeatherProvider {
    pub fn new(config: &ApiConfig) -> Result<Self, FetchError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .gzip(true)
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .read_timeout(Duration::from_secs(config.read_timeout_secs))
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| FetchError::NetworkError(e.into_network_error().to_string()))?;

        Ok(Self {
            client: Arc::new(client),
            endpoint: weather_endpoint(&config.base_url),
            api_key: config.api_key.clone(),
        })
    }

    /// Point the provider at another server, keeping default timeouts
    pub fn new_with_base_url(base_url: &str, api_key: &str) -> Result<Self, FetchError> {
        Self::new(&ApiConfig {
            base_url: base_url.to_string(),
            api_key: api_key.to_string(),
            ..ApiConfig::default()
        })
    }

    fn decode(body: &[u8]) -> Result<WeatherRecord, FetchError> {
        let envelope: Envelope = serde_json::from_slice(body).map_err(|e| {
            log_decoding_failure(&e, body);
            FetchError::DecodingError
        })?;

        if !envelope.success {
            let message = envelope
                .data
                .get("message")
                .and_then(|m| m.as_str())
                .map(str::to_string)
                .or(envelope.message)
                .unwrap_or_default();
            tracing::warn!("Weather API reported failure: {}", message);
            return Err(FetchError::ApiError(message));
        }

        let mut record: WeatherRecord = serde_json::from_value(envelope.data).map_err(|e| {
            log_decoding_failure(&e, body);
            FetchError::DecodingError
        })?;
        record.sort_chronologically();
        Ok(record)
    }
}

#[async_trait]
impl WeatherFetcher for WeatherProvider {
    #[instrument(skip(self), level = "info")]
    async fn fetch(&self, coordinate: Option<Coordinate>) -> Result<WeatherRecord, FetchError> {
        let coordinate = coordinate.ok_or(FetchError::InvalidInput)?;

        tracing::debug!(
            "GET {}?lat={}&lon={}&api_key=<redacted>",
            self.endpoint,
            coordinate.latitude,
            coordinate.longitude
        );

        let response = self
            .client
            .get(&self.endpoint)
            .query(&[
                ("lat", coordinate.latitude.to_string()),
                ("lon", coordinate.longitude.to_string()),
                ("api_key", self.api_key.clone()),
            ])
            .send()
            .await
            .map_err(|e| {
                let err = e.into_network_error();
                tracing::warn!("Weather request failed: {}", err);
                FetchError::NetworkError(err.to_string())
            })?;

        let status = response.status();
        tracing::debug!(status = status.as_u16(), headers = ?response.headers(), "Weather response");

        if !status.is_success() {
            tracing::warn!("Weather endpoint returned status {}", status);
            return Err(FetchError::ServerError(status.as_u16()));
        }

        let body = response.bytes().await.map_err(|e| {
            let err = e.into_network_error();
            tracing::warn!("Failed to read weather response: {}", err);
            FetchError::NetworkError(err.to_string())
        })?;

        tracing::debug!(bytes = body.len(), "Weather payload received");
        if body.is_empty() {
            tracing::warn!("Weather endpoint returned an empty body");
            return Err(FetchError::EmptyResponse);
        }
        tracing::trace!("Weather payload: {}", payload_preview(&body));

        let record = Self::decode(&body)?;
        tracing::info!(
            hours = record.hourly.data.len(),
            days = record.daily.data.len(),
            "Fetched weather for {}",
            coordinate
        );
        Ok(record)
    }
}

/// `{base_url}/weather`, whether or not the base URL ends with a slash
fn weather_endpoint(base_url: &str) -> String {
    format!("{}/weather", base_url.trim_end_matches('/'))
}

fn payload_preview(body: &[u8]) -> String {
    String::from_utf8_lossy(body)
        .chars()
        .take(PAYLOAD_PREVIEW_CHARS)
        .collect()
}

fn log_decoding_failure(err: &serde_json::Error, body: &[u8]) {
    tracing::error!(
        "Decoding failed: {} (line {}, column {}); first {} chars: {}",
        err,
        err.line(),
        err.column(),
        PAYLOAD_PREVIEW_CHARS,
        payload_preview(body)
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weather_endpoint_joins_slash() {
        assert_eq!(
            weather_endpoint("https://api.weatherwise.app/v1/"),
            "https://api.weatherwise.app/v1/weather"
        );
        assert_eq!(weather_endpoint("http://localhost:8080"), "http://localhost:8080/weather");
    }

    #[test]
    fn test_payload_preview_is_bounded() {
        let body = "x".repeat(1000);
        assert_eq!(payload_preview(body.as_bytes()).len(), PAYLOAD_PREVIEW_CHARS);
        assert_eq!(payload_preview(b"short"), "short");
    }

    #[test]
    fn test_decode_api_failure_prefers_data_message() {
        let body = br#"{"success": false, "data": {"message": "Invalid API key"}, "message": "ignored"}"#;
        assert_eq!(
            WeatherProvider::decode(body),
            Err(FetchError::ApiError("Invalid API key".into()))
        );

        let body = br#"{"success": false, "message": "Quota exceeded"}"#;
        assert_eq!(
            WeatherProvider::decode(body),
            Err(FetchError::ApiError("Quota exceeded".into()))
        );
    }

    #[test]
    fn test_decode_rejects_wrong_shape() {
        assert_eq!(WeatherProvider::decode(b"not json"), Err(FetchError::DecodingError));
        assert_eq!(
            WeatherProvider::decode(br#"{"success": true, "data": {"dt": 1}}"#),
            Err(FetchError::DecodingError)
        );
    }

    #[tokio::test]
    async fn test_fetch_without_coordinate_is_invalid_input() {
        let provider = WeatherProvider::new(&ApiConfig::default()).unwrap();
        assert_eq!(provider.fetch(None).await, Err(FetchError::InvalidInput));
    }
}
