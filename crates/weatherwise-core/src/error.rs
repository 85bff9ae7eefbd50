//! Centralized error types for WeatherWise.
//!
//! This module provides a typed error hierarchy that:
//! - Keeps the set of failures shown to the user closed and small
//! - Provides user-friendly messages suitable for UI display
//! - Preserves full error context for debugging/logging

use thiserror::Error;

/// Top-level application error type.
///
/// Use `user_message()` to get a UI-appropriate message.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Weather error: {0}")]
    Weather(#[from] WeatherError),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl AppError {
    /// Returns a user-friendly message suitable for display in the UI.
    pub fn user_message(&self) -> &'static str {
        match self {
            AppError::Network(e) => e.user_message(),
            AppError::Database(e) => e.user_message(),
            AppError::Config(e) => e.user_message(),
            AppError::Weather(e) => e.user_message(),
            AppError::Other(_) => "An unexpected error occurred. Please try again.",
        }
    }
}

/// Network-related errors (HTTP, connectivity).
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Server error: {status} - {message}")]
    ServerError { status: u16, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl NetworkError {
    pub fn user_message(&self) -> &'static str {
        match self {
            NetworkError::ConnectionFailed(_) => {
                "Unable to connect. Check your internet connection."
            }
            NetworkError::Timeout => "The request timed out. Please try again.",
            NetworkError::ServerError { status, .. } if *status >= 500 => {
                "The server is experiencing issues. Please try again later."
            }
            NetworkError::ServerError { .. } => "The request failed. Please try again.",
            NetworkError::InvalidResponse(_) => {
                "Received an unexpected response. Please try again."
            }
        }
    }
}

/// Local storage errors (SQLite cache).
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Database connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Data corruption detected: {0}")]
    Corruption(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),
}

impl DatabaseError {
    pub fn user_message(&self) -> &'static str {
        match self {
            DatabaseError::ConnectionFailed(_) => {
                "Unable to access local data. Try restarting the app."
            }
            DatabaseError::QueryFailed(_) => "A data operation failed. Please try again.",
            DatabaseError::Corruption(_) => {
                "Local data may be corrupted. Consider clearing the weather cache."
            }
            DatabaseError::MigrationFailed(_) => {
                "Failed to update local data. Try restarting the app."
            }
        }
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    NotFound(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Configuration parse error: {0}")]
    ParseError(String),

    #[error("Could not write configuration: {0}")]
    WriteFailed(String),
}

impl ConfigError {
    pub fn user_message(&self) -> &'static str {
        match self {
            ConfigError::NotFound(_) => "Configuration not found. Using defaults.",
            ConfigError::Invalid(_) => "Invalid configuration. Check your settings.",
            ConfigError::ParseError(_) => "Configuration file is malformed. Check your settings.",
            ConfigError::WriteFailed(_) => "Unable to save settings. Check folder permissions.",
        }
    }
}

/// The closed set of weather failures surfaced to the presentation layer.
///
/// Every lower-level failure (transport codes, storage errors, JSON shape
/// mismatches) is mapped into one of these before it reaches view state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WeatherError {
    #[error("Location unavailable")]
    LocationUnavailable,

    #[error("Weather API error: {0}")]
    ApiError(String),

    #[error("Weather data could not be decoded")]
    DecodingError,

    #[error("Network unavailable")]
    NetworkError,
}

impl WeatherError {
    pub fn user_message(&self) -> &'static str {
        match self {
            WeatherError::LocationUnavailable => {
                "Unable to determine your location. Check location permissions in Settings."
            }
            WeatherError::ApiError(_) => "Weather service error. Please try again.",
            WeatherError::DecodingError => "Received weather data in an unexpected format.",
            WeatherError::NetworkError => "Problems with the internet connection.",
        }
    }

    /// Only a location failure can be fixed from the device permission settings.
    pub fn offers_settings_path(&self) -> bool {
        matches!(self, WeatherError::LocationUnavailable)
    }
}

/// Extension trait for converting reqwest errors to our error types.
pub trait ReqwestErrorExt {
    fn into_network_error(self) -> NetworkError;
}

impl ReqwestErrorExt for reqwest::Error {
    fn into_network_error(self) -> NetworkError {
        if self.is_timeout() {
            NetworkError::Timeout
        } else if self.is_connect() {
            NetworkError::ConnectionFailed(self.to_string())
        } else if let Some(status) = self.status() {
            NetworkError::ServerError {
                status: status.as_u16(),
                message: self.to_string(),
            }
        } else if self.is_decode() || self.is_body() {
            NetworkError::InvalidResponse(self.to_string())
        } else {
            NetworkError::ConnectionFailed(self.to_string())
        }
    }
}

/// Extension trait for converting rusqlite errors to our error types.
pub trait RusqliteErrorExt {
    fn into_database_error(self) -> DatabaseError;
}

impl RusqliteErrorExt for rusqlite::Error {
    fn into_database_error(self) -> DatabaseError {
        match &self {
            rusqlite::Error::SqliteFailure(_, Some(msg)) if msg.contains("corrupt") => {
                DatabaseError::Corruption(self.to_string())
            }
            rusqlite::Error::SqliteFailure(err, _)
                if err.code == rusqlite::ErrorCode::CannotOpen =>
            {
                DatabaseError::ConnectionFailed(self.to_string())
            }
            _ => DatabaseError::QueryFailed(self.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_messages_are_non_empty() {
        let messages = [
            NetworkError::Timeout.user_message(),
            DatabaseError::QueryFailed("test".into()).user_message(),
            ConfigError::Invalid("test".into()).user_message(),
            WeatherError::LocationUnavailable.user_message(),
            WeatherError::ApiError("boom".into()).user_message(),
            WeatherError::DecodingError.user_message(),
            WeatherError::NetworkError.user_message(),
        ];

        for message in messages {
            assert!(!message.is_empty());
        }
    }

    #[test]
    fn test_app_error_conversion() {
        let app_err: AppError = WeatherError::DecodingError.into();
        assert!(matches!(app_err, AppError::Weather(WeatherError::DecodingError)));
    }

    #[test]
    fn test_config_error_reaches_app_error() {
        let app_err: AppError = ConfigError::ParseError("line 1".into()).into();
        assert!(matches!(app_err, AppError::Config(ConfigError::ParseError(_))));
        assert_eq!(
            app_err.user_message(),
            "Configuration file is malformed. Check your settings."
        );
    }

    #[test]
    fn test_anyhow_error_is_generic_to_user() {
        let app_err: AppError = anyhow::anyhow!("Search timed out").into();
        assert_eq!(app_err.to_string(), "Search timed out");
        assert_eq!(app_err.user_message(), "An unexpected error occurred. Please try again.");
    }

    #[test]
    fn test_user_message_propagation() {
        let app_err = AppError::Weather(WeatherError::NetworkError);
        assert_eq!(app_err.user_message(), "Problems with the internet connection.");
    }

    #[test]
    fn test_only_location_offers_settings() {
        assert!(WeatherError::LocationUnavailable.offers_settings_path());
        assert!(!WeatherError::NetworkError.offers_settings_path());
        assert!(!WeatherError::ApiError("x".into()).offers_settings_path());
        assert!(!WeatherError::DecodingError.offers_settings_path());
    }

    #[test]
    fn test_server_error_message_depends_on_status() {
        let server = NetworkError::ServerError { status: 503, message: String::new() };
        let client = NetworkError::ServerError { status: 404, message: String::new() };
        assert!(server.user_message().contains("later"));
        assert_eq!(client.user_message(), "The request failed. Please try again.");
    }

    #[test]
    fn test_rusqlite_error_maps_to_query_failed() {
        let err = rusqlite::Error::QueryReturnedNoRows.into_database_error();
        assert!(matches!(err, DatabaseError::QueryFailed(_)));
    }
}
