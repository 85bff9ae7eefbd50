pub mod config;
pub mod error;

pub use config::{
    ApiConfig, Config, LocationConfig, LoggingConfig, SearchConfig, StorageConfig,
    ValidationResult,
};
pub use error::{
    AppError, ConfigError, DatabaseError, NetworkError, ReqwestErrorExt, RusqliteErrorExt,
    WeatherError,
};

use anyhow::Result;

/// Initialize tracing/logging.
///
/// `RUST_LOG` wins over `default_level` when set. Calling this twice is harmless;
/// the second subscriber is simply not installed.
pub fn init(default_level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    if tracing_subscriber::fmt().with_env_filter(filter).try_init().is_err() {
        tracing::debug!("Tracing subscriber already installed");
    }

    tracing::info!("WeatherWise core initialized");
    Ok(())
}
