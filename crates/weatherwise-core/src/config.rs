use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use url::Url;

const APP_DIR: &str = "weatherwise";
const ENV_PREFIX: &str = "WEATHERWISE";

/// Configuration validation errors
#[derive(Debug, Clone)]
pub struct ConfigValidationError {
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Result of config validation
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub errors: Vec<ConfigValidationError>,
    pub warnings: Vec<ConfigValidationError>,
}

impl ValidationResult {
    /// Returns true if there are no errors (warnings are OK)
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Add an error
    pub fn add_error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ConfigValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    /// Add a warning
    pub fn add_warning(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.warnings.push(ConfigValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    /// Get a user-friendly message summarizing all errors
    pub fn error_summary(&self) -> String {
        if self.errors.is_empty() {
            return String::new();
        }
        self.errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ")
    }

    /// Turn validation errors into a [`ConfigError::Invalid`]
    pub fn ensure_valid(&self) -> Result<(), ConfigError> {
        if self.is_valid() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(self.error_summary()))
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Application configuration directory
    #[serde(skip, default = "default_config_dir")]
    pub config_dir: PathBuf,

    /// Weather endpoint settings
    #[serde(default)]
    pub api: ApiConfig,

    /// Location fix settings
    #[serde(default)]
    pub location: LocationConfig,

    /// Place search settings
    #[serde(default)]
    pub search: SearchConfig,

    /// Local storage settings
    #[serde(default)]
    pub storage: StorageConfig,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Base URL of the weather service; `weather` is appended to it
    #[serde(default = "default_api_base_url")]
    pub base_url: String,

    /// API key sent as the `api_key` query parameter
    #[serde(default)]
    pub api_key: String,

    /// Maximum time between two reads of the response
    #[serde(default = "default_read_timeout")]
    pub read_timeout_secs: u64,

    /// Maximum time for the whole request
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_api_base_url() -> String {
    "https://api.weatherwise.app/v1/".to_string()
}

fn default_read_timeout() -> u64 {
    15
}

fn default_request_timeout() -> u64 {
    30
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_api_base_url(),
            api_key: String::new(),
            read_timeout_secs: default_read_timeout(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationConfig {
    /// Upper bound on waiting for the first location fix
    #[serde(default = "default_fix_timeout")]
    pub fix_timeout_secs: u64,

    /// Map centre used before any fix has ever been stored
    #[serde(default = "default_latitude")]
    pub default_latitude: f64,

    #[serde(default = "default_longitude")]
    pub default_longitude: f64,
}

fn default_fix_timeout() -> u64 {
    10
}

fn default_latitude() -> f64 {
    37.785834
}

fn default_longitude() -> f64 {
    -122.406417
}

impl Default for LocationConfig {
    fn default() -> Self {
        Self {
            fix_timeout_secs: default_fix_timeout(),
            default_latitude: default_latitude(),
            default_longitude: default_longitude(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Quiet period after the last keystroke before a query is dispatched
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Nominatim instance used for place completion
    #[serde(default = "default_nominatim_url")]
    pub nominatim_url: String,

    #[serde(default = "default_max_results")]
    pub max_results: u32,
}

fn default_debounce_ms() -> u64 {
    200
}

fn default_nominatim_url() -> String {
    "https://nominatim.openstreetmap.org".to_string()
}

fn default_max_results() -> u32 {
    8
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            nominatim_url: default_nominatim_url(),
            max_results: default_max_results(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding the SQLite cache
    #[serde(default = "default_data_dir_str")]
    pub data_dir: String,
}

fn default_data_dir_str() -> String {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
        .to_string_lossy()
        .into_owned()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir_str(),
        }
    }
}

impl StorageConfig {
    /// Path of the weather cache database
    pub fn database_path(&self) -> PathBuf {
        PathBuf::from(&self.data_dir).join("weatherwise.db")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter when RUST_LOG is not set
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            config_dir: default_config_dir(),
            api: ApiConfig::default(),
            location: LocationConfig::default(),
            search: SearchConfig::default(),
            storage: StorageConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from the default location, creating it if it doesn't exist
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_path()?;
        Self::load_from(&config_path)
    }

    /// Load configuration from `config_path`, layering defaults, the file and
    /// `WEATHERWISE_*` environment variables (`__` separates sections).
    pub fn load_from(config_path: &Path) -> Result<Self, ConfigError> {
        if !config_path.exists() {
            Self::default().save_to(config_path)?;
        }

        let settings = ::config::Config::builder()
            .add_source(
                ::config::File::from(config_path.to_path_buf())
                    .required(false)
                    .format(::config::FileFormat::Toml),
            )
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| ConfigError::ParseError(e.to_string()))?;

        let mut config: Config = settings
            .try_deserialize()
            .map_err(|e| ConfigError::ParseError(e.to_string()))?;

        if let Some(dir) = config_path.parent() {
            config.config_dir = dir.to_path_buf();
        }

        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::default();

        self.validate_url(&self.api.base_url, "api.base_url", &mut result);
        self.validate_url(&self.search.nominatim_url, "search.nominatim_url", &mut result);

        if self.api.api_key.trim().is_empty() {
            result.add_warning("api.api_key", "No API key configured - requests may be rejected");
        }

        if self.api.read_timeout_secs == 0 {
            result.add_error("api.read_timeout_secs", "Read timeout must be greater than 0");
        }
        if self.api.request_timeout_secs == 0 {
            result.add_error("api.request_timeout_secs", "Request timeout must be greater than 0");
        } else if self.api.read_timeout_secs > self.api.request_timeout_secs {
            result.add_error(
                "api.read_timeout_secs",
                "Read timeout is longer than the total request timeout",
            );
        }

        if self.location.fix_timeout_secs == 0 {
            result.add_error(
                "location.fix_timeout_secs",
                "Location fix timeout must be greater than 0",
            );
        }
        if !(-90.0..=90.0).contains(&self.location.default_latitude) {
            result.add_error(
                "location.default_latitude",
                format!(
                    "Latitude must be between -90 and 90, got: {}",
                    self.location.default_latitude
                ),
            );
        }
        if !(-180.0..=180.0).contains(&self.location.default_longitude) {
            result.add_error(
                "location.default_longitude",
                format!(
                    "Longitude must be between -180 and 180, got: {}",
                    self.location.default_longitude
                ),
            );
        }

        if self.search.debounce_ms > 5000 {
            result.add_warning("search.debounce_ms", "Search debounce is unusually long (>5s)");
        }
        if self.search.max_results == 0 {
            result.add_error("search.max_results", "Search must return at least one result");
        }

        let valid_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            result.add_warning(
                "logging.level",
                format!(
                    "Unknown log level '{}', expected one of: {}",
                    self.logging.level,
                    valid_levels.join(", ")
                ),
            );
        }

        result
    }

    /// Validate a URL field
    fn validate_url(&self, url_str: &str, field_name: &str, result: &mut ValidationResult) {
        match Url::parse(url_str) {
            Ok(url) => {
                if url.scheme() != "http" && url.scheme() != "https" {
                    result.add_error(
                        field_name,
                        format!("URL must use http or https scheme, got: {}", url.scheme()),
                    );
                }

                if url.host().is_none() {
                    result.add_error(field_name, "URL must have a host");
                }
            }
            Err(e) => {
                result.add_error(field_name, format!("Invalid URL: {}", e));
            }
        }
    }

    fn save_to(&self, config_path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| write_failed(config_path, e))?;
        }

        let contents = toml::to_string_pretty(self).map_err(|e| write_failed(config_path, e))?;
        std::fs::write(config_path, contents).map_err(|e| write_failed(config_path, e))?;

        Ok(())
    }

    /// Get the path to the configuration file
    fn config_path() -> Result<PathBuf, ConfigError> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| ConfigError::NotFound("no user config directory".to_string()))?
            .join(APP_DIR);

        Ok(config_dir.join("config.toml"))
    }
}

fn write_failed(path: &Path, e: impl std::fmt::Display) -> ConfigError {
    ConfigError::WriteFailed(format!("{}: {}", path.display(), e))
}
