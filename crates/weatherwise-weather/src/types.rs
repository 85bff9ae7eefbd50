use serde::{Deserialize, Serialize};
use weatherwise_core::WeatherError;

/// Geographic coordinate in decimal degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinate {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }

    /// Latitude within [-90, 90] and longitude within [-180, 180]
    pub fn is_valid(&self) -> bool {
        (-90.0..=90.0).contains(&self.latitude) && (-180.0..=180.0).contains(&self.longitude)
    }
}

impl std::fmt::Display for Coordinate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.6}, {:.6}", self.latitude, self.longitude)
    }
}

/// Weather condition categories derived from the provider's free-text icon code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WeatherIcon {
    Clear,
    PartlyCloudy,
    MostlyCloudy,
    Cloudy,
    LightRain,
    Rain,
    HeavyRain,
    FreezingRain,
    Thunderstorm,
    ThunderRain,
    LightSnow,
    Snow,
    HeavySnow,
    Sleet,
    Hail,
    Windy,
    Fog,
    Mist,
    Haze,
    Smoke,
    Dust,
    Tornado,
    TropicalStorm,
    Hurricane,
    Sandstorm,
    Blizzard,
    #[default]
    Unknown,
}

impl WeatherIcon {
    pub const ALL: [WeatherIcon; 27] = [
        Self::Clear,
        Self::PartlyCloudy,
        Self::MostlyCloudy,
        Self::Cloudy,
        Self::LightRain,
        Self::Rain,
        Self::HeavyRain,
        Self::FreezingRain,
        Self::Thunderstorm,
        Self::ThunderRain,
        Self::LightSnow,
        Self::Snow,
        Self::HeavySnow,
        Self::Sleet,
        Self::Hail,
        Self::Windy,
        Self::Fog,
        Self::Mist,
        Self::Haze,
        Self::Smoke,
        Self::Dust,
        Self::Tornado,
        Self::TropicalStorm,
        Self::Hurricane,
        Self::Sandstorm,
        Self::Blizzard,
        Self::Unknown,
    ];

    /// Lowercase the code and replace spaces with underscores.
    pub fn normalize(code: &str) -> String {
        code.to_lowercase().replace(' ', "_")
    }

    /// Map a provider icon code ("Partly Cloudy", "partly_cloudy", ...) to a category.
    /// Unrecognized codes map to `Unknown`.
    pub fn from_code(code: &str) -> Self {
        match Self::normalize(code).as_str() {
            "clear" => Self::Clear,
            "partly_cloudy" => Self::PartlyCloudy,
            "mostly_cloudy" => Self::MostlyCloudy,
            "cloudy" => Self::Cloudy,
            "light_rain" => Self::LightRain,
            "rain" => Self::Rain,
            "heavy_rain" => Self::HeavyRain,
            "freezing_rain" => Self::FreezingRain,
            "thunderstorm" => Self::Thunderstorm,
            "thunder_rain" => Self::ThunderRain,
            "light_snow" => Self::LightSnow,
            "snow" => Self::Snow,
            "heavy_snow" => Self::HeavySnow,
            "sleet" => Self::Sleet,
            "hail" => Self::Hail,
            "windy" => Self::Windy,
            "fog" => Self::Fog,
            "mist" => Self::Mist,
            "haze" => Self::Haze,
            "smoke" => Self::Smoke,
            "dust" => Self::Dust,
            "tornado" => Self::Tornado,
            "tropical_storm" => Self::TropicalStorm,
            "hurricane" => Self::Hurricane,
            "sandstorm" => Self::Sandstorm,
            "blizzard" => Self::Blizzard,
            _ => Self::Unknown,
        }
    }

    /// Canonical category code
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Clear => "clear",
            Self::PartlyCloudy => "partly_cloudy",
            Self::MostlyCloudy => "mostly_cloudy",
            Self::Cloudy => "cloudy",
            Self::LightRain => "light_rain",
            Self::Rain => "rain",
            Self::HeavyRain => "heavy_rain",
            Self::FreezingRain => "freezing_rain",
            Self::Thunderstorm => "thunderstorm",
            Self::ThunderRain => "thunder_rain",
            Self::LightSnow => "light_snow",
            Self::Snow => "snow",
            Self::HeavySnow => "heavy_snow",
            Self::Sleet => "sleet",
            Self::Hail => "hail",
            Self::Windy => "windy",
            Self::Fog => "fog",
            Self::Mist => "mist",
            Self::Haze => "haze",
            Self::Smoke => "smoke",
            Self::Dust => "dust",
            Self::Tornado => "tornado",
            Self::TropicalStorm => "tropical_storm",
            Self::Hurricane => "hurricane",
            Self::Sandstorm => "sandstorm",
            Self::Blizzard => "blizzard",
            Self::Unknown => "unknown",
        }
    }

    /// Symbol name used by the presentation layer
    pub fn symbol_name(&self) -> &'static str {
        match self {
            Self::Clear => "sun.max",
            Self::PartlyCloudy => "cloud.sun",
            Self::MostlyCloudy => "smoke",
            Self::Cloudy => "cloud",
            Self::LightRain => "cloud.drizzle",
            Self::Rain => "cloud.rain",
            Self::HeavyRain => "cloud.heavyrain",
            Self::FreezingRain => "cloud.sleet",
            Self::Thunderstorm => "cloud.bolt",
            Self::ThunderRain => "cloud.bolt.rain",
            Self::LightSnow => "cloud.snow",
            Self::Snow => "snowflake",
            Self::HeavySnow => "wind.snow",
            Self::Sleet => "cloud.sleet",
            Self::Hail => "cloud.hail",
            Self::Windy => "wind",
            Self::Fog => "cloud.fog",
            Self::Mist => "humidity",
            Self::Haze => "sun.haze",
            Self::Smoke => "smoke",
            Self::Dust => "sun.dust",
            Self::Tornado => "tornado",
            Self::TropicalStorm => "tropicalstorm",
            Self::Hurricane => "hurricane",
            Self::Sandstorm => "cloud",
            Self::Blizzard => "cloud.blizzard",
            Self::Unknown => "questionmark",
        }
    }
}

impl std::fmt::Display for WeatherIcon {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Full weather payload for one coordinate at one point in time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherRecord {
    /// Observation time, seconds since the epoch
    pub dt: f64,
    pub latitude: f64,
    pub longitude: f64,
    pub timezone: String,
    pub timezone_abbreviation: String,
    pub timezone_offset: i32,
    pub units: String,
    pub currently: CurrentWeather,
    pub hourly: HourlyForecast,
    pub daily: DailyForecast,
}

impl WeatherRecord {
    pub fn coordinate(&self) -> Coordinate {
        Coordinate::new(self.latitude, self.longitude)
    }

    /// Sort hourly and daily entries ascending by start time.
    ///
    /// The sort is stable; daily entries without a start sort first.
    pub fn sort_chronologically(&mut self) {
        self.hourly
            .data
            .sort_by(|a, b| a.forecast_start.total_cmp(&b.forecast_start));
        self.daily.data.sort_by(|a, b| {
            let a = a.forecast_start.unwrap_or(f64::NEG_INFINITY);
            let b = b.forecast_start.unwrap_or(f64::NEG_INFINITY);
            a.total_cmp(&b)
        });
    }
}

/// Single-point snapshot of current conditions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentWeather {
    pub temperature: f64,
    pub apparent_temperature: f64,
    /// Fraction 0-1
    pub humidity: f64,
    /// Fraction 0-1
    pub cloud_cover: f64,
    pub precip_intensity: f64,
    pub pressure: f64,
    pub wind_speed: f64,
    pub wind_gust: f64,
    /// Degrees
    pub wind_direction: i32,
    pub uv_index: i32,
    pub visibility: i32,
    pub dew_point: f64,
    pub icon: String,
}

impl CurrentWeather {
    pub fn condition(&self) -> WeatherIcon {
        WeatherIcon::from_code(&self.icon)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HourlyForecast {
    pub data: Vec<HourlyData>,
}

/// Per-hour snapshot. Edge hours may omit several fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "RawHourlyData")]
pub struct HourlyData {
    pub forecast_start: f64,
    pub temperature: f64,
    pub dew_point: f64,
    pub humidity: f64,
    pub icon: String,
    pub uv_index: i32,
    pub apparent_temperature: Option<f64>,
    pub cloud_cover: Option<f64>,
    pub precip_intensity: Option<f64>,
    pub precip_probability: Option<f64>,
    pub pressure: Option<f64>,
    pub visibility: Option<i32>,
    pub wind_direction: Option<i32>,
    pub wind_gust: Option<f64>,
    pub wind_speed: Option<f64>,
}

impl HourlyData {
    pub fn condition(&self) -> WeatherIcon {
        WeatherIcon::from_code(&self.icon)
    }
}

/// Wire shape of an hourly entry; some servers only send `apparentTemperatureAvg`.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawHourlyData {
    forecast_start: f64,
    temperature: f64,
    dew_point: f64,
    humidity: f64,
    icon: String,
    uv_index: i32,
    apparent_temperature: Option<f64>,
    apparent_temperature_avg: Option<f64>,
    cloud_cover: Option<f64>,
    precip_intensity: Option<f64>,
    precip_probability: Option<f64>,
    pressure: Option<f64>,
    visibility: Option<i32>,
    wind_direction: Option<i32>,
    wind_gust: Option<f64>,
    wind_speed: Option<f64>,
}

impl From<RawHourlyData> for HourlyData {
    fn from(raw: RawHourlyData) -> Self {
        Self {
            forecast_start: raw.forecast_start,
            temperature: raw.temperature,
            dew_point: raw.dew_point,
            humidity: raw.humidity,
            icon: raw.icon,
            uv_index: raw.uv_index,
            apparent_temperature: raw.apparent_temperature.or(raw.apparent_temperature_avg),
            cloud_cover: raw.cloud_cover,
            precip_intensity: raw.precip_intensity,
            precip_probability: raw.precip_probability,
            pressure: raw.pressure,
            visibility: raw.visibility,
            wind_direction: raw.wind_direction,
            wind_gust: raw.wind_gust,
            wind_speed: raw.wind_speed,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DailyForecast {
    pub data: Vec<DailyData>,
}

/// Per-day aggregates. The upstream provider may omit any of them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DailyData {
    pub forecast_start: Option<f64>,
    pub forecast_end: Option<f64>,
    pub temperature_min: Option<f64>,
    pub temperature_max: Option<f64>,
    pub temperature_avg: Option<f64>,
    pub apparent_temperature_min: Option<f64>,
    pub apparent_temperature_max: Option<f64>,
    pub apparent_temperature_avg: Option<f64>,
    pub dew_point_min: Option<f64>,
    pub dew_point_max: Option<f64>,
    pub dew_point_avg: Option<f64>,
    pub wind_speed_min: Option<f64>,
    pub wind_speed_max: Option<f64>,
    pub wind_speed_avg: Option<f64>,
    pub wind_gust_min: Option<f64>,
    pub wind_gust_max: Option<f64>,
    pub wind_gust_avg: Option<f64>,
    pub wind_direction_avg: Option<i32>,
    pub sunrise_time: Option<f64>,
    pub sunset_time: Option<f64>,
    /// Fraction 0-1
    pub moon_phase: Option<f64>,
    pub uv_index_max: Option<i32>,
    pub precip_probability: Option<f64>,
    pub precip_intensity: Option<f64>,
    pub cloud_cover: Option<f64>,
    pub humidity: Option<f64>,
    pub pressure: Option<f64>,
    pub visibility: Option<i32>,
    pub icon: Option<String>,
}

impl DailyData {
    pub fn condition(&self) -> WeatherIcon {
        self.icon
            .as_deref()
            .map(WeatherIcon::from_code)
            .unwrap_or_default()
    }
}

/// Device location permission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PermissionState {
    #[default]
    NotDetermined,
    Denied,
    Restricted,
    Authorized,
}

impl PermissionState {
    pub fn is_authorized(&self) -> bool {
        matches!(self, Self::Authorized)
    }
}

/// Location service errors
#[derive(Debug, thiserror::Error)]
pub enum LocationError {
    #[error("Location permission denied")]
    PermissionDenied,
    #[error("Location service unavailable")]
    ServiceUnavailable,
    #[error("Location request timed out")]
    Timeout,
}

/// Weather fetch errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FetchError {
    #[error("No coordinate supplied")]
    InvalidInput,
    #[error("Network error: {0}")]
    NetworkError(String),
    #[error("Server returned status {0}")]
    ServerError(u16),
    #[error("Empty response body")]
    EmptyResponse,
    #[error("Response did not match the expected shape")]
    DecodingError,
    #[error("Weather API error: {0}")]
    ApiError(String),
}

impl From<FetchError> for WeatherError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::InvalidInput => WeatherError::LocationUnavailable,
            FetchError::NetworkError(_) | FetchError::EmptyResponse => WeatherError::NetworkError,
            FetchError::ServerError(status) => WeatherError::ApiError(format!("HTTP {}", status)),
            FetchError::ApiError(message) => WeatherError::ApiError(message),
            FetchError::DecodingError => WeatherError::DecodingError,
        }
    }
}

impl From<LocationError> for WeatherError {
    fn from(_: LocationError) -> Self {
        WeatherError::LocationUnavailable
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_icon_from_display_text() {
        assert_eq!(WeatherIcon::from_code("Partly Cloudy"), WeatherIcon::PartlyCloudy);
        assert_eq!(WeatherIcon::from_code("THUNDER RAIN"), WeatherIcon::ThunderRain);
        assert_eq!(WeatherIcon::from_code("clear"), WeatherIcon::Clear);
    }

    #[test]
    fn test_icon_unknown_fallback() {
        assert_eq!(WeatherIcon::from_code(""), WeatherIcon::Unknown);
        assert_eq!(WeatherIcon::from_code("volcanic ash"), WeatherIcon::Unknown);
        assert_eq!(WeatherIcon::from_code("partly-cloudy"), WeatherIcon::Unknown);
        assert_eq!(WeatherIcon::Unknown.symbol_name(), "questionmark");
    }

    #[test]
    fn test_normalize_idempotent() {
        let inputs = ["Partly Cloudy", "  Heavy  Rain ", "ÄÖÜ snow", "", "tropical_storm", "İstanbul Fog"];
        for input in inputs {
            let once = WeatherIcon::normalize(input);
            assert_eq!(WeatherIcon::normalize(&once), once, "not idempotent for {:?}", input);
        }
    }

    #[test]
    fn test_every_category_round_trips_through_its_code() {
        for icon in WeatherIcon::ALL {
            assert_eq!(WeatherIcon::from_code(icon.as_str()), icon);
            assert!(!icon.symbol_name().is_empty());
        }
    }

    #[test]
    fn test_hourly_apparent_temperature_falls_back_to_avg() {
        let json = serde_json::json!({
            "forecastStart": 1_700_000_000.0,
            "temperature": 12.0,
            "dewPoint": 4.0,
            "humidity": 0.6,
            "icon": "Cloudy",
            "uvIndex": 1,
            "apparentTemperatureAvg": 10.5
        });
        let hour: HourlyData = serde_json::from_value(json).unwrap();
        assert_eq!(hour.apparent_temperature, Some(10.5));
        assert_eq!(hour.wind_speed, None);
    }

    #[test]
    fn test_hourly_requires_temperature() {
        let json = serde_json::json!({
            "forecastStart": 1_700_000_000.0,
            "dewPoint": 4.0,
            "humidity": 0.6,
            "icon": "Cloudy",
            "uvIndex": 1
        });
        assert!(serde_json::from_value::<HourlyData>(json).is_err());
    }

    #[test]
    fn test_daily_all_fields_optional() {
        let day: DailyData = serde_json::from_value(serde_json::json!({})).unwrap();
        assert_eq!(day, DailyData::default());
        assert_eq!(day.condition(), WeatherIcon::Unknown);
    }

    #[test]
    fn test_sort_chronologically() {
        let mut daily = DailyForecast::default();
        daily.data.push(DailyData { forecast_start: Some(200.0), ..Default::default() });
        daily.data.push(DailyData { forecast_start: None, icon: Some("rain".into()), ..Default::default() });
        daily.data.push(DailyData { forecast_start: Some(100.0), ..Default::default() });

        let mut record = WeatherRecord {
            dt: 0.0,
            latitude: 0.0,
            longitude: 0.0,
            timezone: String::new(),
            timezone_abbreviation: String::new(),
            timezone_offset: 0,
            units: String::new(),
            currently: CurrentWeather {
                temperature: 0.0,
                apparent_temperature: 0.0,
                humidity: 0.0,
                cloud_cover: 0.0,
                precip_intensity: 0.0,
                pressure: 0.0,
                wind_speed: 0.0,
                wind_gust: 0.0,
                wind_direction: 0,
                uv_index: 0,
                visibility: 0,
                dew_point: 0.0,
                icon: String::new(),
            },
            hourly: HourlyForecast::default(),
            daily,
        };
        record.sort_chronologically();

        let starts: Vec<_> = record.daily.data.iter().map(|d| d.forecast_start).collect();
        assert_eq!(starts, vec![None, Some(100.0), Some(200.0)]);
    }

    #[test]
    fn test_fetch_error_mapping() {
        assert_eq!(WeatherError::from(FetchError::InvalidInput), WeatherError::LocationUnavailable);
        assert_eq!(WeatherError::from(FetchError::EmptyResponse), WeatherError::NetworkError);
        assert_eq!(
            WeatherError::from(FetchError::NetworkError("offline".into())),
            WeatherError::NetworkError
        );
        assert_eq!(
            WeatherError::from(FetchError::ServerError(500)),
            WeatherError::ApiError("HTTP 500".into())
        );
        assert_eq!(
            WeatherError::from(FetchError::ApiError("bad key".into())),
            WeatherError::ApiError("bad key".into())
        );
        assert_eq!(WeatherError::from(FetchError::DecodingError), WeatherError::DecodingError);
    }

    #[test]
    fn test_coordinate_validity() {
        assert!(Coordinate::new(37.785834, -122.406417).is_valid());
        assert!(!Coordinate::new(90.5, 0.0).is_valid());
        assert!(!Coordinate::new(0.0, -181.0).is_valid());
    }
}
