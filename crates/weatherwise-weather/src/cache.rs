//! SQLite-backed cache for the most recent weather record and the last known location.
//!
//! Both are single-row, replace-on-write. Optional fields are stored as zero (or `""`)
//! when absent, so a record read back from the cache cannot tell "absent" from zero.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};
use std::path::Path;
use weatherwise_core::{DatabaseError, RusqliteErrorExt};

use crate::types::{
    Coordinate, CurrentWeather, DailyData, DailyForecast, HourlyData, HourlyForecast,
    WeatherRecord,
};

const SCHEMA_VERSION: i32 = 1;
const RECORD_ID: i64 = 1;

/// A weather record read back from the cache
#[derive(Debug, Clone, PartialEq)]
pub struct CachedRecord {
    pub captured_at: DateTime<Utc>,
    pub record: WeatherRecord,
}

/// The last coordinate reported by the location provider
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LastKnownLocation {
    pub coordinate: Coordinate,
    pub captured_at: DateTime<Utc>,
}

/// Local SQLite storage for the weather pipeline
pub struct WeatherCache {
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for WeatherCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeatherCache").finish_non_exhaustive()
    }
}

impl WeatherCache {
    /// Open or create the database, creating its parent directory if needed
    pub fn open(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::ConnectionFailed(format!(
                    "Failed to create {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let conn = Connection::open(path).map_err(RusqliteErrorExt::into_database_error)?;
        Self::with_connection(conn)
    }

    /// In-memory cache; contents are lost when it is dropped
    pub fn open_in_memory() -> Result<Self, DatabaseError> {
        let conn = Connection::open_in_memory().map_err(RusqliteErrorExt::into_database_error)?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self, DatabaseError> {
        init_schema(&conn)
            .map_err(|e| DatabaseError::MigrationFailed(e.to_string()))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Replace the cached record. Returns false (after logging) if the write failed.
    pub fn save(&self, record: &WeatherRecord) -> bool {
        match self.try_save(record) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("Failed to save weather cache: {}", e);
                false
            }
        }
    }

    /// The cached record, or `None` if nothing is cached or the read failed
    pub fn load(&self) -> Option<CachedRecord> {
        match self.try_load() {
            Ok(cached) => cached,
            Err(e) => {
                tracing::warn!("Failed to load weather cache: {}", e);
                None
            }
        }
    }

    /// Remove every cached weather row. The last known location is kept.
    pub fn clear(&self) -> bool {
        match self.try_clear() {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("Failed to clear weather cache: {}", e);
                false
            }
        }
    }

    pub fn save_last_location(&self, coordinate: Coordinate) -> bool {
        match self.try_save_last_location(coordinate) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("Failed to save last location: {}", e);
                false
            }
        }
    }

    pub fn load_last_location(&self) -> Option<LastKnownLocation> {
        match self.try_load_last_location() {
            Ok(location) => location,
            Err(e) => {
                tracing::warn!("Failed to load last location: {}", e);
                None
            }
        }
    }

    #[tracing::instrument(skip(self, record), fields(hours = record.hourly.data.len(), days = record.daily.data.len()))]
    pub fn try_save(&self, record: &WeatherRecord) -> Result<(), DatabaseError> {
        let mut conn = self.conn.lock();
        let tx = conn
            .transaction()
            .map_err(RusqliteErrorExt::into_database_error)?;

        delete_weather_rows(&tx).map_err(RusqliteErrorExt::into_database_error)?;
        insert_record(&tx, record, Utc::now()).map_err(RusqliteErrorExt::into_database_error)?;

        tx.commit().map_err(RusqliteErrorExt::into_database_error)?;
        tracing::debug!("Weather cache replaced");
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    pub fn try_load(&self) -> Result<Option<CachedRecord>, DatabaseError> {
        let conn = self.conn.lock();
        read_record(&conn)
    }

    pub fn try_clear(&self) -> Result<(), DatabaseError> {
        let mut conn = self.conn.lock();
        let tx = conn
            .transaction()
            .map_err(RusqliteErrorExt::into_database_error)?;
        delete_weather_rows(&tx).map_err(RusqliteErrorExt::into_database_error)?;
        tx.commit().map_err(RusqliteErrorExt::into_database_error)?;
        tracing::info!("Weather cache cleared");
        Ok(())
    }

    pub fn try_save_last_location(&self, coordinate: Coordinate) -> Result<(), DatabaseError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO last_location (id, latitude, longitude, captured_at_ms)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                RECORD_ID,
                coordinate.latitude,
                coordinate.longitude,
                Utc::now().timestamp_millis()
            ],
        )
        .map_err(RusqliteErrorExt::into_database_error)?;
        Ok(())
    }

    pub fn try_load_last_location(&self) -> Result<Option<LastKnownLocation>, DatabaseError> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT latitude, longitude, captured_at_ms FROM last_location WHERE id = ?1",
                params![RECORD_ID],
                |row| {
                    Ok((
                        row.get::<_, f64>(0)?,
                        row.get::<_, f64>(1)?,
                        row.get::<_, i64>(2)?,
                    ))
                },
            )
            .optional()
            .map_err(RusqliteErrorExt::into_database_error)?;

        let Some((latitude, longitude, captured_at_ms)) = row else {
            return Ok(None);
        };

        Ok(Some(LastKnownLocation {
            coordinate: Coordinate::new(latitude, longitude),
            captured_at: timestamp_from_millis(captured_at_ms)?,
        }))
    }
}

/// Create tables, dropping the weather tables when the stored layout is from another version
fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)",
        [],
    )?;

    let version: i32 = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
            row.get(0)
        })
        .optional()?
        .unwrap_or(0);

    if version != SCHEMA_VERSION {
        if version != 0 {
            tracing::info!(
                "Migrating weather cache from schema v{} to v{}",
                version,
                SCHEMA_VERSION
            );
        }
        conn.execute_batch(
            "DROP TABLE IF EXISTS cached_hourly;
             DROP TABLE IF EXISTS cached_daily;
             DROP TABLE IF EXISTS cached_current;
             DROP TABLE IF EXISTS cached_weather;",
        )?;
        conn.execute("DELETE FROM schema_version", [])?;
        conn.execute(
            "INSERT INTO schema_version (version) VALUES (?1)",
            params![SCHEMA_VERSION],
        )?;
    }

    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS cached_weather (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            captured_at_ms INTEGER NOT NULL,
            dt REAL NOT NULL,
            latitude REAL NOT NULL,
            longitude REAL NOT NULL,
            timezone TEXT NOT NULL,
            timezone_abbreviation TEXT NOT NULL,
            timezone_offset INTEGER NOT NULL,
            units TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS cached_current (
            weather_id INTEGER PRIMARY KEY REFERENCES cached_weather(id),
            temperature REAL NOT NULL,
            apparent_temperature REAL NOT NULL,
            humidity REAL NOT NULL,
            cloud_cover REAL NOT NULL,
            precip_intensity REAL NOT NULL,
            pressure REAL NOT NULL,
            wind_speed REAL NOT NULL,
            wind_gust REAL NOT NULL,
            wind_direction INTEGER NOT NULL,
            uv_index INTEGER NOT NULL,
            visibility INTEGER NOT NULL,
            dew_point REAL NOT NULL,
            icon TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS cached_hourly (
            weather_id INTEGER NOT NULL REFERENCES cached_weather(id),
            position INTEGER NOT NULL,
            forecast_start REAL NOT NULL,
            temperature REAL NOT NULL,
            dew_point REAL NOT NULL,
            humidity REAL NOT NULL,
            icon TEXT NOT NULL,
            uv_index INTEGER NOT NULL,
            apparent_temperature REAL NOT NULL,
            cloud_cover REAL NOT NULL,
            precip_intensity REAL NOT NULL,
            precip_probability REAL NOT NULL,
            pressure REAL NOT NULL,
            visibility INTEGER NOT NULL,
            wind_direction INTEGER NOT NULL,
            wind_gust REAL NOT NULL,
            wind_speed REAL NOT NULL,
            PRIMARY KEY (weather_id, position)
        );

        CREATE TABLE IF NOT EXISTS cached_daily (
            weather_id INTEGER NOT NULL REFERENCES cached_weather(id),
            position INTEGER NOT NULL,
            forecast_start REAL NOT NULL,
            forecast_end REAL NOT NULL,
            temperature_min REAL NOT NULL,
            temperature_max REAL NOT NULL,
            temperature_avg REAL NOT NULL,
            apparent_temperature_min REAL NOT NULL,
            apparent_temperature_max REAL NOT NULL,
            apparent_temperature_avg REAL NOT NULL,
            dew_point_min REAL NOT NULL,
            dew_point_max REAL NOT NULL,
            dew_point_avg REAL NOT NULL,
            wind_speed_min REAL NOT NULL,
            wind_speed_max REAL NOT NULL,
            wind_speed_avg REAL NOT NULL,
            wind_gust_min REAL NOT NULL,
            wind_gust_max REAL NOT NULL,
            wind_gust_avg REAL NOT NULL,
            wind_direction_avg INTEGER NOT NULL,
            sunrise_time REAL NOT NULL,
            sunset_time REAL NOT NULL,
            moon_phase REAL NOT NULL,
            uv_index_max INTEGER NOT NULL,
            precip_probability REAL NOT NULL,
            precip_intensity REAL NOT NULL,
            cloud_cover REAL NOT NULL,
            humidity REAL NOT NULL,
            pressure REAL NOT NULL,
            visibility INTEGER NOT NULL,
            icon TEXT NOT NULL,
            PRIMARY KEY (weather_id, position)
        );

        CREATE TABLE IF NOT EXISTS last_location (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            latitude REAL NOT NULL,
            longitude REAL NOT NULL,
            captured_at_ms INTEGER NOT NULL
        );
        "#,
    )?;

    Ok(())
}

fn delete_weather_rows(tx: &Transaction<'_>) -> rusqlite::Result<()> {
    tx.execute_batch(
        "DELETE FROM cached_hourly;
         DELETE FROM cached_daily;
         DELETE FROM cached_current;
         DELETE FROM cached_weather;",
    )
}

fn insert_record(
    tx: &Transaction<'_>,
    record: &WeatherRecord,
    captured_at: DateTime<Utc>,
) -> rusqlite::Result<()> {
    tx.execute(
        "INSERT INTO cached_weather
         (id, captured_at_ms, dt, latitude, longitude, timezone, timezone_abbreviation, timezone_offset, units)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            RECORD_ID,
            captured_at.timestamp_millis(),
            record.dt,
            record.latitude,
            record.longitude,
            record.timezone,
            record.timezone_abbreviation,
            record.timezone_offset,
            record.units,
        ],
    )?;

    let c = &record.currently;
    tx.execute(
        "INSERT INTO cached_current
         (weather_id, temperature, apparent_temperature, humidity, cloud_cover, precip_intensity,
          pressure, wind_speed, wind_gust, wind_direction, uv_index, visibility, dew_point, icon)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
        params![
            RECORD_ID,
            c.temperature,
            c.apparent_temperature,
            c.humidity,
            c.cloud_cover,
            c.precip_intensity,
            c.pressure,
            c.wind_speed,
            c.wind_gust,
            c.wind_direction,
            c.uv_index,
            c.visibility,
            c.dew_point,
            c.icon,
        ],
    )?;

    let mut hourly = tx.prepare(
        "INSERT INTO cached_hourly
         (weather_id, position, forecast_start, temperature, dew_point, humidity, icon, uv_index,
          apparent_temperature, cloud_cover, precip_intensity, precip_probability, pressure,
          visibility, wind_direction, wind_gust, wind_speed)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
    )?;
    for (position, h) in record.hourly.data.iter().enumerate() {
        hourly.execute(params![
            RECORD_ID,
            position as i64,
            h.forecast_start,
            h.temperature,
            h.dew_point,
            h.humidity,
            h.icon,
            h.uv_index,
            h.apparent_temperature.unwrap_or_default(),
            h.cloud_cover.unwrap_or_default(),
            h.precip_intensity.unwrap_or_default(),
            h.precip_probability.unwrap_or_default(),
            h.pressure.unwrap_or_default(),
            h.visibility.unwrap_or_default(),
            h.wind_direction.unwrap_or_default(),
            h.wind_gust.unwrap_or_default(),
            h.wind_speed.unwrap_or_default(),
        ])?;
    }

    let mut daily = tx.prepare(
        "INSERT INTO cached_daily
         (weather_id, position, forecast_start, forecast_end,
          temperature_min, temperature_max, temperature_avg,
          apparent_temperature_min, apparent_temperature_max, apparent_temperature_avg,
          dew_point_min, dew_point_max, dew_point_avg,
          wind_speed_min, wind_speed_max, wind_speed_avg,
          wind_gust_min, wind_gust_max, wind_gust_avg, wind_direction_avg,
          sunrise_time, sunset_time, moon_phase, uv_index_max, precip_probability,
          precip_intensity, cloud_cover, humidity, pressure, visibility, icon)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16,
                 ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26, ?27, ?28, ?29, ?30, ?31)",
    )?;
    for (position, d) in record.daily.data.iter().enumerate() {
        daily.execute(params![
            RECORD_ID,
            position as i64,
            d.forecast_start.unwrap_or_default(),
            d.forecast_end.unwrap_or_default(),
            d.temperature_min.unwrap_or_default(),
            d.temperature_max.unwrap_or_default(),
            d.temperature_avg.unwrap_or_default(),
            d.apparent_temperature_min.unwrap_or_default(),
            d.apparent_temperature_max.unwrap_or_default(),
            d.apparent_temperature_avg.unwrap_or_default(),
            d.dew_point_min.unwrap_or_default(),
            d.dew_point_max.unwrap_or_default(),
            d.dew_point_avg.unwrap_or_default(),
            d.wind_speed_min.unwrap_or_default(),
            d.wind_speed_max.unwrap_or_default(),
            d.wind_speed_avg.unwrap_or_default(),
            d.wind_gust_min.unwrap_or_default(),
            d.wind_gust_max.unwrap_or_default(),
            d.wind_gust_avg.unwrap_or_default(),
            d.wind_direction_avg.unwrap_or_default(),
            d.sunrise_time.unwrap_or_default(),
            d.sunset_time.unwrap_or_default(),
            d.moon_phase.unwrap_or_default(),
            d.uv_index_max.unwrap_or_default(),
            d.precip_probability.unwrap_or_default(),
            d.precip_intensity.unwrap_or_default(),
            d.cloud_cover.unwrap_or_default(),
            d.humidity.unwrap_or_default(),
            d.pressure.unwrap_or_default(),
            d.visibility.unwrap_or_default(),
            d.icon.as_deref().unwrap_or_default(),
        ])?;
    }

    Ok(())
}

fn read_record(conn: &Connection) -> Result<Option<CachedRecord>, DatabaseError> {
    let header = conn
        .query_row(
            "SELECT captured_at_ms, dt, latitude, longitude, timezone, timezone_abbreviation,
                    timezone_offset, units
             FROM cached_weather WHERE id = ?1",
            params![RECORD_ID],
            |row| {
                Ok((
                    row.get::<_, i64>("captured_at_ms")?,
                    row.get::<_, f64>("dt")?,
                    row.get::<_, f64>("latitude")?,
                    row.get::<_, f64>("longitude")?,
                    row.get::<_, String>("timezone")?,
                    row.get::<_, String>("timezone_abbreviation")?,
                    row.get::<_, i32>("timezone_offset")?,
                    row.get::<_, String>("units")?,
                ))
            },
        )
        .optional()
        .map_err(RusqliteErrorExt::into_database_error)?;

    let Some((
        captured_at_ms,
        dt,
        latitude,
        longitude,
        timezone,
        timezone_abbreviation,
        timezone_offset,
        units,
    )) = header
    else {
        return Ok(None);
    };

    let currently = conn
        .query_row(
            "SELECT * FROM cached_current WHERE weather_id = ?1",
            params![RECORD_ID],
            row_to_current,
        )
        .optional()
        .map_err(RusqliteErrorExt::into_database_error)?
        .ok_or_else(|| DatabaseError::Corruption("cached record has no current conditions".into()))?;

    let hourly = query_rows(
        conn,
        "SELECT * FROM cached_hourly WHERE weather_id = ?1 ORDER BY position",
        row_to_hourly,
    )?;
    let daily = query_rows(
        conn,
        "SELECT * FROM cached_daily WHERE weather_id = ?1 ORDER BY position",
        row_to_daily,
    )?;

    Ok(Some(CachedRecord {
        captured_at: timestamp_from_millis(captured_at_ms)?,
        record: WeatherRecord {
            dt,
            latitude,
            longitude,
            timezone,
            timezone_abbreviation,
            timezone_offset,
            units,
            currently,
            hourly: HourlyForecast { data: hourly },
            daily: DailyForecast { data: daily },
        },
    }))
}

fn query_rows<T>(
    conn: &Connection,
    sql: &str,
    map: fn(&Row<'_>) -> rusqlite::Result<T>,
) -> Result<Vec<T>, DatabaseError> {
    let mut stmt = conn
        .prepare(sql)
        .map_err(RusqliteErrorExt::into_database_error)?;
    let rows = stmt
        .query_map(params![RECORD_ID], map)
        .map_err(RusqliteErrorExt::into_database_error)?;
    rows.collect::<Result<Vec<_>, _>>()
        .map_err(RusqliteErrorExt::into_database_error)
}

fn row_to_current(row: &Row<'_>) -> rusqlite::Result<CurrentWeather> {
    Ok(CurrentWeather {
        temperature: row.get("temperature")?,
        apparent_temperature: row.get("apparent_temperature")?,
        humidity: row.get("humidity")?,
        cloud_cover: row.get("cloud_cover")?,
        precip_intensity: row.get("precip_intensity")?,
        pressure: row.get("pressure")?,
        wind_speed: row.get("wind_speed")?,
        wind_gust: row.get("wind_gust")?,
        wind_direction: row.get("wind_direction")?,
        uv_index: row.get("uv_index")?,
        visibility: row.get("visibility")?,
        dew_point: row.get("dew_point")?,
        icon: row.get("icon")?,
    })
}

// Optional fields come back as Some(0) / Some(""); see the module docs.
fn row_to_hourly(row: &Row<'_>) -> rusqlite::Result<HourlyData> {
    Ok(HourlyData {
        forecast_start: row.get("forecast_start")?,
        temperature: row.get("temperature")?,
        dew_point: row.get("dew_point")?,
        humidity: row.get("humidity")?,
        icon: row.get("icon")?,
        uv_index: row.get("uv_index")?,
        apparent_temperature: Some(row.get("apparent_temperature")?),
        cloud_cover: Some(row.get("cloud_cover")?),
        precip_intensity: Some(row.get("precip_intensity")?),
        precip_probability: Some(row.get("precip_probability")?),
        pressure: Some(row.get("pressure")?),
        visibility: Some(row.get("visibility")?),
        wind_direction: Some(row.get("wind_direction")?),
        wind_gust: Some(row.get("wind_gust")?),
        wind_speed: Some(row.get("wind_speed")?),
    })
}

fn row_to_daily(row: &Row<'_>) -> rusqlite::Result<DailyData> {
    Ok(DailyData {
        forecast_start: Some(row.get("forecast_start")?),
        forecast_end: Some(row.get("forecast_end")?),
        temperature_min: Some(row.get("temperature_min")?),
        temperature_max: Some(row.get("temperature_max")?),
        temperature_avg: Some(row.get("temperature_avg")?),
        apparent_temperature_min: Some(row.get("apparent_temperature_min")?),
        apparent_temperature_max: Some(row.get("apparent_temperature_max")?),
        apparent_temperature_avg: Some(row.get("apparent_temperature_avg")?),
        dew_point_min: Some(row.get("dew_point_min")?),
        dew_point_max: Some(row.get("dew_point_max")?),
        dew_point_avg: Some(row.get("dew_point_avg")?),
        wind_speed_min: Some(row.get("wind_speed_min")?),
        wind_speed_max: Some(row.get("wind_speed_max")?),
        wind_speed_avg: Some(row.get("wind_speed_avg")?),
        wind_gust_min: Some(row.get("wind_gust_min")?),
        wind_gust_max: Some(row.get("wind_gust_max")?),
        wind_gust_avg: Some(row.get("wind_gust_avg")?),
        wind_direction_avg: Some(row.get("wind_direction_avg")?),
        sunrise_time: Some(row.get("sunrise_time")?),
        sunset_time: Some(row.get("sunset_time")?),
        moon_phase: Some(row.get("moon_phase")?),
        uv_index_max: Some(row.get("uv_index_max")?),
        precip_probability: Some(row.get("precip_probability")?),
        precip_intensity: Some(row.get("precip_intensity")?),
        cloud_cover: Some(row.get("cloud_cover")?),
        humidity: Some(row.get("humidity")?),
        pressure: Some(row.get("pressure")?),
        visibility: Some(row.get("visibility")?),
        icon: Some(row.get("icon")?),
    })
}

fn timestamp_from_millis(ms: i64) -> Result<DateTime<Utc>, DatabaseError> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| DatabaseError::Corruption(format!("invalid timestamp: {}", ms)))
}
