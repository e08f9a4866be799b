//! Configuration management

use std::time::Duration;

use anyhow::{self, Context, Result};
use chrono::{Datelike, Days, NaiveDate, NaiveTime, Weekday};

use crate::defaults::{
    default_delivery_weekdays, default_route_start, DEFAULT_GEOCODING_TIMEOUT_SECS,
    DEFAULT_MAX_CONCURRENT_REQUESTS, DEFAULT_MAX_STOPS_PER_BATCH, DEFAULT_ROUTING_TIMEOUT_SECS,
    DEFAULT_SERVICE_MINUTES_PER_STOP,
};
use crate::error::BatchingError;
use crate::types::{CollectionPoint, Coordinates};

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// NATS server URL
    pub nats_url: String,

    /// PostgreSQL connection string
    pub database_url: String,

    /// Nominatim API URL (street-level geocoding; ZIP table only when unset)
    pub nominatim_url: Option<String>,

    /// Valhalla routing engine URL (optional, geographic fallback when unavailable)
    pub valhalla_url: Option<String>,

    /// Extra ZIP centroid table (CSV with zip,lat,lng columns)
    pub zip_table_path: Option<String>,

    /// Batching parameters
    pub batching: BatchingConfig,
}

/// Parameters of a batching run
#[derive(Debug, Clone)]
pub struct BatchingConfig {
    /// Upper bound on stops in one batch
    pub max_stops_per_batch: usize,
    /// Average time spent at each stop
    pub service_minutes_per_stop: u32,
    /// When drivers leave the collection point
    pub route_start_time: NaiveTime,
    /// Bound on each distance-matrix request
    pub routing_timeout: Duration,
    /// Bound on each geocoding request
    pub geocoding_timeout: Duration,
    /// Run a 2-opt pass over routing-service sequences
    pub two_opt: bool,
    /// Always use the geographic heuristic
    pub force_fallback: bool,
    /// Abort runs when no routing service is configured
    pub routing_required: bool,
    /// Weekdays on which deliveries happen
    pub delivery_weekdays: Vec<Weekday>,
    /// Fan-out for geocoding and matrix requests
    pub max_concurrent_requests: usize,
    /// Used when the database has no active collection point
    pub default_collection_point: Option<CollectionPoint>,
}

impl Default for BatchingConfig {
    fn default() -> Self {
        Self {
            max_stops_per_batch: DEFAULT_MAX_STOPS_PER_BATCH,
            service_minutes_per_stop: DEFAULT_SERVICE_MINUTES_PER_STOP,
            route_start_time: default_route_start(),
            routing_timeout: Duration::from_secs(DEFAULT_ROUTING_TIMEOUT_SECS),
            geocoding_timeout: Duration::from_secs(DEFAULT_GEOCODING_TIMEOUT_SECS),
            two_opt: true,
            force_fallback: false,
            routing_required: false,
            delivery_weekdays: default_delivery_weekdays(),
            max_concurrent_requests: DEFAULT_MAX_CONCURRENT_REQUESTS,
            default_collection_point: None,
        }
    }
}

impl BatchingConfig {
    /// Checks that must pass before a run touches the database
    pub fn validate(&self) -> std::result::Result<(), BatchingError> {
        if self.max_stops_per_batch == 0 {
            return Err(BatchingError::Configuration(
                "MAX_STOPS_PER_BATCH must be at least 1".to_string(),
            ));
        }
        if self.routing_timeout.is_zero() {
            return Err(BatchingError::Configuration(
                "ROUTING_TIMEOUT_SECS must be at least 1".to_string(),
            ));
        }
        if self.geocoding_timeout.is_zero() {
            return Err(BatchingError::Configuration(
                "GEOCODING_TIMEOUT_SECS must be at least 1".to_string(),
            ));
        }
        if self.max_concurrent_requests == 0 {
            return Err(BatchingError::Configuration(
                "MAX_CONCURRENT_REQUESTS must be at least 1".to_string(),
            ));
        }
        if self.delivery_weekdays.is_empty() {
            return Err(BatchingError::Configuration(
                "DELIVERY_WEEKDAYS must name at least one day".to_string(),
            ));
        }
        Ok(())
    }

    /// First delivery day strictly after `today`
    pub fn next_delivery_day(&self, today: NaiveDate) -> NaiveDate {
        (1..=7u64)
            .filter_map(|offset| today.checked_add_days(Days::new(offset)))
            .find(|date| self.delivery_weekdays.contains(&date.weekday()))
            .unwrap_or_else(|| today.succ_opt().unwrap_or(today))
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present
        dotenvy::dotenv().ok();

        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let nats_url = var("NATS_URL").unwrap_or_else(|| "nats://localhost:4222".to_string());

        let database_url = var("DATABASE_URL").context("DATABASE_URL must be set")?;

        let nominatim_url = var("NOMINATIM_URL");
        let valhalla_url = var("VALHALLA_URL");
        let zip_table_path = var("ZIP_TABLE_PATH");

        let defaults = BatchingConfig::default();

        let max_stops_per_batch = parse_or(&var, "MAX_STOPS_PER_BATCH", defaults.max_stops_per_batch)?;
        let service_minutes_per_stop =
            parse_or(&var, "SERVICE_MINUTES_PER_STOP", defaults.service_minutes_per_stop)?;
        let route_start_time = match var("ROUTE_START_TIME") {
            Some(raw) => NaiveTime::parse_from_str(raw.trim(), "%H:%M")
                .with_context(|| format!("ROUTE_START_TIME must be HH:MM, got '{}'", raw))?,
            None => defaults.route_start_time,
        };
        let routing_timeout = Duration::from_secs(parse_or(
            &var,
            "ROUTING_TIMEOUT_SECS",
            defaults.routing_timeout.as_secs(),
        )?);
        let geocoding_timeout = Duration::from_secs(parse_or(
            &var,
            "GEOCODING_TIMEOUT_SECS",
            defaults.geocoding_timeout.as_secs(),
        )?);
        let two_opt = parse_flag(&var, "TWO_OPT", defaults.two_opt)?;
        let force_fallback = parse_flag(&var, "FORCE_FALLBACK", defaults.force_fallback)?;
        let routing_required = parse_flag(&var, "ROUTING_REQUIRED", defaults.routing_required)?;
        let delivery_weekdays = match var("DELIVERY_WEEKDAYS") {
            Some(raw) => parse_weekdays(&raw)?,
            None => defaults.delivery_weekdays,
        };
        let max_concurrent_requests =
            parse_or(&var, "MAX_CONCURRENT_REQUESTS", defaults.max_concurrent_requests)?;

        let default_collection_point = match (var("COLLECTION_POINT_LAT"), var("COLLECTION_POINT_LNG")) {
            (Some(lat), Some(lng)) => {
                let coordinates = Coordinates {
                    lat: lat.trim().parse().context("COLLECTION_POINT_LAT must be a number")?,
                    lng: lng.trim().parse().context("COLLECTION_POINT_LNG must be a number")?,
                };
                if !coordinates.is_valid() {
                    anyhow::bail!("COLLECTION_POINT_LAT/LNG are out of range");
                }
                Some(CollectionPoint {
                    id: None,
                    name: var("COLLECTION_POINT_NAME").unwrap_or_else(|| "Default collection point".to_string()),
                    address: var("COLLECTION_POINT_ADDRESS").unwrap_or_default(),
                    coordinates,
                })
            }
            (None, None) => None,
            _ => anyhow::bail!("COLLECTION_POINT_LAT and COLLECTION_POINT_LNG must be set together"),
        };

        let batching = BatchingConfig {
            max_stops_per_batch,
            service_minutes_per_stop,
            route_start_time,
            routing_timeout,
            geocoding_timeout,
            two_opt,
            force_fallback,
            routing_required,
            delivery_weekdays,
            max_concurrent_requests,
            default_collection_point,
        };

        if batching.routing_required && valhalla_url.is_none() {
            tracing::warn!("ROUTING_REQUIRED is set but VALHALLA_URL is not; batching runs will be rejected");
        }

        Ok(Self {
            nats_url,
            database_url,
            nominatim_url,
            valhalla_url,
            zip_table_path,
            batching,
        })
    }
}

fn parse_or<T, V>(var: &V, key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    V: Fn(&str) -> Option<String>,
{
    match var(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{} has an invalid value '{}'", key, raw)),
        None => Ok(default),
    }
}

fn parse_flag<V>(var: &V, key: &str, default: bool) -> Result<bool>
where
    V: Fn(&str) -> Option<String>,
{
    match var(key).map(|v| v.trim().to_ascii_lowercase()) {
        None => Ok(default),
        Some(v) if matches!(v.as_str(), "1" | "true" | "yes" | "on") => Ok(true),
        Some(v) if matches!(v.as_str(), "0" | "false" | "no" | "off") => Ok(false),
        Some(v) => anyhow::bail!("{} must be a boolean, got '{}'", key, v),
    }
}

fn parse_weekdays(raw: &str) -> Result<Vec<Weekday>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<Weekday>()
                .map_err(|_| anyhow::anyhow!("DELIVERY_WEEKDAYS contains an unknown day '{}'", s))
        })
        .collect()
}
