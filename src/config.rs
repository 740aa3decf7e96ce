//! # Configuration Management
//!
//! Loads and validates the generator configuration from a `tide-cal.toml`
//! file. The calendar parameters (station, year, filters) are the
//! content-relevant subset that also feeds the calendar id hash; the cache,
//! provider, and output sections are runtime plumbing.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::{info, warn};

/// Display unit for tide heights. Stored values are always meters.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Unit {
    Ft,
    M,
}

impl Unit {
    pub fn suffix(self) -> &'static str {
        match self {
            Unit::Ft => "ft",
            Unit::M => "m",
        }
    }
}

/// Sun-relative inclusion mode for one tide type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeFilterMode {
    None,
    AfterSunrise,
    BeforeSunset,
    Between,
}

/// Per-tide-type filter settings (thresholds, sun window, clock window).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TideFilter {
    /// Whether this tide type is included at all.
    pub include: bool,
    /// Threshold in the configured display unit. Low tides are kept at or
    /// below it, high tides at or above it.
    pub threshold: f64,
    pub time_filter: TimeFilterMode,
    pub minutes_after_sunrise: i64,
    pub minutes_before_sunset: i64,
    pub earliest_time_enabled: bool,
    /// `HH:MM` 24-hour local clock bound; only read when enabled.
    pub earliest_time: String,
    pub latest_time_enabled: bool,
    pub latest_time: String,
}

impl TideFilter {
    fn disabled() -> Self {
        TideFilter {
            include: false,
            threshold: 0.0,
            time_filter: TimeFilterMode::None,
            minutes_after_sunrise: 0,
            minutes_before_sunset: 0,
            earliest_time_enabled: false,
            earliest_time: "00:00".to_string(),
            latest_time_enabled: false,
            latest_time: "23:59".to_string(),
        }
    }
}

/// Sunrise/sunset event inclusion settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SunEventsConfig {
    pub sunrise: bool,
    pub sunset: bool,
    /// Restrict sun events to days that have at least one kept tide.
    pub match_tide_days: bool,
}

/// Full parameter snapshot for one calendar. This is what the registry
/// persists and (minus the display-only fields) what the calendar id is
/// hashed from.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CalendarParams {
    /// NOAA CO-OPS station id, 7-8 digits.
    pub station_id: String,
    /// Human-readable station name. Display only, excluded from the id hash.
    pub station_name: String,
    /// Station latitude in degrees, for sunrise/sunset. Display/filter aid
    /// only, excluded from the id hash.
    pub lat: f64,
    /// Station longitude in degrees.
    pub lon: f64,
    /// IANA timezone identifier, e.g. `America/Los_Angeles`.
    pub timezone: String,
    /// Target year; `None` resolves to the current year.
    pub year: Option<i32>,
    pub unit: Unit,
    pub low_tides: TideFilter,
    pub high_tides: TideFilter,
    pub sun_events: SunEventsConfig,
}

/// NOAA CO-OPS provider settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub base_url: String,
    pub timeout_secs: u64,
    /// Additional attempts after the first failure.
    pub retry_attempts: u32,
    pub user_agent: String,
}

/// On-disk prediction cache settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CacheConfig {
    pub dir: String,
    /// Cache entries older than this are refetched. Zero disables caching.
    pub ttl_secs: u64,
}

/// Where generated calendars and the registry live, plus the public base
/// URL used in event descriptions and subscription links.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OutputConfig {
    pub data_dir: String,
    pub base_url: Option<String>,
}

/// Application configuration loaded from tide-cal.toml.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    pub calendar: CalendarParams,
    pub provider: ProviderConfig,
    pub cache: CacheConfig,
    pub output: OutputConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            calendar: CalendarParams {
                station_id: "9414290".to_string(),
                station_name: "San Francisco".to_string(),
                lat: 37.806,
                lon: -122.465,
                timezone: "America/Los_Angeles".to_string(),
                year: None,
                unit: Unit::Ft,
                low_tides: TideFilter {
                    include: true,
                    threshold: -0.5,
                    time_filter: TimeFilterMode::AfterSunrise,
                    ..TideFilter::disabled()
                },
                high_tides: TideFilter {
                    threshold: 4.0,
                    ..TideFilter::disabled()
                },
                sun_events: SunEventsConfig {
                    sunrise: false,
                    sunset: false,
                    match_tide_days: true,
                },
            },
            provider: ProviderConfig {
                base_url: "https://api.tidesandcurrents.noaa.gov/api/prod/datagetter"
                    .to_string(),
                timeout_secs: 15,
                retry_attempts: 1,
                user_agent: "TideCal/1.0 (Tide Calendar Generator)".to_string(),
            },
            cache: CacheConfig {
                dir: "cache".to_string(),
                ttl_secs: 86_400,
            },
            output: OutputConfig {
                data_dir: "data".to_string(),
                base_url: None,
            },
        }
    }
}

impl Config {
    /// Load configuration from tide-cal.toml in the working directory.
    /// Falls back to the default configuration if the file is missing or
    /// invalid.
    pub fn load() -> Self {
        Self::load_from_path("tide-cal.toml")
    }

    /// Load configuration from a specific path, falling back to defaults.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Self {
        match fs::read_to_string(&path) {
            Ok(contents) => match toml::from_str::<Config>(&contents) {
                Ok(config) => {
                    info!(
                        station = %config.calendar.station_id,
                        "loaded configuration"
                    );
                    config
                }
                Err(e) => {
                    warn!("invalid config file format: {e}; using defaults");
                    Self::default()
                }
            },
            Err(_) => {
                info!("no config file found, using default configuration");
                Self::default()
            }
        }
    }
}

/// Parse an `HH:MM` 24-hour string to minutes past midnight.
pub fn parse_clock_time(value: &str) -> Option<u32> {
    let (h, m) = value.split_once(':')?;
    if h.len() != 2 || m.len() != 2 {
        return None;
    }
    let h: u32 = h.parse().ok()?;
    let m: u32 = m.parse().ok()?;
    if h > 23 || m > 59 {
        return None;
    }
    Some(h * 60 + m)
}

impl CalendarParams {
    /// Resolve the target year, falling back to the current year when unset
    /// or out of the supported range.
    pub fn resolve_year(&self) -> i32 {
        use chrono::Datelike;
        match self.year {
            Some(y) if (1900..=2100).contains(&y) => y,
            _ => chrono::Local::now().year(),
        }
    }

    /// Parse the configured timezone identifier.
    pub fn tz(&self) -> Result<chrono_tz::Tz, String> {
        self.timezone
            .parse::<chrono_tz::Tz>()
            .map_err(|_| format!("invalid timezone identifier: {}", self.timezone))
    }

    /// Validate all user-supplied fields, returning the first problem found
    /// as a human-readable message.
    pub fn validate(&self) -> Result<(), String> {
        if self.station_id.len() < 7
            || self.station_id.len() > 8
            || !self.station_id.chars().all(|c| c.is_ascii_digit())
        {
            return Err("invalid station id: must be 7-8 digits".to_string());
        }
        if self.station_name.is_empty() {
            return Err("station name is required".to_string());
        }
        if !(-90.0..=90.0).contains(&self.lat) {
            return Err("invalid latitude: must be -90 to 90".to_string());
        }
        if !(-180.0..=180.0).contains(&self.lon) {
            return Err("invalid longitude: must be -180 to 180".to_string());
        }
        self.tz()?;
        if let Some(year) = self.year {
            if !(1900..=2100).contains(&year) {
                return Err("year must be between 1900 and 2100".to_string());
            }
        }
        for (label, filter) in [("low", &self.low_tides), ("high", &self.high_tides)] {
            if !(0..=1440).contains(&filter.minutes_after_sunrise) {
                return Err(format!(
                    "{label} tide sunrise margin must be between 0 and 1440 minutes"
                ));
            }
            if !(0..=1440).contains(&filter.minutes_before_sunset) {
                return Err(format!(
                    "{label} tide sunset margin must be between 0 and 1440 minutes"
                ));
            }
            if filter.earliest_time_enabled && parse_clock_time(&filter.earliest_time).is_none() {
                return Err(format!(
                    "{label} tide earliest time must be in HH:MM (24h) format"
                ));
            }
            if filter.latest_time_enabled && parse_clock_time(&filter.latest_time).is_none() {
                return Err(format!(
                    "{label} tide latest time must be in HH:MM (24h) format"
                ));
            }
        }
        Ok(())
    }
}
