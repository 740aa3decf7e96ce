//! # Inclusion Filters
//!
//! Three independent checks decide whether a tide prediction lands in the
//! calendar: height threshold, sun-relative window, and absolute clock-time
//! window. A prediction is kept only when all three pass.
//!
//! When no sunrise/sunset data exists for a date (polar conditions), the
//! sun-relative check passes permissively and reports empty diagnostics;
//! the orchestrator counts that as a warning for events it actually keeps.

use crate::config::{parse_clock_time, TideFilter, TimeFilterMode};
use crate::solar::SunCache;
use crate::{TidePrediction, TideType};
use chrono::{Duration, NaiveDateTime, NaiveTime, Timelike};
use chrono_tz::Tz;

/// Result of the sun-relative window check, including the diagnostics that
/// feed event descriptions (sunrise/sunset times, minutes until sunset).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SunWindowCheck {
    pub passes: bool,
    pub sunrise: Option<NaiveTime>,
    pub sunset: Option<NaiveTime>,
    /// Minutes from the prediction to sunset; negative after sunset.
    pub margin_minutes: Option<i64>,
}

impl SunWindowCheck {
    /// Permissive fallback used when sun data is unavailable or the check
    /// was never run.
    pub fn permissive() -> Self {
        SunWindowCheck {
            passes: true,
            sunrise: None,
            sunset: None,
            margin_minutes: None,
        }
    }

    /// True when the check passed only because sun data was missing.
    pub fn degraded(&self) -> bool {
        self.passes && self.sunrise.is_none() && self.sunset.is_none()
    }
}

/// Outcome of evaluating one prediction against one tide-type filter.
#[derive(Clone, Copy, Debug)]
pub struct FilterOutcome {
    pub included: bool,
    pub sun: SunWindowCheck,
}

/// Evaluate a prediction against its tide type's filter settings.
/// `threshold_m` is the configured threshold already converted to meters.
/// The sun and clock checks only run once the threshold passes.
pub fn evaluate(
    prediction: &TidePrediction,
    filter: &TideFilter,
    threshold_m: f64,
    lat: f64,
    lon: f64,
    tz: Tz,
    sun_cache: &mut SunCache,
) -> FilterOutcome {
    let threshold_ok = match prediction.tide_type {
        TideType::Low => prediction.height_m <= threshold_m,
        TideType::High => prediction.height_m >= threshold_m,
    };
    if !threshold_ok {
        return FilterOutcome {
            included: false,
            sun: SunWindowCheck::permissive(),
        };
    }

    let sun = check_sun_window(
        prediction.ts_local,
        lat,
        lon,
        tz,
        filter.time_filter,
        filter.minutes_after_sunrise,
        filter.minutes_before_sunset,
        sun_cache,
    );
    let clock_ok = check_clock_window(prediction.ts_local, filter);

    FilterOutcome {
        included: sun.passes && clock_ok,
        sun,
    }
}

/// Sun-relative window check for a local timestamp.
#[allow(clippy::too_many_arguments)]
pub fn check_sun_window(
    ts_local: NaiveDateTime,
    lat: f64,
    lon: f64,
    tz: Tz,
    mode: TimeFilterMode,
    minutes_after_sunrise: i64,
    minutes_before_sunset: i64,
    sun_cache: &mut SunCache,
) -> SunWindowCheck {
    let date = ts_local.date();
    let Some(sun) = sun_cache.sun_times(lat, lon, date, tz) else {
        // No sunrise/sunset for this date; include permissively
        return SunWindowCheck::permissive();
    };

    let sunrise_dt = date.and_time(sun.sunrise);
    let sunset_dt = date.and_time(sun.sunset);
    let required_start = sunrise_dt + Duration::minutes(minutes_after_sunrise);
    let required_end = sunset_dt - Duration::minutes(minutes_before_sunset);

    let passes = match mode {
        TimeFilterMode::None => true,
        TimeFilterMode::AfterSunrise => ts_local >= required_start,
        TimeFilterMode::BeforeSunset => ts_local <= required_end,
        TimeFilterMode::Between => ts_local >= required_start && ts_local <= required_end,
    };

    let margin_seconds = (sunset_dt - ts_local).num_seconds();
    let margin_minutes = (margin_seconds as f64 / 60.0).round() as i64;

    SunWindowCheck {
        passes,
        sunrise: Some(sun.sunrise),
        sunset: Some(sun.sunset),
        margin_minutes: Some(margin_minutes),
    }
}

/// Absolute clock-time window check. Bounds are inclusive; when both are
/// enabled and earliest > latest the window wraps past midnight and the
/// comparison becomes an OR.
pub fn check_clock_window(ts_local: NaiveDateTime, filter: &TideFilter) -> bool {
    if !filter.earliest_time_enabled && !filter.latest_time_enabled {
        return true;
    }

    let tide_minutes = ts_local.time().hour() * 60 + ts_local.time().minute();

    let earliest = if filter.earliest_time_enabled {
        parse_clock_time(&filter.earliest_time).unwrap_or(0)
    } else {
        0
    };
    let latest = if filter.latest_time_enabled {
        parse_clock_time(&filter.latest_time).unwrap_or(23 * 60 + 59)
    } else {
        23 * 60 + 59
    };

    if filter.earliest_time_enabled && filter.latest_time_enabled && earliest > latest {
        tide_minutes >= earliest || tide_minutes <= latest
    } else {
        let mut passes = true;
        if filter.earliest_time_enabled {
            passes = passes && tide_minutes >= earliest;
        }
        if filter.latest_time_enabled {
            passes = passes && tide_minutes <= latest;
        }
        passes
    }
}
