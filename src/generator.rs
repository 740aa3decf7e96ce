//! # Generation Pipeline
//!
//! Drives one calendar generation end to end: validate the parameters,
//! resolve the registry entry, fetch the year's predictions, filter each
//! one, optionally add sunrise/sunset events, serialize, and persist the
//! ICS file atomically. Returns run statistics for logging and the caller's
//! success message.
//!
//! Each run is single-threaded and synchronous apart from the bounded
//! network fetch; the only shared resources are the prediction cache files
//! and the registry document.

use crate::config::{CalendarParams, Config, TideFilter, TimeFilterMode, Unit};
use crate::filter;
use crate::ics::{IcsWriter, SunEventKind};
use crate::provider::{feet_to_meters, ProviderError, TideProvider};
use crate::registry::{CalendarRegistry, RegistryError};
use crate::solar::SunCache;
use crate::{TidePrediction, TideType};
use chrono::{Datelike, NaiveDate};
use std::collections::BTreeSet;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum GenerateError {
    /// Malformed parameters; no generation was attempted.
    #[error("invalid parameters: {0}")]
    Validation(String),

    /// The prediction source failed after exhausting retries.
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// Registry read/write failure.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// Calendar file write failure. The previous file, if any, is left
    /// intact; no partial file replaces it.
    #[error("storage failure: {0}")]
    Storage(#[from] std::io::Error),
}

/// Statistics for one generation run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GenerationStats {
    pub calendar_id: String,
    pub year: i32,
    pub fetched_count: usize,
    pub kept_count: usize,
    pub kept_low_count: usize,
    pub kept_high_count: usize,
    pub sun_events_count: usize,
    /// Kept events whose sun-relative check fell back on missing sun data.
    pub warnings: usize,
    /// Events that failed to serialize and were skipped.
    pub errors: usize,
    pub duration: Duration,
}

/// A serialized calendar plus the counters accumulated while building it.
#[derive(Debug)]
pub struct BuiltCalendar {
    pub content: String,
    pub kept_count: usize,
    pub kept_low_count: usize,
    pub kept_high_count: usize,
    pub sun_events_count: usize,
    pub warnings: usize,
    pub errors: usize,
}

/// Run the full pipeline for `config`, creating or updating the registry
/// entry for the parameter set (or for `force_id` when editing an existing
/// calendar in place).
pub async fn generate(
    config: &Config,
    registry: &CalendarRegistry,
    force_id: Option<&str>,
) -> Result<GenerationStats, GenerateError> {
    let started = Instant::now();
    let params = &config.calendar;

    params.validate().map_err(GenerateError::Validation)?;
    let year = params.resolve_year();

    // Registry entry first, so the target id exists even if the fetch fails
    let entry = registry.get_or_create(params, force_id)?;

    let provider = TideProvider::new(config.provider.clone(), config.cache.clone())?;
    let (start, end) = year_date_range(year);
    let predictions = provider
        .fetch(&params.station_id, start, end, &params.timezone)
        .await?;
    let fetched_count = predictions.len();

    let built = build_calendar(
        params,
        &predictions,
        config.output.base_url.as_deref(),
    )?;

    let ics_path = registry.calendar_file_path(&entry.id);
    IcsWriter::write_to_file(&built.content, &ics_path)?;

    let stats = GenerationStats {
        calendar_id: entry.id,
        year,
        fetched_count,
        kept_count: built.kept_count,
        kept_low_count: built.kept_low_count,
        kept_high_count: built.kept_high_count,
        sun_events_count: built.sun_events_count,
        warnings: built.warnings,
        errors: built.errors,
        duration: started.elapsed(),
    };

    info!(
        calendar_id = %stats.calendar_id,
        year = stats.year,
        fetched = stats.fetched_count,
        kept = stats.kept_count,
        kept_low = stats.kept_low_count,
        kept_high = stats.kept_high_count,
        sun_events = stats.sun_events_count,
        warnings = stats.warnings,
        errors = stats.errors,
        duration_ms = stats.duration.as_millis() as u64,
        "generation completed"
    );

    Ok(stats)
}

/// Filter predictions, queue events, and serialize the calendar. Split from
/// [`generate`] so tests can drive the pipeline without network or
/// registry.
pub fn build_calendar(
    params: &CalendarParams,
    predictions: &[TidePrediction],
    base_url: Option<&str>,
) -> Result<BuiltCalendar, GenerateError> {
    let tz = params.tz().map_err(GenerateError::Validation)?;
    let year = params.resolve_year();

    // Thresholds in meters, converted once
    let low_threshold_m = threshold_m(&params.low_tides, params.unit);
    let high_threshold_m = threshold_m(&params.high_tides, params.unit);

    let mut writer = IcsWriter::new(params, tz, base_url);
    let mut sun_cache = SunCache::new();
    let mut qualifying_dates: BTreeSet<NaiveDate> = BTreeSet::new();

    let mut kept_low_count = 0;
    let mut kept_high_count = 0;
    let mut warnings = 0;

    for prediction in predictions {
        let (tide_filter, threshold) = match prediction.tide_type {
            TideType::Low => (&params.low_tides, low_threshold_m),
            TideType::High => (&params.high_tides, high_threshold_m),
        };
        let Some(threshold_m) = threshold else {
            continue; // tide type disabled
        };

        let outcome = filter::evaluate(
            prediction,
            tide_filter,
            threshold_m,
            params.lat,
            params.lon,
            tz,
            &mut sun_cache,
        );
        if !outcome.included {
            continue;
        }

        if tide_filter.time_filter != TimeFilterMode::None && outcome.sun.degraded() {
            warn!(
                ts = %prediction.ts_local,
                "no sunrise/sunset data; including event permissively"
            );
            warnings += 1;
        }

        match prediction.tide_type {
            TideType::Low => kept_low_count += 1,
            TideType::High => kept_high_count += 1,
        }
        qualifying_dates.insert(prediction.ts_local.date());
        writer.add_tide_event(prediction.clone(), outcome.sun);
    }

    let kept_count = kept_low_count + kept_high_count;

    // Optional standalone sunrise/sunset events
    let mut sun_events_count = 0;
    if params.sun_events.sunrise || params.sun_events.sunset {
        let dates: Vec<NaiveDate> = if params.sun_events.match_tide_days {
            qualifying_dates.iter().copied().collect()
        } else {
            dates_in_year(year)
        };

        for date in dates {
            let Some(times) = sun_cache.sun_times(params.lat, params.lon, date, tz) else {
                continue;
            };
            if params.sun_events.sunrise {
                writer.add_sun_event(date, times.sunrise, SunEventKind::Sunrise);
                sun_events_count += 1;
            }
            if params.sun_events.sunset {
                writer.add_sun_event(date, times.sunset, SunEventKind::Sunset);
                sun_events_count += 1;
            }
        }
    }

    let (content, errors) = writer.generate();

    Ok(BuiltCalendar {
        content,
        kept_count,
        kept_low_count,
        kept_high_count,
        sun_events_count,
        warnings,
        errors,
    })
}

/// Configured threshold converted to meters, or `None` when the tide type
/// is disabled.
fn threshold_m(filter: &TideFilter, unit: Unit) -> Option<f64> {
    if !filter.include {
        return None;
    }
    Some(match unit {
        Unit::Ft => feet_to_meters(filter.threshold),
        Unit::M => filter.threshold,
    })
}

/// Full-year date range for the upstream request.
pub fn year_date_range(year: i32) -> (NaiveDate, NaiveDate) {
    // Years are pre-validated to 1900..=2100, so construction cannot fail
    let start = NaiveDate::from_ymd_opt(year, 1, 1).expect("valid year range");
    let end = NaiveDate::from_ymd_opt(year, 12, 31).expect("valid year range");
    (start, end)
}

/// Every date in the year, in order. Leap years included.
fn dates_in_year(year: i32) -> Vec<NaiveDate> {
    let (start, end) = year_date_range(year);
    let mut dates = Vec::with_capacity(366);
    let mut current = start;
    while current <= end {
        dates.push(current);
        match current.succ_opt() {
            Some(next) => current = next,
            None => break,
        }
    }
    dates
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn year_range_covers_whole_year() {
        let (start, end) = year_date_range(2024);
        assert_eq!(start.ordinal(), 1);
        assert_eq!(end.month(), 12);
        assert_eq!(end.day(), 31);
    }

    #[test]
    fn dates_in_year_handles_leap_years() {
        assert_eq!(dates_in_year(2024).len(), 366);
        assert_eq!(dates_in_year(2023).len(), 365);
    }

    #[test]
    fn thresholds_convert_only_for_feet() {
        let filter = TideFilter {
            include: true,
            threshold: -0.5,
            ..Config::default().calendar.low_tides
        };
        let in_meters = threshold_m(&filter, Unit::M).unwrap();
        assert!((in_meters - (-0.5)).abs() < 1e-12);
        let from_feet = threshold_m(&filter, Unit::Ft).unwrap();
        assert!((from_feet - (-0.1524)).abs() < 1e-4);

        let disabled = TideFilter {
            include: false,
            ..filter
        };
        assert_eq!(threshold_m(&disabled, Unit::Ft), None);
    }
}
