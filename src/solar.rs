//! # Solar Ephemeris
//!
//! Sunrise/sunset computation for arbitrary dates and coordinates using the
//! standard low-precision solar position formulas (mean longitude, mean
//! anomaly, ecliptic longitude, declination) with the equation of time for
//! apparent solar noon. Accuracy is on the order of a minute or two, which
//! is plenty for tide-window filtering.
//!
//! Zenith is 90.833 degrees (sun's center 0.833 degrees below the geometric
//! horizon), the conventional sunrise/sunset threshold accounting for
//! refraction and the solar disc radius.
//!
//! Results are memoized in a [`SunCache`] scoped to one generation run,
//! since a year of tide predictions shares at most 366 distinct dates.

use chrono::{Datelike, LocalResult, NaiveDate, NaiveTime, Offset, TimeZone};
use chrono_tz::Tz;
use std::collections::HashMap;

/// Local sunrise and sunset for one date. Both are always present; polar
/// day/night yields no `SunTimes` at all.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SunTimes {
    pub sunrise: NaiveTime,
    pub sunset: NaiveTime,
}

/// Per-run memoization of sunrise/sunset results, keyed by
/// (date, lat, lon, timezone). Passed through the pipeline explicitly
/// rather than living in process-wide state.
#[derive(Default)]
pub struct SunCache {
    entries: HashMap<(NaiveDate, u64, u64, Tz), Option<SunTimes>>,
}

impl SunCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sunrise/sunset for the given location and date, computed once per
    /// distinct key. `None` means polar day or polar night.
    pub fn sun_times(&mut self, lat: f64, lon: f64, date: NaiveDate, tz: Tz) -> Option<SunTimes> {
        let key = (date, lat.to_bits(), lon.to_bits(), tz);
        *self
            .entries
            .entry(key)
            .or_insert_with(|| compute_sun_times(lat, lon, date, tz))
    }
}

/// Compute local sunrise/sunset without memoization.
pub fn compute_sun_times(lat: f64, lon: f64, date: NaiveDate, tz: Tz) -> Option<SunTimes> {
    let jd = julian_day(date);
    let lat_rad = lat.to_radians();

    // Solar position (low precision, J2000 epoch)
    let n = jd - 2_451_545.0;
    let l = (280.460 + 0.985_647_4 * n).rem_euclid(360.0);
    let g = ((357.528 + 0.985_600_3 * n).rem_euclid(360.0)).to_radians();
    let lambda = (l + 1.915 * g.sin() + 0.020 * (2.0 * g).sin()).to_radians();

    // Declination
    let sin_delta = (23.439_f64).to_radians().sin() * lambda.sin();
    let cos_delta = (1.0 - sin_delta * sin_delta).sqrt();

    // Hour angle at the sunrise/sunset zenith
    let zenith = (90.833_f64).to_radians();
    let cos_h = (zenith.cos() - lat_rad.sin() * sin_delta) / (lat_rad.cos() * cos_delta);
    if !(-1.0..=1.0).contains(&cos_h) {
        // Polar night (cos_h > 1) or polar day (cos_h < -1)
        return None;
    }
    let half_day_hours = cos_h.acos().to_degrees() / 15.0;

    // Equation of time, in minutes
    let e = 0.0167;
    let y = {
        let t = ((23.439_f64).to_radians() / 2.0).tan();
        t * t
    };
    let eot = 4.0
        * (y * (2.0 * lambda).sin() - 2.0 * e * g.sin()
            + 4.0 * e * y * g.sin() * (2.0 * lambda).cos()
            - 0.5 * y * y * (4.0 * lambda).sin()
            - 1.25 * e * e * (2.0 * g).sin())
        .to_degrees();

    // Apparent solar noon in UTC decimal hours, then local wall clock using
    // the zone's offset for this specific date (DST respected)
    let solar_noon = 12.0 - (lon / 15.0) - (eot / 60.0);
    let offset = utc_offset_hours(date, tz);
    let sunrise = (solar_noon - half_day_hours + offset).rem_euclid(24.0);
    let sunset = (solar_noon + half_day_hours + offset).rem_euclid(24.0);

    Some(SunTimes {
        sunrise: decimal_hours_to_time(sunrise),
        sunset: decimal_hours_to_time(sunset),
    })
}

/// Julian day number at 0h UT for a proleptic-Gregorian civil date.
fn julian_day(date: NaiveDate) -> f64 {
    let mut year = date.year() as f64;
    let mut month = date.month() as f64;
    let day = date.day() as f64;

    if month <= 2.0 {
        year -= 1.0;
        month += 12.0;
    }
    let a = (year / 100.0).floor();
    let b = 2.0 - a + (a / 4.0).floor();

    (365.25 * (year + 4716.0)).floor() + (30.6001 * (month + 1.0)).floor() + day + b - 1524.5
}

/// The zone's UTC offset in hours at local noon of the given date.
fn utc_offset_hours(date: NaiveDate, tz: Tz) -> f64 {
    let noon = date.and_hms_opt(12, 0, 0).expect("noon is a valid wall-clock time");
    let seconds = match tz.from_local_datetime(&noon) {
        LocalResult::Single(dt) => dt.offset().fix().local_minus_utc(),
        // Fall-back transition: either side works for a whole-day offset
        LocalResult::Ambiguous(dt, _) => dt.offset().fix().local_minus_utc(),
        // Spring-forward gap at noon is not a thing in practice, but stay
        // total: interpret the naive time as UTC and take that offset
        LocalResult::None => tz.from_utc_datetime(&noon).offset().fix().local_minus_utc(),
    };
    seconds as f64 / 3600.0
}

/// Convert decimal hours in [0, 24) to a wall-clock time, rounding to the
/// minute and carrying 59.6m -> next hour.
fn decimal_hours_to_time(decimal_hours: f64) -> NaiveTime {
    let mut hours = decimal_hours.floor();
    let mut minutes = ((decimal_hours - hours) * 60.0).round();
    if minutes >= 60.0 {
        hours += 1.0;
        minutes = 0.0;
    }
    let hours = (hours as i64).rem_euclid(24) as u32;
    NaiveTime::from_hms_opt(hours, minutes as u32, 0)
        .expect("carried hours/minutes are in range")
}
