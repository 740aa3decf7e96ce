//! End-to-end pipeline tests: synthetic NOAA predictions in, finished ICS
//! document out, via `generator::build_calendar`.

use chrono::{NaiveDate, NaiveDateTime};
use tide_cal_lib::config::{
    CalendarParams, SunEventsConfig, TideFilter, TimeFilterMode, Unit,
};
use tide_cal_lib::generator::{build_calendar, GenerateError};
use tide_cal_lib::solar;
use tide_cal_lib::{TidePrediction, TideType};

/// San Francisco station with low tides at or below -0.5 ft, kept only after
/// sunrise, high tides and sun events off. Mirrors the default configuration.
fn sf_low_tide_params() -> CalendarParams {
    CalendarParams {
        station_id: "9414290".to_string(),
        station_name: "San Francisco".to_string(),
        lat: 37.806,
        lon: -122.465,
        timezone: "America/Los_Angeles".to_string(),
        year: Some(2024),
        unit: Unit::Ft,
        low_tides: TideFilter {
            include: true,
            threshold: -0.5,
            time_filter: TimeFilterMode::AfterSunrise,
            minutes_after_sunrise: 0,
            minutes_before_sunset: 0,
            earliest_time_enabled: false,
            earliest_time: "00:00".to_string(),
            latest_time_enabled: false,
            latest_time: "23:59".to_string(),
        },
        high_tides: TideFilter {
            include: false,
            threshold: 4.0,
            time_filter: TimeFilterMode::None,
            minutes_after_sunrise: 0,
            minutes_before_sunset: 0,
            earliest_time_enabled: false,
            earliest_time: "00:00".to_string(),
            latest_time_enabled: false,
            latest_time: "23:59".to_string(),
        },
        sun_events: SunEventsConfig {
            sunrise: false,
            sunset: false,
            match_tide_days: true,
        },
    }
}

fn pred(ts: &str, tide_type: TideType, height_m: f64) -> TidePrediction {
    TidePrediction {
        ts_local: NaiveDateTime::parse_from_str(ts, "%Y-%m-%d %H:%M").unwrap(),
        tide_type,
        height_m,
    }
}

/// Reverse RFC 5545 line folding so assertions can look at whole properties.
fn logical_lines(content: &str) -> Vec<String> {
    let mut lines: Vec<String> = Vec::new();
    for raw in content.split("\r\n") {
        if let Some(rest) = raw.strip_prefix(' ') {
            if let Some(last) = lines.last_mut() {
                last.push_str(rest);
                continue;
            }
        }
        lines.push(raw.to_string());
    }
    lines
}

fn summaries(content: &str) -> Vec<String> {
    logical_lines(content)
        .into_iter()
        .filter_map(|l| l.strip_prefix("SUMMARY:").map(|s| s.to_string()))
        .collect()
}

#[test]
fn default_scenario_keeps_only_qualifying_lows_after_sunrise() {
    let params = sf_low_tide_params();
    // -0.5 ft threshold is about -0.152 m
    let predictions = vec![
        // Deep low before sunrise in June (sunrise ~05:48): excluded
        pred("2024-06-20 04:00", TideType::Low, -0.40),
        // Deep low after sunrise: kept
        pred("2024-06-20 10:30", TideType::Low, -0.30),
        // Shallow low after sunrise, above threshold: excluded
        pred("2024-06-21 11:00", TideType::Low, -0.05),
        // High tide: type disabled, excluded
        pred("2024-06-21 17:00", TideType::High, 1.80),
        // Another qualifying low on a different day
        pred("2024-07-04 09:15", TideType::Low, -0.25),
    ];

    let built = build_calendar(&params, &predictions, None).unwrap();
    assert_eq!(built.kept_count, 2);
    assert_eq!(built.kept_low_count, 2);
    assert_eq!(built.kept_high_count, 0);
    assert_eq!(built.sun_events_count, 0);
    assert_eq!(built.warnings, 0);
    assert_eq!(built.errors, 0);

    let sums = summaries(&built.content);
    assert_eq!(sums.len(), 2);
    for s in &sums {
        assert!(s.starts_with("Low Tide "), "unexpected summary {s:?}");
        // Displayed height must honor the -0.5 ft threshold
        let value: f64 = s
            .trim_start_matches("Low Tide ")
            .trim_end_matches(" ft")
            .parse()
            .unwrap();
        assert!(value <= -0.5, "kept event above threshold: {s}");
    }

    // Every kept event starts at or after that day's sunrise
    let tz: chrono_tz::Tz = params.timezone.parse().unwrap();
    for line in logical_lines(&built.content) {
        if let Some(start) = line.strip_prefix(&format!("DTSTART;TZID={}:", tz.name())) {
            let local = NaiveDateTime::parse_from_str(start, "%Y%m%dT%H%M%S").unwrap();
            let sun = solar::compute_sun_times(params.lat, params.lon, local.date(), tz)
                .expect("San Francisco always has sunrise/sunset");
            assert!(
                local.time() >= sun.sunrise,
                "event at {local} starts before sunrise {}",
                sun.sunrise
            );
        }
    }
}

#[test]
fn sun_events_limited_to_days_with_kept_tides() {
    let mut params = sf_low_tide_params();
    params.sun_events.sunrise = true;
    params.sun_events.sunset = true;
    params.sun_events.match_tide_days = true;

    let predictions = vec![
        pred("2024-06-20 10:30", TideType::Low, -0.30),
        pred("2024-07-04 09:15", TideType::Low, -0.25),
        // Excluded low: its day should get no sun events
        pred("2024-08-01 03:00", TideType::Low, -0.30),
    ];

    let built = build_calendar(&params, &predictions, None).unwrap();
    assert_eq!(built.kept_count, 2);
    // Two qualifying days, sunrise and sunset each
    assert_eq!(built.sun_events_count, 4);

    let sums = summaries(&built.content);
    assert_eq!(sums.iter().filter(|s| *s == "Sunrise").count(), 2);
    assert_eq!(sums.iter().filter(|s| *s == "Sunset").count(), 2);
    assert!(!built.content.contains("UID:sunrise-9414290-20240801"));
}

#[test]
fn sun_events_cover_whole_year_when_unrestricted() {
    let mut params = sf_low_tide_params();
    params.low_tides.include = false;
    params.sun_events.sunrise = true;
    params.sun_events.sunset = true;
    params.sun_events.match_tide_days = false;

    let built = build_calendar(&params, &[], None).unwrap();
    assert_eq!(built.kept_count, 0);
    // 2024 is a leap year: 366 sunrises + 366 sunsets at this latitude
    assert_eq!(built.sun_events_count, 732);
}

#[test]
fn polar_station_counts_warnings_for_degraded_sun_filter() {
    let mut params = sf_low_tide_params();
    params.station_id = "9999999".to_string();
    params.station_name = "Longyearbyen".to_string();
    params.lat = 78.22;
    params.lon = 15.65;
    params.timezone = "Arctic/Longyearbyen".to_string();

    // Midsummer: the sun never sets, so the sunrise filter cannot apply and
    // qualifying tides pass through with a warning each.
    let predictions = vec![
        pred("2024-06-20 02:00", TideType::Low, -0.30),
        pred("2024-06-21 14:00", TideType::Low, -0.25),
    ];

    let built = build_calendar(&params, &predictions, None).unwrap();
    assert_eq!(built.kept_count, 2);
    assert_eq!(built.warnings, 2);
}

#[test]
fn invalid_timezone_is_a_validation_error() {
    let mut params = sf_low_tide_params();
    params.timezone = "Mars/Olympus_Mons".to_string();

    let err = build_calendar(&params, &[], None).unwrap_err();
    assert!(matches!(err, GenerateError::Validation(_)));
}

#[test]
fn document_envelope_names_the_included_event_kinds() {
    let params = sf_low_tide_params();
    let built = build_calendar(&params, &[], None).unwrap();

    let lines = logical_lines(&built.content);
    assert_eq!(lines.first().map(String::as_str), Some("BEGIN:VCALENDAR"));
    assert!(lines.contains(&"PRODID:-//TideCal//SingleStation//EN".to_string()));
    let name = lines
        .iter()
        .find_map(|l| l.strip_prefix("X-WR-CALNAME:"))
        .expect("calendar name present");
    assert!(name.contains("San Francisco"));
    assert!(name.contains("Low tides"));
    assert!(!name.contains("High tides"));
    // Trailing END after the (eventless) envelope
    assert!(lines.iter().any(|l| l == "END:VCALENDAR"));
}
