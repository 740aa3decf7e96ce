//! # Tide Calendar Core Library
//!
//! Turns raw NOAA tide-height predictions for a single station and year into
//! a subscribable ICS calendar, filtered by height thresholds, sun-relative
//! windows (sunrise/sunset margins), and absolute clock-time windows.
//!
//! ## Pipeline
//!
//! 1. **Fetch**: NOAA CO-OPS high/low predictions for the year, with an
//!    on-disk JSON cache and bounded retries ([`provider`])
//! 2. **Filter**: threshold + sun-window + clock-window checks per
//!    prediction ([`filter`]), backed by a low-precision solar ephemeris
//!    ([`solar`])
//! 3. **Serialize**: RFC 5545 ICS output with escaping, 75-octet line
//!    folding, and atomic file replacement ([`ics`])
//! 4. **Identify**: a deterministic 12-hex-char calendar id derived from the
//!    content-relevant parameters, persisted in a JSON registry
//!    ([`registry`])
//!
//! The whole run is driven by [`generator::generate`], which returns run
//! statistics (fetched/kept/warning counts and elapsed time).
//!
//! ## Units and time
//!
//! Heights are stored in meters everywhere; feet only appear at
//! threshold-conversion and display time (1 m = 3.28084 ft). Prediction
//! timestamps are local wall-clock times paired with the station's IANA
//! timezone, so DST transitions are handled per date.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

pub mod config;
pub mod filter;
pub mod generator;
pub mod ics;
pub mod provider;
pub mod registry;
pub mod solar;

/// High or low water, as reported by the NOAA `hilo` interval.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TideType {
    High,
    Low,
}

impl TideType {
    /// Display label used in event summaries and descriptions.
    pub fn label(self) -> &'static str {
        match self {
            TideType::High => "High Tide",
            TideType::Low => "Low Tide",
        }
    }
}

/// A single predicted high- or low-water event.
///
/// `ts_local` is wall-clock time in the station's timezone (NOAA is queried
/// with `time_zone=lst_ldt`, so no conversion happens at parse time).
/// Heights are always meters above MLLW; unit conversion is applied only
/// when comparing thresholds or rendering text.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TidePrediction {
    /// Local timestamp of the predicted extreme.
    pub ts_local: NaiveDateTime,
    /// High or low water.
    pub tide_type: TideType,
    /// Height in meters above MLLW datum.
    pub height_m: f64,
}
