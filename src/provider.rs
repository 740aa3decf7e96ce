//! # NOAA Tide Prediction Fetching and Caching
//!
//! Network client for the NOAA CO-OPS predictions API, with an on-disk JSON
//! cache keyed by the full request (station, date range, timezone, query
//! parameters) and a fixed-delay retry loop for unreliable conditions.
//!
//! ## Request shape
//!
//! High/low predictions over a date range, MLLW datum, local station time
//! (`lst_ldt`), metric units:
//!
//! ```text
//! ?product=predictions&begin_date=YYYYMMDD&end_date=YYYYMMDD&datum=MLLW
//!  &station=<id>&time_zone=lst_ldt&units=metric&interval=hilo&format=json
//! ```
//!
//! The response is either `{"predictions": [{t, v, type}, ...]}` or an
//! `{"error": {...}}` object. Heights come back in meters and stay in
//! meters; feet only appear at threshold/display time.
//!
//! ## Caching
//!
//! One file per distinct request under the cache dir, holding the raw
//! predictions array. Freshness is the file's modification age against the
//! configured TTL. Cache write failures are non-fatal; a live fetch result
//! is still returned.

use crate::config::{CacheConfig, ProviderConfig};
use crate::{TidePrediction, TideType};
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use std::{fs, io};
use thiserror::Error;
use tracing::{debug, warn};

/// Fixed conversion factor: 1 meter = 3.28084 feet.
pub fn meters_to_feet(meters: f64) -> f64 {
    meters * 3.28084
}

/// Inverse of [`meters_to_feet`].
pub fn feet_to_meters(feet: f64) -> f64 {
    feet / 3.28084
}

/// Delay between retry attempts. Fixed, no backoff.
const RETRY_DELAY: Duration = Duration::from_secs(2);

/// Post-retry failure modes, each with a human-readable diagnosis so the
/// caller can surface what actually went wrong.
#[derive(Error, Debug)]
pub enum ProviderError {
    /// Transport-level failure (DNS, connect, timeout, read).
    #[error(
        "NOAA API is currently unavailable. This may be temporary - please try again \
         in a few minutes. Failed to fetch tide data after {attempts} attempts. \
         Last error: {message}"
    )]
    Network { attempts: u32, message: String },

    /// Response body was not valid JSON.
    #[error(
        "NOAA API returned invalid data format. This may indicate a temporary \
         service issue. Technical details: {0}"
    )]
    Malformed(String),

    /// The API answered with an explicit error object.
    #[error("{0}")]
    Upstream(String),

    /// The response parsed but carried no predictions.
    #[error(
        "No tide predictions found for station {station}. The station may not \
         provide tide prediction data, or the service may be temporarily unavailable."
    )]
    Empty { station: String },
}

/// Raw prediction record as returned by NOAA. Cached verbatim.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RawPrediction {
    /// Local timestamp, `YYYY-MM-DD HH:MM`.
    pub t: String,
    /// Height in meters, as a decimal string.
    pub v: String,
    /// `"H"` or `"L"`.
    #[serde(rename = "type")]
    pub tide_type: String,
}

#[derive(Debug, Deserialize)]
struct NoaaResponse {
    predictions: Option<Vec<RawPrediction>>,
    error: Option<NoaaErrorBody>,
}

#[derive(Debug, Deserialize)]
struct NoaaErrorBody {
    message: Option<String>,
}

/// NOAA CO-OPS prediction source with caching and retry.
pub struct TideProvider {
    http: reqwest::Client,
    provider: ProviderConfig,
    cache: CacheConfig,
}

impl TideProvider {
    pub fn new(provider: ProviderConfig, cache: CacheConfig) -> Result<Self, ProviderError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(provider.timeout_secs))
            .user_agent(provider.user_agent.clone())
            .build()
            .map_err(|e| ProviderError::Network {
                attempts: 0,
                message: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(TideProvider {
            http,
            provider,
            cache,
        })
    }

    /// Fetch high/low predictions for the station over `[start, end]`,
    /// sorted chronologically. Serves from cache when a fresh entry exists.
    ///
    /// `timezone` does not change the request (NOAA already answers in
    /// station-local time) but participates in the cache key, matching the
    /// full set of request-relevant parameters.
    pub async fn fetch(
        &self,
        station_id: &str,
        start: NaiveDate,
        end: NaiveDate,
        timezone: &str,
    ) -> Result<Vec<TidePrediction>, ProviderError> {
        let params = self.request_params(station_id, start, end);

        let cache_path = self.cache_path(station_id, start, end, timezone, &params);
        if let Some(path) = &cache_path {
            if let Some(raw) = read_json_cache(path, self.cache.ttl_secs) {
                debug!(path = %path.display(), "using cached NOAA predictions");
                return Ok(process_predictions(raw));
            }
        }

        let raw = self.fetch_with_retry(station_id, &params).await?;

        if let Some(path) = &cache_path {
            if let Err(e) = write_json_cache(path, &raw) {
                warn!("failed to write prediction cache: {e}");
            }
        }

        Ok(process_predictions(raw))
    }

    fn request_params(
        &self,
        station_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Vec<(&'static str, String)> {
        vec![
            ("product", "predictions".to_string()),
            ("application", "NOS.COOPS.TAC.WL".to_string()),
            ("begin_date", start.format("%Y%m%d").to_string()),
            ("end_date", end.format("%Y%m%d").to_string()),
            ("datum", "MLLW".to_string()),
            ("station", station_id.to_string()),
            ("time_zone", "lst_ldt".to_string()),
            ("units", "metric".to_string()),
            ("interval", "hilo".to_string()),
            ("format", "json".to_string()),
        ]
    }

    /// Cache file path for a request, or `None` when caching is disabled.
    fn cache_path(
        &self,
        station_id: &str,
        start: NaiveDate,
        end: NaiveDate,
        timezone: &str,
        params: &[(&'static str, String)],
    ) -> Option<PathBuf> {
        if self.cache.dir.is_empty() || self.cache.ttl_secs == 0 {
            return None;
        }
        let mut key: BTreeMap<&str, serde_json::Value> = BTreeMap::new();
        key.insert("station_id", station_id.into());
        key.insert("start_date", start.format("%Y-%m-%d").to_string().into());
        key.insert("end_date", end.format("%Y-%m-%d").to_string().into());
        key.insert("timezone", timezone.into());
        key.insert(
            "params",
            serde_json::Value::Object(
                params
                    .iter()
                    .map(|(k, v)| (k.to_string(), serde_json::Value::from(v.as_str())))
                    .collect(),
            ),
        );
        let canonical = serde_json::to_string(&key).ok()?;
        let digest = hex::encode(Sha256::digest(canonical.as_bytes()));
        Some(Path::new(&self.cache.dir).join(format!("noaa-{}.json", &digest[..12])))
    }

    async fn fetch_with_retry(
        &self,
        station_id: &str,
        params: &[(&'static str, String)],
    ) -> Result<Vec<RawPrediction>, ProviderError> {
        let max_attempts = 1 + self.provider.retry_attempts;
        let mut last_error = ProviderError::Network {
            attempts: max_attempts,
            message: "no attempt made".to_string(),
        };

        for attempt in 1..=max_attempts {
            match self.attempt(station_id, params, max_attempts).await {
                Ok(raw) => return Ok(raw),
                Err(e) => {
                    warn!(attempt, max_attempts, "NOAA fetch attempt failed: {e}");
                    last_error = e;
                    if attempt < max_attempts {
                        tokio::time::sleep(RETRY_DELAY).await;
                    }
                }
            }
        }

        Err(last_error)
    }

    async fn attempt(
        &self,
        station_id: &str,
        params: &[(&'static str, String)],
        max_attempts: u32,
    ) -> Result<Vec<RawPrediction>, ProviderError> {
        let response = self
            .http
            .get(&self.provider.base_url)
            .query(params)
            .send()
            .await
            .map_err(|e| ProviderError::Network {
                attempts: max_attempts,
                message: e.to_string(),
            })?;

        let body = response.text().await.map_err(|e| ProviderError::Network {
            attempts: max_attempts,
            message: e.to_string(),
        })?;

        let data: NoaaResponse =
            serde_json::from_str(&body).map_err(|e| ProviderError::Malformed(e.to_string()))?;

        if let Some(error) = data.error {
            let message = error.message.unwrap_or_else(|| "Unknown API error".to_string());
            let lowered = message.to_lowercase();
            let text = if lowered.contains("internal server error") || lowered.contains("500") {
                format!(
                    "NOAA's servers are experiencing technical difficulties. This is \
                     usually temporary - please try again in a few minutes. (API Error: {message})"
                )
            } else {
                format!("NOAA API error: {message}")
            };
            return Err(ProviderError::Upstream(text));
        }

        match data.predictions {
            Some(predictions) if !predictions.is_empty() => Ok(predictions),
            _ => Err(ProviderError::Empty {
                station: station_id.to_string(),
            }),
        }
    }
}

/// Parse raw records into normalized predictions, skipping malformed
/// entries, and sort chronologically.
fn process_predictions(raw: Vec<RawPrediction>) -> Vec<TidePrediction> {
    let mut processed: Vec<TidePrediction> = raw
        .iter()
        .filter_map(|entry| {
            let ts_local = NaiveDateTime::parse_from_str(&entry.t, "%Y-%m-%d %H:%M").ok()?;
            let height_m: f64 = entry.v.trim().parse().ok()?;
            let tide_type = match entry.tide_type.to_ascii_uppercase().as_str() {
                "H" => TideType::High,
                "L" => TideType::Low,
                _ => return None,
            };
            Some(TidePrediction {
                ts_local,
                tide_type,
                height_m,
            })
        })
        .collect();

    processed.sort_by_key(|p| p.ts_local);
    processed
}

/// Load cached raw predictions if the file exists and is fresh.
fn read_json_cache(path: &Path, ttl_secs: u64) -> Option<Vec<RawPrediction>> {
    if ttl_secs == 0 {
        return None;
    }
    let meta = fs::metadata(path).ok()?;
    let age = SystemTime::now()
        .duration_since(meta.modified().ok()?)
        .ok()?
        .as_secs();
    if age > ttl_secs {
        return None;
    }
    let data = fs::read(path).ok()?;
    serde_json::from_slice(&data).ok()
}

/// Write raw predictions to the cache via temp-file + rename so a reader
/// never sees a partial file.
fn write_json_cache(path: &Path, raw: &[RawPrediction]) -> io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir)?;
    let tmp = dir.join(format!(".tmp-{}.json", std::process::id()));
    fs::write(&tmp, serde_json::to_vec(raw)?)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(t: &str, v: &str, kind: &str) -> RawPrediction {
        RawPrediction {
            t: t.to_string(),
            v: v.to_string(),
            tide_type: kind.to_string(),
        }
    }

    #[test]
    fn test_unit_conversion_roundtrip() {
        let meters = 1.234;
        let feet = meters_to_feet(meters);
        assert!((feet - 4.048_56).abs() < 1e-4);
        assert!((feet_to_meters(feet) - meters).abs() < 1e-12);
    }

    #[test]
    fn test_process_skips_malformed_and_sorts() {
        let raw_entries = vec![
            raw("2024-06-02 08:30", "1.20", "H"),
            raw("not a timestamp", "1.0", "H"),
            raw("2024-06-01 02:15", "-0.31", "l"),
            raw("2024-06-01 20:00", "abc", "L"),
            raw("2024-06-01 14:45", "0.9", "X"),
        ];
        let predictions = process_predictions(raw_entries);
        assert_eq!(predictions.len(), 2);
        assert_eq!(predictions[0].tide_type, TideType::Low);
        assert!((predictions[0].height_m - (-0.31)).abs() < 1e-9);
        assert!(predictions[0].ts_local < predictions[1].ts_local);
    }

    #[test]
    fn test_cache_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("noaa-abc.json");
        let entries = vec![raw("2024-06-01 02:15", "-0.31", "L")];

        write_json_cache(&path, &entries).unwrap();
        let loaded = read_json_cache(&path, 3600).expect("fresh cache should load");
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].t, "2024-06-01 02:15");
    }

    #[test]
    fn test_cache_rejects_zero_ttl() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("noaa-ttl.json");
        write_json_cache(&path, &[raw("2024-06-01 02:15", "-0.31", "L")]).unwrap();
        assert!(read_json_cache(&path, 0).is_none());
    }

    #[test]
    fn test_cache_path_is_deterministic() {
        let config = crate::config::Config::default();
        let provider = TideProvider::new(config.provider.clone(), config.cache.clone()).unwrap();
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2024, 12, 31).unwrap();
        let params = provider.request_params("9414290", start, end);
        let a = provider.cache_path("9414290", start, end, "America/Los_Angeles", &params);
        let b = provider.cache_path("9414290", start, end, "America/Los_Angeles", &params);
        assert_eq!(a, b);
        let c = provider.cache_path("9414290", start, end, "America/New_York", &params);
        assert_ne!(a, c);
    }
}
