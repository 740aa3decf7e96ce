//! # Calendar Registry
//!
//! Every generated calendar gets a deterministic 12-hex-char id derived
//! from the content-relevant parameters; the registry maps ids to parameter
//! snapshots in a single JSON document next to the generated ICS files.
//!
//! Display-only fields (station name, coordinates, timezone) are excluded
//! from the id hash, so two parameter sets differing only in those collide
//! onto one entry. That is long-standing behavior that subscription URLs
//! depend on; widening the hash input would orphan existing calendars.
//!
//! Persistence is whole-document read-modify-rewrite per mutation. The
//! rewrite itself is atomic (temp file + rename), but nothing serializes
//! two concurrent mutators across the read-then-write sequence, so one
//! writer's update can be lost. Write concurrency is expected to be low.

use crate::config::CalendarParams;
use chrono::{Duration, Local, NaiveDateTime};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("registry IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("registry document: {0}")]
    Document(#[from] serde_json::Error),
}

/// One registered calendar: id, full parameter snapshot, and lifecycle
/// timestamps (local server time, `YYYY-MM-DD HH:MM:SS`).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CalendarEntry {
    pub id: String,
    pub params: CalendarParams,
    pub created_at: String,
    pub updated_at: String,
}

/// Registry of calendar entries backed by `calendars.json` in the data dir.
pub struct CalendarRegistry {
    data_dir: PathBuf,
    registry_path: PathBuf,
}

impl CalendarRegistry {
    /// Open (creating if needed) the registry under `data_dir`.
    pub fn new<P: AsRef<Path>>(data_dir: P) -> Result<Self, RegistryError> {
        let data_dir = data_dir.as_ref().to_path_buf();
        fs::create_dir_all(&data_dir)?;
        let registry_path = data_dir.join("calendars.json");
        let registry = CalendarRegistry {
            data_dir,
            registry_path,
        };
        if !registry.registry_path.exists() {
            registry.save(&BTreeMap::new())?;
        }
        Ok(registry)
    }

    /// Derive the calendar id from the content-relevant parameter subset:
    /// canonical sorted-key JSON, SHA-256, first 12 hex chars.
    pub fn derive_id(params: &CalendarParams) -> String {
        let canonical = serde_json::to_string(&key_params(params)).unwrap_or_default();
        let digest = hex::encode(Sha256::digest(canonical.as_bytes()));
        digest[..12].to_string()
    }

    /// Look up or register a calendar for these parameters.
    ///
    /// `force_id` naming an existing entry overwrites that entry's params in
    /// place (the explicit edit path, preserving the subscription id).
    /// Otherwise the id is derived from the params; a colliding entry is
    /// overwritten last-write-wins, and a new entry is created when none
    /// exists.
    pub fn get_or_create(
        &self,
        params: &CalendarParams,
        force_id: Option<&str>,
    ) -> Result<CalendarEntry, RegistryError> {
        let mut calendars = self.load()?;
        let now = Local::now().format(TIMESTAMP_FORMAT).to_string();

        let id = match force_id {
            Some(id) if calendars.contains_key(id) => id.to_string(),
            _ => Self::derive_id(params),
        };

        match calendars.get_mut(&id) {
            Some(entry) => {
                entry.params = params.clone();
                entry.updated_at = now;
            }
            None => {
                debug!(id, "registering new calendar");
                calendars.insert(
                    id.clone(),
                    CalendarEntry {
                        id: id.clone(),
                        params: params.clone(),
                        created_at: now.clone(),
                        updated_at: now,
                    },
                );
            }
        }

        self.save(&calendars)?;
        Ok(calendars[&id].clone())
    }

    /// Look up an entry by id.
    pub fn get(&self, id: &str) -> Result<Option<CalendarEntry>, RegistryError> {
        Ok(self.load()?.remove(id))
    }

    /// All entries, keyed by id.
    pub fn all(&self) -> Result<BTreeMap<String, CalendarEntry>, RegistryError> {
        self.load()
    }

    /// Delete an entry and its generated ICS file. Returns whether an entry
    /// existed.
    pub fn delete(&self, id: &str) -> Result<bool, RegistryError> {
        let mut calendars = self.load()?;
        if calendars.remove(id).is_none() {
            return Ok(false);
        }

        let ics_path = self.calendar_file_path(id);
        if ics_path.exists() {
            fs::remove_file(&ics_path)?;
        }

        self.save(&calendars)?;
        Ok(true)
    }

    /// Delete every entry whose `updated_at` is older than
    /// `max_age_days` days, along with its file. Returns the number
    /// deleted. Entries with unparseable timestamps are left alone.
    pub fn cleanup(&self, max_age_days: i64) -> Result<usize, RegistryError> {
        let cutoff = Local::now().naive_local() - Duration::days(max_age_days);
        let calendars = self.load()?;

        let mut deleted = 0;
        for (id, entry) in &calendars {
            let Ok(updated) = NaiveDateTime::parse_from_str(&entry.updated_at, TIMESTAMP_FORMAT)
            else {
                continue;
            };
            if updated < cutoff && self.delete(id)? {
                deleted += 1;
            }
        }

        if deleted > 0 {
            info!(deleted, max_age_days, "cleaned up stale calendars");
        }
        Ok(deleted)
    }

    /// Path of the generated ICS file for a calendar id.
    pub fn calendar_file_path(&self, id: &str) -> PathBuf {
        self.data_dir.join(format!("calendar-{id}.ics"))
    }

    /// Public subscription URL for a calendar id.
    pub fn calendar_url(id: &str, base_url: &str) -> String {
        format!("{}/calendar.ics?id={id}", base_url.trim_end_matches('/'))
    }

    fn load(&self) -> Result<BTreeMap<String, CalendarEntry>, RegistryError> {
        let content = match fs::read_to_string(&self.registry_path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_str(&content)?)
    }

    fn save(&self, calendars: &BTreeMap<String, CalendarEntry>) -> Result<(), RegistryError> {
        let json = serde_json::to_vec_pretty(calendars)?;
        let tmp = self
            .data_dir
            .join(format!(".tmp-calendars-{}.json", std::process::id()));
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.registry_path)?;
        Ok(())
    }
}

/// Canonical content-relevant parameter map. Keys are sorted by the
/// BTreeMap, so field insertion order never affects the hash. Station name,
/// coordinates, and timezone are deliberately absent.
fn key_params(params: &CalendarParams) -> BTreeMap<&'static str, serde_json::Value> {
    let mode = |m| serde_json::to_value(m).unwrap_or_default();
    let mut key: BTreeMap<&'static str, serde_json::Value> = BTreeMap::new();

    key.insert("station_id", params.station_id.as_str().into());
    key.insert("year", params.resolve_year().into());
    key.insert("unit", serde_json::to_value(params.unit).unwrap_or_default());

    let low = &params.low_tides;
    key.insert("include_low_tides", low.include.into());
    key.insert("min_low_tide_value", low.threshold.into());
    key.insert("low_time_filter", mode(low.time_filter));
    key.insert("low_minutes_after_sunrise", low.minutes_after_sunrise.into());
    key.insert("low_minutes_before_sunset", low.minutes_before_sunset.into());
    key.insert("low_earliest_time_enabled", low.earliest_time_enabled.into());
    key.insert("low_earliest_time", low.earliest_time.as_str().into());
    key.insert("low_latest_time_enabled", low.latest_time_enabled.into());
    key.insert("low_latest_time", low.latest_time.as_str().into());

    let high = &params.high_tides;
    key.insert("include_high_tides", high.include.into());
    key.insert("high_tide_min_value", high.threshold.into());
    key.insert("high_time_filter", mode(high.time_filter));
    key.insert("high_minutes_after_sunrise", high.minutes_after_sunrise.into());
    key.insert("high_minutes_before_sunset", high.minutes_before_sunset.into());
    key.insert("high_earliest_time_enabled", high.earliest_time_enabled.into());
    key.insert("high_earliest_time", high.earliest_time.as_str().into());
    key.insert("high_latest_time_enabled", high.latest_time_enabled.into());
    key.insert("high_latest_time", high.latest_time.as_str().into());

    key.insert("include_sunrise_events", params.sun_events.sunrise.into());
    key.insert("include_sunset_events", params.sun_events.sunset.into());
    key.insert(
        "sun_events_match_tide_days",
        params.sun_events.match_tide_days.into(),
    );

    key
}
