//! # ICS Calendar Serialization
//!
//! Builds the RFC 5545 calendar document from an ordered event list: a
//! VCALENDAR envelope, one VEVENT per queued tide or sun event, CRLF line
//! endings, text escaping, and 75-octet line folding with one-space
//! continuations. Output must stay byte-compatible with calendar
//! subscription clients, so the folding limit is exact.
//!
//! Event UIDs are deterministic (station id + UTC-equivalent timestamp), so
//! regenerating a calendar updates events in place instead of duplicating
//! them in subscribers' clients.
//!
//! A single event that cannot be built (for example a local time that does
//! not exist in the zone on a DST transition) is logged and skipped; the
//! rest of the document still serializes. Files are replaced via temp-file
//! + rename so a concurrent reader never sees a partial calendar.

use crate::config::{CalendarParams, Unit};
use crate::filter::SunWindowCheck;
use crate::provider::meters_to_feet;
use crate::TidePrediction;
use chrono::{Duration, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use std::fs;
use std::io;
use std::path::Path;
use tracing::warn;

const PRODID: &str = "-//TideCal//SingleStation//EN";

/// Maximum emitted line length in octets, per RFC 5545 section 3.1.
const FOLD_LIMIT: usize = 75;

/// Sunrise or sunset, for standalone sun events.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SunEventKind {
    Sunrise,
    Sunset,
}

impl SunEventKind {
    fn label(self) -> &'static str {
        match self {
            SunEventKind::Sunrise => "Sunrise",
            SunEventKind::Sunset => "Sunset",
        }
    }
}

enum Event {
    Tide {
        prediction: TidePrediction,
        sun: SunWindowCheck,
    },
    Sun {
        date: NaiveDate,
        time: NaiveTime,
        kind: SunEventKind,
    },
}

/// Accumulates calendar events and serializes them to ICS text.
pub struct IcsWriter {
    station_id: String,
    station_name: String,
    tz: Tz,
    unit: Unit,
    include_low: bool,
    include_high: bool,
    include_sunrise: bool,
    include_sunset: bool,
    base_url: Option<String>,
    events: Vec<Event>,
}

impl IcsWriter {
    pub fn new(params: &CalendarParams, tz: Tz, base_url: Option<&str>) -> Self {
        IcsWriter {
            station_id: params.station_id.clone(),
            station_name: params.station_name.clone(),
            tz,
            unit: params.unit,
            include_low: params.low_tides.include,
            include_high: params.high_tides.include,
            include_sunrise: params.sun_events.sunrise,
            include_sunset: params.sun_events.sunset,
            base_url: base_url.map(|s| s.trim_end_matches('/').to_string()),
            events: Vec::new(),
        }
    }

    /// Queue a tide event with its sun-window diagnostics.
    pub fn add_tide_event(&mut self, prediction: TidePrediction, sun: SunWindowCheck) {
        self.events.push(Event::Tide { prediction, sun });
    }

    /// Queue a standalone sunrise/sunset event.
    pub fn add_sun_event(&mut self, date: NaiveDate, time: NaiveTime, kind: SunEventKind) {
        self.events.push(Event::Sun { date, time, kind });
    }

    pub fn event_count(&self) -> usize {
        self.events.len()
    }

    /// Serialize all queued events. Returns the document and the number of
    /// events that failed to build and were skipped.
    pub fn generate(&self) -> (String, usize) {
        let mut lines = self.envelope();
        let mut skipped = 0;

        for event in &self.events {
            let result = match event {
                Event::Tide { prediction, sun } => self.tide_event_lines(prediction, sun),
                Event::Sun { date, time, kind } => self.sun_event_lines(*date, *time, *kind),
            };
            match result {
                Ok(mut event_lines) => lines.append(&mut event_lines),
                Err(reason) => {
                    warn!("skipping calendar event: {reason}");
                    skipped += 1;
                }
            }
        }

        lines.push("END:VCALENDAR".to_string());
        (fold_document(&lines), skipped)
    }

    /// Minimal valid empty calendar annotated with a human-readable reason,
    /// used for not-yet-generated, not-found, and error-fallback responses.
    pub fn generate_empty(&self, reason: &str) -> String {
        let mut lines = self.envelope();
        lines.push(format!("X-WR-CALDESC:{}", escape_text(reason)));
        lines.push("END:VCALENDAR".to_string());
        fold_document(&lines)
    }

    /// Atomically write calendar content to `path`: parent directory is
    /// created if absent, content goes to a temp file in the same
    /// directory, and a rename moves it into place.
    pub fn write_to_file(content: &str, path: &Path) -> io::Result<()> {
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir)?;

        let tmp = dir.join(format!(".tmp-{}.ics", std::process::id()));
        fs::write(&tmp, content)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    fn envelope(&self) -> Vec<String> {
        vec![
            "BEGIN:VCALENDAR".to_string(),
            format!("PRODID:{PRODID}"),
            "VERSION:2.0".to_string(),
            "CALSCALE:GREGORIAN".to_string(),
            "METHOD:PUBLISH".to_string(),
            format!("X-WR-CALNAME:{}", escape_text(&self.calendar_name())),
            format!("X-WR-TIMEZONE:{}", self.tz.name()),
        ]
    }

    /// Calendar display name built from the enabled event categories.
    fn calendar_name(&self) -> String {
        let mut parts = Vec::new();
        if self.include_low {
            parts.push("Low tides");
        }
        if self.include_high {
            parts.push("High tides");
        }
        if self.include_sunrise {
            parts.push("Sunrise");
        }
        if self.include_sunset {
            parts.push("Sunset");
        }

        if parts.is_empty() {
            format!("Tides - {}", self.station_name)
        } else {
            format!("Tides - {} ({})", self.station_name, parts.join(", "))
        }
    }

    fn tide_event_lines(
        &self,
        prediction: &TidePrediction,
        sun: &SunWindowCheck,
    ) -> Result<Vec<String>, String> {
        let start = prediction.ts_local;
        let end = start + Duration::minutes(30);
        let utc = self.local_to_utc(start)?;

        let height_display = self.format_height(prediction.height_m);
        let summary = format!("{} {height_display}", prediction.tide_type.label());

        let mut lines = vec![
            "BEGIN:VEVENT".to_string(),
            format!(
                "UID:tide-{}-{}",
                self.station_id,
                utc.format("%Y%m%dT%H%M%SZ")
            ),
            format!("DTSTAMP:{}", Utc::now().format("%Y%m%dT%H%M%SZ")),
            format!(
                "DTSTART;TZID={}:{}",
                self.tz.name(),
                start.format("%Y%m%dT%H%M%S")
            ),
            format!(
                "DTEND;TZID={}:{}",
                self.tz.name(),
                end.format("%Y%m%dT%H%M%S")
            ),
            format!("SUMMARY:{}", escape_text(&summary)),
            format!("LOCATION:{}", escape_text(&self.station_name)),
        ];
        lines.push(format!(
            "DESCRIPTION:{}",
            escape_text(&self.tide_description(prediction, sun))
        ));
        lines.push("END:VEVENT".to_string());
        Ok(lines)
    }

    fn tide_description(&self, prediction: &TidePrediction, sun: &SunWindowCheck) -> String {
        let mut lines = Vec::new();
        lines.push(format!(
            "Station: {} ({})",
            self.station_name, self.station_id
        ));
        lines.push(format!("Type: {}", prediction.tide_type.label()));
        lines.push(format!(
            "Local time: {}",
            prediction.ts_local.format("%Y-%m-%d %H:%M:%S")
        ));

        let value_m = prediction.height_m;
        let value_ft = meters_to_feet(value_m);
        match self.unit {
            Unit::Ft => lines.push(format!("Height: {value_ft:.1} ft ({value_m:.2} m)")),
            Unit::M => lines.push(format!("Height: {value_m:.1} m ({value_ft:.1} ft)")),
        }

        if let (Some(sunrise), Some(sunset)) = (sun.sunrise, sun.sunset) {
            lines.push(format!(
                "Sunrise: {} · Sunset: {}",
                sunrise.format("%H:%M"),
                sunset.format("%H:%M")
            ));
            if let Some(margin) = sun.margin_minutes {
                let hours = margin / 60;
                let minutes = margin % 60;
                if hours > 0 {
                    lines.push(format!("Margin to sunset: {hours}h {minutes}m"));
                } else {
                    lines.push(format!("Margin to sunset: {minutes}m"));
                }
            }
        }

        lines.push(format!(
            "Generated: {}",
            Utc::now().with_timezone(&self.tz).format("%Y-%m-%d %H:%M")
        ));
        if let Some(url) = &self.base_url {
            lines.push(format!("Source: {url}"));
        }

        lines.join("\n")
    }

    fn sun_event_lines(
        &self,
        date: NaiveDate,
        time: NaiveTime,
        kind: SunEventKind,
    ) -> Result<Vec<String>, String> {
        let start = date.and_time(time);
        let end = start + Duration::minutes(10);
        let utc = self.local_to_utc(start)?;

        let mut description = vec![
            format!("Station: {} ({})", self.station_name, self.station_id),
            format!("Event: {}", kind.label()),
            format!("Local time: {}", start.format("%Y-%m-%d %H:%M")),
        ];
        if let Some(url) = &self.base_url {
            description.push(format!("Source: {url}"));
        }

        Ok(vec![
            "BEGIN:VEVENT".to_string(),
            format!(
                "UID:{}-{}-{}",
                kind.label().to_lowercase(),
                self.station_id,
                utc.format("%Y%m%dT%H%M%SZ")
            ),
            format!("DTSTAMP:{}", Utc::now().format("%Y%m%dT%H%M%SZ")),
            format!(
                "DTSTART;TZID={}:{}",
                self.tz.name(),
                start.format("%Y%m%dT%H%M%S")
            ),
            format!(
                "DTEND;TZID={}:{}",
                self.tz.name(),
                end.format("%Y%m%dT%H%M%S")
            ),
            format!("SUMMARY:{}", kind.label()),
            format!("LOCATION:{}", escape_text(&self.station_name)),
            format!("DESCRIPTION:{}", escape_text(&description.join("\n"))),
            "END:VEVENT".to_string(),
        ])
    }

    fn format_height(&self, value_m: f64) -> String {
        match self.unit {
            Unit::Ft => format!("{:+.1} ft", meters_to_feet(value_m)),
            Unit::M => format!("{value_m:+.1} m"),
        }
    }

    /// Resolve a local wall-clock time to UTC. Nonexistent local times (DST
    /// spring-forward gap) fail the single event, not the document.
    fn local_to_utc(&self, local: NaiveDateTime) -> Result<chrono::DateTime<Utc>, String> {
        match self.tz.from_local_datetime(&local) {
            LocalResult::Single(dt) => Ok(dt.with_timezone(&Utc)),
            LocalResult::Ambiguous(dt, _) => Ok(dt.with_timezone(&Utc)),
            LocalResult::None => Err(format!(
                "local time {local} does not exist in {}",
                self.tz.name()
            )),
        }
    }
}

/// Escape text per RFC 5545: backslash, semicolon, comma, and line breaks.
fn escape_text(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '\\' => escaped.push_str("\\\\"),
            ';' => escaped.push_str("\\;"),
            ',' => escaped.push_str("\\,"),
            '\n' | '\r' => escaped.push_str("\\n"),
            other => escaped.push(other),
        }
    }
    escaped
}

/// Join logical lines with CRLF, folding anything longer than 75 octets.
/// Continuation lines start with a single space that counts against their
/// own 75-octet budget. Splits land on UTF-8 character boundaries.
fn fold_document(lines: &[String]) -> String {
    let mut out = String::new();
    for line in lines {
        for segment in fold_line(line) {
            out.push_str(&segment);
            out.push_str("\r\n");
        }
    }
    out
}

fn fold_line(line: &str) -> Vec<String> {
    if line.len() <= FOLD_LIMIT {
        return vec![line.to_string()];
    }

    let mut segments = Vec::new();
    let mut segment = String::new();
    for ch in line.chars() {
        if segment.len() + ch.len_utf8() > FOLD_LIMIT {
            segments.push(std::mem::take(&mut segment));
            segment.push(' ');
        }
        segment.push(ch);
    }
    segments.push(segment);
    segments
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::TideType;
    use chrono_tz::America::Los_Angeles;

    fn writer() -> IcsWriter {
        let mut params = Config::default().calendar;
        params.year = Some(2024);
        IcsWriter::new(&params, Los_Angeles, Some("https://example.com/tides/"))
    }

    fn prediction(ts: &str, tide_type: TideType, height_m: f64) -> TidePrediction {
        TidePrediction {
            ts_local: NaiveDateTime::parse_from_str(ts, "%Y-%m-%d %H:%M").unwrap(),
            tide_type,
            height_m,
        }
    }

    /// Unfold a document back into logical lines for structural assertions.
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

    #[test]
    fn empty_calendar_is_minimal_and_annotated() {
        let content = writer().generate_empty("Calendar not generated yet");
        assert!(content.starts_with("BEGIN:VCALENDAR\r\n"));
        assert!(content.ends_with("END:VCALENDAR\r\n"));
        assert!(content.contains("X-WR-CALDESC:Calendar not generated yet"));
        assert!(!content.contains("BEGIN:VEVENT"));
    }

    #[test]
    fn calendar_name_lists_enabled_categories() {
        let mut params = Config::default().calendar;
        params.high_tides.include = true;
        params.sun_events.sunset = true;
        let w = IcsWriter::new(&params, Los_Angeles, None);
        assert_eq!(
            w.calendar_name(),
            "Tides - San Francisco (Low tides, High tides, Sunset)"
        );
    }

    #[test]
    fn tide_event_structure() {
        let mut w = writer();
        w.add_tide_event(
            prediction("2024-06-20 08:15", TideType::Low, -0.31),
            SunWindowCheck::permissive(),
        );
        let (content, skipped) = w.generate();
        assert_eq!(skipped, 0);

        let lines = logical_lines(&content);
        // UTC of 08:15 PDT is 15:15Z
        assert!(lines
            .iter()
            .any(|l| l == "UID:tide-9414290-20240620T151500Z"));
        assert!(lines
            .iter()
            .any(|l| l == "DTSTART;TZID=America/Los_Angeles:20240620T081500"));
        assert!(lines
            .iter()
            .any(|l| l == "DTEND;TZID=America/Los_Angeles:20240620T084500"));
        assert!(lines.iter().any(|l| l == "SUMMARY:Low Tide -1.0 ft"));
    }

    #[test]
    fn sun_event_structure() {
        let mut w = writer();
        w.add_sun_event(
            NaiveDate::from_ymd_opt(2024, 6, 20).unwrap(),
            NaiveTime::from_hms_opt(20, 35, 0).unwrap(),
            SunEventKind::Sunset,
        );
        let (content, skipped) = w.generate();
        assert_eq!(skipped, 0);

        let lines = logical_lines(&content);
        assert!(lines
            .iter()
            .any(|l| l.starts_with("UID:sunset-9414290-")));
        assert!(lines.iter().any(|l| l == "SUMMARY:Sunset"));
        assert!(lines
            .iter()
            .any(|l| l == "DTEND;TZID=America/Los_Angeles:20240620T204500"));
    }

    #[test]
    fn event_starts_precede_ends_and_uids_are_unique() {
        let mut w = writer();
        for (ts, kind, height) in [
            ("2024-06-20 08:15", TideType::Low, -0.31),
            ("2024-06-20 23:50", TideType::High, 1.8),
            ("2024-06-21 09:02", TideType::Low, -0.15),
        ] {
            w.add_tide_event(prediction(ts, kind, height), SunWindowCheck::permissive());
        }
        let (content, _) = w.generate();
        let lines = logical_lines(&content);

        let starts: Vec<&str> = lines
            .iter()
            .filter_map(|l| l.strip_prefix("DTSTART;TZID=America/Los_Angeles:"))
            .collect();
        let ends: Vec<&str> = lines
            .iter()
            .filter_map(|l| l.strip_prefix("DTEND;TZID=America/Los_Angeles:"))
            .collect();
        assert_eq!(starts.len(), 3);
        for (start, end) in starts.iter().zip(&ends) {
            // 23:50 + 30min crosses midnight; full-date compare still holds
            assert!(start < end, "{start} should precede {end}");
        }

        let uids: Vec<&String> = lines.iter().filter(|l| l.starts_with("UID:")).collect();
        let mut deduped = uids.clone();
        deduped.sort();
        deduped.dedup();
        assert_eq!(uids.len(), 3);
        assert_eq!(deduped.len(), 3);
    }

    #[test]
    fn no_emitted_line_exceeds_75_octets() {
        let mut params = Config::default().calendar;
        params.station_name =
            "An Extremely Long Station Name, With Punctuation; And Then Some \\ More Text \
             To Guarantee Folding Kicks In"
                .to_string();
        let mut w = IcsWriter::new(&params, Los_Angeles, Some("https://example.com/tides"));
        w.add_tide_event(
            prediction("2024-06-20 08:15", TideType::Low, -0.31),
            SunWindowCheck {
                passes: true,
                sunrise: NaiveTime::from_hms_opt(5, 48, 0),
                sunset: NaiveTime::from_hms_opt(20, 35, 0),
                margin_minutes: Some(740),
            },
        );
        let (content, _) = w.generate();

        for line in content.split("\r\n") {
            assert!(
                line.len() <= 75,
                "line exceeds 75 octets ({}): {line}",
                line.len()
            );
        }
        // Folding must be lossless
        let lines = logical_lines(&content);
        assert!(lines.iter().any(|l| l.contains("Margin to sunset: 12h 20m")));
    }

    #[test]
    fn folding_respects_utf8_boundaries() {
        // The separator in "Sunrise: .. · Sunset: .." is multi-byte; pad the
        // line so a naive byte split would land inside it
        let line = format!("DESCRIPTION:{}·end", "x".repeat(73));
        let segments = fold_line(&line);
        assert!(segments.len() > 1);
        for segment in &segments {
            assert!(segment.len() <= 75);
        }
        let rejoined: String = segments
            .iter()
            .enumerate()
            .map(|(i, s)| if i == 0 { s.as_str() } else { &s[1..] })
            .collect();
        assert_eq!(rejoined, line);
    }

    #[test]
    fn escape_handles_all_special_characters() {
        assert_eq!(
            escape_text("a\\b;c,d\ne"),
            "a\\\\b\\;c\\,d\\ne"
        );
    }

    #[test]
    fn nonexistent_local_time_skips_event_only() {
        let mut w = writer();
        // 2024-03-10 02:30 does not exist in America/Los_Angeles
        w.add_tide_event(
            prediction("2024-03-10 02:30", TideType::Low, -0.2),
            SunWindowCheck::permissive(),
        );
        w.add_tide_event(
            prediction("2024-03-10 14:30", TideType::Low, -0.2),
            SunWindowCheck::permissive(),
        );
        let (content, skipped) = w.generate();
        assert_eq!(skipped, 1);
        assert_eq!(content.matches("BEGIN:VEVENT").count(), 1);
        assert!(content.ends_with("END:VCALENDAR\r\n"));
    }

    #[test]
    fn write_to_file_creates_directories_and_replaces_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("calendar-abc.ics");

        let (content, _) = writer().generate();
        IcsWriter::write_to_file(&content, &path).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), content);

        let replacement = writer().generate_empty("replaced");
        IcsWriter::write_to_file(&replacement, &path).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), replacement);
        // No temp litter left behind
        let leftovers: Vec<_> = fs::read_dir(path.parent().unwrap())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with(".tmp-"))
            .collect();
        assert!(leftovers.is_empty());
    }
}
