//! Data models for the dark-sky stream processor.

use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---

/// Site substituted when a file header carries no usable position.
pub const DEFAULT_LOCATION: Location = Location {
    latitude: 56.04,
    longitude: 10.87,
};

/// Column header of every processed output file.
pub const OUTPUT_HEADER: &str =
    "UTC_TIME;LOCAL_TIME;SUN_ALT;MOON_ALT;MPSAS;MW_BRIGHTNESS;MW_VISIBLE;ROLL_STDEV";

const MIN_FIELDS: usize = 6;
const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

/// Reasons an input line is rejected before it reaches the model.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RecordError {
    #[error("expected at least 6 fields, found {0}")]
    TooFewFields(usize),

    #[error("unparseable UTC timestamp '{0}'")]
    BadTimestamp(String),

    #[error("unparseable brightness '{0}'")]
    BadBrightness(String),
}

/// One sky-brightness reading from an SQM log line.
///
/// Temperature, voltage and record type are carried through untouched; only
/// the UTC instant and the brightness take part in filtering.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    // ---
    pub utc: DateTime<Utc>,
    pub utc_label: String,
    pub local_label: String,
    pub temperature: String,
    pub voltage: String,
    /// Sky brightness in mag/arcsec²; larger is darker.
    pub brightness: f64,
    pub record_type: String,
}

impl Record {
    // ---
    /// Parse a `UTC;LOCAL;TEMP;VOLT;MPSAS;TYPE` line.
    pub fn parse(line: &str) -> Result<Self, RecordError> {
        // ---
        let parts: Vec<&str> = line.trim().split(';').map(str::trim).collect();
        if parts.len() < MIN_FIELDS {
            return Err(RecordError::TooFewFields(parts.len()));
        }

        let utc = parse_utc(parts[0])?;
        let brightness = parts[4]
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .ok_or_else(|| RecordError::BadBrightness(parts[4].to_string()))?;

        Ok(Record {
            utc,
            utc_label: parts[0].to_string(),
            local_label: parts[1].to_string(),
            temperature: parts[2].to_string(),
            voltage: parts[3].to_string(),
            brightness,
            record_type: parts[5].to_string(),
        })
    }
}

fn parse_utc(raw: &str) -> Result<DateTime<Utc>, RecordError> {
    // ---
    let trimmed = raw.strip_suffix('Z').unwrap_or(raw);
    NaiveDateTime::parse_from_str(trimmed, TIMESTAMP_FORMAT)
        .map(|naive| naive.and_utc())
        .map_err(|_| RecordError::BadTimestamp(raw.to_string()))
}

// ---

#[derive(Debug, Error, Clone, PartialEq)]
pub enum LocationError {
    #[error("latitude {0} outside [-90, 90]")]
    Latitude(f64),

    #[error("longitude {0} outside [-180, 180]")]
    Longitude(f64),
}

/// Geographic position of the observing site in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
}

impl Location {
    // ---
    pub fn new(latitude: f64, longitude: f64) -> Result<Self, LocationError> {
        // ---
        if !(-90.0..=90.0).contains(&latitude) {
            return Err(LocationError::Latitude(latitude));
        }
        if !(-180.0..=180.0).contains(&longitude) {
            return Err(LocationError::Longitude(longitude));
        }
        Ok(Location {
            latitude,
            longitude,
        })
    }
}

/// Where the location used for a run came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LocationSource {
    Header,
    Default,
}

/// Everything the processor needs to know about the file's origin.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Site {
    pub location: Location,
    pub source: LocationSource,
    pub name: String,
    pub device_id: Option<String>,
}

// ---

/// Derived sky state for one (location, time bucket).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct CelestialSample {
    pub sun_alt: f64,
    pub moon_alt: f64,
    pub mw_brightness: f64,
    pub milky_way_visible: bool,
}

/// Filter thresholds for one run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProcessParams {
    // ---
    /// Records are kept only while the sun is below this altitude (deg).
    pub sun_max_alt: f64,
    /// Records are kept only while the moon is below this altitude (deg).
    pub moon_max_alt: f64,
    /// Maximum rolling standard deviation of brightness.
    pub stdev_threshold: f64,
    /// Minimum brightness (mag/arcsec²) a kept record must exceed.
    pub mpsas_limit: f64,
    /// Window span before a sampling interval has been observed (minutes).
    pub default_span_min: f64,
}

impl Default for ProcessParams {
    fn default() -> Self {
        ProcessParams {
            sun_max_alt: -20.0,
            moon_max_alt: -10.0,
            stdev_threshold: 0.05,
            mpsas_limit: 18.0,
            default_span_min: 15.0,
        }
    }
}

impl ProcessParams {
    // ---
    /// Largest accepted `default_span_min`: one day.
    pub const MAX_SPAN_MIN: f64 = 1440.0;

    /// Whether `minutes` is a usable default span: finite, positive, at most a day.
    pub fn is_valid_span(minutes: f64) -> bool {
        minutes.is_finite() && minutes > 0.0 && minutes <= Self::MAX_SPAN_MIN
    }

    /// Default span as a duration; out-of-range values fall back to 15 minutes.
    pub fn default_span(&self) -> Duration {
        // ---
        if Self::is_valid_span(self.default_span_min) {
            Duration::milliseconds((self.default_span_min * 60_000.0).round() as i64)
        } else {
            Duration::minutes(15)
        }
    }
}

/// A record that passed every filter, annotated for output.
#[derive(Debug, Clone, PartialEq)]
pub struct KeptRecord {
    // ---
    pub utc_label: String,
    pub local_label: String,
    pub sun_alt: f64,
    pub moon_alt: f64,
    pub brightness: f64,
    pub mw_brightness: f64,
    pub milky_way_visible: bool,
    pub std_dev: f64,
}

impl KeptRecord {
    // ---
    /// Render the record as one output line (without trailing newline).
    pub fn to_line(&self) -> String {
        format!(
            "{};{};{:.3};{:.3};{:.3};{:.2};{};{:.4}",
            self.utc_label,
            self.local_label,
            self.sun_alt,
            self.moon_alt,
            self.brightness,
            self.mw_brightness,
            self.milky_way_visible,
            self.std_dev
        )
    }
}

/// Result of one processed stream, handed to presentation layers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamSummary {
    // ---
    pub device_id: Option<String>,
    pub location_name: String,
    pub location: Location,
    pub location_source: LocationSource,
    pub total_lines_seen: u64,
    pub skipped_lines: u64,
    pub kept_count: u64,
    /// Mean of kept brightness values; `0.0` when nothing was kept.
    pub mean_brightness: f64,
    /// Maximum kept brightness; `0.0` when nothing was kept.
    pub max_brightness: f64,
    pub truncated: bool,
    pub cache_hits: u64,
    pub cache_misses: u64,
    /// Degradations worth showing next to the result.
    pub notes: Vec<String>,
}

impl StreamSummary {
    // ---
    /// Mean kept brightness, or `None` when no record was kept.
    pub fn mean(&self) -> Option<f64> {
        (self.kept_count > 0).then_some(self.mean_brightness)
    }
}
