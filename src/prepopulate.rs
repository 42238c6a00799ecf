//! Cache warm-up for one site over a date range.
//!
//! Walks every bucket start in the range and stores night-time values, so
//! later uploads from that site hit the cache instead of the ephemeris.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::cache::{bucket_start, CacheKey, CelestialCache, DEFAULT_BUCKET_MINUTES};
use crate::ephemeris::Ephemeris;
use crate::models::{CelestialSample, Location};
use crate::sky_brightness::MilkyWayModel;

// ---

const PROGRESS_EVERY: u64 = 1000;

#[derive(Debug, Error, PartialEq)]
pub enum RangeError {
    #[error("invalid month {0}")]
    Month(u32),

    #[error("invalid year {0}")]
    Year(i32),

    #[error("cannot parse date '{0}', expected YYYY-MM-DD")]
    Date(String),

    #[error("--month requires --year")]
    MonthWithoutYear,

    #[error("specify either --year or both --start and --end")]
    Missing,

    #[error("start {0} is after end {1}")]
    Reversed(NaiveDate, NaiveDate),
}

/// Inclusive UTC range covering whole days.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl DateRange {
    // ---
    /// From first to last day, both inclusive.
    pub fn days(first: NaiveDate, last: NaiveDate) -> Result<Self, RangeError> {
        // ---
        if first > last {
            return Err(RangeError::Reversed(first, last));
        }
        let start = first.and_hms_opt(0, 0, 0).ok_or_else(|| RangeError::Date(first.to_string()))?;
        let end = last.and_hms_opt(23, 59, 59).ok_or_else(|| RangeError::Date(last.to_string()))?;

        Ok(DateRange {
            start: start.and_utc(),
            end: end.and_utc(),
        })
    }

    /// Resolve `--year [--month]` or `--start/--end` arguments.
    pub fn resolve(
        year: Option<i32>,
        month: Option<u32>,
        start: Option<&str>,
        end: Option<&str>,
    ) -> Result<Self, RangeError> {
        // ---
        match (year, month, start, end) {
            (Some(year), Some(month), _, _) => {
                let first =
                    NaiveDate::from_ymd_opt(year, month, 1).ok_or(RangeError::Month(month))?;
                let next = if month == 12 {
                    NaiveDate::from_ymd_opt(year + 1, 1, 1)
                } else {
                    NaiveDate::from_ymd_opt(year, month + 1, 1)
                }
                .ok_or(RangeError::Year(year))?;
                Self::days(first, next.pred_opt().ok_or(RangeError::Year(year))?)
            }
            (Some(year), None, _, _) => {
                let first = NaiveDate::from_ymd_opt(year, 1, 1).ok_or(RangeError::Year(year))?;
                let last = NaiveDate::from_ymd_opt(year, 12, 31).ok_or(RangeError::Year(year))?;
                Self::days(first, last)
            }
            (None, Some(_), _, _) => Err(RangeError::MonthWithoutYear),
            (None, None, Some(start), Some(end)) => Self::days(parse_date(start)?, parse_date(end)?),
            _ => Err(RangeError::Missing),
        }
    }
}

fn parse_date(raw: &str) -> Result<NaiveDate, RangeError> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").map_err(|_| RangeError::Date(raw.to_string()))
}

/// Counters reported at the end of a warm-up.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PrepopulateReport {
    pub total_buckets: u64,
    pub stored: u64,
    pub daytime: u64,
    pub errors: u64,
}

/// Store night-time values for every bucket of `range` at `location`.
///
/// Daytime buckets are skipped, matching what the processor would store.
pub async fn prepopulate<C, E>(
    cache: &C,
    ephemeris: &E,
    model: &MilkyWayModel,
    location: &Location,
    range: DateRange,
    bucket: Duration,
) -> PrepopulateReport
where
    C: CelestialCache,
    E: Ephemeris + Sync,
{
    // ---
    let model_tag = model.model_tag();
    let mut report = PrepopulateReport::default();
    let step = if bucket > Duration::zero() {
        bucket
    } else {
        Duration::minutes(DEFAULT_BUCKET_MINUTES)
    };
    let mut current = bucket_start(range.start, step);

    tracing::info!(
        "Prepopulating cache for ({}, {}) from {} to {}",
        location.latitude,
        location.longitude,
        range.start.date_naive(),
        range.end.date_naive()
    );

    while current <= range.end {
        report.total_buckets += 1;

        let sun_alt = ephemeris.sun_altitude(current, location);
        if sun_alt < 0.0 {
            let moon_alt = ephemeris.moon_altitude(current, location);
            let estimate = model.estimate(ephemeris.zenith_galactic_latitude(current, location));
            let sample = CelestialSample {
                sun_alt,
                moon_alt,
                mw_brightness: estimate.brightness,
                milky_way_visible: estimate.visible,
            };

            let key = CacheKey::derive(location, current, step, &model_tag);
            match cache.put(&key, &sample).await {
                Ok(()) => report.stored += 1,
                Err(e) => {
                    report.errors += 1;
                    tracing::error!("Cache storage failed for {}: {}", current, e);
                }
            }
        } else {
            report.daytime += 1;
        }

        if report.total_buckets % PROGRESS_EVERY == 0 {
            tracing::info!(
                "Progress: {} buckets processed, {} stored, {} errors (at {})",
                report.total_buckets,
                report.stored,
                report.errors,
                current.date_naive()
            );
        }

        current += step;
    }

    tracing::info!(
        "Prepopulation complete: {} buckets, {} stored, {} daytime, {} errors",
        report.total_buckets,
        report.stored,
        report.daytime,
        report.errors
    );
    report
}
