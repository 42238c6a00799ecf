//! Streaming record processor.
//!
//! One [`StreamProcessor`] handles one input stream, strictly in order:
//!
//! 1. parse the line (malformed lines are skipped and counted);
//! 2. push it into the [`AdaptiveWindow`], which re-derives its span;
//! 3. refresh sun/moon/Milky-Way state when the time since the last refresh
//!    exceeds the current span, consulting the [`CelestialCache`];
//! 4. keep the record only if the sun and moon are low enough, the sky is
//!    stable and the reading is dark enough;
//! 5. stop early once the [`OutputQuota`] is exhausted.
//!
//! Fatal I/O errors abort the run; [`process_file`] then removes the partial
//! output.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;
use tokio::fs::File;
use tokio::io::{self, AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tracing::{debug, info, warn};

use crate::cache::{CacheKey, CelestialCache, DEFAULT_BUCKET_MINUTES};
use crate::ephemeris::{Ephemeris, LowPrecisionEphemeris};
use crate::header;
use crate::models::{
    CelestialSample, KeptRecord, Location, LocationSource, ProcessParams, Record, Site,
    StreamSummary, OUTPUT_HEADER,
};
use crate::quota::{OutputQuota, Unlimited};
use crate::sky_brightness::MilkyWayModel;
use crate::window::AdaptiveWindow;

// ---

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("cannot open input {path}: {source}")]
    OpenInput { path: PathBuf, source: io::Error },

    #[error("cannot create output {path}: {source}")]
    CreateOutput { path: PathBuf, source: io::Error },

    #[error("I/O error while processing stream: {0}")]
    Io(#[from] io::Error),
}

impl ProcessError {
    // ---
    /// Short error class for user-facing reports.
    pub fn class(&self) -> &'static str {
        match self {
            ProcessError::OpenInput { .. } => "input",
            ProcessError::CreateOutput { .. } => "output",
            ProcessError::Io(_) => "io",
        }
    }
}

/// Lifecycle of a processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    AwaitingFirstSample,
    SteadyState,
    Done,
}

/// Why a parsed record was not kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// No night-time sky state yet, or the last refresh was in daylight.
    NoSkyData,
    SunTooHigh,
    MoonTooHigh,
    /// Fewer than two samples in the window.
    InsufficientSamples,
    Unstable,
    TooBright,
}

/// Moon and Milky-Way state from the last night-time refresh.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NightSky {
    pub moon_alt: f64,
    pub mw_brightness: f64,
    pub milky_way_visible: bool,
}

impl From<CelestialSample> for NightSky {
    fn from(sample: CelestialSample) -> Self {
        NightSky {
            moon_alt: sample.moon_alt,
            mw_brightness: sample.mw_brightness,
            milky_way_visible: sample.milky_way_visible,
        }
    }
}

/// Outcome of the filter for one record, with the statistic it used.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterDecision {
    pub verdict: Result<(), Rejection>,
    pub std_dev: Option<f64>,
}

impl FilterDecision {
    pub fn keep(&self) -> bool {
        self.verdict.is_ok()
    }
}

/// Apply the four keep conditions.
pub fn evaluate(
    params: &ProcessParams,
    sun_alt: Option<f64>,
    night: Option<&NightSky>,
    std_dev: Option<f64>,
    brightness: f64,
) -> FilterDecision {
    // ---
    FilterDecision {
        verdict: verdict(params, sun_alt, night, std_dev, brightness),
        std_dev,
    }
}

fn verdict(
    params: &ProcessParams,
    sun_alt: Option<f64>,
    night: Option<&NightSky>,
    std_dev: Option<f64>,
    brightness: f64,
) -> Result<(), Rejection> {
    // ---
    let (Some(sun_alt), Some(night)) = (sun_alt, night) else {
        return Err(Rejection::NoSkyData);
    };
    if sun_alt >= params.sun_max_alt {
        return Err(Rejection::SunTooHigh);
    }
    if night.moon_alt >= params.moon_max_alt {
        return Err(Rejection::MoonTooHigh);
    }
    let std_dev = std_dev.ok_or(Rejection::InsufficientSamples)?;
    if !(std_dev < params.stdev_threshold) {
        return Err(Rejection::Unstable);
    }
    if !(brightness > params.mpsas_limit) {
        return Err(Rejection::TooBright);
    }
    Ok(())
}

/// Running count, mean and maximum of kept brightness values.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct Aggregates {
    count: u64,
    sum: f64,
    max: Option<f64>,
}

impl Aggregates {
    // ---
    fn fold(&mut self, brightness: f64) {
        self.count += 1;
        self.sum += brightness;
        self.max = Some(self.max.map_or(brightness, |m| m.max(brightness)));
    }

    fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }
}

/// Processor for a single input stream.
pub struct StreamProcessor<'a, C, E = LowPrecisionEphemeris> {
    // ---
    params: ProcessParams,
    model: MilkyWayModel,
    model_tag: String,
    bucket: Duration,
    cache: &'a C,
    ephemeris: E,
    quota: &'a dyn OutputQuota,

    phase: Phase,
    window: AdaptiveWindow,
    last_refresh: Option<DateTime<Utc>>,
    sun_alt: Option<f64>,
    night: Option<NightSky>,
    aggregates: Aggregates,
    total_lines: u64,
    skipped_lines: u64,
    cache_hits: u64,
    cache_misses: u64,
}

impl<'a, C> StreamProcessor<'a, C, LowPrecisionEphemeris>
where
    C: CelestialCache,
{
    // ---
    pub fn new(params: ProcessParams, model: MilkyWayModel, cache: &'a C) -> Self {
        // ---
        StreamProcessor {
            params,
            model,
            model_tag: model.model_tag(),
            bucket: Duration::minutes(DEFAULT_BUCKET_MINUTES),
            cache,
            ephemeris: LowPrecisionEphemeris,
            quota: &Unlimited,
            phase: Phase::AwaitingFirstSample,
            window: AdaptiveWindow::new(params.default_span()),
            last_refresh: None,
            sun_alt: None,
            night: None,
            aggregates: Aggregates::default(),
            total_lines: 0,
            skipped_lines: 0,
            cache_hits: 0,
            cache_misses: 0,
        }
    }
}

impl<'a, C, E> StreamProcessor<'a, C, E>
where
    C: CelestialCache,
    E: Ephemeris + Send + Sync,
{
    // ---
    /// Replace the ephemeris, typically with an instrumented one in tests.
    pub fn with_ephemeris<E2>(self, ephemeris: E2) -> StreamProcessor<'a, C, E2> {
        // ---
        StreamProcessor {
            params: self.params,
            model: self.model,
            model_tag: self.model_tag,
            bucket: self.bucket,
            cache: self.cache,
            ephemeris,
            quota: self.quota,
            phase: self.phase,
            window: self.window,
            last_refresh: self.last_refresh,
            sun_alt: self.sun_alt,
            night: self.night,
            aggregates: self.aggregates,
            total_lines: self.total_lines,
            skipped_lines: self.skipped_lines,
            cache_hits: self.cache_hits,
            cache_misses: self.cache_misses,
        }
    }

    pub fn with_quota(mut self, quota: &'a dyn OutputQuota) -> Self {
        self.quota = quota;
        self
    }

    pub fn with_bucket(mut self, bucket: Duration) -> Self {
        self.bucket = bucket;
        self
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Process every data line of `reader`, writing kept records to `writer`.
    ///
    /// `reader` must be positioned after the file header. The processor is
    /// left in [`Phase::Done`] whether or not the run succeeds; it is meant for
    /// a single stream.
    pub async fn run<R, W>(
        &mut self,
        site: &Site,
        reader: R,
        writer: W,
    ) -> Result<StreamSummary, ProcessError>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        // ---
        let result = self.stream(site, reader, writer).await;
        self.phase = Phase::Done;
        let truncated = result?;

        let summary = self.summarize(site, truncated);
        info!(
            "Finished processing {} lines, {} kept, mean {:.2}, max {:.2}",
            summary.total_lines_seen,
            summary.kept_count,
            summary.mean_brightness,
            summary.max_brightness
        );
        Ok(summary)
    }

    /// Copy kept records from `reader` to `writer`; returns whether the quota
    /// cut the stream short.
    async fn stream<R, W>(
        &mut self,
        site: &Site,
        mut reader: R,
        mut writer: W,
    ) -> Result<bool, ProcessError>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        // ---
        let limit = self.quota.limit_for(site.device_id.as_deref());
        if let Some(limit) = limit {
            debug!(
                "device {:?} is not registered, limiting output to {} records",
                site.device_id, limit
            );
        }

        writer.write_all(OUTPUT_HEADER.as_bytes()).await?;
        writer.write_all(b"\n").await?;

        let mut truncated = false;
        let mut buf = Vec::new();
        while limit.map_or(true, |limit| (self.aggregates.count as usize) < limit) {
            buf.clear();
            if reader.read_until(b'\n', &mut buf).await? == 0 {
                break;
            }
            self.total_lines += 1;

            let text = String::from_utf8_lossy(&buf);
            let line = text.trim();
            if line.is_empty() {
                continue;
            }

            let record = match Record::parse(line) {
                Ok(record) => record,
                Err(e) => {
                    warn!("Skipping malformed line {}: {} ({})", self.total_lines, line, e);
                    self.skipped_lines += 1;
                    continue;
                }
            };

            if let Some(kept) = self.step(&site.location, record).await {
                writer.write_all(kept.to_line().as_bytes()).await?;
                writer.write_all(b"\n").await?;
                self.aggregates.fold(kept.brightness);

                if limit.is_some_and(|limit| self.aggregates.count as usize >= limit) {
                    truncated = true;
                    info!(
                        "break after {} lines, kept {}",
                        self.total_lines, self.aggregates.count
                    );
                }
            }
        }

        writer.flush().await?;
        Ok(truncated)
    }

    /// Advance the state machine by one parsed record.
    async fn step(&mut self, location: &Location, record: Record) -> Option<KeptRecord> {
        // ---
        let std_dev = self.window.push(record.utc, record.brightness);
        let span = self.window.span();

        let due = self
            .last_refresh
            .map_or(true, |last| record.utc - last > span);
        if due {
            self.refresh(location, record.utc).await;
        }
        self.phase = Phase::SteadyState;

        let decision = evaluate(
            &self.params,
            self.sun_alt,
            self.night.as_ref(),
            std_dev,
            record.brightness,
        );

        let (Ok(()), Some(sun_alt), Some(night), Some(std_dev)) =
            (decision.verdict, self.sun_alt, self.night, decision.std_dev)
        else {
            return None;
        };

        Some(KeptRecord {
            utc_label: record.utc_label,
            local_label: record.local_label,
            sun_alt,
            moon_alt: night.moon_alt,
            brightness: record.brightness,
            mw_brightness: night.mw_brightness,
            milky_way_visible: night.milky_way_visible,
            std_dev,
        })
    }

    /// Recompute the sky state for `time`.
    ///
    /// Daylight refreshes clear the night state so nothing is kept until the
    /// next night-time refresh.
    async fn refresh(&mut self, location: &Location, time: DateTime<Utc>) {
        // ---
        let sun_alt = self.ephemeris.sun_altitude(time, location);
        self.sun_alt = Some(sun_alt);
        self.last_refresh = Some(time);

        if sun_alt >= 0.0 {
            debug!("Daytime (sun_alt={:.2}), skipping sky quality calculations", sun_alt);
            self.night = None;
            return;
        }

        let key = CacheKey::derive(location, time, self.bucket, &self.model_tag);
        let cached = match self.cache.get(&key).await {
            Ok(cached) => cached,
            Err(e) => {
                warn!("Cache retrieval failed: {}", e);
                None
            }
        };

        let night = match cached {
            Some(sample) => {
                self.cache_hits += 1;
                NightSky::from(sample)
            }
            None => {
                self.cache_misses += 1;
                let sample = self.compute(location, time, sun_alt);
                if let Err(e) = self.cache.put(&key, &sample).await {
                    warn!("Cache storage failed: {}", e);
                }
                NightSky::from(sample)
            }
        };

        let previous = self.night.map(|n| n.milky_way_visible);
        if previous != Some(night.milky_way_visible) {
            debug!("change: milky_way_visible: {}", night.milky_way_visible);
        }
        self.night = Some(night);
    }

    fn compute(&self, location: &Location, time: DateTime<Utc>, sun_alt: f64) -> CelestialSample {
        // ---
        let moon_alt = self.ephemeris.moon_altitude(time, location);
        let b = self.ephemeris.zenith_galactic_latitude(time, location);
        let estimate = self.model.estimate(b);

        debug!(
            "zenith b={:.2}, mw_sb={:.2}, visible={}",
            b, estimate.brightness, estimate.visible
        );

        CelestialSample {
            sun_alt,
            moon_alt,
            mw_brightness: estimate.brightness,
            milky_way_visible: estimate.visible,
        }
    }

    fn summarize(&self, site: &Site, truncated: bool) -> StreamSummary {
        // ---
        let mut notes = Vec::new();
        if site.source == LocationSource::Default {
            notes.push(format!(
                "Missing location, using default {:.2}:{:.2}; sun and moon altitudes are approximate",
                site.location.latitude, site.location.longitude
            ));
        }
        if truncated {
            notes.push(format!(
                "Ending after {} good lines, because device {} is not registered",
                self.aggregates.count,
                site.device_id.as_deref().unwrap_or("<unknown>")
            ));
        }

        StreamSummary {
            device_id: site.device_id.clone(),
            location_name: site.name.clone(),
            location: site.location,
            location_source: site.source,
            total_lines_seen: self.total_lines,
            skipped_lines: self.skipped_lines,
            kept_count: self.aggregates.count,
            mean_brightness: self.aggregates.mean(),
            max_brightness: self.aggregates.max.unwrap_or(0.0),
            truncated,
            cache_hits: self.cache_hits,
            cache_misses: self.cache_misses,
            notes,
        }
    }
}

/// Process one SQM file end to end.
///
/// On any fatal error the output file is removed, so a failed run never
/// leaves a partial result behind.
pub async fn process_file<C, E>(
    mut processor: StreamProcessor<'_, C, E>,
    input: &Path,
    output: &Path,
    default_location: Location,
) -> Result<StreamSummary, ProcessError>
where
    C: CelestialCache,
    E: Ephemeris + Send + Sync,
{
    // ---
    let file = File::open(input)
        .await
        .map_err(|source| ProcessError::OpenInput {
            path: input.to_path_buf(),
            source,
        })?;
    let mut reader = BufReader::new(file);

    let out = File::create(output)
        .await
        .map_err(|source| ProcessError::CreateOutput {
            path: output.to_path_buf(),
            source,
        })?;

    let result = async {
        let header = header::read_header(&mut reader).await?;
        let site = header.resolve(default_location);
        processor.run(&site, reader, BufWriter::new(out)).await
    }
    .await;

    if result.is_err() {
        if let Err(e) = tokio::fs::remove_file(output).await {
            warn!("Failed to remove partial output {}: {}", output.display(), e);
        }
    }
    result
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::cache::{CacheError, MemoryCelestialCache};
    use crate::models::DEFAULT_LOCATION;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::BufReader;

    /// Ephemeris returning fixed values and counting moon/galaxy lookups.
    #[derive(Default)]
    struct FixedSky {
        sun_alt: f64,
        moon_alt: f64,
        moon_calls: AtomicUsize,
        galaxy_calls: AtomicUsize,
    }

    impl FixedSky {
        fn new(sun_alt: f64, moon_alt: f64) -> Self {
            FixedSky {
                sun_alt,
                moon_alt,
                ..FixedSky::default()
            }
        }
    }

    impl Ephemeris for &FixedSky {
        fn sun_altitude(&self, _: DateTime<Utc>, _: &Location) -> f64 {
            self.sun_alt
        }

        fn moon_altitude(&self, _: DateTime<Utc>, _: &Location) -> f64 {
            self.moon_calls.fetch_add(1, Ordering::SeqCst);
            self.moon_alt
        }

        fn zenith_galactic_latitude(&self, _: DateTime<Utc>, _: &Location) -> f64 {
            self.galaxy_calls.fetch_add(1, Ordering::SeqCst);
            0.0
        }
    }

    /// Backend whose every call fails, as an unreachable database would.
    #[derive(Default)]
    struct FailingCache {
        gets: AtomicUsize,
        puts: AtomicUsize,
    }

    impl CelestialCache for FailingCache {
        async fn get(&self, _: &CacheKey) -> Result<Option<CelestialSample>, CacheError> {
            self.gets.fetch_add(1, Ordering::SeqCst);
            Err(CacheError::Backend(sqlx::Error::PoolTimedOut))
        }

        async fn put(&self, _: &CacheKey, _: &CelestialSample) -> Result<(), CacheError> {
            self.puts.fetch_add(1, Ordering::SeqCst);
            Err(CacheError::Backend(sqlx::Error::PoolTimedOut))
        }
    }

    fn site(device_id: Option<&str>) -> Site {
        Site {
            location: DEFAULT_LOCATION,
            source: LocationSource::Header,
            name: "Test site".to_string(),
            device_id: device_id.map(str::to_string),
        }
    }

    fn lines(values: &[f64]) -> String {
        let start = Utc.with_ymd_and_hms(2024, 12, 30, 21, 0, 0).unwrap();
        values
            .iter()
            .enumerate()
            .map(|(i, v)| {
                let t = start + Duration::minutes(5 * i as i64);
                format!(
                    "{};{};-2.0;5.01;{:.2};0\n",
                    t.format("%Y-%m-%dT%H:%M:%S%.3f"),
                    (t + Duration::hours(1)).format("%Y-%m-%dT%H:%M:%S%.3f"),
                    v
                )
            })
            .collect()
    }

    async fn run_with(
        sky: &FixedSky,
        params: ProcessParams,
        input: &str,
    ) -> (StreamSummary, String) {
        let cache = MemoryCelestialCache::new();
        let mut out = Vec::new();
        let summary = StreamProcessor::new(params, MilkyWayModel::default(), &cache)
            .with_ephemeris(sky)
            .run(&site(None), BufReader::new(input.as_bytes()), &mut out)
            .await
            .unwrap();
        (summary, String::from_utf8(out).unwrap())
    }

    #[test]
    fn test_evaluate_conditions() {
        // ---
        let params = ProcessParams::default();
        let night = NightSky {
            moon_alt: -30.0,
            mw_brightness: 21.0,
            milky_way_visible: true,
        };

        let keep = evaluate(&params, Some(-40.0), Some(&night), Some(0.01), 21.0);
        assert!(keep.keep());
        assert_eq!(keep.std_dev, Some(0.01));

        let reject = |sun, moon: f64, sd, mpsas| {
            let night = NightSky {
                moon_alt: moon,
                ..night
            };
            evaluate(&params, sun, Some(&night), sd, mpsas).verdict
        };
        assert_eq!(reject(None, -30.0, Some(0.0), 21.0), Err(Rejection::NoSkyData));
        assert_eq!(reject(Some(-20.0), -30.0, Some(0.0), 21.0), Err(Rejection::SunTooHigh));
        assert_eq!(reject(Some(-40.0), -10.0, Some(0.0), 21.0), Err(Rejection::MoonTooHigh));
        assert_eq!(reject(Some(-40.0), -30.0, None, 21.0), Err(Rejection::InsufficientSamples));
        assert_eq!(reject(Some(-40.0), -30.0, Some(0.05), 21.0), Err(Rejection::Unstable));
        assert_eq!(reject(Some(-40.0), -30.0, Some(0.0), 18.0), Err(Rejection::TooBright));

        assert_eq!(
            evaluate(&params, Some(-40.0), None, Some(0.0), 21.0).verdict,
            Err(Rejection::NoSkyData)
        );
    }

    #[tokio::test]
    async fn test_dark_stable_records_are_kept() {
        // ---
        let sky = FixedSky::new(-40.0, -30.0);
        let (summary, out) = run_with(&sky, ProcessParams::default(), &lines(&[21.0; 6])).await;

        // The first record has no window statistic yet.
        assert_eq!(summary.kept_count, 5);
        assert_eq!(summary.total_lines_seen, 6);
        assert_eq!(summary.mean(), Some(21.0));
        assert_eq!(summary.max_brightness, 21.0);

        let mut rows = out.lines();
        assert_eq!(rows.next(), Some(OUTPUT_HEADER));
        assert_eq!(
            rows.next(),
            Some("2024-12-30T21:05:00.000;2024-12-30T22:05:00.000;-40.000;-30.000;21.000;20.00;true;0.0000")
        );
        assert_eq!(rows.count(), 4);
    }

    #[tokio::test]
    async fn test_high_sun_or_moon_never_kept() {
        // ---
        let input = lines(&[21.0; 8]);

        let sky = FixedSky::new(-15.0, -30.0);
        let (summary, _) = run_with(&sky, ProcessParams::default(), &input).await;
        assert_eq!(summary.kept_count, 0);
        assert_eq!(summary.mean(), None);

        let sky = FixedSky::new(-40.0, -5.0);
        let (summary, out) = run_with(&sky, ProcessParams::default(), &input).await;
        assert_eq!(summary.kept_count, 0);
        assert_eq!(out.lines().count(), 1);
    }

    #[tokio::test]
    async fn test_daytime_skips_moon_and_galaxy() {
        // ---
        let sky = FixedSky::new(25.0, -30.0);
        let params = ProcessParams {
            sun_max_alt: 90.0,
            ..ProcessParams::default()
        };
        let (summary, _) = run_with(&sky, params, &lines(&[21.0; 20])).await;

        assert_eq!(summary.kept_count, 0);
        assert_eq!(sky.moon_calls.load(Ordering::SeqCst), 0);
        assert_eq!(sky.galaxy_calls.load(Ordering::SeqCst), 0);
        assert_eq!(summary.cache_hits + summary.cache_misses, 0);
    }

    #[tokio::test]
    async fn test_refresh_is_gated_by_span() {
        // ---
        // 5 min cadence, 15 min span: refreshes at 0, 20, 40 and 60 min.
        let sky = FixedSky::new(-40.0, -30.0);
        let (summary, _) = run_with(&sky, ProcessParams::default(), &lines(&[21.0; 13])).await;

        assert_eq!(summary.cache_hits + summary.cache_misses, 4);
        // Buckets 21:00, 21:20, 21:40 and 22:00 each miss once.
        assert_eq!(summary.cache_misses, 4);
        assert_eq!(sky.moon_calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_second_run_hits_cache() {
        // ---
        let sky = FixedSky::new(-40.0, -30.0);
        let cache = MemoryCelestialCache::new();
        let input = lines(&[21.0; 13]);

        for _ in 0..2 {
            let mut out = Vec::new();
            StreamProcessor::new(ProcessParams::default(), MilkyWayModel::default(), &cache)
                .with_ephemeris(&sky)
                .run(&site(None), BufReader::new(input.as_bytes()), &mut out)
                .await
                .unwrap();
        }

        assert_eq!(cache.len().await, 4);
        assert_eq!(sky.moon_calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_malformed_lines_are_skipped() {
        // ---
        let sky = FixedSky::new(-40.0, -30.0);
        let mut input = lines(&[21.0; 3]);
        input.push_str("not;enough;fields\n\n");
        input.push_str("2024-12-30T21:15:00.000;x;1;2;dark;0\n");

        let (summary, _) = run_with(&sky, ProcessParams::default(), &input).await;
        assert_eq!(summary.total_lines_seen, 6);
        assert_eq!(summary.skipped_lines, 2);
        assert_eq!(summary.kept_count, 2);
    }

    #[tokio::test]
    async fn test_quota_stops_processing() {
        // ---
        let sky = FixedSky::new(-40.0, -30.0);
        let cache = MemoryCelestialCache::new();
        let quota = crate::quota::DeviceAllowList::parse("2586", Some(3));
        let input = lines(&[21.0; 10]);

        let mut out = Vec::new();
        let summary = StreamProcessor::new(ProcessParams::default(), MilkyWayModel::default(), &cache)
            .with_ephemeris(&sky)
            .with_quota(&quota)
            .run(&site(Some("9999")), BufReader::new(input.as_bytes()), &mut out)
            .await
            .unwrap();

        assert!(summary.truncated);
        assert_eq!(summary.kept_count, 3);
        // Kept records are lines 2..=4; nothing after the third is read.
        assert_eq!(summary.total_lines_seen, 4);
        assert_eq!(summary.notes.len(), 1);

        let mut out = Vec::new();
        let summary = StreamProcessor::new(ProcessParams::default(), MilkyWayModel::default(), &cache)
            .with_ephemeris(&sky)
            .with_quota(&quota)
            .run(&site(Some("2586")), BufReader::new(input.as_bytes()), &mut out)
            .await
            .unwrap();
        assert!(!summary.truncated);
        assert_eq!(summary.kept_count, 9);
    }

    #[tokio::test]
    async fn test_phase_transitions() {
        // ---
        let cache = MemoryCelestialCache::new();
        let mut processor =
            StreamProcessor::new(ProcessParams::default(), MilkyWayModel::default(), &cache);
        assert_eq!(processor.phase(), Phase::AwaitingFirstSample);

        let record = Record::parse("2024-12-30T22:00:00;x;1;2;21.0;0").unwrap();
        processor.step(&DEFAULT_LOCATION, record).await;
        assert_eq!(processor.phase(), Phase::SteadyState);

        let input = lines(&[21.0; 3]);
        let mut out = Vec::new();
        processor
            .run(&site(None), BufReader::new(input.as_bytes()), &mut out)
            .await
            .unwrap();
        assert_eq!(processor.phase(), Phase::Done);
    }

    #[tokio::test]
    async fn test_empty_stream_still_finishes() {
        // ---
        let cache = MemoryCelestialCache::new();
        let mut processor =
            StreamProcessor::new(ProcessParams::default(), MilkyWayModel::default(), &cache);
        let mut out = Vec::new();

        let summary = processor
            .run(&site(None), BufReader::new(&b""[..]), &mut out)
            .await
            .unwrap();
        assert_eq!(summary.total_lines_seen, 0);
        assert_eq!(processor.phase(), Phase::Done);
    }

    #[tokio::test]
    async fn test_failing_cache_degrades_to_miss() {
        // ---
        let input = lines(&[21.0; 13]);

        let sky = FixedSky::new(-40.0, -30.0);
        let (healthy, healthy_out) = run_with(&sky, ProcessParams::default(), &input).await;

        let sky = FixedSky::new(-40.0, -30.0);
        let cache = FailingCache::default();
        let mut out = Vec::new();
        let summary = StreamProcessor::new(ProcessParams::default(), MilkyWayModel::default(), &cache)
            .with_ephemeris(&sky)
            .run(&site(None), BufReader::new(input.as_bytes()), &mut out)
            .await
            .unwrap();

        assert_eq!(summary.kept_count, healthy.kept_count);
        assert_eq!(String::from_utf8(out).unwrap(), healthy_out);
        assert_eq!(summary.cache_hits, 0);
        assert_eq!(summary.cache_misses, 4);
        assert_eq!(cache.gets.load(Ordering::SeqCst), 4);
        assert_eq!(cache.puts.load(Ordering::SeqCst), 4);
        assert_eq!(sky.moon_calls.load(Ordering::SeqCst), 4);
        assert_eq!(sky.galaxy_calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_oversized_default_span_does_not_overflow() {
        // ---
        let sky = FixedSky::new(-40.0, -30.0);
        let params = ProcessParams {
            default_span_min: 1e12,
            ..ProcessParams::default()
        };
        let (summary, _) = run_with(&sky, params, &lines(&[21.0; 1])).await;

        assert_eq!(summary.total_lines_seen, 1);
        assert_eq!(summary.kept_count, 0);
    }

    #[tokio::test]
    async fn test_gap_of_millennia_does_not_overflow() {
        // ---
        let sky = FixedSky::new(-40.0, -30.0);
        let input = "0001-01-01T00:00:00;x;1;2;21.0;0\n+200000-01-01T00:00:00;x;1;2;21.0;0\n";
        let (summary, out) = run_with(&sky, ProcessParams::default(), input).await;

        assert_eq!(summary.total_lines_seen, 2);
        assert_eq!(summary.skipped_lines, 0);
        assert_eq!(summary.kept_count, 1);
        assert_eq!(out.lines().count(), 2);
    }
}
