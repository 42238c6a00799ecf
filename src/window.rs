//! Rolling brightness window whose span follows the device's cadence.
//!
//! SQM units log at anything from seconds to many minutes. A fixed-duration
//! window would hold wildly different sample counts per device, so the span
//! is re-derived on every push as three times the latest sampling interval.

use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};

// ---

/// Number of sampling intervals the window spans.
pub const SPAN_INTERVALS: i32 = 3;

/// Span used when the configured default is not positive.
pub const FALLBACK_SPAN_MINUTES: i64 = 15;

/// Upper bound on the configured default span.
pub const MAX_DEFAULT_SPAN_MINUTES: i64 = 24 * 60;

#[derive(Debug, Clone, Copy)]
struct Sample {
    timestamp: DateTime<Utc>,
    brightness: f64,
}

/// Time-bounded window of recent brightness samples.
#[derive(Debug, Clone)]
pub struct AdaptiveWindow {
    samples: VecDeque<Sample>,
    default_span: Duration,
    span: Duration,
    latest: Option<DateTime<Utc>>,
}

impl AdaptiveWindow {
    // ---
    /// `default_span` is clamped to `(0, MAX_DEFAULT_SPAN_MINUTES]`; a zero or
    /// negative value becomes [`FALLBACK_SPAN_MINUTES`].
    pub fn new(default_span: Duration) -> Self {
        // ---
        let default_span = if default_span <= Duration::zero() {
            Duration::minutes(FALLBACK_SPAN_MINUTES)
        } else {
            default_span.min(Duration::minutes(MAX_DEFAULT_SPAN_MINUTES))
        };

        AdaptiveWindow {
            samples: VecDeque::new(),
            default_span,
            span: default_span,
            latest: None,
        }
    }

    /// Add a sample and return the standard deviation of the window.
    ///
    /// Returns `None` while fewer than two samples lie within the span. A
    /// duplicate or out-of-order timestamp yields the default span rather
    /// than a zero or negative one. A span reaching past the earliest
    /// representable time keeps every sample.
    pub fn push(&mut self, timestamp: DateTime<Utc>, brightness: f64) -> Option<f64> {
        // ---
        self.span = match self.latest {
            Some(previous) if timestamp > previous => (timestamp - previous)
                .checked_mul(SPAN_INTERVALS)
                .unwrap_or(self.default_span),
            _ => self.default_span,
        };

        let latest = self.latest.map_or(timestamp, |previous| previous.max(timestamp));
        self.latest = Some(latest);

        self.samples.push_back(Sample {
            timestamp,
            brightness,
        });

        if let Some(cutoff) = latest.checked_sub_signed(self.span) {
            self.samples.retain(|s| s.timestamp >= cutoff);
        }

        self.std_dev()
    }

    /// Span applied by the most recent push.
    pub fn span(&self) -> Duration {
        self.span
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Population standard deviation of the buffered brightness values.
    pub fn std_dev(&self) -> Option<f64> {
        // ---
        let n = self.samples.len();
        if n < 2 {
            return None;
        }

        let mean = self.samples.iter().map(|s| s.brightness).sum::<f64>() / n as f64;
        let variance = self
            .samples
            .iter()
            .map(|s| (s.brightness - mean).powi(2))
            .sum::<f64>()
            / n as f64;

        Some(variance.sqrt())
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use approx::assert_abs_diff_eq;
    use chrono::{NaiveDate, TimeZone};

    fn at(minute: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 12, 30, 21, 0, 0).unwrap() + Duration::minutes(minute)
    }

    #[test]
    fn test_first_sample_is_undefined() {
        // ---
        let mut window = AdaptiveWindow::new(Duration::minutes(15));
        assert_eq!(window.push(at(0), 21.0), None);
        assert_eq!(window.span(), Duration::minutes(15));
        assert_eq!(window.len(), 1);
    }

    #[test]
    fn test_span_follows_interval() {
        // ---
        let mut window = AdaptiveWindow::new(Duration::minutes(15));
        window.push(at(0), 21.0);
        window.push(at(5), 21.0);
        assert_eq!(window.span(), Duration::minutes(15));

        window.push(at(6), 21.0);
        assert_eq!(window.span(), Duration::minutes(3));

        window.push(at(16), 21.0);
        assert_eq!(window.span(), Duration::minutes(30));
    }

    #[test]
    fn test_eviction_keeps_inclusive_span() {
        // ---
        let mut window = AdaptiveWindow::new(Duration::minutes(15));
        for minute in (0..=30).step_by(5) {
            window.push(at(minute), 21.0);
        }
        // Span 15 min at t=30 keeps 15, 20, 25, 30.
        assert_eq!(window.len(), 4);

        // A long gap widens the span; everything within 3 × 40 min stays.
        window.push(at(70), 21.0);
        assert_eq!(window.len(), 5);

        // Switching to a fast cadence drops the old samples.
        window.push(at(71), 21.0);
        assert_eq!(window.len(), 2);
    }

    #[test]
    fn test_std_dev_population() {
        // ---
        let mut window = AdaptiveWindow::new(Duration::minutes(15));
        window.push(at(0), 21.30);
        let sd = window.push(at(5), 21.32).unwrap();
        assert_abs_diff_eq!(sd, 0.01, epsilon = 1e-9);

        window.push(at(10), 21.30);
        let sd = window.push(at(15), 21.32).unwrap();
        assert_abs_diff_eq!(sd, 0.01, epsilon = 1e-9);
    }

    #[test]
    fn test_fast_cadence_shrinks_window() {
        // ---
        let mut window = AdaptiveWindow::new(Duration::minutes(15));
        window.push(at(0), 21.0);
        window.push(at(20), 21.0);
        window.push(at(40), 21.0);
        assert!(window.std_dev().is_some());

        window.push(at(41), 18.0);
        assert_eq!(window.len(), 2);
        window.push(at(41) + Duration::seconds(1), 18.0);
        assert_eq!(window.len(), 2);
        assert_abs_diff_eq!(window.std_dev().unwrap(), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_non_positive_default_span_falls_back() {
        // ---
        let mut window = AdaptiveWindow::new(Duration::minutes(-15));
        assert_eq!(window.span(), Duration::minutes(FALLBACK_SPAN_MINUTES));

        window.push(at(0), 21.0);
        window.push(at(5), 21.1);
        window.push(at(5), 21.2);
        assert_eq!(window.span(), Duration::minutes(FALLBACK_SPAN_MINUTES));
        assert_eq!(window.len(), 3);
        assert!(window.std_dev().is_some());

        let window = AdaptiveWindow::new(Duration::zero());
        assert_eq!(window.span(), Duration::minutes(FALLBACK_SPAN_MINUTES));
    }

    #[test]
    fn test_huge_default_span_is_clamped() {
        // ---
        let mut window = AdaptiveWindow::new(Duration::days(1_000_000));
        assert_eq!(window.span(), Duration::minutes(MAX_DEFAULT_SPAN_MINUTES));

        assert_eq!(window.push(at(0), 21.0), None);
        assert!(window.push(at(0), 21.0).is_some());
        assert_eq!(window.len(), 2);
    }

    #[test]
    fn test_span_past_earliest_time_keeps_samples() {
        // ---
        let first = NaiveDate::from_ymd_opt(1, 1, 1)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .unwrap()
            .and_utc();
        let far = NaiveDate::from_ymd_opt(200_000, 1, 1)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .unwrap()
            .and_utc();

        let mut window = AdaptiveWindow::new(Duration::minutes(15));
        window.push(first, 21.0);
        let sd = window.push(far, 21.0);

        assert_eq!(window.span(), (far - first) * SPAN_INTERVALS);
        assert_eq!(window.len(), 2);
        assert_abs_diff_eq!(sd.unwrap(), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_duplicate_timestamp_uses_default_span() {
        // ---
        let mut window = AdaptiveWindow::new(Duration::minutes(15));
        window.push(at(0), 21.0);
        window.push(at(1), 21.0);
        assert_eq!(window.span(), Duration::minutes(3));

        window.push(at(1), 21.2);
        assert_eq!(window.span(), Duration::minutes(15));
        assert_eq!(window.len(), 3);

        // Out of order: still the default span, anchored on the newest time.
        window.push(at(0), 21.1);
        assert_eq!(window.span(), Duration::minutes(15));
        assert!(window.std_dev().unwrap() > 0.0);
    }
}
