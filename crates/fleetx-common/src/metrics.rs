//! ---
//! fx_section: "01-core-functionality"
//! fx_subsection: "module"
//! fx_type: "source"
//! fx_scope: "code"
//! fx_description: "Loop timing and jitter accounting."
//! fx_version: "v0.1.0"
//! fx_owner: "tbd"
//! ---
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;

#[derive(Debug, Clone, Copy, Default)]
struct RunningStats {
    count: u64,
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,
}

/// Streaming jitter statistics in microseconds. Memory stays constant no
/// matter how long the producer runs.
#[derive(Debug, Default)]
pub struct JitterHistogram {
    stats: Mutex<RunningStats>,
}

impl JitterHistogram {
    pub fn record(&self, jitter: Duration) {
        let micros = jitter.as_secs_f64() * 1_000_000.0;
        let mut stats = self.stats.lock();
        if stats.count == 0 {
            stats.min = micros;
            stats.max = micros;
        } else {
            stats.min = stats.min.min(micros);
            stats.max = stats.max.max(micros);
        }
        // Welford update.
        stats.count += 1;
        let delta = micros - stats.mean;
        stats.mean += delta / stats.count as f64;
        stats.m2 += delta * (micros - stats.mean);
    }

    pub fn summary(&self) -> Option<JitterSummary> {
        let stats = *self.stats.lock();
        if stats.count == 0 {
            return None;
        }
        let variance = if stats.count > 1 {
            stats.m2 / (stats.count - 1) as f64
        } else {
            0.0
        };
        Some(JitterSummary {
            mean_us: stats.mean,
            std_dev_us: variance.sqrt(),
            max_us: stats.max,
            min_us: stats.min,
            samples: stats.count,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JitterSummary {
    pub mean_us: f64,
    pub std_dev_us: f64,
    pub max_us: f64,
    pub min_us: f64,
    pub samples: u64,
}

/// Measures real tick intervals against a target period.
///
/// The measured interval is returned to the caller so it can drive
/// wall-clock-derived simulation steps.
#[derive(Debug)]
pub struct LoopTimingReporter {
    target_interval: Duration,
    last_tick: Mutex<Option<Instant>>,
    histogram: JitterHistogram,
}

impl LoopTimingReporter {
    pub fn new(target_interval: Duration) -> Self {
        Self {
            target_interval,
            last_tick: Mutex::new(None),
            histogram: JitterHistogram::default(),
        }
    }

    /// Start the clock without recording an interval.
    pub fn start(&self) {
        *self.last_tick.lock() = Some(Instant::now());
    }

    /// Record a tick at `now`, returning the elapsed time since the previous one.
    pub fn record_tick_at(&self, now: Instant) -> Option<Duration> {
        let mut last_tick = self.last_tick.lock();
        let elapsed = last_tick.map(|previous| now.saturating_duration_since(previous));
        if let Some(actual) = elapsed {
            self.histogram.record(actual.abs_diff(self.target_interval));
        }
        *last_tick = Some(now);
        elapsed
    }

    pub fn record_tick(&self) -> Option<Duration> {
        self.record_tick_at(Instant::now())
    }

    pub fn target_interval(&self) -> Duration {
        self.target_interval
    }

    pub fn histogram(&self) -> &JitterHistogram {
        &self.histogram
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_tick_has_no_interval() {
        let reporter = LoopTimingReporter::new(Duration::from_millis(100));
        assert!(reporter.record_tick().is_none());
        assert!(reporter.histogram().summary().is_none());
    }

    #[test]
    fn records_elapsed_and_jitter() {
        let reporter = LoopTimingReporter::new(Duration::from_millis(100));
        let base = Instant::now();
        reporter.record_tick_at(base);
        let elapsed = reporter
            .record_tick_at(base + Duration::from_millis(130))
            .unwrap();
        assert_eq!(elapsed, Duration::from_millis(130));
        let summary = reporter.histogram().summary().unwrap();
        assert_eq!(summary.samples, 1);
        assert!((summary.mean_us - 30_000.0).abs() < 1.0);
    }

    #[test]
    fn summary_matches_sample_statistics() {
        let histogram = JitterHistogram::default();
        for micros in [100, 200, 300, 400] {
            histogram.record(Duration::from_micros(micros));
        }
        let summary = histogram.summary().unwrap();
        assert_eq!(summary.samples, 4);
        assert!((summary.mean_us - 250.0).abs() < 1e-9);
        assert!((summary.std_dev_us - 129.0994).abs() < 1e-3);
        assert!((summary.min_us - 100.0).abs() < 1e-6);
        assert!((summary.max_us - 400.0).abs() < 1e-6);
    }

    #[test]
    fn start_primes_the_clock() {
        let reporter = LoopTimingReporter::new(Duration::from_millis(10));
        reporter.start();
        assert!(reporter.record_tick().is_some());
    }
}
