//! ---
//! fx_section: "12-exchange"
//! fx_subsection: "metrics"
//! fx_type: "source"
//! fx_scope: "code"
//! fx_description: "Prometheus instrumentation for producer and consumer."
//! fx_version: "v0.1.0"
//! fx_owner: "tbd"
//! ---
use std::fs;
use std::path::Path;
use std::sync::Arc;

use prometheus::{
    self, Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

use crate::Result;

/// Metrics published by the exchange subsystem.
#[derive(Clone)]
pub struct ExchangeMetrics {
    batches_published: IntCounter,
    write_failures: IntCounterVec,
    telemetry_ingested: IntCounter,
    anomalies_ingested: IntCounter,
    read_retries: IntCounter,
    batches_deferred: IntCounterVec,
    watermark: IntGauge,
    tick_duration: Histogram,
    registry: Arc<Registry>,
}

impl ExchangeMetrics {
    /// Register all exchange metrics with the provided registry.
    pub fn new(registry: Arc<Registry>) -> Result<Self> {
        let batches_published = IntCounter::with_opts(Opts::new(
            "fleetx_batches_published_total",
            "Batches whose completion marker was written",
        ))?;
        registry.register(Box::new(batches_published.clone()))?;

        let write_failures = IntCounterVec::new(
            Opts::new(
                "fleetx_write_failures_total",
                "Publication failures by output channel",
            ),
            &["channel"],
        )?;
        registry.register(Box::new(write_failures.clone()))?;

        let telemetry_ingested = IntCounter::with_opts(Opts::new(
            "fleetx_telemetry_ingested_total",
            "Telemetry records counted by the consumer",
        ))?;
        registry.register(Box::new(telemetry_ingested.clone()))?;

        let anomalies_ingested = IntCounter::with_opts(Opts::new(
            "fleetx_anomalies_ingested_total",
            "Anomaly records counted by the consumer",
        ))?;
        registry.register(Box::new(anomalies_ingested.clone()))?;

        let read_retries = IntCounter::with_opts(Opts::new(
            "fleetx_read_retries_total",
            "Safe-read attempts repeated after a parse failure",
        ))?;
        registry.register(Box::new(read_retries.clone()))?;

        let batches_deferred = IntCounterVec::new(
            Opts::new(
                "fleetx_batches_deferred_total",
                "Pending batches left for a later poll cycle, by reason",
            ),
            &["reason"],
        )?;
        registry.register(Box::new(batches_deferred.clone()))?;

        let watermark = IntGauge::with_opts(Opts::new(
            "fleetx_consumer_watermark",
            "Highest batch id fully ingested (-1 before the first batch)",
        ))?;
        watermark.set(-1);
        registry.register(Box::new(watermark.clone()))?;

        let tick_duration = Histogram::with_opts(
            HistogramOpts::new(
                "fleetx_tick_duration_seconds",
                "Wall time spent simulating and publishing one tick",
            )
            .buckets(prometheus::exponential_buckets(0.0005, 2.0, 12)?),
        )?;
        registry.register(Box::new(tick_duration.clone()))?;

        Ok(Self {
            batches_published,
            write_failures,
            telemetry_ingested,
            anomalies_ingested,
            read_retries,
            batches_deferred,
            watermark,
            tick_duration,
            registry,
        })
    }

    /// Metrics bound to a private registry.
    pub fn standalone() -> Result<Self> {
        Self::new(Arc::new(Registry::new()))
    }

    /// Registry the metrics were registered with.
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Count a fully published batch.
    pub fn record_batch_published(&self) {
        self.batches_published.inc();
    }

    /// Count a failed write on `channel`.
    pub fn record_write_failure(&self, channel: &str) {
        self.write_failures.with_label_values(&[channel]).inc();
    }

    /// Add ingested telemetry and anomaly record counts.
    pub fn record_ingested(&self, telemetry: u64, anomalies: u64) {
        self.telemetry_ingested.inc_by(telemetry);
        self.anomalies_ingested.inc_by(anomalies);
    }

    /// Add repeated safe-read attempts.
    pub fn record_read_retries(&self, retries: u64) {
        self.read_retries.inc_by(retries);
    }

    /// Count a batch left pending for `reason`.
    pub fn record_deferred(&self, reason: &str) {
        self.batches_deferred.with_label_values(&[reason]).inc();
    }

    /// Publish the consumer watermark.
    pub fn set_watermark(&self, batch_id: u64) {
        self.watermark.set(i64::try_from(batch_id).unwrap_or(i64::MAX));
    }

    /// Observe the wall time of one producer tick.
    pub fn observe_tick(&self, seconds: f64) {
        self.tick_duration.observe(seconds);
    }

    /// Render every registered family in the Prometheus text format.
    pub fn render(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }

    /// Write the text rendering to `path`.
    pub fn export(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, self.render()?)?;
        Ok(())
    }
}

impl std::fmt::Debug for ExchangeMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExchangeMetrics").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample(metrics: &ExchangeMetrics, name: &str) -> f64 {
        metrics
            .registry()
            .gather()
            .into_iter()
            .find(|family| family.get_name() == name)
            .map(|family| {
                family
                    .get_metric()
                    .iter()
                    .map(|m| m.get_counter().get_value() + m.get_gauge().get_value())
                    .sum()
            })
            .unwrap_or_default()
    }

    #[test]
    fn counters_accumulate() {
        let metrics = ExchangeMetrics::standalone().unwrap();
        metrics.record_batch_published();
        metrics.record_batch_published();
        metrics.record_write_failure("live");
        metrics.record_ingested(10, 2);
        metrics.set_watermark(41);
        assert_eq!(sample(&metrics, "fleetx_batches_published_total"), 2.0);
        assert_eq!(sample(&metrics, "fleetx_write_failures_total"), 1.0);
        assert_eq!(sample(&metrics, "fleetx_telemetry_ingested_total"), 10.0);
        assert_eq!(sample(&metrics, "fleetx_anomalies_ingested_total"), 2.0);
        assert_eq!(sample(&metrics, "fleetx_consumer_watermark"), 41.0);
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let registry = Arc::new(Registry::new());
        ExchangeMetrics::new(registry.clone()).unwrap();
        assert!(ExchangeMetrics::new(registry).is_err());
    }

    #[test]
    fn export_writes_text_format() {
        let dir = tempdir().unwrap();
        let metrics = ExchangeMetrics::standalone().unwrap();
        metrics.observe_tick(0.002);
        let path = dir.path().join("out").join("metrics.prom");
        metrics.export(&path).unwrap();
        let text = std::fs::read_to_string(path).unwrap();
        assert!(text.contains("fleetx_tick_duration_seconds_count 1"));
    }
}
