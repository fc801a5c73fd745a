//! ---
//! fx_section: "12-exchange"
//! fx_subsection: "publication"
//! fx_type: "source"
//! fx_scope: "code"
//! fx_description: "Batch and live snapshot publication."
//! fx_version: "v0.1.0"
//! fx_owner: "tbd"
//! ---
use std::fmt;
use std::fs;
use std::path::Path;

use fleetx_logging::{fx_debug, fx_warn, LogContext};
use fleetx_sim::{Batch, LiveSnapshot, TickOutput};

use crate::atomic::{write_json_atomic, write_marker};
use crate::layout::{scan_batch_ids, ExchangeLayout};
use crate::metrics::ExchangeMetrics;
use crate::{ExchangeError, Result};

/// Independent output channels; a failure on one never blocks another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WriteChannel {
    /// `live/telemetry.json`.
    LiveTelemetry,
    /// `live/anomaly.json`.
    LiveAnomalies,
    /// The numbered batch directory.
    Batch,
}

impl WriteChannel {
    /// Label used in logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            WriteChannel::LiveTelemetry => "live_telemetry",
            WriteChannel::LiveAnomalies => "live_anomaly",
            WriteChannel::Batch => "batch",
        }
    }
}

impl fmt::Display for WriteChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of publishing one tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishReport {
    /// Batch the tick carried.
    pub batch_id: u64,
    /// Channels whose output for this tick was lost.
    pub failed: Vec<WriteChannel>,
}

impl PublishReport {
    /// True when every channel was written.
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }

    /// True when the batch directory reached its completion marker.
    pub fn batch_complete(&self) -> bool {
        !self.failed.contains(&WriteChannel::Batch)
    }
}

/// Publishes ticks under an exchange root.
#[derive(Debug, Clone)]
pub struct BatchWriter {
    layout: ExchangeLayout,
    metrics: Option<ExchangeMetrics>,
}

impl BatchWriter {
    /// Prepare `root` and `root/live`. Failure here is the only fatal
    /// condition of the producer.
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let layout = ExchangeLayout::new(root.as_ref());
        let live = layout.live_dir();
        fs::create_dir_all(&live).map_err(|source| ExchangeError::Write { path: live, source })?;
        Ok(Self {
            layout,
            metrics: None,
        })
    }

    /// Attach metrics instrumentation.
    pub fn with_metrics(mut self, metrics: ExchangeMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Paths this writer publishes to.
    pub fn layout(&self) -> &ExchangeLayout {
        &self.layout
    }

    /// First batch id that cannot collide with any directory already under
    /// the root: one past the highest existing id, or 0.
    ///
    /// In-construction directories left by an interrupted run count too;
    /// they are skipped, never repaired.
    pub fn resume_batch_id(&self) -> u64 {
        scan_batch_ids(self.layout.root())
            .last()
            .map_or(0, |highest| highest.saturating_add(1))
    }

    /// Overwrite both live snapshot files. Each file is attempted even if the
    /// other fails.
    pub fn publish_live(&self, live: &LiveSnapshot) -> Vec<(WriteChannel, ExchangeError)> {
        let mut failures = Vec::new();
        if let Err(err) = write_json_atomic(&self.layout.live_telemetry(), &live.telemetry_document())
        {
            failures.push((WriteChannel::LiveTelemetry, err));
        }
        if let Err(err) = write_json_atomic(&self.layout.live_anomalies(), &live.anomalies) {
            failures.push((WriteChannel::LiveAnomalies, err));
        }
        failures
    }

    /// Write `batch_<id>/` in protocol order: start marker, telemetry,
    /// anomalies, completion marker.
    pub fn publish_batch(&self, batch: &Batch) -> Result<()> {
        let id = batch.batch_id;
        let dir = self.layout.batch_dir(id);
        fs::create_dir_all(&dir).map_err(|source| ExchangeError::Write { path: dir, source })?;
        write_marker(&self.layout.start_marker(id))?;
        write_json_atomic(&self.layout.batch_telemetry(id), &batch.telemetry)?;
        write_json_atomic(&self.layout.batch_anomalies(id), &batch.anomalies)?;
        write_marker(&self.layout.complete_marker(id))?;
        Ok(())
    }

    /// Publish everything a tick produced. Failures are logged and counted;
    /// the lost channel's output for this tick is not retried.
    pub fn publish(&self, output: &TickOutput) -> PublishReport {
        let batch_id = output.batch.batch_id;
        let ctx = LogContext::new().with_batch(batch_id).with_mode("producer");
        let mut failures = self.publish_live(&output.live);
        if let Err(err) = self.publish_batch(&output.batch) {
            failures.push((WriteChannel::Batch, err));
        }

        for (channel, err) in &failures {
            fx_warn!(context = ctx, "{} write lost for this tick: {}", channel, err);
            if let Some(metrics) = &self.metrics {
                metrics.record_write_failure(channel.as_str());
            }
        }

        let report = PublishReport {
            batch_id,
            failed: failures.into_iter().map(|(channel, _)| channel).collect(),
        };
        if report.batch_complete() {
            if let Some(metrics) = &self.metrics {
                metrics.record_batch_published();
            }
            fx_debug!(
                context = ctx,
                "published batch ({} telemetry, {} anomalies)",
                output.batch.telemetry.len(),
                output.batch.anomalies.len()
            );
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::BatchState;
    use fleetx_common::VehicleProfile;
    use fleetx_sim::{EngineSettings, SimulationEngine, TelemetryRecord};
    use tempfile::tempdir;

    fn tick(start: u64) -> TickOutput {
        let mut engine = SimulationEngine::new(
            &[VehicleProfile::named("V001"), VehicleProfile::named("V002")],
            EngineSettings {
                seed: Some(3),
                start_batch_id: start,
                ..EngineSettings::default()
            },
        );
        engine.step_at(1.0, 1_700_000_000_000)
    }

    #[test]
    fn creates_live_directory_up_front() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("fleet");
        let writer = BatchWriter::new(&root).unwrap();
        assert!(writer.layout().live_dir().is_dir());
        assert_eq!(writer.resume_batch_id(), 0);
    }

    #[test]
    fn unwritable_root_is_fatal() {
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("file");
        fs::write(&blocker, b"x").unwrap();
        assert!(matches!(
            BatchWriter::new(&blocker),
            Err(ExchangeError::Write { .. })
        ));
    }

    #[test]
    fn publish_writes_complete_batch_and_live_files() {
        let dir = tempdir().unwrap();
        let writer = BatchWriter::new(dir.path()).unwrap();
        let output = tick(0);
        let report = writer.publish(&output);
        assert!(report.is_clean());

        let layout = writer.layout();
        assert_eq!(layout.batch_state(0), BatchState::Complete);
        let records: Vec<TelemetryRecord> =
            serde_json::from_slice(&fs::read(layout.batch_telemetry(0)).unwrap()).unwrap();
        assert_eq!(records, output.batch.telemetry);

        let live: serde_json::Value =
            serde_json::from_slice(&fs::read(layout.live_telemetry()).unwrap()).unwrap();
        assert!(live["telemetry"]["V001"].is_object());
        assert!(live["telemetry"]["V002"].is_object());
        let anomalies: serde_json::Value =
            serde_json::from_slice(&fs::read(layout.live_anomalies()).unwrap()).unwrap();
        assert!(anomalies.is_array());
    }

    #[test]
    fn resume_skips_past_stale_directories() {
        let dir = tempdir().unwrap();
        let writer = BatchWriter::new(dir.path()).unwrap();
        writer.publish(&tick(0));
        writer.publish(&tick(1));
        // Interrupted run: start marker only.
        fs::create_dir(writer.layout().batch_dir(2)).unwrap();
        fs::write(writer.layout().start_marker(2), b"0").unwrap();
        assert_eq!(writer.resume_batch_id(), 3);
        assert_eq!(writer.layout().batch_state(2), BatchState::InConstruction);
    }

    #[test]
    fn batch_failure_does_not_block_live_channel() {
        let dir = tempdir().unwrap();
        let writer = BatchWriter::new(dir.path())
            .unwrap()
            .with_metrics(ExchangeMetrics::standalone().unwrap());
        // A plain file where the batch directory should go.
        fs::write(writer.layout().batch_dir(5), b"in the way").unwrap();
        let report = writer.publish(&tick(5));
        assert_eq!(report.failed, vec![WriteChannel::Batch]);
        assert!(!report.batch_complete());
        assert!(writer.layout().live_telemetry().is_file());
    }
}
