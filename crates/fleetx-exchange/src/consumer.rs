//! ---
//! fx_section: "12-exchange"
//! fx_subsection: "consumption"
//! fx_type: "source"
//! fx_scope: "code"
//! fx_description: "Watermarked, deduplicating batch and live snapshot ingestion."
//! fx_version: "v0.1.0"
//! fx_owner: "tbd"
//! ---
//! Pending ids are drained in ascending order. A batch still under
//! construction is skipped without reading it. A read failure stops the
//! drain so no higher id can move the watermark past the failed one.
//! The producer completes batches strictly in order, so observing a
//! complete batch `M` proves every lower in-construction batch was either
//! finished in the meantime or abandoned by an interrupted run.
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::mem;
use std::path::Path;
use std::sync::Arc;

use fleetx_logging::{fx_debug, fx_info, fx_warn, LogContext};
use fleetx_sim::{AnomalyRecord, LiveTelemetryDocument, TelemetryRecord};
use parking_lot::Mutex;

use crate::layout::{scan_batch_ids_above, BatchState, ExchangeLayout};
use crate::metrics::ExchangeMetrics;
use crate::reader::{is_effectively_empty, RetryPolicy, SafeReader};
use crate::sink::{MemorySink, TelemetrySink};
use crate::{ExchangeError, Result};

/// Idempotent set of discovered but unprocessed batch ids, shared with the
/// directory watcher.
pub type PendingSet = Arc<Mutex<BTreeSet<u64>>>;

/// Why a pending batch was left for a later cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeferReason {
    /// Completion marker not written yet.
    InConstruction,
    /// Payload could not be read.
    ReadFailed,
}

impl DeferReason {
    /// Label used in logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            DeferReason::InConstruction => "in_construction",
            DeferReason::ReadFailed => "read_failed",
        }
    }
}

impl fmt::Display for DeferReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of handling one batch id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOutcome {
    /// Payloads read and counted; the watermark now equals this id.
    Ingested {
        /// Telemetry records in the batch.
        telemetry: usize,
        /// Anomaly records in the batch.
        anomalies: usize,
    },
    /// Id at or below the watermark; nothing read.
    Stale,
    /// Not visible yet; nothing read.
    Deferred(DeferReason),
}

/// Running totals since the consumer was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerCounters {
    /// New live telemetry records (changed timestamp per vehicle).
    pub live_telemetry: u64,
    /// Live anomaly records not seen before.
    pub live_anomalies: u64,
    /// Telemetry records from ingested batches.
    pub batch_telemetry: u64,
    /// Anomaly records from ingested batches.
    pub batch_anomalies: u64,
    /// Batches ingested.
    pub batches: u64,
}

/// What one live snapshot load added.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LiveIngest {
    /// Vehicles whose record changed.
    pub telemetry: usize,
    /// Previously unseen anomalies.
    pub anomalies: usize,
}

/// What one drain of the pending set did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Ids ingested, in order.
    pub ingested: Vec<u64>,
    /// Ids left pending because they are still under construction.
    pub deferred: Vec<u64>,
    /// Ids removed without ingestion: vanished or abandoned.
    pub dropped: Vec<u64>,
    /// Id whose read failed and stopped the drain.
    pub failed: Option<u64>,
}

/// Consumer side of the exchange.
pub struct DataConsumer<S = MemorySink> {
    layout: ExchangeLayout,
    reader: SafeReader,
    pending: PendingSet,
    watermark: Option<u64>,
    sink: S,
    live_timestamps: HashMap<String, i64>,
    known_anomalies: HashSet<(String, i64)>,
    counters: ConsumerCounters,
    verbose: bool,
    metrics: Option<ExchangeMetrics>,
    reported_retries: u64,
}

impl DataConsumer<MemorySink> {
    /// Consumer ingesting into an in-memory sink.
    pub fn new(root: impl AsRef<Path>, policy: RetryPolicy) -> Self {
        Self::with_sink(root, policy, MemorySink::new())
    }
}

impl<S: TelemetrySink> DataConsumer<S> {
    /// Consumer ingesting into `sink`.
    pub fn with_sink(root: impl AsRef<Path>, policy: RetryPolicy, sink: S) -> Self {
        Self {
            layout: ExchangeLayout::new(root.as_ref()),
            reader: SafeReader::new(policy),
            pending: Arc::new(Mutex::new(BTreeSet::new())),
            watermark: None,
            sink,
            live_timestamps: HashMap::new(),
            known_anomalies: HashSet::new(),
            counters: ConsumerCounters::default(),
            verbose: false,
            metrics: None,
            reported_retries: 0,
        }
    }

    /// Attach metrics instrumentation.
    pub fn with_metrics(mut self, metrics: ExchangeMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Log a per-vehicle status summary after each live load.
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Paths this consumer reads from.
    pub fn layout(&self) -> &ExchangeLayout {
        &self.layout
    }

    /// Handle for producers of pending ids, such as the watcher.
    pub fn pending_handle(&self) -> PendingSet {
        Arc::clone(&self.pending)
    }

    /// Pending ids in drain order.
    pub fn pending_ids(&self) -> Vec<u64> {
        self.pending.lock().iter().copied().collect()
    }

    /// Highest batch id fully ingested.
    pub fn watermark(&self) -> Option<u64> {
        self.watermark
    }

    /// Totals so far.
    pub fn counters(&self) -> ConsumerCounters {
        self.counters
    }

    /// Destination of ingested telemetry.
    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Underlying safe reader.
    pub fn reader(&self) -> &SafeReader {
        &self.reader
    }

    fn is_stale(&self, batch_id: u64) -> bool {
        self.watermark.is_some_and(|mark| batch_id <= mark)
    }

    /// Add `batch_id` to the pending set. Returns false when the id is stale
    /// or already pending.
    pub fn enqueue(&self, batch_id: u64) -> bool {
        if self.is_stale(batch_id) {
            return false;
        }
        self.pending.lock().insert(batch_id)
    }

    fn forget(&self, batch_id: u64) {
        self.pending.lock().remove(&batch_id);
    }

    /// Enqueue every `batch_<N>` directory above the watermark. Returns the
    /// number of ids that were not already pending.
    pub fn scan_for_batches(&self) -> usize {
        scan_batch_ids_above(self.layout.root(), self.watermark)
            .into_iter()
            .filter(|id| self.enqueue(*id))
            .count()
    }

    fn store_if_newer(&mut self, record: TelemetryRecord) {
        let newer = self
            .sink
            .find(&record.vehicle_id)
            .map_or(true, |previous| record.timestamp > previous.timestamp);
        if newer {
            self.sink.upsert(record);
        }
    }

    /// Read the live snapshot, keeping only records whose timestamp changed
    /// and anomalies absent from the previous live list. Only the keys of the
    /// latest list are remembered.
    pub fn load_live(&mut self) -> Result<LiveIngest> {
        let mut ingest = LiveIngest::default();

        let document: Option<LiveTelemetryDocument> =
            self.reader.read_json(&self.layout.live_telemetry())?;
        if let Some(document) = document {
            for record in document.telemetry.into_values() {
                let previous = self
                    .live_timestamps
                    .insert(record.vehicle_id.clone(), record.timestamp);
                if previous != Some(record.timestamp) {
                    ingest.telemetry += 1;
                    self.store_if_newer(record);
                }
            }
        }

        let anomaly_path = self.layout.live_anomalies();
        if !is_effectively_empty(&anomaly_path) {
            let anomalies: Vec<AnomalyRecord> =
                self.reader.read_json(&anomaly_path)?.unwrap_or_default();
            let previous = mem::take(&mut self.known_anomalies);
            for anomaly in anomalies {
                let key = (anomaly.vehicle_id.clone(), anomaly.timestamp);
                let unseen = !previous.contains(&key);
                if self.known_anomalies.insert(key) && unseen {
                    fx_info!(
                        context = LogContext::new().with_vehicle(&anomaly.vehicle_id),
                        "new {} anomaly (severity {})",
                        anomaly.details.type_name(),
                        anomaly.details.severity().unwrap_or_default()
                    );
                    ingest.anomalies += 1;
                }
            }
        } else {
            self.known_anomalies.clear();
        }

        self.counters.live_telemetry += ingest.telemetry as u64;
        self.counters.live_anomalies += ingest.anomalies as u64;
        if let Some(metrics) = &self.metrics {
            metrics.record_ingested(ingest.telemetry as u64, ingest.anomalies as u64);
        }
        if self.verbose {
            self.log_status();
        }
        Ok(ingest)
    }

    fn log_status(&self) {
        for record in self.sink.records() {
            fx_info!(
                context = LogContext::new()
                    .with_vehicle(&record.vehicle_id)
                    .with_mode(record.mode.as_str()),
                "speed {:.1} km/h, soc {:.1}%, battery {:.1}C",
                record.sensors.gps.speed,
                record.battery.soc,
                record.battery.temperature
            );
        }
        let c = self.counters;
        fx_info!(
            "live telemetry {}, live anomalies {}, batches {} ({} telemetry, {} anomalies), watermark {:?}",
            c.live_telemetry,
            c.live_anomalies,
            c.batches,
            c.batch_telemetry,
            c.batch_anomalies,
            self.watermark
        );
    }

    /// Handle one batch id.
    ///
    /// Stale ids and batches without a completion marker are never read.
    /// A vanished directory yields [`ExchangeError::MissingResource`]; a
    /// payload that stays malformed yields [`ExchangeError::TransientRead`].
    pub fn process_batch(&mut self, batch_id: u64) -> Result<BatchOutcome> {
        if self.is_stale(batch_id) {
            return Ok(BatchOutcome::Stale);
        }
        match self.layout.batch_state(batch_id) {
            BatchState::Absent => {
                return Err(ExchangeError::MissingResource(
                    self.layout.batch_dir(batch_id),
                ));
            }
            BatchState::InConstruction => {
                return Ok(BatchOutcome::Deferred(DeferReason::InConstruction));
            }
            BatchState::Complete => {}
        }

        let telemetry: Vec<TelemetryRecord> =
            self.reader.read_required(&self.layout.batch_telemetry(batch_id))?;
        let anomalies: Vec<AnomalyRecord> =
            self.reader.read_required(&self.layout.batch_anomalies(batch_id))?;
        let (telemetry_len, anomaly_len) = (telemetry.len(), anomalies.len());

        for record in telemetry {
            self.store_if_newer(record);
        }
        self.counters.batches += 1;
        self.counters.batch_telemetry += telemetry_len as u64;
        self.counters.batch_anomalies += anomaly_len as u64;
        self.watermark = Some(batch_id);
        if let Some(metrics) = &self.metrics {
            metrics.record_ingested(telemetry_len as u64, anomaly_len as u64);
            metrics.set_watermark(batch_id);
        }
        fx_debug!(
            context = LogContext::new().with_batch(batch_id),
            "ingested batch ({} telemetry, {} anomalies)",
            telemetry_len,
            anomaly_len
        );
        Ok(BatchOutcome::Ingested {
            telemetry: telemetry_len,
            anomalies: anomaly_len,
        })
    }

    /// Record the outcome of one id. Returns false when the drain must stop.
    fn settle(
        &mut self,
        batch_id: u64,
        outcome: Result<BatchOutcome>,
        report: &mut DrainReport,
    ) -> bool {
        let ctx = LogContext::new().with_batch(batch_id);
        match outcome {
            Ok(BatchOutcome::Ingested { .. }) => {
                self.forget(batch_id);
                report.ingested.push(batch_id);
                true
            }
            Ok(BatchOutcome::Stale) => {
                self.forget(batch_id);
                true
            }
            Ok(BatchOutcome::Deferred(reason)) => {
                if let Some(metrics) = &self.metrics {
                    metrics.record_deferred(reason.as_str());
                }
                report.deferred.push(batch_id);
                true
            }
            Err(ExchangeError::MissingResource(path)) => {
                fx_warn!(
                    context = ctx,
                    "batch vanished before it could be read ({}); dropping",
                    path.display()
                );
                self.forget(batch_id);
                report.dropped.push(batch_id);
                true
            }
            Err(err) => {
                fx_warn!(context = ctx, "batch left pending: {}", err);
                if let Some(metrics) = &self.metrics {
                    metrics.record_deferred(DeferReason::ReadFailed.as_str());
                }
                report.failed = Some(batch_id);
                false
            }
        }
    }

    /// Drain the pending set in ascending id order.
    pub fn process_pending(&mut self) -> DrainReport {
        let ids = self.pending_ids();
        let mut report = DrainReport::default();
        let mut waiting: Vec<u64> = Vec::new();

        for id in ids {
            if !waiting.is_empty()
                && !self.is_stale(id)
                && self.layout.batch_state(id) == BatchState::Complete
            {
                for earlier in mem::take(&mut waiting) {
                    report.deferred.retain(|d| *d != earlier);
                    match self.process_batch(earlier) {
                        Ok(BatchOutcome::Deferred(_)) => {
                            fx_warn!(
                                context = LogContext::new().with_batch(earlier),
                                "batch abandoned by producer (batch {} is complete); skipping",
                                id
                            );
                            self.forget(earlier);
                            report.dropped.push(earlier);
                        }
                        outcome => {
                            if !self.settle(earlier, outcome, &mut report) {
                                return report;
                            }
                        }
                    }
                }
            }

            let outcome = self.process_batch(id);
            if matches!(outcome, Ok(BatchOutcome::Deferred(_))) {
                waiting.push(id);
            }
            if !self.settle(id, outcome, &mut report) {
                break;
            }
        }
        report
    }

    /// One poll cycle: live snapshot, discovery scan, then drain.
    pub fn run_cycle(&mut self) -> DrainReport {
        if let Err(err) = self.load_live() {
            fx_warn!(context = LogContext::new().with_mode("consumer"), "live snapshot skipped: {}", err);
        }
        self.scan_for_batches();
        let report = self.process_pending();

        let retries = self.reader.retries();
        if let Some(metrics) = &self.metrics {
            metrics.record_read_retries(retries - self.reported_retries);
        }
        self.reported_retries = retries;
        report
    }
}

impl<S> fmt::Debug for DataConsumer<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataConsumer")
            .field("root", &self.layout.root())
            .field("watermark", &self.watermark)
            .field("counters", &self.counters)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::BatchWriter;
    use fleetx_common::VehicleProfile;
    use fleetx_sim::{EngineSettings, SimulationEngine};
    use std::fs;
    use std::time::Duration;
    use tempfile::tempdir;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            attempts: 2,
            delay: Duration::from_millis(5),
        }
    }

    fn engine(start: u64) -> SimulationEngine {
        SimulationEngine::new(
            &[VehicleProfile::named("V001"), VehicleProfile::named("V002")],
            EngineSettings {
                seed: Some(9),
                start_batch_id: start,
                anomaly_report_percent: 100,
                ..EngineSettings::default()
            },
        )
    }

    #[test]
    fn enqueue_is_idempotent_and_respects_watermark() {
        let dir = tempdir().unwrap();
        let writer = BatchWriter::new(dir.path()).unwrap();
        writer.publish(&engine(0).step_at(1.0, 10));
        let mut consumer = DataConsumer::new(dir.path(), policy());
        assert!(consumer.enqueue(0));
        assert!(!consumer.enqueue(0));
        consumer.process_pending();
        assert_eq!(consumer.watermark(), Some(0));
        assert!(!consumer.enqueue(0));
        assert!(consumer.pending_ids().is_empty());
    }

    #[test]
    fn stale_ids_are_not_recounted() {
        let dir = tempdir().unwrap();
        let writer = BatchWriter::new(dir.path()).unwrap();
        writer.publish(&engine(0).step_at(1.0, 10));
        let mut consumer = DataConsumer::new(dir.path(), policy());
        assert!(matches!(
            consumer.process_batch(0).unwrap(),
            BatchOutcome::Ingested { telemetry: 2, .. }
        ));
        assert_eq!(consumer.process_batch(0).unwrap(), BatchOutcome::Stale);
        assert_eq!(consumer.counters().batch_telemetry, 2);
        assert_eq!(consumer.counters().batches, 1);
    }

    #[test]
    fn vanished_batch_is_dropped() {
        let dir = tempdir().unwrap();
        let mut consumer = DataConsumer::new(dir.path(), policy());
        consumer.enqueue(4);
        let report = consumer.process_pending();
        assert_eq!(report.dropped, vec![4]);
        assert!(consumer.pending_ids().is_empty());
        assert_eq!(consumer.watermark(), None);
    }

    #[test]
    fn read_failure_blocks_higher_ids() {
        let dir = tempdir().unwrap();
        let writer = BatchWriter::new(dir.path()).unwrap();
        let mut sim = engine(0);
        writer.publish(&sim.step_at(1.0, 10));
        writer.publish(&sim.step_at(1.0, 20));
        fs::write(writer.layout().batch_telemetry(0), b"[{").unwrap();

        let mut consumer = DataConsumer::new(dir.path(), policy());
        consumer.scan_for_batches();
        let report = consumer.process_pending();
        assert_eq!(report.failed, Some(0));
        assert!(report.ingested.is_empty());
        assert_eq!(consumer.pending_ids(), vec![0, 1]);
        assert_eq!(consumer.watermark(), None);
    }

    #[test]
    fn abandoned_batch_is_skipped_once_a_later_one_completes() {
        let dir = tempdir().unwrap();
        let writer = BatchWriter::new(dir.path()).unwrap();
        let layout = writer.layout().clone();
        fs::create_dir(layout.batch_dir(0)).unwrap();
        fs::write(layout.start_marker(0), b"0").unwrap();

        let mut consumer = DataConsumer::new(dir.path(), policy());
        consumer.scan_for_batches();
        let report = consumer.process_pending();
        assert_eq!(report.deferred, vec![0]);
        assert_eq!(consumer.pending_ids(), vec![0]);

        writer.publish(&engine(1).step_at(1.0, 10));
        consumer.scan_for_batches();
        let report = consumer.process_pending();
        assert_eq!(report.dropped, vec![0]);
        assert_eq!(report.ingested, vec![1]);
        assert_eq!(consumer.watermark(), Some(1));
        assert!(consumer.pending_ids().is_empty());
    }

    #[test]
    fn live_anomalies_dedup_by_vehicle_and_timestamp() {
        let dir = tempdir().unwrap();
        let writer = BatchWriter::new(dir.path()).unwrap();
        let raw = serde_json::json!([
            {"vehicle_id": "V001", "timestamp": 5, "anomaly_type": "communication",
             "details": {"packet_loss": 40, "latency_spike": 700, "connection_drops": 3, "severity": 1}},
            {"vehicle_id": "V002", "timestamp": 5, "anomaly_type": "brakes", "details": {}}
        ]);
        fs::write(
            writer.layout().live_anomalies(),
            serde_json::to_vec(&raw).unwrap(),
        )
        .unwrap();
        let mut consumer = DataConsumer::new(dir.path(), policy()).verbose(true);
        assert_eq!(consumer.load_live().unwrap().anomalies, 2);
        assert_eq!(consumer.load_live().unwrap().anomalies, 0);
        assert_eq!(consumer.counters().live_anomalies, 2);
    }

    #[test]
    fn anomaly_keys_track_only_the_latest_live_list() {
        let dir = tempdir().unwrap();
        let writer = BatchWriter::new(dir.path()).unwrap();
        let path = writer.layout().live_anomalies();
        let mut consumer = DataConsumer::new(dir.path(), policy());
        for ts in 0..200 {
            let raw = serde_json::json!([
                {"vehicle_id": "V001", "timestamp": ts, "anomaly_type": "brakes", "details": {}}
            ]);
            fs::write(&path, serde_json::to_vec(&raw).unwrap()).unwrap();
            assert_eq!(consumer.load_live().unwrap().anomalies, 1);
            assert_eq!(consumer.known_anomalies.len(), 1);
        }
        assert_eq!(consumer.counters().live_anomalies, 200);

        fs::write(&path, b"").unwrap();
        consumer.load_live().unwrap();
        assert!(consumer.known_anomalies.is_empty());
    }

    #[test]
    fn scan_skips_ids_at_or_below_watermark() {
        let dir = tempdir().unwrap();
        let writer = BatchWriter::new(dir.path()).unwrap();
        let mut sim = engine(0);
        for ts in 0..3 {
            writer.publish(&sim.step_at(1.0, ts));
        }
        let mut consumer = DataConsumer::new(dir.path(), policy());
        assert_eq!(consumer.scan_for_batches(), 3);
        consumer.process_pending();
        assert_eq!(consumer.watermark(), Some(2));

        writer.publish(&sim.step_at(1.0, 3));
        assert_eq!(consumer.scan_for_batches(), 1);
        assert_eq!(consumer.pending_ids(), vec![3]);
    }
}
