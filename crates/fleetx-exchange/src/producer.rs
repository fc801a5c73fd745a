//! ---
//! fx_section: "12-exchange"
//! fx_subsection: "publication"
//! fx_type: "source"
//! fx_scope: "code"
//! fx_description: "Fixed-period producer loop driving the engine and writer."
//! fx_version: "v0.1.0"
//! fx_owner: "tbd"
//! ---
use std::time::{Duration, Instant};

use fleetx_common::{JitterSummary, LoopTimingReporter};
use fleetx_logging::{fx_debug, fx_error, fx_info, LogContext};
use fleetx_sim::{SimulationEngine, TickOutput};
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;

use crate::metrics::ExchangeMetrics;
use crate::writer::BatchWriter;

const STATUS_EVERY_BATCHES: u64 = 10;

/// What a producer run accomplished.
#[derive(Debug, Clone, Default)]
pub struct ProducerSummary {
    /// Ticks executed.
    pub ticks: u64,
    /// Ticks whose batch directory reached its completion marker.
    pub batches_published: u64,
    /// Ticks that lost output on at least one channel.
    pub degraded_ticks: u64,
    /// Identifier of the last batch produced, published or not.
    pub last_batch_id: Option<u64>,
    /// Interval jitter against the target period.
    pub jitter: Option<JitterSummary>,
}

/// One tick at a time: simulate with the measured elapsed time, publish,
/// then wait for the next period. Ticks never overlap.
#[derive(Debug)]
pub struct ProducerLoop {
    engine: SimulationEngine,
    writer: BatchWriter,
    tick_interval: Duration,
    metrics: Option<ExchangeMetrics>,
    max_ticks: Option<u64>,
}

impl ProducerLoop {
    /// Loop ticking every `tick_interval`.
    pub fn new(engine: SimulationEngine, writer: BatchWriter, tick_interval: Duration) -> Self {
        Self {
            engine,
            writer,
            tick_interval,
            metrics: None,
            max_ticks: None,
        }
    }

    /// Attach metrics instrumentation.
    pub fn with_metrics(mut self, metrics: ExchangeMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Stop on its own after `ticks` ticks.
    pub fn with_max_ticks(mut self, ticks: u64) -> Self {
        self.max_ticks = Some(ticks);
        self
    }

    /// Run until `shutdown` fires or the tick limit is reached.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) -> ProducerSummary {
        let ProducerLoop {
            mut engine,
            mut writer,
            tick_interval,
            metrics,
            max_ticks,
        } = self;
        let mut interval = tokio::time::interval(tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let reporter = LoopTimingReporter::new(tick_interval);
        reporter.start();
        let mut summary = ProducerSummary::default();
        let ctx = LogContext::new().with_mode("producer");

        fx_info!(
            context = ctx.with_batch(engine.next_batch_id()),
            "producing into {} every {:?}",
            writer.layout().root().display(),
            tick_interval
        );

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    fx_debug!(context = ctx, "producer shutdown signal received");
                    break;
                }
                _ = interval.tick() => {
                    let elapsed = reporter.record_tick().unwrap_or(Duration::ZERO);
                    let started = Instant::now();
                    // Publishing syncs every file to disk.
                    let joined = tokio::task::spawn_blocking(move || {
                        let output = engine.step(elapsed);
                        let report = writer.publish(&output);
                        (engine, writer, output, report)
                    })
                    .await;
                    let (returned_engine, returned_writer, output, report) = match joined {
                        Ok(tick) => tick,
                        Err(err) => {
                            fx_error!(context = ctx, "producer tick aborted: {}", err);
                            break;
                        }
                    };
                    engine = returned_engine;
                    writer = returned_writer;
                    if let Some(metrics) = &metrics {
                        metrics.observe_tick(started.elapsed().as_secs_f64());
                    }

                    summary.ticks += 1;
                    summary.last_batch_id = Some(report.batch_id);
                    if report.batch_complete() {
                        summary.batches_published += 1;
                    }
                    if !report.is_clean() {
                        summary.degraded_ticks += 1;
                    }
                    if summary.ticks % STATUS_EVERY_BATCHES == 0 {
                        log_status(&engine, &output);
                    }
                    if max_ticks.is_some_and(|limit| summary.ticks >= limit) {
                        break;
                    }
                }
            }
        }

        summary.jitter = reporter.histogram().summary();
        if let Some(jitter) = &summary.jitter {
            fx_info!(
                context = ctx,
                "tick jitter over {} samples: mean {:.0}us, std-dev {:.0}us, max {:.0}us",
                jitter.samples,
                jitter.mean_us,
                jitter.std_dev_us,
                jitter.max_us
            );
        }
        fx_info!(
            context = ctx,
            "producer stopped after {} ticks ({} batches published, {} degraded)",
            summary.ticks,
            summary.batches_published,
            summary.degraded_ticks
        );
        summary
    }
}

fn log_status(engine: &SimulationEngine, output: &TickOutput) {
    let stats = engine.stats();
    fx_info!(
        context = LogContext::new()
            .with_batch(output.batch.batch_id)
            .with_tick(stats.ticks)
            .with_mode("producer"),
        "{} telemetry and {} anomaly records published so far",
        stats.telemetry_records,
        stats.anomaly_records
    );
    for vehicle in engine.vehicles() {
        let anomaly = vehicle.anomaly_state();
        fx_info!(
            context = LogContext::new()
                .with_vehicle(vehicle.vehicle_id())
                .with_mode(vehicle.mode().as_str()),
            "speed {:.1} km/h, soc {:.1}%, anomaly {}",
            vehicle.speed(),
            vehicle.soc(),
            if anomaly.active { anomaly.kind.as_str() } else { "none" }
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::BatchState;
    use fleetx_common::VehicleProfile;
    use fleetx_sim::EngineSettings;
    use tempfile::tempdir;

    fn engine() -> SimulationEngine {
        SimulationEngine::new(
            &[VehicleProfile::named("V001")],
            EngineSettings {
                seed: Some(17),
                ..EngineSettings::default()
            },
        )
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn stops_after_tick_limit() {
        let dir = tempdir().unwrap();
        let writer = BatchWriter::new(dir.path()).unwrap();
        let layout = writer.layout().clone();
        let (_tx, rx) = broadcast::channel(1);
        let summary = ProducerLoop::new(engine(), writer, Duration::from_millis(5))
            .with_max_ticks(12)
            .run(rx)
            .await;
        assert_eq!(summary.ticks, 12);
        assert_eq!(summary.batches_published, 12);
        assert_eq!(summary.last_batch_id, Some(11));
        assert!(summary.jitter.is_some());
        for id in 0..12 {
            assert_eq!(layout.batch_state(id), BatchState::Complete);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn shutdown_signal_ends_loop() {
        let dir = tempdir().unwrap();
        let writer = BatchWriter::new(dir.path()).unwrap();
        let (tx, rx) = broadcast::channel(1);
        let handle = tokio::spawn(
            ProducerLoop::new(engine(), writer, Duration::from_millis(10)).run(rx),
        );
        tokio::time::sleep(Duration::from_millis(60)).await;
        tx.send(()).unwrap();
        let summary = handle.await.unwrap();
        assert!(summary.ticks >= 1);
    }

    #[tokio::test]
    async fn runs_on_a_single_threaded_runtime() {
        let dir = tempdir().unwrap();
        let writer = BatchWriter::new(dir.path()).unwrap();
        let layout = writer.layout().clone();
        let (_tx, rx) = broadcast::channel(1);
        let summary = ProducerLoop::new(engine(), writer, Duration::from_millis(5))
            .with_max_ticks(4)
            .run(rx)
            .await;
        assert_eq!(summary.ticks, 4);
        assert_eq!(summary.degraded_ticks, 0);
        assert_eq!(layout.batch_state(3), BatchState::Complete);
    }
}
