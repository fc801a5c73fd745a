//! ---
//! fx_section: "12-exchange"
//! fx_subsection: "consumption"
//! fx_type: "source"
//! fx_scope: "code"
//! fx_description: "Poll loop combining watch discovery with periodic drains."
//! fx_version: "v0.1.0"
//! fx_owner: "tbd"
//! ---
use std::time::Duration;

use fleetx_logging::{fx_debug, fx_info, fx_warn, LogContext};
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;

use crate::consumer::DataConsumer;
use crate::sink::TelemetrySink;
use crate::watcher::BatchWatcher;
use crate::Result;

/// Drives a [`DataConsumer`] on a fixed poll period, optionally fed by a
/// directory watch between polls.
#[derive(Debug)]
pub struct ConsumerLoop<S> {
    consumer: DataConsumer<S>,
    poll_interval: Duration,
    settle_delay: Duration,
    watch: bool,
    max_cycles: Option<u64>,
}

impl<S: TelemetrySink + 'static> ConsumerLoop<S> {
    /// Poll every `poll_interval`, with the watch enabled.
    pub fn new(consumer: DataConsumer<S>, poll_interval: Duration) -> Self {
        Self {
            consumer,
            poll_interval,
            settle_delay: Duration::from_millis(500),
            watch: true,
            max_cycles: None,
        }
    }

    /// Delay between a watch event and enqueueing its id.
    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    /// Enable or disable the directory watch.
    pub fn with_watch(mut self, watch: bool) -> Self {
        self.watch = watch;
        self
    }

    /// Stop on its own after `cycles` poll cycles.
    pub fn with_max_cycles(mut self, cycles: u64) -> Self {
        self.max_cycles = Some(cycles);
        self
    }

    /// Run until `shutdown` fires or the cycle limit is reached, returning
    /// the consumer for inspection.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) -> Result<DataConsumer<S>> {
        let ConsumerLoop {
            mut consumer,
            poll_interval,
            settle_delay,
            watch,
            max_cycles,
        } = self;
        let ctx = LogContext::new().with_mode("consumer");

        let watcher = if watch {
            match BatchWatcher::start(consumer.layout().root(), consumer.pending_handle(), settle_delay)
            {
                Ok(watcher) => Some(watcher),
                Err(err) => {
                    fx_warn!(context = ctx, "directory watch unavailable, polling only: {}", err);
                    None
                }
            }
        } else {
            None
        };

        fx_info!(
            context = ctx,
            "consuming from {} every {:?} (watch {})",
            consumer.layout().root().display(),
            poll_interval,
            if watcher.is_some() { "on" } else { "off" }
        );

        let mut interval = tokio::time::interval(poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut cycles = 0u64;

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    fx_debug!(context = ctx, "consumer shutdown signal received");
                    break;
                }
                _ = interval.tick() => {
                    // Safe reads sleep between retries; keep them off the async workers.
                    let (returned, report) = tokio::task::spawn_blocking(move || {
                        let report = consumer.run_cycle();
                        (consumer, report)
                    })
                    .await?;
                    consumer = returned;
                    cycles += 1;

                    if !report.ingested.is_empty() || !report.dropped.is_empty() {
                        fx_debug!(
                            context = ctx,
                            "cycle {}: ingested {:?}, dropped {:?}, deferred {:?}",
                            cycles,
                            report.ingested,
                            report.dropped,
                            report.deferred
                        );
                    }
                    if max_cycles.is_some_and(|limit| cycles >= limit) {
                        break;
                    }
                }
            }
        }

        let counters = consumer.counters();
        fx_info!(
            context = ctx,
            "consumer stopped: {} batches ({} telemetry, {} anomalies), watermark {:?}",
            counters.batches,
            counters.batch_telemetry,
            counters.batch_anomalies,
            consumer.watermark()
        );
        Ok(consumer)
    }
}
