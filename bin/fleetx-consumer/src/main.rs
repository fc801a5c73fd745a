//! ---
//! fx_section: "01-core-functionality"
//! fx_subsection: "binary"
//! fx_type: "source"
//! fx_scope: "code"
//! fx_description: "Binary entrypoint for the batch consumer."
//! fx_version: "v0.1.0"
//! fx_owner: "tbd"
//! ---
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use fleetx_common::{init_tracing, AppConfig};
use fleetx_exchange::{
    ConsumerLoop, DataConsumer, ExchangeMetrics, MemorySink, RetryPolicy, TelemetrySink,
};
use fleetx_logging::{log_system_event, LogContext, SystemEventOutcome};
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Ingest live snapshots and completed batches from the exchange root",
    long_about = None
)]
struct Cli {
    #[arg(long, value_name = "FILE", env = "FLEETX_CONFIG", help = "Path to configuration file")]
    config: Option<PathBuf>,

    #[arg(long, value_name = "DIR", env = "FLEETX_INPUT", help = "Exchange root to consume from")]
    input: Option<PathBuf>,

    #[arg(short, long, help = "Log per-vehicle status after every live load")]
    verbose: bool,

    #[arg(long, help = "Disable the directory watch and rely on polling")]
    no_watch: bool,

    #[arg(long, help = "Stop after this many poll cycles")]
    max_cycles: Option<u64>,
}

impl Cli {
    fn apply(&self, config: &mut AppConfig) {
        let consumer = &mut config.consumer;
        if let Some(input) = &self.input {
            consumer.input_root = input.clone();
        }
        if self.verbose {
            consumer.verbose = true;
        }
        if self.no_watch {
            consumer.watch = false;
        }
    }
}

fn load_config(cli: &Cli) -> Result<AppConfig> {
    let mut candidates = Vec::new();
    if let Some(path) = &cli.config {
        candidates.push(path.clone());
    }
    candidates.push(PathBuf::from("configs/fleetx.toml"));
    let mut config = AppConfig::load_with_source(&candidates)?.config;
    cli.apply(&mut config);
    config
        .validate()
        .context("invalid consumer configuration after CLI overrides")?;
    Ok(config)
}

fn build_loop(config: &AppConfig, metrics: ExchangeMetrics) -> ConsumerLoop<MemorySink> {
    let settings = &config.consumer;
    let consumer = DataConsumer::new(&settings.input_root, RetryPolicy::from_config(settings))
        .verbose(settings.verbose)
        .with_metrics(metrics);
    ConsumerLoop::new(consumer, settings.poll_interval)
        .with_settle_delay(settings.settle_delay)
        .with_watch(settings.watch)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;
    init_tracing("fleetx-consumer", &config.logging, config.consumer.verbose)?;

    let ctx = LogContext::new().with_mode("consumer");
    let metrics = ExchangeMetrics::standalone()?;
    let mut consumer = build_loop(&config, metrics.clone());
    if let Some(limit) = cli.max_cycles {
        consumer = consumer.with_max_cycles(limit);
    }
    log_system_event(
        &ctx,
        "startup",
        &format!("input root {}", config.consumer.input_root.display()),
        SystemEventOutcome::Success,
    );

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let mut handle = tokio::spawn(consumer.run(shutdown_rx));
    let finished = tokio::select! {
        joined = &mut handle => joined,
        result = signal::ctrl_c() => {
            result.context("failed to listen for ctrl-c")?;
            info!("shutdown requested");
            let _ = shutdown_tx.send(());
            handle.await
        }
    }
    .context("consumer loop panicked")?;

    if let Some(path) = &config.metrics.export_path {
        if let Err(err) = metrics.export(path) {
            warn!(error = %err, path = %path.display(), "failed to export metrics");
        }
    }
    match finished {
        Ok(consumer) => {
            let counters = consumer.counters();
            log_system_event(
                &ctx,
                "shutdown",
                &format!(
                    "{} batches, {} records stored, watermark {:?}",
                    counters.batches,
                    consumer.sink().len(),
                    consumer.watermark()
                ),
                SystemEventOutcome::Success,
            );
            Ok(())
        }
        Err(err) => {
            log_system_event(
                &ctx,
                "shutdown",
                &err.to_string(),
                SystemEventOutcome::Fault,
            );
            Err(err).context("consumer loop failed")
        }
    }
}
