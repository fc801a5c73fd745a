//! ---
//! fx_section: "01-core-functionality"
//! fx_subsection: "binary"
//! fx_type: "source"
//! fx_scope: "code"
//! fx_description: "Binary entrypoint for the fleet simulation producer."
//! fx_version: "v0.1.0"
//! fx_owner: "tbd"
//! ---
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use fleetx_common::{init_tracing, AppConfig};
use fleetx_exchange::{BatchWriter, ExchangeMetrics, ProducerLoop};
use fleetx_logging::{log_system_event, LogContext, SystemEventOutcome};
use fleetx_sim::{EngineSettings, SimulationEngine};
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Simulate a vehicle fleet and publish telemetry batches to the exchange root",
    long_about = None
)]
struct Cli {
    #[arg(long, value_name = "FILE", env = "FLEETX_CONFIG", help = "Path to configuration file")]
    config: Option<PathBuf>,

    #[arg(long, value_name = "DIR", env = "FLEETX_OUTPUT", help = "Exchange root to publish into")]
    output: Option<PathBuf>,

    #[arg(long, value_name = "MS", help = "Tick period in milliseconds")]
    rate: Option<u64>,

    #[arg(
        long = "anomaly-prob",
        value_name = "PERCENT",
        value_parser = clap::value_parser!(u8).range(0..=100),
        help = "Chance (0-100) that an active anomaly is reported on a tick"
    )]
    anomaly_prob: Option<u8>,

    #[arg(long, value_name = "FACTOR", help = "Simulation speed multiplier")]
    speed: Option<f64>,

    #[arg(long, help = "Seed for a reproducible fleet")]
    seed: Option<u64>,

    #[arg(long, help = "Stop after this many ticks")]
    max_ticks: Option<u64>,

    #[arg(short, long, help = "Enable debug logging")]
    verbose: bool,
}

impl Cli {
    fn apply(&self, config: &mut AppConfig) {
        let producer = &mut config.producer;
        if let Some(output) = &self.output {
            producer.output_root = output.clone();
        }
        if let Some(rate) = self.rate {
            producer.tick_interval = Duration::from_millis(rate);
        }
        if let Some(percent) = self.anomaly_prob {
            producer.anomaly_report_percent = percent;
        }
        if let Some(speed) = self.speed {
            producer.simulation_speed = speed;
        }
        if self.seed.is_some() {
            producer.seed = self.seed;
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
        .context("invalid producer configuration after CLI overrides")?;
    Ok(config)
}

fn build_loop(config: &AppConfig, metrics: ExchangeMetrics) -> Result<ProducerLoop> {
    let root = &config.producer.output_root;
    let writer = BatchWriter::new(root)
        .with_context(|| format!("failed to prepare exchange root {}", root.display()))?
        .with_metrics(metrics.clone());
    let start = writer.resume_batch_id();
    if start > 0 {
        info!(batch = start, "resuming after existing batches");
    }
    let engine = SimulationEngine::new(
        &config.fleet(),
        EngineSettings::from_producer(&config.producer, start),
    );
    Ok(ProducerLoop::new(engine, writer, config.producer.tick_interval).with_metrics(metrics))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;
    init_tracing("fleetx-producer", &config.logging, cli.verbose)?;

    let ctx = LogContext::new().with_mode("producer");
    let metrics = ExchangeMetrics::standalone()?;
    let mut producer = build_loop(&config, metrics.clone())?;
    if let Some(limit) = cli.max_ticks {
        producer = producer.with_max_ticks(limit);
    }
    log_system_event(
        &ctx,
        "startup",
        &format!("{} vehicles", config.fleet().len()),
        SystemEventOutcome::Success,
    );

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let mut handle = tokio::spawn(producer.run(shutdown_rx));
    let summary = tokio::select! {
        joined = &mut handle => joined,
        result = signal::ctrl_c() => {
            result.context("failed to listen for ctrl-c")?;
            info!("shutdown requested");
            let _ = shutdown_tx.send(());
            handle.await
        }
    }
    .context("producer loop panicked")?;

    if let Some(path) = &config.metrics.export_path {
        if let Err(err) = metrics.export(path) {
            warn!(error = %err, path = %path.display(), "failed to export metrics");
        }
    }
    log_system_event(
        &ctx,
        "shutdown",
        &format!(
            "{} ticks, {} batches published, last batch {:?}",
            summary.ticks, summary.batches_published, summary.last_batch_id
        ),
        if summary.degraded_ticks == 0 {
            SystemEventOutcome::Success
        } else {
            SystemEventOutcome::Degraded
        },
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetx_exchange::BatchState;
    use tempfile::tempdir;

    #[test]
    fn overrides_replace_config_values() {
        let cli = Cli::parse_from([
            "fleetx-producer",
            "--output",
            "/tmp/fleet",
            "--rate",
            "250",
            "--anomaly-prob",
            "40",
            "--speed",
            "2.5",
            "--seed",
            "9",
        ]);
        let mut config = AppConfig::default();
        cli.apply(&mut config);
        assert_eq!(config.producer.output_root, PathBuf::from("/tmp/fleet"));
        assert_eq!(config.producer.tick_interval, Duration::from_millis(250));
        assert_eq!(config.producer.anomaly_report_percent, 40);
        assert_eq!(config.producer.simulation_speed, 2.5);
        assert_eq!(config.producer.seed, Some(9));
    }

    #[test]
    fn absent_flags_keep_config_values() {
        let cli = Cli::parse_from(["fleetx-producer"]);
        let mut config = AppConfig::default();
        config.producer.seed = Some(3);
        cli.apply(&mut config);
        assert_eq!(config.producer.seed, Some(3));
        assert_eq!(config.producer.anomaly_report_percent, 5);
    }

    #[test]
    fn anomaly_prob_rejects_out_of_range() {
        assert!(Cli::try_parse_from(["fleetx-producer", "--anomaly-prob", "101"]).is_err());
    }

    #[test]
    fn zero_rate_fails_validation() {
        let cli = Cli::parse_from(["fleetx-producer", "--rate", "0"]);
        let mut config = AppConfig::default();
        cli.apply(&mut config);
        assert!(config.validate().is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn built_loop_resumes_after_existing_batches() {
        let dir = tempdir().unwrap();
        let mut config = AppConfig::default();
        config.producer.output_root = dir.path().to_path_buf();
        config.producer.tick_interval = Duration::from_millis(5);
        config.producer.seed = Some(1);

        let (_tx, rx) = broadcast::channel(1);
        let first = build_loop(&config, ExchangeMetrics::standalone().unwrap())
            .unwrap()
            .with_max_ticks(3)
            .run(rx)
            .await;
        assert_eq!(first.last_batch_id, Some(2));

        let (_tx, rx) = broadcast::channel(1);
        let second = build_loop(&config, ExchangeMetrics::standalone().unwrap())
            .unwrap()
            .with_max_ticks(2)
            .run(rx)
            .await;
        assert_eq!(second.last_batch_id, Some(4));

        let writer = BatchWriter::new(dir.path()).unwrap();
        for id in 0..5 {
            assert_eq!(writer.layout().batch_state(id), BatchState::Complete);
        }
    }
}
