//! ---
//! fx_section: "01-core-functionality"
//! fx_subsection: "module"
//! fx_type: "source"
//! fx_scope: "code"
//! fx_description: "Configuration model and loading for producer and consumer."
//! fx_version: "v0.1.0"
//! fx_owner: "tbd"
//! ---
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};
use tracing::debug;

use crate::logging::LogFormat;

fn default_output_root() -> PathBuf {
    PathBuf::from("fleet_data")
}

fn default_tick_interval() -> Duration {
    Duration::from_millis(1000)
}

fn default_anomaly_report_percent() -> u8 {
    5
}

fn default_simulation_speed() -> f64 {
    1.0
}

fn default_fleet_size() -> usize {
    5
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(2)
}

fn default_settle_delay() -> Duration {
    Duration::from_millis(500)
}

fn default_read_retries() -> u32 {
    3
}

fn default_read_retry_delay() -> Duration {
    Duration::from_millis(500)
}

fn default_watch() -> bool {
    true
}

fn default_logging_directory() -> PathBuf {
    PathBuf::from("target/logs")
}

fn default_log_format() -> LogFormat {
    LogFormat::Pretty
}

/// Primary configuration object shared by the producer and consumer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub producer: ProducerConfig,
    #[serde(default)]
    pub consumer: ConsumerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub vehicles: Vec<VehicleProfile>,
}

/// Metadata describing where an [`AppConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedAppConfig {
    pub config: AppConfig,
    pub source: Option<PathBuf>,
}

impl AppConfig {
    pub const ENV_CONFIG_PATH: &'static str = "FLEETX_CONFIG";

    /// Load configuration from disk, respecting the `FLEETX_CONFIG` override.
    ///
    /// Unlike a daemon, both binaries are usable without any file: when no
    /// candidate exists the defaults are returned with `source == None`.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedAppConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(&path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: Some(path),
                });
            }
        }

        for candidate in candidates {
            let path = candidate.as_ref();
            if path.exists() {
                let config = Self::from_path(path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: Some(path.to_path_buf()),
                });
            }
        }

        debug!(
            inspected = %candidates
                .iter()
                .map(|p| p.as_ref().display().to_string())
                .collect::<Vec<_>>()
                .join(", "),
            "no configuration file found; using defaults"
        );
        Ok(LoadedAppConfig {
            config: AppConfig::default(),
            source: None,
        })
    }

    fn from_path(path: &Path) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        contents
            .parse::<AppConfig>()
            .with_context(|| format!("invalid config file {}", path.display()))
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        self.producer.validate()?;
        self.consumer.validate()?;
        let mut seen = HashSet::new();
        for profile in &self.vehicles {
            if profile.id.trim().is_empty() {
                return Err(anyhow!("vehicle profile id cannot be empty"));
            }
            if !seen.insert(profile.id.as_str()) {
                return Err(anyhow!("duplicate vehicle profile '{}'", profile.id));
            }
            profile.validate()?;
        }
        Ok(())
    }

    /// Effective fleet: configured profiles, or `fleet_size` generated ones.
    pub fn fleet(&self) -> Vec<VehicleProfile> {
        if !self.vehicles.is_empty() {
            return self.vehicles.clone();
        }
        (1..=self.producer.fleet_size)
            .map(|index| VehicleProfile::named(format!("V{index:03}")))
            .collect()
    }
}

impl std::str::FromStr for AppConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: AppConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

/// Settings for the simulation producer.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProducerConfig {
    #[serde(default = "default_output_root")]
    pub output_root: PathBuf,
    #[serde(default = "default_tick_interval", rename = "tick_interval_ms")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub tick_interval: Duration,
    /// Probability, in percent, that an active anomaly is reported on a tick.
    #[serde(default = "default_anomaly_report_percent")]
    pub anomaly_report_percent: u8,
    #[serde(default = "default_simulation_speed")]
    pub simulation_speed: f64,
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default = "default_fleet_size")]
    pub fleet_size: usize,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            output_root: default_output_root(),
            tick_interval: default_tick_interval(),
            anomaly_report_percent: default_anomaly_report_percent(),
            simulation_speed: default_simulation_speed(),
            seed: None,
            fleet_size: default_fleet_size(),
        }
    }
}

impl ProducerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.tick_interval.is_zero() {
            return Err(anyhow!("producer tick_interval_ms must be greater than zero"));
        }
        if self.anomaly_report_percent > 100 {
            return Err(anyhow!(
                "producer anomaly_report_percent must be within 0..=100 (got {})",
                self.anomaly_report_percent
            ));
        }
        if !(self.simulation_speed.is_finite() && self.simulation_speed > 0.0) {
            return Err(anyhow!(
                "producer simulation_speed must be a positive number (got {})",
                self.simulation_speed
            ));
        }
        Ok(())
    }
}

/// Settings for the batch consumer.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumerConfig {
    #[serde(default = "default_output_root")]
    pub input_root: PathBuf,
    #[serde(default)]
    pub verbose: bool,
    #[serde(default = "default_poll_interval", rename = "poll_interval_ms")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub poll_interval: Duration,
    #[serde(default = "default_settle_delay", rename = "settle_delay_ms")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub settle_delay: Duration,
    #[serde(default = "default_read_retries")]
    pub read_retries: u32,
    #[serde(default = "default_read_retry_delay", rename = "read_retry_delay_ms")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub read_retry_delay: Duration,
    #[serde(default = "default_watch")]
    pub watch: bool,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            input_root: default_output_root(),
            verbose: false,
            poll_interval: default_poll_interval(),
            settle_delay: default_settle_delay(),
            read_retries: default_read_retries(),
            read_retry_delay: default_read_retry_delay(),
            watch: default_watch(),
        }
    }
}

impl ConsumerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval.is_zero() {
            return Err(anyhow!("consumer poll_interval_ms must be greater than zero"));
        }
        if self.read_retries == 0 {
            return Err(anyhow!("consumer read_retries must be at least 1"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default)]
    pub file_prefix: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            format: default_log_format(),
            file_prefix: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Prometheus text exposition written here on shutdown.
    #[serde(default)]
    pub export_path: Option<PathBuf>,
}

/// Static per-vehicle parameter bundle handed to the simulation read-only.
///
/// Unset fields are drawn from the vehicle's own random source at creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleProfile {
    pub id: String,
    #[serde(default)]
    pub initial_soc: Option<f64>,
    #[serde(default)]
    pub ambient_temp: Option<f64>,
    #[serde(default)]
    pub home_latitude: Option<f64>,
    #[serde(default)]
    pub home_longitude: Option<f64>,
    #[serde(default)]
    pub altitude: Option<f64>,
}

impl VehicleProfile {
    /// Profile with only an identifier; everything else is randomised.
    pub fn named(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            initial_soc: None,
            ambient_temp: None,
            home_latitude: None,
            home_longitude: None,
            altitude: None,
        }
    }

    pub fn with_initial_soc(mut self, soc: f64) -> Self {
        self.initial_soc = Some(soc);
        self
    }

    fn validate(&self) -> Result<()> {
        if let Some(soc) = self.initial_soc {
            if !(0.0..=100.0).contains(&soc) {
                return Err(anyhow!(
                    "vehicle '{}' initial_soc must be within 0..=100 (got {soc})",
                    self.id
                ));
            }
        }
        if let Some(lat) = self.home_latitude {
            if !(-90.0..=90.0).contains(&lat) {
                return Err(anyhow!("vehicle '{}' home_latitude out of range", self.id));
            }
        }
        if let Some(lon) = self.home_longitude {
            if !(-180.0..=180.0).contains(&lon) {
                return Err(anyhow!("vehicle '{}' home_longitude out of range", self.id));
            }
        }
        Ok(())
    }
}
