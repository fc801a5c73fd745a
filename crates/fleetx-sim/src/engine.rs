//! ---
//! fx_section: "11-simulation"
//! fx_subsection: "04-engine"
//! fx_type: "source"
//! fx_scope: "code"
//! fx_description: "Fleet tick engine producing numbered batches and live snapshots."
//! fx_version: "v0.1.0"
//! fx_owner: "tbd"
//! ---
use std::time::Duration;

use chrono::Utc;
use fleetx_common::{ProducerConfig, VehicleProfile};
use fleetx_logging::{fx_debug, fx_info, LogContext};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::batch::{Batch, LiveSnapshot};
use crate::vehicle::VehicleState;

/// Knobs controlling a [`SimulationEngine`].
#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    /// Percent chance that an active anomaly is reported on a given tick.
    pub anomaly_report_percent: u8,
    /// Multiplier applied to wall-clock elapsed time.
    pub simulation_speed: f64,
    pub seed: Option<u64>,
    /// Identifier given to the first batch.
    pub start_batch_id: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            anomaly_report_percent: 5,
            simulation_speed: 1.0,
            seed: None,
            start_batch_id: 0,
        }
    }
}

impl EngineSettings {
    pub fn from_producer(config: &ProducerConfig, start_batch_id: u64) -> Self {
        Self {
            anomaly_report_percent: config.anomaly_report_percent,
            simulation_speed: config.simulation_speed,
            seed: config.seed,
            start_batch_id,
        }
    }
}

/// Running totals since the engine was created.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EngineStats {
    pub ticks: u64,
    pub telemetry_records: u64,
    pub anomaly_records: u64,
    pub simulated_secs: f64,
}

/// Everything one tick produced.
#[derive(Debug, Clone, PartialEq)]
pub struct TickOutput {
    pub batch: Batch,
    pub live: LiveSnapshot,
}

/// Owns the fleet and turns elapsed time into batches.
///
/// Batch identifiers increase by exactly one per tick, starting from
/// [`EngineSettings::start_batch_id`].
#[derive(Debug)]
pub struct SimulationEngine {
    vehicles: Vec<VehicleState>,
    settings: EngineSettings,
    next_batch_id: u64,
    report_rng: StdRng,
    stats: EngineStats,
}

impl SimulationEngine {
    pub fn new(fleet: &[VehicleProfile], settings: EngineSettings) -> Self {
        let mut seeder = match settings.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let vehicles: Vec<VehicleState> = fleet
            .iter()
            .map(|profile| VehicleState::new(profile, seeder.gen()))
            .collect();
        let report_rng = StdRng::seed_from_u64(seeder.gen());

        fx_info!(
            context = LogContext::new().with_batch(settings.start_batch_id),
            "simulation engine ready with {} vehicles (seed {:?}, speed x{})",
            vehicles.len(),
            settings.seed,
            settings.simulation_speed
        );

        Self {
            vehicles,
            next_batch_id: settings.start_batch_id,
            settings,
            report_rng,
            stats: EngineStats::default(),
        }
    }

    pub fn vehicles(&self) -> &[VehicleState] {
        &self.vehicles
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Identifier the next tick will carry.
    pub fn next_batch_id(&self) -> u64 {
        self.next_batch_id
    }

    pub fn stats(&self) -> EngineStats {
        self.stats
    }

    /// Advance by measured wall-clock time, scaled by the simulation speed,
    /// stamping records with the current time.
    pub fn step(&mut self, elapsed: Duration) -> TickOutput {
        let dt = elapsed.as_secs_f64() * self.settings.simulation_speed;
        self.step_at(dt, Utc::now().timestamp_millis())
    }

    /// Advance every vehicle by `dt` simulated seconds. All records in the
    /// tick share `timestamp_ms`.
    pub fn step_at(&mut self, dt: f64, timestamp_ms: i64) -> TickOutput {
        let batch_id = self.next_batch_id;
        let mut batch = Batch {
            batch_id,
            telemetry: Vec::with_capacity(self.vehicles.len()),
            anomalies: Vec::new(),
        };
        let mut live = LiveSnapshot::default();

        for vehicle in &mut self.vehicles {
            vehicle.update(dt);
            let record = vehicle.telemetry_at(timestamp_ms);
            live.telemetry
                .insert(record.vehicle_id.clone(), record.clone());
            batch.telemetry.push(record);

            if let Some(anomaly) = vehicle.anomaly_at(timestamp_ms) {
                let roll: u8 = self.report_rng.gen_range(1..=100);
                if roll <= self.settings.anomaly_report_percent {
                    batch.anomalies.push(anomaly);
                }
            }
        }
        live.anomalies = batch.anomalies.clone();

        self.next_batch_id += 1;
        self.stats.ticks += 1;
        self.stats.telemetry_records += batch.telemetry.len() as u64;
        self.stats.anomaly_records += batch.anomalies.len() as u64;
        self.stats.simulated_secs += dt.max(0.0);

        fx_debug!(
            context = LogContext::new().with_batch(batch_id).with_tick(self.stats.ticks),
            "tick produced {} telemetry and {} anomaly records",
            batch.telemetry.len(),
            batch.anomalies.len()
        );

        TickOutput { batch, live }
    }
}
