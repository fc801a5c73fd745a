//! ---
//! fx_section: "11-simulation"
//! fx_subsection: "02-vehicle"
//! fx_type: "source"
//! fx_scope: "code"
//! fx_description: "Stateful per-vehicle simulation with physics integration."
//! fx_version: "v0.1.0"
//! fx_owner: "tbd"
//! ---
use std::f64::consts::PI;

use chrono::Utc;
use fleetx_common::VehicleProfile;
use fleetx_logging::{fx_debug, fx_info, LogContext};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};

use crate::anomaly::{AnomalyEvent, AnomalyKind, AnomalyState, OnsetContext};
use crate::mode::{next_transition, ModeInputs, Transition, VehicleMode};
use crate::records::{
    round1, round2, AnomalyDetails, AnomalyRecord, Axis3, BatteryDetails, BatteryReading,
    CommunicationDetails, GpsDetails, GpsReading, MotorDetails, MotorReading, SensorReading,
    TelemetryRecord,
};

const GRAVITY: f64 = 9.8;
const IMU_REST_SIGMA: f64 = 0.05;
const MAX_SPEED_KMH: f64 = 120.0;
const CRUISE_SPEED_KMH: (f64, f64) = (40.0, 100.0);
const MIN_EFFICIENCY: f64 = 75.0;
const MAX_EFFICIENCY: f64 = 95.0;
/// Flat-earth degrees-per-metre factors; adequate for simulation only.
const LAT_DEG_PER_M: f64 = 9e-6;
const LON_DEG_PER_M: f64 = 1.1e-5;

/// Open-circuit voltage for a given state of charge.
pub fn nominal_voltage(soc: f64) -> f64 {
    380.0 + (soc - 70.0) * 0.2
}

/// Motor efficiency from temperature and distance from the 60% load sweet spot.
pub fn motor_efficiency(motor_temp: f64, load: f64) -> f64 {
    (95.0 - 0.1 * (motor_temp - 25.0) - 0.05 * (load - 60.0).abs())
        .clamp(MIN_EFFICIENCY, MAX_EFFICIENCY)
}

fn wrap_heading(heading: f64) -> f64 {
    let wrapped = heading.rem_euclid(360.0);
    // rem_euclid can round up to exactly 360 for tiny negative inputs.
    if wrapped >= 360.0 {
        0.0
    } else {
        wrapped
    }
}

/// One simulated vehicle. Owns its random source so updates are
/// reproducible per seed and independent of every other vehicle.
#[derive(Debug, Clone)]
pub struct VehicleState {
    vehicle_id: String,

    soc: f64,
    battery_temp: f64,
    cycle_count: u32,
    voltage: f64,
    current: f64,

    motor_temp: f64,
    motor_efficiency: f64,
    motor_load: f64,
    rpm: f64,
    torque: f64,

    latitude: f64,
    longitude: f64,
    altitude: f64,
    speed: f64,
    heading: f64,
    acceleration: Axis3,
    angular_velocity: Axis3,

    mode: VehicleMode,
    mode_duration: f64,
    ambient_temp: f64,
    anomaly: AnomalyState,

    rng: StdRng,
    imu_noise: Normal<f64>,
}

impl VehicleState {
    /// Create a vehicle at rest in `Idle`, drawing unset profile fields from `seed`.
    pub fn new(profile: &VehicleProfile, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let soc = profile
            .initial_soc
            .unwrap_or_else(|| rng.gen_range(70.0..95.0));
        let battery_temp = rng.gen_range(20.0..25.0);
        let cycle_count = rng.gen_range(10..=200);
        let motor_temp = rng.gen_range(25.0..30.0);
        let latitude = profile
            .home_latitude
            .unwrap_or_else(|| rng.gen_range(39.8..40.0));
        let longitude = profile
            .home_longitude
            .unwrap_or_else(|| rng.gen_range(116.3..116.5));
        let altitude = profile.altitude.unwrap_or_else(|| rng.gen_range(43.0..55.0));
        let heading = rng.gen_range(0.0..360.0);
        let ambient_temp = profile
            .ambient_temp
            .unwrap_or_else(|| rng.gen_range(15.0..30.0));

        Self {
            vehicle_id: profile.id.clone(),
            soc,
            battery_temp,
            cycle_count,
            voltage: nominal_voltage(soc),
            current: 0.0,
            motor_temp,
            motor_efficiency: MAX_EFFICIENCY,
            motor_load: 0.0,
            rpm: 0.0,
            torque: 0.0,
            latitude,
            longitude,
            altitude,
            speed: 0.0,
            heading,
            acceleration: Axis3 {
                x: 0.0,
                y: 0.0,
                z: GRAVITY,
            },
            angular_velocity: Axis3 {
                x: 0.0,
                y: 0.0,
                z: 0.0,
            },
            mode: VehicleMode::Idle,
            mode_duration: 0.0,
            ambient_temp,
            anomaly: AnomalyState::default(),
            rng,
            imu_noise: Normal::new(0.0, IMU_REST_SIGMA).expect("imu sigma is a positive constant"),
        }
    }

    pub fn vehicle_id(&self) -> &str {
        &self.vehicle_id
    }

    pub fn mode(&self) -> VehicleMode {
        self.mode
    }

    pub fn mode_duration(&self) -> f64 {
        self.mode_duration
    }

    pub fn soc(&self) -> f64 {
        self.soc
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }

    pub fn heading(&self) -> f64 {
        self.heading
    }

    pub fn cycle_count(&self) -> u32 {
        self.cycle_count
    }

    pub fn motor_efficiency(&self) -> f64 {
        self.motor_efficiency
    }

    pub fn position(&self) -> (f64, f64) {
        (self.latitude, self.longitude)
    }

    pub fn anomaly_state(&self) -> &AnomalyState {
        &self.anomaly
    }

    /// Advance the vehicle by `dt` simulated seconds.
    pub fn update(&mut self, dt: f64) {
        let dt = if dt.is_finite() { dt.max(0.0) } else { 0.0 };
        self.mode_duration += dt;
        self.evaluate_mode();

        match self.mode {
            VehicleMode::Idle => self.update_idle(dt),
            VehicleMode::Accelerating => self.update_accelerating(dt),
            VehicleMode::Cruising => self.update_cruising(dt),
            VehicleMode::Decelerating => self.update_decelerating(dt),
            VehicleMode::Charging => self.update_charging(dt),
        }

        self.battery_temp =
            0.95 * self.battery_temp + 0.02 * self.motor_temp + 0.03 * self.ambient_temp;
        self.motor_efficiency = motor_efficiency(self.motor_temp, self.motor_load);
        self.voltage = nominal_voltage(self.soc);
        self.integrate_position(dt);
        self.step_anomaly(dt);
    }

    fn context(&self) -> LogContext<'_> {
        LogContext::new()
            .with_vehicle(&self.vehicle_id)
            .with_mode(self.mode.as_str())
    }

    fn evaluate_mode(&mut self) {
        let inputs = ModeInputs {
            soc: self.soc,
            speed: self.speed,
            mode_duration: self.mode_duration,
        };
        match next_transition(self.mode, &inputs, &mut self.rng) {
            Transition::Stay => {}
            Transition::Steer(delta) => {
                self.heading = wrap_heading(self.heading + delta);
            }
            Transition::Enter(next) => {
                if self.mode == VehicleMode::Charging {
                    self.cycle_count += 1;
                }
                fx_debug!(
                    context = self.context(),
                    "mode transition -> {} after {:.1}s",
                    next,
                    self.mode_duration
                );
                self.mode = next;
                self.mode_duration = 0.0;
            }
        }
    }

    fn drain(&mut self, rate_per_sec: f64, dt: f64) {
        self.soc = (self.soc - rate_per_sec * dt).max(0.0);
    }

    fn jitter(&mut self, half_width: f64) -> f64 {
        self.rng.gen_range(-half_width..=half_width)
    }

    fn settle_imu(&mut self, accel_noise: f64, gyro_noise: f64) {
        let z = GRAVITY + self.imu_noise.sample(&mut self.rng);
        self.acceleration = Axis3 {
            x: self.jitter(accel_noise),
            y: self.jitter(accel_noise),
            z,
        };
        self.angular_velocity = Axis3 {
            x: self.jitter(gyro_noise),
            y: self.jitter(gyro_noise),
            z: self.jitter(gyro_noise),
        };
    }

    fn directed_imu(&mut self, longitudinal: f64, yaw: (f64, f64)) {
        let heading_rad = self.heading * PI / 180.0;
        self.acceleration = Axis3 {
            x: longitudinal * 0.3 * heading_rad.cos(),
            y: longitudinal * 0.3 * heading_rad.sin(),
            z: GRAVITY,
        };
        self.angular_velocity = Axis3 {
            x: self.jitter(0.1),
            y: self.jitter(0.1),
            z: self.rng.gen_range(yaw.0..=yaw.1),
        };
    }

    fn update_idle(&mut self, dt: f64) {
        self.speed = (self.speed - 5.0 * dt).max(0.0);
        self.motor_load = 0.0;
        self.rpm = 0.0;
        self.torque = 0.0;
        self.motor_temp = 0.95 * self.motor_temp + 0.05 * self.ambient_temp;
        self.drain(0.001, dt);
        self.current = self.jitter(1.0);
        self.settle_imu(0.1, 0.05);
    }

    fn update_accelerating(&mut self, dt: f64) {
        let acceleration = 10.0 * (1.0 - self.speed / 100.0).max(0.0);
        self.speed = (self.speed + acceleration * dt).min(MAX_SPEED_KMH);
        self.motor_load = 40.0 + 0.5 * self.speed;
        self.rpm = self.speed * 50.0;
        self.torque = 100.0 + 0.5 * self.speed;
        self.motor_temp += self.motor_load * 0.01 * dt;
        self.drain(0.008 + 0.0002 * self.motor_load, dt);
        self.current = -50.0 - 0.5 * self.motor_load;
        self.directed_imu(acceleration, (-0.05, 0.2));
    }

    fn update_cruising(&mut self, dt: f64) {
        let drift = self.jitter(1.0);
        self.speed = (self.speed + drift * dt).clamp(CRUISE_SPEED_KMH.0, CRUISE_SPEED_KMH.1);
        self.motor_load = 30.0 + 0.3 * self.speed;
        self.rpm = self.speed * 50.0;
        self.torque = 50.0 + 0.3 * self.speed;
        self.motor_temp = 0.99 * self.motor_temp + 0.01 * (30.0 + 0.2 * self.motor_load);
        self.drain(0.005 + 0.0001 * self.motor_load, dt);
        self.current = -30.0 - 0.3 * self.motor_load;
        self.acceleration = Axis3 {
            x: self.jitter(0.3),
            y: self.jitter(0.3),
            z: GRAVITY,
        };
        self.angular_velocity = Axis3 {
            x: self.jitter(0.1),
            y: self.jitter(0.1),
            z: self.jitter(0.1),
        };
    }

    fn update_decelerating(&mut self, dt: f64) {
        let deceleration = 5.0 + 0.1 * self.speed;
        self.speed = (self.speed - deceleration * dt).max(0.0);
        self.motor_load = (self.motor_load - 10.0 * dt).max(0.0);
        self.rpm = self.speed * 50.0;
        self.torque = (self.torque - 20.0 * dt).max(0.0);
        self.motor_temp = 0.99 * self.motor_temp + 0.01 * (25.0 + self.ambient_temp);
        self.drain(0.003 + 0.0001 * self.motor_load, dt);
        self.current = -20.0 - 0.2 * self.motor_load;
        self.directed_imu(-deceleration, (-0.2, 0.05));
    }

    fn update_charging(&mut self, dt: f64) {
        self.speed = 0.0;
        self.motor_load = 0.0;
        self.rpm = 0.0;
        self.torque = 0.0;
        self.motor_temp = 0.98 * self.motor_temp + 0.02 * self.ambient_temp;
        self.soc = (self.soc + 0.02 * dt).min(100.0);
        self.current = 40.0 + self.jitter(5.0);
        self.settle_imu(0.05, 0.02);
    }

    fn integrate_position(&mut self, dt: f64) {
        if self.speed <= 0.0 {
            return;
        }
        let distance_m = self.speed * 1000.0 / 3600.0 * dt;
        let heading_rad = self.heading * PI / 180.0;
        self.latitude += distance_m * heading_rad.cos() * LAT_DEG_PER_M;
        self.longitude += distance_m * heading_rad.sin() * LON_DEG_PER_M;
    }

    fn step_anomaly(&mut self, dt: f64) {
        let onset = OnsetContext {
            speed: self.speed,
            soc: self.soc,
            mode: self.mode,
        };
        match self.anomaly.step(dt, &onset, &mut self.rng) {
            AnomalyEvent::Quiet => {}
            AnomalyEvent::Onset(kind) => {
                fx_info!(
                    context = self.context(),
                    "{} anomaly started (severity {})",
                    kind,
                    self.anomaly.severity
                );
            }
            AnomalyEvent::Recovered(kind) => {
                fx_info!(context = self.context(), "{} anomaly recovered", kind);
            }
            AnomalyEvent::Progressed => self.apply_anomaly_effects(),
        }
    }

    fn apply_anomaly_effects(&mut self) {
        let intensity = self.anomaly.intensity();
        let severity = f64::from(self.anomaly.severity);
        match self.anomaly.kind {
            AnomalyKind::Battery => {
                self.battery_temp += 0.2 * intensity;
                self.voltage = nominal_voltage(self.soc) * (1.0 - 0.05 * intensity);
            }
            AnomalyKind::Motor => {
                self.motor_temp += 0.5 * intensity;
                self.motor_efficiency = (self.motor_efficiency - 10.0 * intensity)
                    .clamp(MIN_EFFICIENCY, MAX_EFFICIENCY);
            }
            AnomalyKind::Gps => {
                if f64::from(self.rng.gen_range(1..=100u32)) <= 30.0 * intensity {
                    let (dlat, dlon) = (self.jitter(0.001), self.jitter(0.001));
                    let turn = self.jitter(10.0);
                    self.latitude += dlat * severity;
                    self.longitude += dlon * severity;
                    self.heading = wrap_heading(self.heading + turn * severity);
                }
            }
            AnomalyKind::Communication | AnomalyKind::None => {}
        }
    }

    /// Project the current state into a telemetry record stamped now.
    pub fn telemetry(&self) -> TelemetryRecord {
        self.telemetry_at(Utc::now().timestamp_millis())
    }

    /// Project the current state into a telemetry record at `timestamp_ms`.
    pub fn telemetry_at(&self, timestamp_ms: i64) -> TelemetryRecord {
        TelemetryRecord {
            vehicle_id: self.vehicle_id.clone(),
            timestamp: timestamp_ms,
            data_type: "telemetry".to_owned(),
            mode: self.mode,
            battery: BatteryReading {
                soc: round1(self.soc),
                temperature: round1(self.battery_temp),
                cycle_count: self.cycle_count,
                voltage: round1(self.voltage),
                current: round1(self.current),
            },
            motor: MotorReading {
                temperature: round1(self.motor_temp),
                efficiency: round1(self.motor_efficiency),
                load: round1(self.motor_load),
                rpm: self.rpm as i64,
                torque: round1(self.torque),
            },
            sensors: SensorReading {
                acceleration: Axis3 {
                    x: round2(self.acceleration.x),
                    y: round2(self.acceleration.y),
                    z: round2(self.acceleration.z),
                },
                gps: GpsReading {
                    latitude: self.latitude,
                    longitude: self.longitude,
                    altitude: self.altitude,
                    speed: round1(self.speed),
                    heading: round1(self.heading),
                },
                gyroscope: Axis3 {
                    x: round2(self.angular_velocity.x),
                    y: round2(self.angular_velocity.y),
                    z: round2(self.angular_velocity.z),
                },
            },
        }
    }

    /// Anomaly report stamped now, or `None` when no anomaly is active.
    pub fn anomaly(&self) -> Option<AnomalyRecord> {
        self.anomaly_at(Utc::now().timestamp_millis())
    }

    pub fn anomaly_at(&self, timestamp_ms: i64) -> Option<AnomalyRecord> {
        if !self.anomaly.active {
            return None;
        }
        let progress = self.anomaly.progress;
        let severity = self.anomaly.severity;
        let details = match self.anomaly.kind {
            AnomalyKind::Battery => AnomalyDetails::Battery(BatteryDetails {
                temperature: round1(self.battery_temp),
                voltage_drop: round1(
                    (nominal_voltage(self.soc) - self.voltage) * 100.0 / self.voltage,
                ),
                severity,
            }),
            AnomalyKind::Motor => AnomalyDetails::Motor(MotorDetails {
                temperature: round1(self.motor_temp),
                efficiency_drop: round1(MAX_EFFICIENCY - self.motor_efficiency),
                vibration: round1(5.0 + progress * 10.0),
                severity,
            }),
            AnomalyKind::Communication => AnomalyDetails::Communication(CommunicationDetails {
                packet_loss: (30.0 + progress * 70.0).round() as u32,
                latency_spike: (500.0 + progress * 1500.0).round() as u32,
                connection_drops: (3.0 + progress * 7.0) as u32,
                severity,
            }),
            AnomalyKind::Gps => AnomalyDetails::Gps(GpsDetails {
                position_jump: (100.0 + progress * 900.0).round() as u32,
                signal_loss: progress > 0.7,
                heading_inconsistency: (30.0 + progress * 150.0).round() as u32,
                severity,
            }),
            AnomalyKind::None => AnomalyDetails::Unknown {
                anomaly_type: AnomalyKind::None.as_str().to_owned(),
            },
        };
        Some(AnomalyRecord {
            vehicle_id: self.vehicle_id.clone(),
            timestamp: timestamp_ms,
            details,
        })
    }

    #[cfg(test)]
    pub(crate) fn force_anomaly(&mut self, state: AnomalyState) {
        self.anomaly = state;
    }
}
