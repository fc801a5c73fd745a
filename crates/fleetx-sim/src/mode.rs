//! ---
//! fx_section: "11-simulation"
//! fx_subsection: "02-vehicle"
//! fx_type: "source"
//! fx_scope: "code"
//! fx_description: "Vehicle operating modes and the transition table."
//! fx_version: "v0.1.0"
//! fx_owner: "tbd"
//! ---
//! Dwell thresholds are re-sampled on every evaluation rather than fixed at
//! mode entry, so a dwell behaves as a per-tick hazard. Once `mode_duration`
//! exceeds the upper bound of a range the transition is certain.
use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Battery level below which an idle vehicle always heads to a charger.
pub const LOW_SOC_THRESHOLD: f64 = 30.0;
/// Battery level at which charging stops.
pub const CHARGE_COMPLETE_SOC: f64 = 90.0;
/// Speed under which a decelerating vehicle is considered stopped.
pub const STOPPED_SPEED_KMH: f64 = 5.0;

const IDLE_DWELL_SECS: (f64, f64) = (5.0, 20.0);
const ACCEL_TARGET_KMH: (f64, f64) = (50.0, 80.0);
const ACCEL_DWELL_SECS: (f64, f64) = (10.0, 30.0);
const CRUISE_DWELL_SECS: (f64, f64) = (60.0, 300.0);
const CHARGE_DWELL_SECS: (f64, f64) = (600.0, 1800.0);
const CRUISE_HEADING_JITTER_DEG: f64 = 30.0;
const IDLE_CHARGE_PERCENT: u32 = 10;
const CRUISE_DECEL_PERCENT: u32 = 70;

/// Operating mode of a simulated vehicle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VehicleMode {
    #[default]
    Idle,
    Accelerating,
    Cruising,
    Decelerating,
    Charging,
}

impl VehicleMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            VehicleMode::Idle => "idle",
            VehicleMode::Accelerating => "accelerating",
            VehicleMode::Cruising => "cruising",
            VehicleMode::Decelerating => "decelerating",
            VehicleMode::Charging => "charging",
        }
    }
}

impl fmt::Display for VehicleMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State snapshot the transition table is keyed on alongside the mode.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModeInputs {
    pub soc: f64,
    pub speed: f64,
    pub mode_duration: f64,
}

/// Outcome of one transition evaluation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Transition {
    Stay,
    /// Enter a new mode; the caller resets `mode_duration`.
    Enter(VehicleMode),
    /// Remain cruising but turn by the given number of degrees.
    Steer(f64),
}

fn dwell_exceeded<R: Rng + ?Sized>(rng: &mut R, duration: f64, (lo, hi): (f64, f64)) -> bool {
    duration > rng.gen_range(lo..hi)
}

fn percent<R: Rng + ?Sized>(rng: &mut R, chance: u32) -> bool {
    rng.gen_range(1..=100) <= chance
}

/// Evaluate the transition table for `mode` given the current inputs.
pub fn next_transition<R: Rng + ?Sized>(
    mode: VehicleMode,
    inputs: &ModeInputs,
    rng: &mut R,
) -> Transition {
    match mode {
        VehicleMode::Idle => {
            if !dwell_exceeded(rng, inputs.mode_duration, IDLE_DWELL_SECS) {
                return Transition::Stay;
            }
            if inputs.soc < LOW_SOC_THRESHOLD || percent(rng, IDLE_CHARGE_PERCENT) {
                Transition::Enter(VehicleMode::Charging)
            } else {
                Transition::Enter(VehicleMode::Accelerating)
            }
        }
        VehicleMode::Accelerating => {
            let target = rng.gen_range(ACCEL_TARGET_KMH.0..ACCEL_TARGET_KMH.1);
            if inputs.speed >= target
                || dwell_exceeded(rng, inputs.mode_duration, ACCEL_DWELL_SECS)
            {
                Transition::Enter(VehicleMode::Cruising)
            } else {
                Transition::Stay
            }
        }
        VehicleMode::Cruising => {
            if !dwell_exceeded(rng, inputs.mode_duration, CRUISE_DWELL_SECS) {
                return Transition::Stay;
            }
            if percent(rng, CRUISE_DECEL_PERCENT) {
                Transition::Enter(VehicleMode::Decelerating)
            } else {
                Transition::Steer(
                    rng.gen_range(-CRUISE_HEADING_JITTER_DEG..CRUISE_HEADING_JITTER_DEG),
                )
            }
        }
        VehicleMode::Decelerating => {
            if inputs.speed < STOPPED_SPEED_KMH {
                Transition::Enter(VehicleMode::Idle)
            } else {
                Transition::Stay
            }
        }
        VehicleMode::Charging => {
            if inputs.soc >= CHARGE_COMPLETE_SOC
                || dwell_exceeded(rng, inputs.mode_duration, CHARGE_DWELL_SECS)
            {
                Transition::Enter(VehicleMode::Idle)
            } else {
                Transition::Stay
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn inputs(soc: f64, speed: f64, mode_duration: f64) -> ModeInputs {
        ModeInputs {
            soc,
            speed,
            mode_duration,
        }
    }

    #[test]
    fn idle_with_low_soc_always_charges_after_dwell() {
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..200 {
            let next = next_transition(VehicleMode::Idle, &inputs(25.0, 0.0, 20.0), &mut rng);
            assert_eq!(next, Transition::Enter(VehicleMode::Charging));
        }
    }

    #[test]
    fn idle_stays_before_minimum_dwell() {
        let mut rng = StdRng::seed_from_u64(2);
        for _ in 0..200 {
            let next = next_transition(VehicleMode::Idle, &inputs(80.0, 0.0, 4.0), &mut rng);
            assert_eq!(next, Transition::Stay);
        }
    }

    #[test]
    fn idle_mostly_accelerates_with_healthy_battery() {
        let mut rng = StdRng::seed_from_u64(3);
        let accelerating = (0..1000)
            .filter(|_| {
                next_transition(VehicleMode::Idle, &inputs(80.0, 0.0, 25.0), &mut rng)
                    == Transition::Enter(VehicleMode::Accelerating)
            })
            .count();
        assert!(accelerating > 800, "accelerating={accelerating}");
    }

    #[test]
    fn accelerating_reaches_cruise_at_target_speed() {
        let mut rng = StdRng::seed_from_u64(4);
        let next = next_transition(VehicleMode::Accelerating, &inputs(80.0, 80.0, 0.0), &mut rng);
        assert_eq!(next, Transition::Enter(VehicleMode::Cruising));
    }

    #[test]
    fn accelerating_times_out_into_cruise() {
        let mut rng = StdRng::seed_from_u64(8);
        for _ in 0..200 {
            assert_eq!(
                next_transition(VehicleMode::Accelerating, &inputs(80.0, 20.0, 9.9), &mut rng),
                Transition::Stay
            );
            assert_eq!(
                next_transition(VehicleMode::Accelerating, &inputs(80.0, 20.0, 30.0), &mut rng),
                Transition::Enter(VehicleMode::Cruising)
            );
        }
    }

    #[test]
    fn cruising_either_decelerates_or_steers_after_dwell() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut saw_steer = false;
        let mut saw_decel = false;
        for _ in 0..500 {
            match next_transition(VehicleMode::Cruising, &inputs(70.0, 60.0, 301.0), &mut rng) {
                Transition::Enter(VehicleMode::Decelerating) => saw_decel = true,
                Transition::Steer(delta) => {
                    assert!((-30.0..30.0).contains(&delta));
                    saw_steer = true;
                }
                other => panic!("unexpected transition {other:?}"),
            }
        }
        assert!(saw_steer && saw_decel);
    }

    #[test]
    fn decelerating_stops_below_threshold() {
        let mut rng = StdRng::seed_from_u64(6);
        assert_eq!(
            next_transition(VehicleMode::Decelerating, &inputs(70.0, 4.9, 1.0), &mut rng),
            Transition::Enter(VehicleMode::Idle)
        );
        assert_eq!(
            next_transition(VehicleMode::Decelerating, &inputs(70.0, 5.0, 1.0), &mut rng),
            Transition::Stay
        );
    }

    #[test]
    fn charging_ends_at_target_soc() {
        let mut rng = StdRng::seed_from_u64(7);
        assert_eq!(
            next_transition(VehicleMode::Charging, &inputs(90.0, 0.0, 1.0), &mut rng),
            Transition::Enter(VehicleMode::Idle)
        );
    }

    #[test]
    fn charging_times_out_into_idle() {
        let mut rng = StdRng::seed_from_u64(9);
        for _ in 0..200 {
            assert_eq!(
                next_transition(VehicleMode::Charging, &inputs(50.0, 0.0, 599.0), &mut rng),
                Transition::Stay
            );
            assert_eq!(
                next_transition(VehicleMode::Charging, &inputs(50.0, 0.0, 1800.0), &mut rng),
                Transition::Enter(VehicleMode::Idle)
            );
        }
    }

    #[test]
    fn mode_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&VehicleMode::Decelerating).unwrap(),
            "\"decelerating\""
        );
        assert_eq!(VehicleMode::Charging.to_string(), "charging");
    }
}
