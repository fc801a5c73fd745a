//! ---
//! fx_section: "11-simulation"
//! fx_subsection: "02-vehicle"
//! fx_type: "source"
//! fx_scope: "code"
//! fx_description: "Single-slot anomaly onset, progression and recovery."
//! fx_version: "v0.1.0"
//! fx_owner: "tbd"
//! ---
use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::mode::{VehicleMode, LOW_SOC_THRESHOLD};

/// Onset fires when a draw from `1..=ONSET_DRAW_RANGE` is at most this value.
const ONSET_CHANCE: u32 = 5;
const ONSET_DRAW_RANGE: u32 = 10_000;
const ONSET_PROGRESS: f64 = 0.1;
const PROGRESS_PER_SECOND: f64 = 0.01;
const RECOVERY_PERCENT: u32 = 10;
const HIGH_SPEED_KMH: f64 = 80.0;

/// Category of an injected anomaly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnomalyKind {
    #[default]
    None,
    Battery,
    Motor,
    Communication,
    Gps,
}

impl AnomalyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnomalyKind::None => "none",
            AnomalyKind::Battery => "battery",
            AnomalyKind::Motor => "motor",
            AnomalyKind::Communication => "communication",
            AnomalyKind::Gps => "gps",
        }
    }

    /// Parse a wire name; unrecognised names yield `None`.
    pub fn from_wire(name: &str) -> Option<Self> {
        match name {
            "battery" => Some(AnomalyKind::Battery),
            "motor" => Some(AnomalyKind::Motor),
            "communication" => Some(AnomalyKind::Communication),
            "gps" => Some(AnomalyKind::Gps),
            _ => None,
        }
    }
}

impl fmt::Display for AnomalyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The four anomaly fields. They are only ever reset together.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct AnomalyState {
    pub active: bool,
    pub kind: AnomalyKind,
    pub severity: u8,
    pub progress: f64,
}

/// Vehicle conditions that bias which anomaly starts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OnsetContext {
    pub speed: f64,
    pub soc: f64,
    pub mode: VehicleMode,
}

/// What happened to the anomaly slot during one step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AnomalyEvent {
    Quiet,
    Onset(AnomalyKind),
    Progressed,
    Recovered(AnomalyKind),
}

impl AnomalyState {
    /// Product used to scale every effect.
    pub fn intensity(&self) -> f64 {
        if self.active {
            self.progress * f64::from(self.severity)
        } else {
            0.0
        }
    }

    fn clear(&mut self) {
        *self = AnomalyState::default();
    }

    /// Advance the slot by `dt` seconds.
    ///
    /// Progress saturates at 1.0; from the tick after saturation each step
    /// rolls a 10% recovery chance, so time-to-recovery is geometric.
    pub fn step<R: Rng + ?Sized>(
        &mut self,
        dt: f64,
        context: &OnsetContext,
        rng: &mut R,
    ) -> AnomalyEvent {
        if !self.active {
            if rng.gen_range(1..=ONSET_DRAW_RANGE) > ONSET_CHANCE {
                return AnomalyEvent::Quiet;
            }
            let severity = rng.gen_range(1..=3u8);
            let kind = select_kind(rng.gen_range(1..=100), context);
            *self = AnomalyState {
                active: true,
                kind,
                severity,
                progress: ONSET_PROGRESS,
            };
            return AnomalyEvent::Onset(kind);
        }

        if self.progress >= 1.0 {
            if rng.gen_range(1..=100) <= RECOVERY_PERCENT {
                let kind = self.kind;
                self.clear();
                return AnomalyEvent::Recovered(kind);
            }
            return AnomalyEvent::Progressed;
        }

        self.progress = (self.progress + PROGRESS_PER_SECOND * dt.max(0.0)).min(1.0);
        AnomalyEvent::Progressed
    }
}

/// Pick the anomaly category for a roll in `1..=100`.
///
/// Buckets are checked in priority order: high speed, low battery,
/// charging, then the general distribution.
pub fn select_kind(roll: u32, context: &OnsetContext) -> AnomalyKind {
    if context.speed > HIGH_SPEED_KMH && roll <= 40 {
        AnomalyKind::Motor
    } else if context.soc < LOW_SOC_THRESHOLD && roll <= 70 {
        AnomalyKind::Battery
    } else if context.mode == VehicleMode::Charging && roll <= 60 {
        AnomalyKind::Battery
    } else if roll <= 30 {
        AnomalyKind::Motor
    } else if roll <= 60 {
        AnomalyKind::Battery
    } else if roll <= 85 {
        AnomalyKind::Communication
    } else {
        AnomalyKind::Gps
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn cruising() -> OnsetContext {
        OnsetContext {
            speed: 60.0,
            soc: 70.0,
            mode: VehicleMode::Cruising,
        }
    }

    #[test]
    fn selection_prefers_motor_at_high_speed() {
        let ctx = OnsetContext {
            speed: 90.0,
            ..cruising()
        };
        assert_eq!(select_kind(40, &ctx), AnomalyKind::Motor);
        assert_eq!(select_kind(41, &ctx), AnomalyKind::Battery);
    }

    #[test]
    fn selection_prefers_battery_when_low_or_charging() {
        let low = OnsetContext {
            soc: 20.0,
            ..cruising()
        };
        assert_eq!(select_kind(70, &low), AnomalyKind::Battery);
        let charging = OnsetContext {
            mode: VehicleMode::Charging,
            speed: 0.0,
            ..cruising()
        };
        assert_eq!(select_kind(55, &charging), AnomalyKind::Battery);
        assert_eq!(select_kind(61, &charging), AnomalyKind::Communication);
    }

    #[test]
    fn general_distribution_buckets() {
        let ctx = cruising();
        assert_eq!(select_kind(1, &ctx), AnomalyKind::Motor);
        assert_eq!(select_kind(31, &ctx), AnomalyKind::Battery);
        assert_eq!(select_kind(85, &ctx), AnomalyKind::Communication);
        assert_eq!(select_kind(86, &ctx), AnomalyKind::Gps);
        assert_eq!(select_kind(100, &ctx), AnomalyKind::Gps);
    }

    #[test]
    fn progress_saturates_then_clears_atomically() {
        let mut rng = StdRng::seed_from_u64(11);
        let mut state = AnomalyState {
            active: true,
            kind: AnomalyKind::Motor,
            severity: 2,
            progress: 0.95,
        };
        let ctx = cruising();
        state.step(10.0, &ctx, &mut rng);
        assert_eq!(state.progress, 1.0);
        assert!(state.active);

        let mut recovered = false;
        for _ in 0..1000 {
            match state.step(1.0, &ctx, &mut rng) {
                AnomalyEvent::Recovered(kind) => {
                    assert_eq!(kind, AnomalyKind::Motor);
                    recovered = true;
                    break;
                }
                _ => {
                    assert!(state.active);
                    assert_eq!(state.progress, 1.0);
                }
            }
        }
        assert!(recovered);
        assert_eq!(state, AnomalyState::default());
        assert_eq!(state.kind.as_str(), "none");
        assert_eq!(state.severity, 0);
    }

    #[test]
    fn onset_initialises_progress_and_severity() {
        let mut rng = StdRng::seed_from_u64(12);
        let mut state = AnomalyState::default();
        let ctx = cruising();
        let mut onset = None;
        for _ in 0..200_000 {
            if let AnomalyEvent::Onset(kind) = state.step(1.0, &ctx, &mut rng) {
                onset = Some(kind);
                break;
            }
        }
        assert!(onset.is_some());
        assert!(state.active);
        assert_eq!(state.progress, 0.1);
        assert!((1..=3).contains(&state.severity));
        assert_ne!(state.kind, AnomalyKind::None);
    }

    #[test]
    fn wire_names_round_trip() {
        for kind in [
            AnomalyKind::Battery,
            AnomalyKind::Motor,
            AnomalyKind::Communication,
            AnomalyKind::Gps,
        ] {
            assert_eq!(AnomalyKind::from_wire(kind.as_str()), Some(kind));
        }
        assert_eq!(AnomalyKind::from_wire("brakes"), None);
    }
}
