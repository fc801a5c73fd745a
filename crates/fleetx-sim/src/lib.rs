//! ---
//! fx_section: "11-simulation"
//! fx_subsection: "01-bootstrap"
//! fx_type: "source"
//! fx_scope: "code"
//! fx_description: "Simulation module exports and shared types."
//! fx_version: "v0.1.0"
//! fx_owner: "tbd"
//! ---
//! Vehicle fleet simulation: per-vehicle mode machines with physics
//! integration, an anomaly injection sub-model, and the tick engine that
//! folds every vehicle's output into a [`Batch`] and a [`LiveSnapshot`].

pub mod anomaly;
pub mod batch;
pub mod engine;
pub mod mode;
pub mod records;
pub mod vehicle;

pub use anomaly::{AnomalyKind, AnomalyState};
pub use batch::{Batch, LiveSnapshot, LiveTelemetryDocument};
pub use engine::{EngineSettings, EngineStats, SimulationEngine, TickOutput};
pub use mode::{ModeInputs, Transition, VehicleMode};
pub use records::{
    AnomalyDetails, AnomalyRecord, BatteryDetails, CommunicationDetails, GpsDetails,
    MotorDetails, TelemetryRecord,
};
pub use vehicle::VehicleState;
