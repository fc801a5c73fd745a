//! ---
//! fx_section: "11-simulation"
//! fx_subsection: "03-records"
//! fx_type: "source"
//! fx_scope: "code"
//! fx_description: "Telemetry and anomaly wire records."
//! fx_version: "v0.1.0"
//! fx_owner: "tbd"
//! ---
use fleetx_logging::{fx_warn, LogContext};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::anomaly::AnomalyKind;
use crate::mode::VehicleMode;

const TELEMETRY_TAG: &str = "telemetry";
const ANOMALY_TAG: &str = "anomaly";

fn telemetry_tag() -> String {
    TELEMETRY_TAG.to_owned()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatteryReading {
    pub soc: f64,
    pub temperature: f64,
    pub cycle_count: u32,
    pub voltage: f64,
    pub current: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MotorReading {
    pub temperature: f64,
    pub efficiency: f64,
    pub load: f64,
    pub rpm: i64,
    pub torque: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Axis3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GpsReading {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
    pub speed: f64,
    pub heading: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    pub acceleration: Axis3,
    pub gps: GpsReading,
    pub gyroscope: Axis3,
}

/// Immutable projection of one vehicle's state at a millisecond timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryRecord {
    pub vehicle_id: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    #[serde(default = "telemetry_tag")]
    pub data_type: String,
    pub mode: VehicleMode,
    pub battery: BatteryReading,
    pub motor: MotorReading,
    pub sensors: SensorReading,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatteryDetails {
    pub temperature: f64,
    /// Percent below the nominal voltage for the current charge.
    pub voltage_drop: f64,
    pub severity: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MotorDetails {
    pub temperature: f64,
    pub efficiency_drop: f64,
    pub vibration: f64,
    pub severity: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommunicationDetails {
    /// Percent of packets lost.
    pub packet_loss: u32,
    /// Milliseconds.
    pub latency_spike: u32,
    pub connection_drops: u32,
    pub severity: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GpsDetails {
    /// Metres.
    pub position_jump: u32,
    pub signal_loss: bool,
    /// Degrees.
    pub heading_inconsistency: u32,
    pub severity: u8,
}

/// Type-specific anomaly payload.
///
/// A record naming a type this build does not know decodes as `Unknown`
/// with an empty payload instead of failing the whole file.
#[derive(Debug, Clone, PartialEq)]
pub enum AnomalyDetails {
    Battery(BatteryDetails),
    Motor(MotorDetails),
    Communication(CommunicationDetails),
    Gps(GpsDetails),
    Unknown { anomaly_type: String },
}

impl AnomalyDetails {
    pub fn kind(&self) -> AnomalyKind {
        match self {
            AnomalyDetails::Battery(_) => AnomalyKind::Battery,
            AnomalyDetails::Motor(_) => AnomalyKind::Motor,
            AnomalyDetails::Communication(_) => AnomalyKind::Communication,
            AnomalyDetails::Gps(_) => AnomalyKind::Gps,
            AnomalyDetails::Unknown { .. } => AnomalyKind::None,
        }
    }

    pub fn type_name(&self) -> &str {
        match self {
            AnomalyDetails::Unknown { anomaly_type } => anomaly_type,
            other => other.kind().as_str(),
        }
    }

    pub fn severity(&self) -> Option<u8> {
        match self {
            AnomalyDetails::Battery(d) => Some(d.severity),
            AnomalyDetails::Motor(d) => Some(d.severity),
            AnomalyDetails::Communication(d) => Some(d.severity),
            AnomalyDetails::Gps(d) => Some(d.severity),
            AnomalyDetails::Unknown { .. } => None,
        }
    }
}

/// Anomaly report for a vehicle with an active anomaly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawAnomalyRecord", into = "RawAnomalyRecord")]
pub struct AnomalyRecord {
    pub vehicle_id: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    pub details: AnomalyDetails,
}

impl AnomalyRecord {
    pub fn kind(&self) -> AnomalyKind {
        self.details.kind()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawAnomalyRecord {
    vehicle_id: String,
    timestamp: i64,
    #[serde(default)]
    data_type: Option<String>,
    anomaly_type: String,
    #[serde(default)]
    details: Value,
}

impl TryFrom<RawAnomalyRecord> for AnomalyRecord {
    type Error = serde_json::Error;

    fn try_from(raw: RawAnomalyRecord) -> Result<Self, Self::Error> {
        let details = match AnomalyKind::from_wire(&raw.anomaly_type) {
            Some(AnomalyKind::Battery) => AnomalyDetails::Battery(serde_json::from_value(raw.details)?),
            Some(AnomalyKind::Motor) => AnomalyDetails::Motor(serde_json::from_value(raw.details)?),
            Some(AnomalyKind::Communication) => {
                AnomalyDetails::Communication(serde_json::from_value(raw.details)?)
            }
            Some(AnomalyKind::Gps) => AnomalyDetails::Gps(serde_json::from_value(raw.details)?),
            Some(AnomalyKind::None) | None => {
                fx_warn!(
                    context = LogContext::new().with_vehicle(&raw.vehicle_id),
                    "unknown anomaly type {:?}; keeping record with empty details",
                    raw.anomaly_type
                );
                AnomalyDetails::Unknown {
                    anomaly_type: raw.anomaly_type,
                }
            }
        };
        Ok(AnomalyRecord {
            vehicle_id: raw.vehicle_id,
            timestamp: raw.timestamp,
            details,
        })
    }
}

impl From<AnomalyRecord> for RawAnomalyRecord {
    fn from(record: AnomalyRecord) -> Self {
        let anomaly_type = record.details.type_name().to_owned();
        let details = match record.details {
            AnomalyDetails::Battery(d) => serde_json::to_value(d),
            AnomalyDetails::Motor(d) => serde_json::to_value(d),
            AnomalyDetails::Communication(d) => serde_json::to_value(d),
            AnomalyDetails::Gps(d) => serde_json::to_value(d),
            AnomalyDetails::Unknown { .. } => Ok(Value::Object(Default::default())),
        }
        .unwrap_or_else(|_| Value::Object(Default::default()));
        RawAnomalyRecord {
            vehicle_id: record.vehicle_id,
            timestamp: record.timestamp,
            data_type: Some(ANOMALY_TAG.to_owned()),
            anomaly_type,
            details,
        }
    }
}

/// Round to one decimal place, as published on the wire.
pub(crate) fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Round to two decimal places.
pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
