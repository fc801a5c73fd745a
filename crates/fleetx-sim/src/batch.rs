//! ---
//! fx_section: "11-simulation"
//! fx_subsection: "03-records"
//! fx_type: "source"
//! fx_scope: "code"
//! fx_description: "Per-tick batch and live snapshot aggregates."
//! fx_version: "v0.1.0"
//! fx_owner: "tbd"
//! ---
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::records::{AnomalyRecord, TelemetryRecord};

/// Immutable, numbered unit of records produced by one engine tick.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub batch_id: u64,
    pub telemetry: Vec<TelemetryRecord>,
    pub anomalies: Vec<AnomalyRecord>,
}

/// Latest value per vehicle plus the anomalies reported on the current tick.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LiveSnapshot {
    pub telemetry: IndexMap<String, TelemetryRecord>,
    pub anomalies: Vec<AnomalyRecord>,
}

/// On-disk shape of `live/telemetry.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LiveTelemetryDocument {
    #[serde(default)]
    pub telemetry: IndexMap<String, TelemetryRecord>,
}

impl LiveSnapshot {
    pub fn telemetry_document(&self) -> LiveTelemetryDocument {
        LiveTelemetryDocument {
            telemetry: self.telemetry.clone(),
        }
    }
}
