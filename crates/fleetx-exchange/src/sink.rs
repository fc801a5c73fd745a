//! ---
//! fx_section: "12-exchange"
//! fx_subsection: "consumption"
//! fx_type: "source"
//! fx_scope: "code"
//! fx_description: "Keyed destination for ingested telemetry."
//! fx_version: "v0.1.0"
//! fx_owner: "tbd"
//! ---
use fleetx_sim::TelemetryRecord;
use indexmap::IndexMap;

/// Find-by-key / insert-or-update store keyed on vehicle id.
pub trait TelemetrySink: Send {
    /// Latest stored record for `vehicle_id`.
    fn find(&self, vehicle_id: &str) -> Option<&TelemetryRecord>;
    /// Insert or replace the record for its vehicle.
    fn upsert(&mut self, record: TelemetryRecord);
    /// Every stored record.
    fn records(&self) -> Vec<&TelemetryRecord>;
    /// Number of vehicles held.
    fn len(&self) -> usize;
    /// True when nothing has been stored.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-process sink preserving first-seen vehicle order.
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    records: IndexMap<String, TelemetryRecord>,
}

impl MemorySink {
    /// Empty sink.
    pub fn new() -> Self {
        Self::default()
    }
}

impl TelemetrySink for MemorySink {
    fn find(&self, vehicle_id: &str) -> Option<&TelemetryRecord> {
        self.records.get(vehicle_id)
    }

    fn upsert(&mut self, record: TelemetryRecord) {
        self.records.insert(record.vehicle_id.clone(), record);
    }

    fn records(&self) -> Vec<&TelemetryRecord> {
        self.records.values().collect()
    }

    fn len(&self) -> usize {
        self.records.len()
    }
}
