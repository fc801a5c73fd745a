//! ---
//! fx_section: "12-exchange"
//! fx_subsection: "layout"
//! fx_type: "source"
//! fx_scope: "code"
//! fx_description: "On-disk naming of live snapshot and batch directories."
//! fx_version: "v0.1.0"
//! fx_owner: "tbd"
//! ---
//! ```text
//! root/live/telemetry.json        {"telemetry": {<vehicle_id>: record}}
//! root/live/anomaly.json          [record, ...]
//! root/batch_<N>/.batch_start     epoch seconds
//! root/batch_<N>/telemetry.json   [record, ...]
//! root/batch_<N>/anomaly.json     [record, ...]
//! root/batch_<N>/.batch_complete  epoch seconds
//! ```
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

/// Directory holding the overwrite-in-place live snapshot.
pub const LIVE_DIR: &str = "live";
/// Telemetry payload name, shared by live and batch directories.
pub const TELEMETRY_FILE: &str = "telemetry.json";
/// Anomaly payload name, shared by live and batch directories.
pub const ANOMALY_FILE: &str = "anomaly.json";
/// Written before any batch payload.
pub const START_MARKER: &str = ".batch_start";
/// Written after every batch payload; the only completeness signal.
pub const COMPLETE_MARKER: &str = ".batch_complete";
/// Prefix of numbered batch directories.
pub const BATCH_PREFIX: &str = "batch_";

/// Observable state of one batch directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchState {
    /// No directory.
    Absent,
    /// Directory exists but the completion marker does not.
    InConstruction,
    /// Completion marker present; payloads are safe to parse.
    Complete,
}

/// Path arithmetic for one exchange root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeLayout {
    root: PathBuf,
}

impl ExchangeLayout {
    /// Layout rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Exchange root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `root/live`.
    pub fn live_dir(&self) -> PathBuf {
        self.root.join(LIVE_DIR)
    }

    /// `root/live/telemetry.json`.
    pub fn live_telemetry(&self) -> PathBuf {
        self.live_dir().join(TELEMETRY_FILE)
    }

    /// `root/live/anomaly.json`.
    pub fn live_anomalies(&self) -> PathBuf {
        self.live_dir().join(ANOMALY_FILE)
    }

    /// `root/batch_<id>`.
    pub fn batch_dir(&self, batch_id: u64) -> PathBuf {
        self.root.join(batch_dir_name(batch_id))
    }

    /// Telemetry payload of a batch.
    pub fn batch_telemetry(&self, batch_id: u64) -> PathBuf {
        self.batch_dir(batch_id).join(TELEMETRY_FILE)
    }

    /// Anomaly payload of a batch.
    pub fn batch_anomalies(&self, batch_id: u64) -> PathBuf {
        self.batch_dir(batch_id).join(ANOMALY_FILE)
    }

    /// Start marker of a batch.
    pub fn start_marker(&self, batch_id: u64) -> PathBuf {
        self.batch_dir(batch_id).join(START_MARKER)
    }

    /// Completion marker of a batch.
    pub fn complete_marker(&self, batch_id: u64) -> PathBuf {
        self.batch_dir(batch_id).join(COMPLETE_MARKER)
    }

    /// Classify a batch directory by its markers.
    pub fn batch_state(&self, batch_id: u64) -> BatchState {
        if self.complete_marker(batch_id).is_file() {
            BatchState::Complete
        } else if self.batch_dir(batch_id).is_dir() {
            BatchState::InConstruction
        } else {
            BatchState::Absent
        }
    }
}

/// Directory name for a batch id.
pub fn batch_dir_name(batch_id: u64) -> String {
    format!("{BATCH_PREFIX}{batch_id}")
}

/// Parse `batch_<N>` into `N`. Anything else, including signs or trailing
/// characters, is rejected.
pub fn parse_batch_dir_name(name: &str) -> Option<u64> {
    let digits = name.strip_prefix(BATCH_PREFIX)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Batch ids of every `batch_<N>` directory directly under `root`.
///
/// A missing root yields an empty set.
pub fn scan_batch_ids(root: &Path) -> BTreeSet<u64> {
    scan_batch_ids_above(root, None)
}

/// Like [`scan_batch_ids`], keeping only ids above `floor`.
///
/// Names are parsed and compared before any metadata is consulted, so ids
/// at or below the floor cost one directory entry each.
pub fn scan_batch_ids_above(root: &Path, floor: Option<u64>) -> BTreeSet<u64> {
    if !root.is_dir() {
        return BTreeSet::new();
    }
    WalkDir::new(root)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            let id = entry.file_name().to_str().and_then(parse_batch_dir_name)?;
            let above = floor.map_or(true, |floor| id > floor);
            (above && entry.file_type().is_dir()).then_some(id)
        })
        .collect()
}
