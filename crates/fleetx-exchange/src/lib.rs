//! ---
//! fx_section: "12-exchange"
//! fx_subsection: "module"
//! fx_type: "source"
//! fx_scope: "code"
//! fx_description: "Filesystem exchange protocol between producer and consumers."
//! fx_version: "v0.1.0"
//! fx_owner: "tbd"
//! ---
//! Producer and consumer share no memory; the only synchronisation between
//! them is the presence of files under the exchange root and the
//! `.batch_start` / `.batch_complete` marker pair inside each batch directory.
#![warn(missing_docs)]

use std::path::PathBuf;

/// Result alias used throughout the exchange crate.
pub type Result<T> = std::result::Result<T, ExchangeError>;

/// Error type for the exchange subsystem.
#[derive(Debug, thiserror::Error)]
pub enum ExchangeError {
    /// A payload stayed unparseable after every retry, most likely because
    /// the read kept racing a write.
    #[error("{path} still malformed after {attempts} attempts: {source}")]
    TransientRead {
        /// File that failed to parse.
        path: PathBuf,
        /// Number of read attempts made.
        attempts: u32,
        /// Last parse error observed.
        #[source]
        source: serde_json::Error,
    },
    /// A batch directory or payload vanished between discovery and read.
    #[error("missing resource: {}", .0.display())]
    MissingResource(PathBuf),
    /// Publication of one file failed.
    #[error("write to {} failed: {source}", path.display())]
    Write {
        /// Destination that could not be written.
        path: PathBuf,
        /// Underlying IO failure.
        #[source]
        source: std::io::Error,
    },
    /// Wrapper for IO errors outside publication.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Wrapper for JSON serialization issues.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
    /// Wrapper for Prometheus metrics registration failures.
    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
    /// Directory watch could not be established.
    #[error("watch error: {0}")]
    Watch(#[from] notify::Error),
    /// A blocking consumer cycle panicked or was cancelled.
    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

pub mod atomic;
pub mod consumer;
pub mod layout;
pub mod metrics;
pub mod producer;
pub mod reader;
pub mod runner;
pub mod sink;
pub mod watcher;
pub mod writer;

pub use atomic::{write_json_atomic, write_marker};
pub use consumer::{
    BatchOutcome, ConsumerCounters, DataConsumer, DeferReason, DrainReport, LiveIngest, PendingSet,
};
pub use layout::{
    parse_batch_dir_name, scan_batch_ids, scan_batch_ids_above, BatchState, ExchangeLayout,
};
pub use metrics::ExchangeMetrics;
pub use producer::{ProducerLoop, ProducerSummary};
pub use reader::{RetryPolicy, SafeReader};
pub use runner::ConsumerLoop;
pub use sink::{MemorySink, TelemetrySink};
pub use watcher::BatchWatcher;
pub use writer::{BatchWriter, PublishReport, WriteChannel};
