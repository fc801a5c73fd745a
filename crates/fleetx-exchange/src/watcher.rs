//! ---
//! fx_section: "12-exchange"
//! fx_subsection: "consumption"
//! fx_type: "source"
//! fx_scope: "code"
//! fx_description: "Directory-creation watch feeding the pending set."
//! fx_version: "v0.1.0"
//! fx_owner: "tbd"
//! ---
use std::path::Path;
use std::time::Duration;

use fleetx_logging::{fx_debug, fx_warn, LogContext};
use notify::event::{Event, EventKind};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::consumer::PendingSet;
use crate::layout::parse_batch_dir_name;
use crate::Result;

/// Batch ids named by the creation paths of `event`.
pub fn batch_ids_from_event(event: &Event) -> Vec<u64> {
    if !matches!(event.kind, EventKind::Create(_)) {
        return Vec::new();
    }
    event
        .paths
        .iter()
        .filter_map(|path| path.file_name()?.to_str().and_then(parse_batch_dir_name))
        .collect()
}

/// Watches the exchange root for new `batch_<N>` directories and enqueues
/// each id after a settle delay. Must be started inside a Tokio runtime.
///
/// Enqueueing goes through the same idempotent set the poll loop uses, so
/// duplicate or late events are harmless.
pub struct BatchWatcher {
    _watcher: RecommendedWatcher,
    forwarder: JoinHandle<()>,
}

impl BatchWatcher {
    /// Start watching `root` (non-recursively).
    pub fn start(root: &Path, pending: PendingSet, settle_delay: Duration) -> Result<Self> {
        let (tx, mut rx) = mpsc::unbounded_channel::<u64>();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                for id in batch_ids_from_event(&event) {
                    let _ = tx.send(id);
                }
            }
            Err(err) => fx_warn!("directory watch error: {}", err),
        })?;
        watcher.watch(root, RecursiveMode::NonRecursive)?;

        let forwarder = tokio::spawn(async move {
            while let Some(id) = rx.recv().await {
                let pending = pending.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(settle_delay).await;
                    if pending.lock().insert(id) {
                        fx_debug!(
                            context = LogContext::new().with_batch(id),
                            "batch discovered by watch"
                        );
                    }
                });
            }
        });

        fx_debug!("watching {} for batch directories", root.display());
        Ok(Self {
            _watcher: watcher,
            forwarder,
        })
    }
}

impl Drop for BatchWatcher {
    fn drop(&mut self) {
        self.forwarder.abort();
    }
}

impl std::fmt::Debug for BatchWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchWatcher").finish_non_exhaustive()
    }
}
