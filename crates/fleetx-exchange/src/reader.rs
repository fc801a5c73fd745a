//! ---
//! fx_section: "12-exchange"
//! fx_subsection: "consumption"
//! fx_type: "source"
//! fx_scope: "code"
//! fx_description: "Bounded-retry JSON reads of files that may be mid-write."
//! fx_version: "v0.1.0"
//! fx_owner: "tbd"
//! ---
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

use fleetx_common::ConsumerConfig;
use fleetx_logging::fx_debug;
use serde::de::DeserializeOwned;

use crate::{ExchangeError, Result};

/// How often and how patiently a malformed payload is re-read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first; at least 1.
    pub attempts: u32,
    /// Fixed pause between attempts.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// Policy from the consumer section of the configuration.
    pub fn from_config(config: &ConsumerConfig) -> Self {
        Self {
            attempts: config.read_retries.max(1),
            delay: config.read_retry_delay,
        }
    }
}

/// JSON reader that retries parse failures only.
///
/// Parse failures are the signature of a read racing a writer; every other
/// IO error is returned immediately.
#[derive(Debug, Default)]
pub struct SafeReader {
    policy: RetryPolicy,
    retries: AtomicU64,
}

impl SafeReader {
    /// Reader using `policy`.
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            retries: AtomicU64::new(0),
        }
    }

    /// Active retry policy.
    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Attempts repeated after a parse failure since creation.
    pub fn retries(&self) -> u64 {
        self.retries.load(Ordering::Relaxed)
    }

    /// Parse `path` as JSON. Returns `Ok(None)` when the file does not exist.
    pub fn read_json<T: DeserializeOwned>(&self, path: &Path) -> Result<Option<T>> {
        let attempts = self.policy.attempts.max(1);
        let mut attempt = 1;
        loop {
            let bytes = match fs::read(path) {
                Ok(bytes) => bytes,
                Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
                Err(err) => return Err(ExchangeError::Io(err)),
            };
            match serde_json::from_slice(&bytes) {
                Ok(value) => return Ok(Some(value)),
                Err(source) if attempt >= attempts => {
                    return Err(ExchangeError::TransientRead {
                        path: path.to_path_buf(),
                        attempts,
                        source,
                    });
                }
                Err(err) => {
                    fx_debug!(
                        "{} not parseable yet (attempt {}): {}; retrying",
                        path.display(),
                        attempt,
                        err
                    );
                    self.retries.fetch_add(1, Ordering::Relaxed);
                    attempt += 1;
                    thread::sleep(self.policy.delay);
                }
            }
        }
    }

    /// Like [`SafeReader::read_json`] but a missing file is an error.
    pub fn read_required<T: DeserializeOwned>(&self, path: &Path) -> Result<T> {
        self.read_json(path)?
            .ok_or_else(|| ExchangeError::MissingResource(path.to_path_buf()))
    }
}

/// True when `path` is absent or too small to hold a non-empty JSON array.
pub fn is_effectively_empty(path: &Path) -> bool {
    fs::metadata(path).map(|meta| meta.len() <= 2).unwrap_or(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;
    use tempfile::tempdir;

    fn fast(attempts: u32) -> SafeReader {
        SafeReader::new(RetryPolicy {
            attempts,
            delay: Duration::from_millis(10),
        })
    }

    #[test]
    fn missing_file_is_none() {
        let dir = tempdir().unwrap();
        let reader = fast(3);
        let value: Option<Vec<u32>> = reader.read_json(&dir.path().join("nope.json")).unwrap();
        assert!(value.is_none());
        assert!(matches!(
            reader.read_required::<Vec<u32>>(&dir.path().join("nope.json")),
            Err(ExchangeError::MissingResource(_))
        ));
    }

    #[test]
    fn persistent_garbage_surfaces_after_bounded_attempts() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("telemetry.json");
        fs::write(&path, b"[{\"vehicle_id\":").unwrap();
        let reader = fast(3);
        let started = Instant::now();
        let err = reader.read_json::<Vec<serde_json::Value>>(&path).unwrap_err();
        assert!(matches!(err, ExchangeError::TransientRead { attempts: 3, .. }));
        assert_eq!(reader.retries(), 2);
        assert!(started.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn recovers_once_writer_finishes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("anomaly.json");
        fs::write(&path, b"[1, 2").unwrap();
        let fixer_path = path.clone();
        let fixer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            fs::write(fixer_path, b"[1, 2, 3]").unwrap();
        });
        let reader = SafeReader::new(RetryPolicy {
            attempts: 50,
            delay: Duration::from_millis(10),
        });
        let value: Vec<u32> = reader.read_required(&path).unwrap();
        fixer.join().unwrap();
        assert_eq!(value, vec![1, 2, 3]);
        assert!(reader.retries() >= 1);
    }

    #[test]
    fn small_files_count_as_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("anomaly.json");
        assert!(is_effectively_empty(&path));
        fs::write(&path, b"[]").unwrap();
        assert!(is_effectively_empty(&path));
        fs::write(&path, b"[{}]").unwrap();
        assert!(!is_effectively_empty(&path));
    }
}
