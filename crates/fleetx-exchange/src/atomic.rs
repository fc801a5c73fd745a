//! ---
//! fx_section: "12-exchange"
//! fx_subsection: "publication"
//! fx_type: "source"
//! fx_scope: "code"
//! fx_description: "Write-to-temp, sync, rename file publication."
//! fx_version: "v0.1.0"
//! fx_owner: "tbd"
//! ---
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::Serialize;

use crate::{ExchangeError, Result};

const TEMP_SUFFIX: &str = ".tmp";

/// Sibling temporary path used while `path` is being written.
pub fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(OsString::from)
        .unwrap_or_default();
    name.push(TEMP_SUFFIX);
    path.with_file_name(name)
}

fn write_then_rename(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let tmp = temp_path(path);
    let result = (|| {
        let mut writer = BufWriter::new(File::create(&tmp)?);
        writer.write_all(bytes)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
        drop(writer);
        fs::rename(&tmp, path)
    })();
    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}

/// Publish `bytes` at `path` so readers observe either the previous content
/// or the full new content, never a prefix.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    write_then_rename(path, bytes).map_err(|source| ExchangeError::Write {
        path: path.to_path_buf(),
        source,
    })
}

/// Serialize `value` as JSON and publish it atomically.
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec(value)?;
    write_atomic(path, &bytes)
}

/// Publish a marker file holding the current epoch seconds.
pub fn write_marker(path: &Path) -> Result<()> {
    write_atomic(path, Utc::now().timestamp().to_string().as_bytes())
}
