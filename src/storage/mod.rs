//! Storage module for persisting harvest output
//!
//! This module handles everything the harvester writes to disk:
//! - Per-unit, aggregate and interim CSV files
//! - The JSON checkpoint used to resume long jobs
//! - Plain-text URL lists produced by the catalog job
//!
//! Every write goes to a sibling temp file first and is renamed into place.

mod checkpoint;
mod csv_sink;
mod traits;

pub use checkpoint::{resume_from, Checkpoint, CheckpointStore};
pub use csv_sink::{ensure_dir, header_for, write_csv, CsvSink};
pub use traits::{RecordSink, StorageError, StorageResult};

use std::fs;
use std::path::{Path, PathBuf};

/// Writes one URL per line, atomically
pub fn write_url_list(path: &Path, urls: &[String]) -> StorageResult<()> {
    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }

    let mut text = urls.join("\n");
    if !text.is_empty() {
        text.push('\n');
    }

    let tmp = csv_sink::tmp_path(path);
    fs::write(&tmp, text).map_err(|source| StorageError::Write {
        path: tmp.clone(),
        source,
    })?;
    fs::rename(&tmp, path).map_err(|source| StorageError::Write {
        path: path.to_path_buf(),
        source,
    })
}

/// Finds the newest file in `dir` named `{prefix}*{suffix}`
///
/// Names embed a sortable timestamp, so the lexicographically greatest name
/// is the newest.
pub fn newest_matching(dir: &Path, prefix: &str, suffix: &str) -> Option<PathBuf> {
    let entries = fs::read_dir(dir).ok()?;

    entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .map(|name| name.starts_with(prefix) && name.ends_with(suffix))
                .unwrap_or(false)
        })
        .max()
}
