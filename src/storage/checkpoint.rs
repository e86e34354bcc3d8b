//! Durable resume cursor
//!
//! The checkpoint records the end marker of the last committed work unit.
//! A job that starts with a checkpoint present resumes with the first unit
//! after it.

use crate::crawler::WorkUnit;
use crate::storage::csv_sink::{ensure_dir, tmp_path};
use crate::storage::traits::{StorageError, StorageResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Persisted checkpoint contents
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint<C> {
    pub last_unit_end: C,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub saved_at: Option<DateTime<Utc>>,
}

impl<C> Checkpoint<C> {
    pub fn new(last_unit_end: C) -> Self {
        Self {
            last_unit_end,
            saved_at: Some(Utc::now()),
        }
    }
}

/// JSON checkpoint file
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the checkpoint
    ///
    /// A missing file is `None`. An unreadable or corrupt file is logged and
    /// also treated as `None`; the job then starts over and relies on
    /// skipping units whose output already exists.
    pub fn load<C>(&self) -> Option<Checkpoint<C>>
    where
        C: for<'de> Deserialize<'de>,
    {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return None,
            Err(e) => {
                tracing::warn!("Could not read checkpoint {}: {}", self.path.display(), e);
                return None;
            }
        };

        match serde_json::from_str(&text) {
            Ok(checkpoint) => Some(checkpoint),
            Err(e) => {
                tracing::warn!(
                    "Ignoring corrupt checkpoint {}: {}",
                    self.path.display(),
                    e
                );
                None
            }
        }
    }

    /// Saves the checkpoint atomically (temp file, then rename)
    pub fn save<C: Serialize>(&self, checkpoint: &Checkpoint<C>) -> StorageResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                ensure_dir(parent)?;
            }
        }

        let json = serde_json::to_string_pretty(checkpoint)?;
        let tmp = tmp_path(&self.path);

        fs::write(&tmp, json).map_err(|source| StorageError::Write {
            path: tmp.clone(),
            source,
        })?;
        fs::rename(&tmp, &self.path).map_err(|source| StorageError::Write {
            path: self.path.clone(),
            source,
        })
    }

    /// Removes the checkpoint so the next run starts from the beginning
    pub fn clear(&self) -> StorageResult<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StorageError::Write {
                path: self.path.clone(),
                source,
            }),
        }
    }
}

/// The units strictly after the checkpointed one, in original order
///
/// With no checkpoint the full range is returned unchanged.
pub fn resume_from<U: WorkUnit>(checkpoint: Option<&U::Cursor>, full_range: Vec<U>) -> Vec<U> {
    match checkpoint {
        None => full_range,
        Some(last_end) => full_range
            .into_iter()
            .filter(|unit| unit.end_marker() > *last_end)
            .collect(),
    }
}
