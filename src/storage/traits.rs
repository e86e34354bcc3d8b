//! Storage traits and error types
//!
//! This module defines the interface the batch driver persists records
//! through, and the errors every persistence path reports.

use crate::extract::Record;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while persisting output or checkpoints
///
/// Every variant is fatal to the job that hit it.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Failed to create directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("CSV error in {path}: {source}")]
    Csv { path: PathBuf, source: csv::Error },

    #[error("Serialization error: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Destination for the records of committed work units
///
/// One output per (entity, unit label) pair. Writing the same pair again
/// replaces the earlier output.
pub trait RecordSink {
    /// Creates whatever the sink needs before the first write
    fn prepare(&mut self) -> StorageResult<()>;

    /// Whether output for this entity and unit already exists
    fn has_unit(&self, entity: &str, label: &str) -> bool;

    /// Persists the records of one entity for one unit
    ///
    /// # Returns
    ///
    /// The number of records written
    fn write_unit(&mut self, entity: &str, label: &str, records: &[Record])
        -> StorageResult<usize>;
}
