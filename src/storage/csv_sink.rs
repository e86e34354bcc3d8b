//! CSV file sink
//!
//! Files are named `{entity}_{label}.csv`. The header row is the union of
//! the records' field names in first-seen order; missing cells are empty.
//! Every file is written to a sibling temp file and renamed into place, so a
//! crash never leaves a truncated CSV behind.

use crate::extract::Record;
use crate::storage::traits::{RecordSink, StorageError, StorageResult};
use std::fs;
use std::path::{Path, PathBuf};

/// Writes one CSV file per entity and unit into a directory
#[derive(Debug, Clone)]
pub struct CsvSink {
    dir: PathBuf,
}

impl CsvSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the per-unit file for an entity
    pub fn unit_path(&self, entity: &str, label: &str) -> PathBuf {
        self.dir.join(format!("{}_{}.csv", entity, label))
    }

    /// Writes an aggregate file `{entity}_{stamp}.csv`
    pub fn write_aggregate(
        &self,
        entity: &str,
        stamp: &str,
        records: &[Record],
    ) -> StorageResult<PathBuf> {
        let path = self.dir.join(format!("{}_{}.csv", entity, stamp));
        write_csv(&path, records)?;
        Ok(path)
    }

    /// Writes a crash-safety file `{entity}_{stamp}_interim.csv`
    ///
    /// Later interim saves of the same run overwrite the earlier one.
    pub fn write_interim(
        &self,
        entity: &str,
        stamp: &str,
        records: &[Record],
    ) -> StorageResult<PathBuf> {
        let path = self.dir.join(format!("{}_{}_interim.csv", entity, stamp));
        write_csv(&path, records)?;
        Ok(path)
    }
}

impl RecordSink for CsvSink {
    fn prepare(&mut self) -> StorageResult<()> {
        ensure_dir(&self.dir)
    }

    fn has_unit(&self, entity: &str, label: &str) -> bool {
        self.unit_path(entity, label).is_file()
    }

    fn write_unit(
        &mut self,
        entity: &str,
        label: &str,
        records: &[Record],
    ) -> StorageResult<usize> {
        let path = self.unit_path(entity, label);
        write_csv(&path, records)?;
        tracing::info!("Saved {} {} to {}", records.len(), entity, path.display());
        Ok(records.len())
    }
}

/// Creates a directory and its parents
pub fn ensure_dir(dir: &Path) -> StorageResult<()> {
    fs::create_dir_all(dir).map_err(|source| StorageError::CreateDir {
        path: dir.to_path_buf(),
        source,
    })
}

/// Header row for a set of records: field names in first-seen order
pub fn header_for(records: &[Record]) -> Vec<String> {
    let mut header: Vec<String> = Vec::new();
    for record in records {
        for name in record.field_names() {
            if !header.iter().any(|h| h == name) {
                header.push(name.to_string());
            }
        }
    }
    header
}

/// Writes records to `path` atomically
pub fn write_csv(path: &Path, records: &[Record]) -> StorageResult<()> {
    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }

    let tmp = tmp_path(path);
    let csv_err = |source| StorageError::Csv {
        path: tmp.clone(),
        source,
    };

    let mut writer = csv::Writer::from_path(&tmp).map_err(csv_err)?;
    let header = header_for(records);
    writer.write_record(&header).map_err(csv_err)?;

    for record in records {
        let row = header.iter().map(|name| {
            record
                .get(name)
                .map(|value| value.to_string())
                .unwrap_or_default()
        });
        writer.write_record(row).map_err(csv_err)?;
    }

    writer.flush().map_err(|source| StorageError::Write {
        path: tmp.clone(),
        source,
    })?;
    drop(writer);

    fs::rename(&tmp, path).map_err(|source| StorageError::Write {
        path: path.to_path_buf(),
        source,
    })
}

/// Sibling temp path used for atomic replacement
pub(crate) fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}
