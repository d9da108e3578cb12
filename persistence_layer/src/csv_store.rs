use crate::{write_atomic, PersistenceError, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashSet;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Replace a CSV file with `rows` (header included) in one atomic step
pub fn write_rows_atomic<T: Serialize>(path: &Path, rows: &[T]) -> Result<()> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    for row in rows {
        writer.serialize(row)?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| PersistenceError::io(path, e.into_error()))?;
    write_atomic(path, &bytes)?;
    debug!("💾 Wrote {} rows to {}", rows.len(), path.display());
    Ok(())
}

/// All rows of a headed CSV file; a missing file is empty
pub fn read_rows<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let mut reader = csv::Reader::from_path(path)?;
    let mut rows = Vec::new();
    for row in reader.deserialize() {
        rows.push(row?);
    }
    Ok(rows)
}

/// Values of one named column, in file order. `None` when the column is absent.
pub fn read_column(path: &Path, column: &str) -> Result<Option<Vec<String>>> {
    let mut reader = csv::Reader::from_path(path)?;
    let Some(index) = reader.headers()?.iter().position(|h| h == column) else {
        return Ok(None);
    };
    let mut values = Vec::new();
    for record in reader.records() {
        let record = record?;
        if let Some(value) = record.get(index) {
            values.push(value.to_string());
        }
    }
    Ok(Some(values))
}

/// A CSV table that grows by appending; the header is written only when the file is new
#[derive(Debug, Clone)]
pub struct CsvTable {
    path: PathBuf,
}

impl CsvTable {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    pub fn append<T: Serialize>(&self, rows: &[T]) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| PersistenceError::io(parent, e))?;
        }
        let is_new = std::fs::metadata(&self.path)
            .map(|m| m.len() == 0)
            .unwrap_or(true);

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| PersistenceError::io(&self.path, e))?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(is_new)
            .from_writer(file);
        for row in rows {
            writer.serialize(row)?;
        }
        writer.flush().map_err(|e| PersistenceError::io(&self.path, e))?;
        Ok(())
    }

    pub fn rows<T: DeserializeOwned>(&self) -> Result<Vec<T>> {
        read_rows(&self.path)
    }

    /// Distinct values already present in `column`
    pub fn keys(&self, column: &str) -> Result<HashSet<String>> {
        if !self.exists() {
            return Ok(HashSet::new());
        }
        Ok(read_column(&self.path, column)?
            .unwrap_or_default()
            .into_iter()
            .collect())
    }

    /// First row whose `column` equals `key`
    pub fn find<T: DeserializeOwned>(&self, column: &str, key: &str) -> Result<Option<T>> {
        if !self.exists() {
            return Ok(None);
        }
        let mut reader = csv::Reader::from_path(&self.path)?;
        let headers = reader.headers()?.clone();
        let Some(index) = headers.iter().position(|h| h == column) else {
            return Ok(None);
        };
        for record in reader.records() {
            let record = record?;
            if record.get(index) == Some(key) {
                return Ok(Some(record.deserialize(Some(&headers))?));
            }
        }
        Ok(None)
    }
}
