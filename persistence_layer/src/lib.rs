// Persistence Layer - file-backed cache, progress ledger and CSV artifacts
// Every write that replaces a file goes through a temp file and a rename

pub mod csv_store;
pub mod error_log;
pub mod json_cache;
pub mod ledger;

use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub use csv_store::{read_column, read_rows, write_rows_atomic, CsvTable};
pub use error_log::ErrorLog;
pub use json_cache::{Cached, JsonCache};
pub use ledger::{LedgerCounts, Outcome, ProgressLedger};

#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("File I/O error on {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl PersistenceError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        PersistenceError::Io {
            path: path.display().to_string(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, PersistenceError>;

/// Replace `path` with `contents`: write a sibling temp file, then rename over the target.
///
/// Readers see either the old file or the complete new one.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| PersistenceError::io(parent, e))?;
    }
    let tmp = temp_path(path);
    fs::write(&tmp, contents).map_err(|e| PersistenceError::io(&tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| PersistenceError::io(path, e))?;
    Ok(())
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_atomic_replaces_and_leaves_no_temp() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("doc.json");

        write_atomic(&path, b"first").unwrap();
        write_atomic(&path, b"second").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "second");
        assert!(!temp_path(&path).exists());
    }
}
