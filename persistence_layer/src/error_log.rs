use crate::{PersistenceError, Result};
use chrono::Utc;
use harvest_core::ErrorSink;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::warn;

/// Append-only diagnostic log: `timestamp,entity,error,url` per line, no header.
///
/// Never read back by the pipeline.
#[derive(Debug)]
pub struct ErrorLog {
    path: PathBuf,
    lock: Mutex<()>,
}

impl ErrorLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, entity: &str, error: &str, url: &str) -> Result<()> {
        let _guard = self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| PersistenceError::io(parent, e))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| PersistenceError::io(&self.path, e))?;

        let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(file);
        let timestamp = Utc::now().to_rfc3339();
        writer.write_record([timestamp.as_str(), entity, error, url])?;
        writer.flush().map_err(|e| PersistenceError::io(&self.path, e))?;
        Ok(())
    }
}

impl ErrorSink for ErrorLog {
    fn record(&self, entity: &str, error: &str, url: &str) {
        if let Err(e) = self.append(entity, error, url) {
            warn!("Could not write error log {}: {}", self.path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_appends_quoted_rows() {
        let dir = tempfile::tempdir().unwrap();
        let log = ErrorLog::new(dir.path().join("data").join("errors.csv"));

        log.record("TOKEN1", "HTTP 500", "https://api.test/x?a=1");
        log.record("TOKEN2", "JSON decode error: expected value, line 1", "https://api.test/y");

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .from_path(log.path())
            .unwrap();
        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();

        assert_eq!(rows.len(), 2);
        assert_eq!(&rows[0][1], "TOKEN1");
        assert_eq!(&rows[1][2], "JSON decode error: expected value, line 1");
        assert_eq!(&rows[1][3], "https://api.test/y");
    }
}
