use crate::{write_atomic, PersistenceError, Result};
use harvest_core::EntityKey;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Terminal outcome of processing one entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    /// Artifact fetched and saved
    Completed,
    /// Retries exhausted, nothing saved
    Failed,
    /// A precondition was missing; retrying would not help
    Skipped,
}

/// On-disk shape: `{"completed": [...], "failed": [...], "skipped": [...]}`
#[derive(Debug, Default, Serialize, Deserialize)]
struct LedgerFile {
    #[serde(default)]
    completed: Vec<String>,
    #[serde(default)]
    failed: Vec<String>,
    #[serde(default)]
    skipped: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    reasons: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LedgerCounts {
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// Per-entity terminal status across batch runs.
///
/// Writes are buffered: the file is replaced after every `flush_interval`
/// recorded outcomes and on `flush()`.
#[derive(Debug)]
pub struct ProgressLedger {
    path: PathBuf,
    order: Vec<String>,
    status: HashMap<String, Outcome>,
    reasons: BTreeMap<String, String>,
    flush_interval: usize,
    pending: usize,
}

impl ProgressLedger {
    /// Load the ledger at `path`; a missing or unreadable file starts empty
    pub fn load(path: impl Into<PathBuf>, flush_interval: usize) -> Self {
        let path = path.into();
        let file = match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice::<LedgerFile>(&bytes).unwrap_or_else(|e| {
                warn!("⚠️ Could not parse progress file {}: {} - starting fresh", path.display(), e);
                LedgerFile::default()
            }),
            Err(_) => LedgerFile::default(),
        };

        let mut ledger = Self {
            path,
            order: Vec::new(),
            status: HashMap::new(),
            reasons: file.reasons,
            flush_interval: flush_interval.max(1),
            pending: 0,
        };
        for (keys, outcome) in [
            (file.completed, Outcome::Completed),
            (file.failed, Outcome::Failed),
            (file.skipped, Outcome::Skipped),
        ] {
            for key in keys {
                ledger.set(key, outcome);
            }
        }

        let counts = ledger.counts();
        debug!(
            "📒 Loaded progress: {} completed, {} failed, {} skipped",
            counts.completed, counts.failed, counts.skipped
        );
        ledger
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Forget everything, on disk too
    pub fn reset(&mut self) -> Result<()> {
        self.order.clear();
        self.status.clear();
        self.reasons.clear();
        info!("🔄 Progress reset");
        self.flush()
    }

    /// Drop every `failed` entry so a retry pass reprocesses them
    pub fn clear_failed(&mut self) -> usize {
        let failed: Vec<String> = self
            .status
            .iter()
            .filter(|(_, o)| **o == Outcome::Failed)
            .map(|(k, _)| k.clone())
            .collect();
        for key in &failed {
            self.remove(key);
        }
        if !failed.is_empty() {
            info!("🔁 Cleared {} failed entries for retry", failed.len());
        }
        failed.len()
    }

    pub fn status(&self, key: &EntityKey) -> Option<Outcome> {
        self.status.get(key.as_str()).copied()
    }

    /// Whether a key still needs processing in this run
    pub fn is_pending(&self, key: &EntityKey) -> bool {
        self.status(key).is_none()
    }

    pub fn reason(&self, key: &EntityKey) -> Option<&str> {
        self.reasons.get(key.as_str()).map(String::as_str)
    }

    /// Record a terminal outcome, flushing when the interval is reached
    pub fn record(&mut self, key: &EntityKey, outcome: Outcome, reason: Option<String>) -> Result<()> {
        self.set(key.to_string(), outcome);
        match reason {
            Some(reason) => {
                self.reasons.insert(key.to_string(), reason);
            }
            None => {
                self.reasons.remove(key.as_str());
            }
        }

        self.pending += 1;
        if self.pending >= self.flush_interval {
            self.flush()?;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        let mut file = LedgerFile {
            reasons: self.reasons.clone(),
            ..LedgerFile::default()
        };
        for key in &self.order {
            match self.status.get(key) {
                Some(Outcome::Completed) => file.completed.push(key.clone()),
                Some(Outcome::Failed) => file.failed.push(key.clone()),
                Some(Outcome::Skipped) => file.skipped.push(key.clone()),
                None => {}
            }
        }

        let bytes = serde_json::to_vec(&file).map_err(PersistenceError::from)?;
        write_atomic(&self.path, &bytes)?;
        self.pending = 0;
        debug!("💾 Progress saved to {}", self.path.display());
        Ok(())
    }

    pub fn counts(&self) -> LedgerCounts {
        let mut counts = LedgerCounts::default();
        for outcome in self.status.values() {
            match outcome {
                Outcome::Completed => counts.completed += 1,
                Outcome::Failed => counts.failed += 1,
                Outcome::Skipped => counts.skipped += 1,
            }
        }
        counts
    }

    fn set(&mut self, key: String, outcome: Outcome) {
        if self.status.insert(key.clone(), outcome).is_some() {
            self.order.retain(|k| *k != key);
        }
        self.order.push(key);
    }

    fn remove(&mut self, key: &str) {
        self.status.remove(key);
        self.reasons.remove(key);
        self.order.retain(|k| k != key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(s: &str) -> EntityKey {
        EntityKey::from(s)
    }

    #[test]
    fn test_missing_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = ProgressLedger::load(dir.path().join("progress.json"), 10);
        assert_eq!(ledger.counts(), LedgerCounts::default());
        assert!(ledger.is_pending(&key("A")));
    }

    #[test]
    fn test_flushes_every_interval() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("progress.json");
        let mut ledger = ProgressLedger::load(&path, 2);

        ledger.record(&key("A"), Outcome::Completed, None).unwrap();
        assert!(!path.exists());
        ledger.record(&key("B"), Outcome::Skipped, Some("no creation time".to_string())).unwrap();
        assert!(path.exists());

        let reloaded = ProgressLedger::load(&path, 2);
        assert_eq!(reloaded.status(&key("A")), Some(Outcome::Completed));
        assert_eq!(reloaded.status(&key("B")), Some(Outcome::Skipped));
        assert_eq!(reloaded.reason(&key("B")), Some("no creation time"));
    }

    #[test]
    fn test_file_format_round_trips_with_plain_lists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("progress.json");
        std::fs::write(&path, r#"{"completed": ["A"], "failed": ["B"], "skipped": []}"#).unwrap();

        let mut ledger = ProgressLedger::load(&path, 10);
        assert!(!ledger.is_pending(&key("B")));
        ledger.flush().unwrap();

        let value: serde_json::Value = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(value["completed"], serde_json::json!(["A"]));
        assert_eq!(value["failed"], serde_json::json!(["B"]));
        assert!(value.get("reasons").is_none());
    }

    #[test]
    fn test_clear_failed_makes_keys_pending() {
        let dir = tempfile::tempdir().unwrap();
        let mut ledger = ProgressLedger::load(dir.path().join("progress.json"), 10);
        ledger.record(&key("A"), Outcome::Failed, Some("HTTP 500".to_string())).unwrap();
        ledger.record(&key("B"), Outcome::Completed, None).unwrap();

        assert_eq!(ledger.clear_failed(), 1);
        assert!(ledger.is_pending(&key("A")));
        assert_eq!(ledger.reason(&key("A")), None);
        assert!(!ledger.is_pending(&key("B")));
    }

    #[test]
    fn test_outcome_moves_between_lists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("progress.json");
        let mut ledger = ProgressLedger::load(&path, 10);
        ledger.record(&key("A"), Outcome::Failed, None).unwrap();
        ledger.record(&key("A"), Outcome::Completed, None).unwrap();
        ledger.flush().unwrap();

        let reloaded = ProgressLedger::load(&path, 10);
        assert_eq!(
            reloaded.counts(),
            LedgerCounts {
                completed: 1,
                failed: 0,
                skipped: 0
            }
        );
    }

    #[test]
    fn test_reset_clears_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("progress.json");
        let mut ledger = ProgressLedger::load(&path, 1);
        ledger.record(&key("A"), Outcome::Completed, None).unwrap();
        ledger.reset().unwrap();

        assert!(ProgressLedger::load(&path, 1).is_pending(&key("A")));
    }

    #[test]
    fn test_corrupt_file_starts_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("progress.json");
        std::fs::write(&path, "[[[").unwrap();
        assert_eq!(ProgressLedger::load(&path, 10).counts(), LedgerCounts::default());
    }
}
