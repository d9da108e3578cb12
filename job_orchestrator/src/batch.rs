use crate::{OrchestratorError, Result};
use async_trait::async_trait;
use config_manager::SystemConfig;
use harvest_core::{CancellationToken, EntityKey};
use persistence_layer::{Outcome, ProgressLedger};
use std::fmt::Write as _;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Terminal result of one entity, with a short human-readable detail
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityOutcome {
    Completed(String),
    Failed(String),
    Skipped(String),
}

impl EntityOutcome {
    fn ledger_entry(&self) -> (Outcome, Option<String>) {
        match self {
            EntityOutcome::Completed(_) => (Outcome::Completed, None),
            EntityOutcome::Failed(reason) => (Outcome::Failed, Some(reason.clone())),
            EntityOutcome::Skipped(reason) => (Outcome::Skipped, Some(reason.clone())),
        }
    }

    pub fn detail(&self) -> &str {
        match self {
            EntityOutcome::Completed(d) | EntityOutcome::Failed(d) | EntityOutcome::Skipped(d) => d,
        }
    }
}

/// Per-entity unit of work driven by [`BatchRunner`]
#[async_trait]
pub trait EntityJob: Send + Sync {
    /// Also names the job's ledger file
    fn name(&self) -> &'static str;

    /// Whether the entity's artifact already exists. Checked before any
    /// network call; a cached entity counts as already processed.
    fn is_cached(&self, _key: &EntityKey) -> Result<bool> {
        Ok(false)
    }

    async fn process(&self, key: &EntityKey, cancel: &CancellationToken) -> Result<EntityOutcome>;
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Pause between entities that went to the network
    pub sleep: Duration,
    pub reset: bool,
    pub retry_failed: bool,
    pub force_refresh: bool,
    pub verbose: bool,
    pub report_limit: usize,
}

impl RunOptions {
    pub fn from_config(config: &SystemConfig) -> Self {
        Self {
            sleep: config.fetch.sleep_duration(),
            reset: config.fetch.reset,
            retry_failed: config.fetch.retry_failed,
            force_refresh: config.fetch.force_refresh,
            verbose: config.fetch.verbose,
            report_limit: config.storage.report_limit,
        }
    }
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            sleep: Duration::ZERO,
            reset: false,
            retry_failed: false,
            force_refresh: false,
            verbose: false,
            report_limit: 20,
        }
    }
}

/// Counts of one batch run plus the first failing and skipped keys
#[derive(Debug, Clone, Default)]
pub struct BatchSummary {
    pub job: String,
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub already_processed: usize,
    pub failed_keys: Vec<(String, String)>,
    pub skipped_keys: Vec<(String, String)>,
    pub cancelled: bool,
    pub halted: Option<String>,
    report_limit: usize,
}

impl BatchSummary {
    fn new(job: &str, total: usize, report_limit: usize) -> Self {
        Self {
            job: job.to_string(),
            total,
            report_limit,
            ..Self::default()
        }
    }

    /// Entities that reached a terminal outcome in this run
    pub fn processed(&self) -> usize {
        self.completed + self.failed + self.skipped
    }

    fn count(&mut self, key: &EntityKey, outcome: &EntityOutcome) {
        let entry = (key.to_string(), outcome.detail().to_string());
        match outcome {
            EntityOutcome::Completed(_) => self.completed += 1,
            EntityOutcome::Failed(_) => {
                self.failed += 1;
                if self.failed_keys.len() < self.report_limit {
                    self.failed_keys.push(entry);
                }
            }
            EntityOutcome::Skipped(_) => {
                self.skipped += 1;
                if self.skipped_keys.len() < self.report_limit {
                    self.skipped_keys.push(entry);
                }
            }
        }
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "=== {} summary ===", self.job);
        let _ = writeln!(out, "Total entities:     {}", self.total);
        let _ = writeln!(out, "Already processed:  {}", self.already_processed);
        let _ = writeln!(out, "Completed:          {}", self.completed);
        let _ = writeln!(out, "Failed:             {}", self.failed);
        let _ = writeln!(out, "Skipped:            {}", self.skipped);

        for (label, keys, count) in [
            ("Failed", &self.failed_keys, self.failed),
            ("Skipped", &self.skipped_keys, self.skipped),
        ] {
            if keys.is_empty() {
                continue;
            }
            let _ = writeln!(out, "{} (showing {} of {}):", label, keys.len(), count);
            for (key, reason) in keys {
                let _ = writeln!(out, "  {}: {}", key, reason);
            }
        }

        if let Some(reason) = &self.halted {
            let _ = writeln!(out, "Stopped early: {}", reason);
        } else if self.cancelled {
            let _ = writeln!(out, "Cancelled before all entities were processed");
        }
        out
    }
}

/// Sequential entity loop with ledger bookkeeping.
///
/// Each pending entity ends in exactly one ledger outcome. Entities already
/// recorded as completed or skipped are passed over; failed ones only when
/// the run was started without `retry_failed`.
pub struct BatchRunner {
    ledger: ProgressLedger,
    options: RunOptions,
    cancel: CancellationToken,
}

impl BatchRunner {
    pub fn new(ledger: ProgressLedger, options: RunOptions, cancel: CancellationToken) -> Self {
        Self {
            ledger,
            options,
            cancel,
        }
    }

    pub fn ledger(&self) -> &ProgressLedger {
        &self.ledger
    }

    pub async fn run<J>(&mut self, job: &J, keys: &[EntityKey]) -> Result<BatchSummary>
    where
        J: EntityJob + ?Sized,
    {
        if self.options.reset {
            self.ledger.reset()?;
        }
        if self.options.retry_failed {
            self.ledger.clear_failed();
        }

        let total = keys.len();
        let mut summary = BatchSummary::new(job.name(), total, self.options.report_limit);
        let mut went_to_network = false;
        info!("🚀 Starting {} batch over {} entities", job.name(), total);

        for (i, key) in keys.iter().enumerate() {
            if self.cancel.is_cancelled() {
                summary.cancelled = true;
                break;
            }
            let position = format!("[{}/{}]", i + 1, total);

            if let Some(status) = self.ledger.status(key) {
                debug!("{} {} already {:?}", position, key.short(), status);
                summary.already_processed += 1;
                continue;
            }

            if !self.options.force_refresh && self.is_cached(job, key) {
                debug!("{} {} artifact exists", position, key.short());
                summary.already_processed += 1;
                self.ledger.record(key, Outcome::Completed, None)?;
                continue;
            }

            if went_to_network && !self.options.sleep.is_zero() {
                tokio::time::sleep(self.options.sleep).await;
            }
            went_to_network = true;
            info!("{} {}", position, key);

            let outcome = match job.process(key, &self.cancel).await {
                Ok(outcome) => outcome,
                Err(e) if e.is_cancelled() => {
                    info!("🛑 {} cancelled while processing {}", job.name(), key.short());
                    summary.cancelled = true;
                    break;
                }
                Err(OrchestratorError::Halted(reason)) => {
                    warn!("⛔ {} halted at {}: {}", job.name(), key.short(), reason);
                    let outcome = EntityOutcome::Failed(reason.clone());
                    self.record(key, &outcome, &mut summary)?;
                    summary.halted = Some(reason);
                    break;
                }
                Err(e) => EntityOutcome::Failed(e.to_string()),
            };

            match &outcome {
                EntityOutcome::Completed(detail) if self.options.verbose => {
                    info!("  ✅ {}", detail)
                }
                EntityOutcome::Completed(detail) => debug!("  ✅ {}", detail),
                EntityOutcome::Failed(reason) => warn!("  ❌ {}: {}", key.short(), reason),
                EntityOutcome::Skipped(reason) => info!("  ⏭️ {}: {}", key.short(), reason),
            }
            self.record(key, &outcome, &mut summary)?;
        }

        self.ledger.flush()?;
        info!(
            "🏁 {} finished: {} completed, {} failed, {} skipped, {} already processed",
            job.name(),
            summary.completed,
            summary.failed,
            summary.skipped,
            summary.already_processed
        );
        Ok(summary)
    }

    fn is_cached<J: EntityJob + ?Sized>(&self, job: &J, key: &EntityKey) -> bool {
        job.is_cached(key).unwrap_or_else(|e| {
            warn!("⚠️ Could not check cached artifact for {}: {}", key.short(), e);
            false
        })
    }

    fn record(&mut self, key: &EntityKey, outcome: &EntityOutcome, summary: &mut BatchSummary) -> Result<()> {
        let (status, reason) = outcome.ledger_entry();
        self.ledger.record(key, status, reason)?;
        summary.count(key, outcome);
        Ok(())
    }
}
