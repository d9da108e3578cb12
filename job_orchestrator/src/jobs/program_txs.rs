use crate::{EntityJob, EntityOutcome, OrchestratorError, Result};
use async_trait::async_trait;
use harvest_core::{stream_pages, CancellationToken, EntityKey, PageSink, PaginationSpec};
use persistence_layer::{write_rows_atomic, CsvTable};
use serde::{Deserialize, Serialize};
use solana_client::{SignatureInfo, SignaturePages, SolanaClient};
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

/// Row of `signatures_<program>.csv`; the last row is the resume cursor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignatureRow {
    pub signature: String,
    pub slot: Option<u64>,
    pub block_time: Option<i64>,
    pub failed: bool,
}

impl From<&SignatureInfo> for SignatureRow {
    fn from(info: &SignatureInfo) -> Self {
        Self {
            signature: info.signature.clone(),
            slot: info.slot,
            block_time: info.block_time,
            failed: info.err.is_some(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct RetryRow {
    signature: String,
}

#[derive(Debug, Default)]
struct RunTally {
    pages: usize,
    saved: usize,
    pending_retry: usize,
}

/// Commits every signature page as it arrives: details first, then the
/// signature rows that move the resume cursor
struct CommitPages<'a> {
    job: &'a ProgramTxsJob,
    program: &'a EntityKey,
    known: HashSet<String>,
    tally: RunTally,
}

#[async_trait]
impl PageSink for CommitPages<'_> {
    type Record = SignatureInfo;
    type Error = OrchestratorError;

    async fn accept(&mut self, page: Vec<SignatureInfo>) -> Result<()> {
        let fresh: Vec<String> = page
            .iter()
            .map(|s| s.signature.clone())
            .filter(|s| !self.known.contains(s))
            .collect();
        self.job.commit_details(self.program, fresh, &mut self.tally).await?;

        let rows: Vec<SignatureRow> = page.iter().map(SignatureRow::from).collect();
        self.job.signatures_table(self.program).append(&rows)?;
        self.tally.pages += 1;

        info!(
            "📜 {} page {}: {} signatures, {} transactions saved so far",
            self.program.short(),
            self.tally.pages,
            page.len(),
            self.tally.saved
        );
        Ok(())
    }
}

/// Walks a program's signatures backwards from where the last run stopped,
/// looking up each page's new transactions concurrently and committing the
/// page before moving on.
pub struct ProgramTxsJob {
    client: SolanaClient,
    data_dir: PathBuf,
}

impl ProgramTxsJob {
    pub fn new(client: SolanaClient, data_dir: PathBuf) -> Self {
        Self { client, data_dir }
    }

    pub fn signatures_table(&self, program: &EntityKey) -> CsvTable {
        CsvTable::new(self.data_dir.join(format!("signatures_{}.csv", program)))
    }

    pub fn transactions_table(&self, program: &EntityKey) -> CsvTable {
        CsvTable::new(self.data_dir.join(format!("transactions_{}.csv", program)))
    }

    pub fn retry_table(&self, program: &EntityKey) -> CsvTable {
        CsvTable::new(self.data_dir.join(format!("retry_{}.csv", program)))
    }

    /// Look up `signatures`, append what was found, queue the rest for retry
    async fn commit_details(
        &self,
        program: &EntityKey,
        signatures: Vec<String>,
        tally: &mut RunTally,
    ) -> Result<()> {
        let batch = self.client.transactions(signatures).await?;
        self.transactions_table(program).append(&batch.details)?;
        let retry: Vec<RetryRow> = batch
            .failed
            .into_iter()
            .map(|signature| RetryRow { signature })
            .collect();
        self.retry_table(program).append(&retry)?;
        tally.saved += batch.details.len();
        Ok(())
    }

    /// One more attempt for every queued signature; survivors stay queued
    async fn drain_retries(&self, program: &EntityKey, tally: &mut RunTally) -> Result<()> {
        let table = self.retry_table(program);
        let queued: Vec<RetryRow> = table.rows()?;
        if queued.is_empty() {
            return Ok(());
        }
        info!("🔁 Re-attempting {} transactions for {}", queued.len(), program.short());

        let batch = self
            .client
            .transactions(queued.into_iter().map(|r| r.signature).collect())
            .await?;
        self.transactions_table(program).append(&batch.details)?;
        tally.saved += batch.details.len();

        let still_failing: Vec<RetryRow> = batch
            .failed
            .into_iter()
            .map(|signature| RetryRow { signature })
            .collect();
        tally.pending_retry = still_failing.len();
        write_rows_atomic(table.path(), &still_failing)?;
        Ok(())
    }
}

#[async_trait]
impl EntityJob for ProgramTxsJob {
    fn name(&self) -> &'static str {
        "program_txs"
    }

    async fn process(&self, program: &EntityKey, cancel: &CancellationToken) -> Result<EntityOutcome> {
        let config = self.client.config();
        let before: Option<String> = self
            .signatures_table(program)
            .rows::<SignatureRow>()?
            .pop()
            .map(|row| row.signature);
        if let Some(cursor) = &before {
            info!("⏩ Resuming {} before {}", program.short(), cursor);
        }

        let source = SignaturePages {
            client: &self.client,
            address: program.as_str().to_string(),
            before,
        };
        let spec = PaginationSpec::cursor(config.signature_page_size)
            .with_max_records(Some(config.max_signatures))
            .with_page_delay(Duration::from_millis(config.page_delay_ms));
        let mut sink = CommitPages {
            job: self,
            program,
            known: self.transactions_table(program).keys("signature")?,
            tally: RunTally::default(),
        };

        let walk = stream_pages(&source, &spec, cancel, &mut sink).await;
        match walk {
            Ok(walk) if walk.is_partial() => {
                warn!("⚠️ Signature walk for {} stopped early ({})", program.short(), walk.status());
            }
            Ok(_) => {}
            Err(e) if e.is_cancelled() => return Err(e),
            Err(e) if sink.tally.pages == 0 => {
                return Ok(EntityOutcome::Failed(format!("signatures: {}", e)));
            }
            Err(e) => return Err(e),
        }

        let mut tally = sink.tally;
        self.drain_retries(program, &mut tally).await?;
        Ok(EntityOutcome::Completed(format!(
            "{} pages, {} transactions saved, {} pending retry",
            tally.pages, tally.saved, tally.pending_retry
        )))
    }
}
