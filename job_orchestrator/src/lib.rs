// Job Orchestrator - batch collection runs over discovered entities
// Wires config into clients, runs entity jobs through the ledger-backed batch runner

pub mod batch;
pub mod discovery;
pub mod jobs;

pub use batch::{BatchRunner, BatchSummary, EntityJob, EntityOutcome, RunOptions};
pub use discovery::discover_entities;
pub use jobs::{
    BitquerySnapshot, MetadataJob, MoralisPriceJob, OhlcvJob, PriceHistoryJob, ProgramTxsJob,
    PumpMetadataJob, SecurityJob, TradesJob, TrendingSnapshot,
};

use config_manager::{ConfigurationError, KeyedSource, SystemConfig};
use dex_client::{BirdEyeClient, BitqueryClient, DexClientError, MoralisClient, PumpClient, TokenMetadataService};
use harvest_core::{
    CancellationToken, EntityKey, ErrorSink, HarvestError, InvokeError, Invoker, QueryFilter,
    ReqwestTransport, WindowingPolicy,
};
use persistence_layer::{ErrorLog, PersistenceError, ProgressLedger};
use solana_client::{SolanaClient, SolanaClientError};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigurationError),
    #[error("Request error: {0}")]
    Request(#[from] HarvestError),
    #[error("Data source error: {0}")]
    DexClient(#[from] DexClientError),
    #[error("Solana client error: {0}")]
    SolanaClient(#[from] SolanaClientError),
    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),
    #[error("Cannot read input {path}: {source}")]
    Input {
        path: String,
        source: std::io::Error,
    },
    /// Further entities cannot succeed either (e.g. an exhausted API quota)
    #[error("Batch halted: {0}")]
    Halted(String),
}

impl From<InvokeError> for OrchestratorError {
    fn from(err: InvokeError) -> Self {
        OrchestratorError::Request(HarvestError::Invoke(err))
    }
}

impl OrchestratorError {
    pub fn is_cancelled(&self) -> bool {
        match self {
            OrchestratorError::Request(e)
            | OrchestratorError::DexClient(DexClientError::Request(e))
            | OrchestratorError::SolanaClient(SolanaClientError::Request(e)) => e.is_cancelled(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// Builds clients from the configuration and runs one job per call
pub struct JobOrchestrator {
    config: SystemConfig,
    error_sink: Arc<dyn ErrorSink>,
    cancel: CancellationToken,
}

impl JobOrchestrator {
    pub fn new(config: SystemConfig, cancel: CancellationToken) -> Self {
        let error_log = ErrorLog::new(config.storage.error_log_path());
        Self {
            config,
            error_sink: Arc::new(error_log),
            cancel,
        }
    }

    pub fn config(&self) -> &SystemConfig {
        &self.config
    }

    /// One invoker per source so each gets its own request timeout
    fn invoker(&self, timeout_seconds: u64) -> Result<Invoker> {
        let transport = ReqwestTransport::new(Duration::from_secs(timeout_seconds))?;
        Ok(Invoker::new(Arc::new(transport), self.config.retry.retry_config())
            .with_permanent_statuses(self.config.retry.permanent_status_codes.clone())
            .with_error_sink(self.error_sink.clone())
            .with_cancellation(self.cancel.clone()))
    }

    fn birdeye(&self) -> Result<BirdEyeClient> {
        self.config.require_key(KeyedSource::BirdEye)?;
        let invoker = self.invoker(self.config.birdeye.request_timeout_seconds)?;
        Ok(BirdEyeClient::new(self.config.birdeye.clone(), invoker))
    }

    fn token_service(&self) -> Result<TokenMetadataService> {
        Ok(TokenMetadataService::new(
            self.birdeye()?,
            &self.config.storage.data_path(),
            self.config.fetch.force_refresh,
        ))
    }

    fn runner(&self, job: &str) -> BatchRunner {
        let ledger = ProgressLedger::load(
            self.config.storage.progress_path(job),
            self.config.storage.flush_interval,
        );
        BatchRunner::new(ledger, RunOptions::from_config(&self.config), self.cancel.clone())
    }

    async fn run_job<J: EntityJob>(&self, job: J, keys: &[EntityKey]) -> Result<BatchSummary> {
        let mut runner = self.runner(job.name());
        runner.run(&job, keys).await
    }

    /// Multi-resolution (or single-interval) OHLCV history per token
    pub async fn run_ohlcv(&self, keys: &[EntityKey]) -> Result<BatchSummary> {
        let job = OhlcvJob::new(
            self.token_service()?,
            WindowingPolicy::from(&self.config.windowing),
            self.config.storage.data_path(),
            self.config.fetch.clone(),
        )?;
        self.run_job(job, keys).await
    }

    /// Daily price history per token
    pub async fn run_prices(&self, keys: &[EntityKey]) -> Result<BatchSummary> {
        let job = PriceHistoryJob::new(
            self.token_service()?,
            self.config.storage.data_path(),
            self.config.fetch.clone(),
        )?;
        self.run_job(job, keys).await
    }

    pub async fn run_security(&self, keys: &[EntityKey]) -> Result<BatchSummary> {
        self.run_job(SecurityJob::new(self.token_service()?), keys).await
    }

    pub async fn run_metadata(&self, keys: &[EntityKey]) -> Result<BatchSummary> {
        self.run_job(MetadataJob::new(self.token_service()?), keys).await
    }

    pub async fn run_pump_metadata(&self, keys: &[EntityKey]) -> Result<BatchSummary> {
        let invoker = self.invoker(self.config.pump.request_timeout_seconds)?;
        let client = PumpClient::new(self.config.pump.clone(), invoker);
        let job = PumpMetadataJob::new(client, &self.config.storage.data_path())?;
        self.run_job(job, keys).await
    }

    pub async fn run_moralis_prices(&self, keys: &[EntityKey]) -> Result<BatchSummary> {
        self.config.require_key(KeyedSource::Moralis)?;
        let invoker = self.invoker(self.config.moralis.request_timeout_seconds)?;
        let client = MoralisClient::new(self.config.moralis.clone(), invoker);
        let job = MoralisPriceJob::new(client, &self.config.storage.data_path(), self.config.fetch.clone())?;
        self.run_job(job, keys).await
    }

    /// Swaps per token within one time or block range
    pub async fn run_trades(&self, keys: &[EntityKey], filter: QueryFilter) -> Result<BatchSummary> {
        let job = TradesJob::new(self.birdeye()?, self.config.storage.data_path(), filter);
        self.run_job(job, keys).await
    }

    /// Signatures and transaction details for each program address
    pub async fn run_program_txs(&self, programs: &[EntityKey]) -> Result<BatchSummary> {
        let invoker = self.invoker(self.config.solana_rpc.request_timeout_seconds)?;
        let client = SolanaClient::new(self.config.solana_rpc.clone(), invoker);
        let job = ProgramTxsJob::new(client, self.config.storage.data_path());
        self.run_job(job, programs).await
    }

    /// Today's trending snapshot
    pub async fn run_trending(&self) -> Result<TrendingSnapshot> {
        let client = self.birdeye()?;
        let snapshot = jobs::trending::fetch_trending(
            &client,
            &self.config.storage.data_path(),
            self.config.birdeye.page_size,
            &self.cancel,
        )
        .await?;
        info!("📈 {}", snapshot.describe());
        Ok(snapshot)
    }

    /// Today's Bitquery daily aggregate snapshot
    pub async fn run_bitquery_prices(&self) -> Result<BitquerySnapshot> {
        self.config.require_key(KeyedSource::Bitquery)?;
        let invoker = self.invoker(self.config.bitquery.request_timeout_seconds)?;
        let client = BitqueryClient::new(self.config.bitquery.clone(), invoker);
        let snapshot =
            jobs::bitquery::fetch_daily_prices(&client, &self.config.storage.data_path(), &self.cancel).await?;
        info!("📈 {}", snapshot.describe());
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancellation_is_detected_through_wrappers() {
        let wrapped = OrchestratorError::DexClient(DexClientError::Request(HarvestError::Cancelled));
        assert!(wrapped.is_cancelled());
        assert!(OrchestratorError::from(InvokeError::Cancelled).is_cancelled());
        assert!(!OrchestratorError::from(InvokeError::Unauthorized).is_cancelled());
        assert!(!OrchestratorError::Halted("quota".to_string()).is_cancelled());
    }

    #[tokio::test]
    async fn test_missing_api_key_is_rejected_before_any_run() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = SystemConfig::default();
        config.storage.data_dir = dir.path().display().to_string();
        let orchestrator = JobOrchestrator::new(config, CancellationToken::new());

        let result = orchestrator.run_security(&[EntityKey::from("TOKEN1")]).await;

        assert!(matches!(result, Err(OrchestratorError::Config(_))));
        assert!(!dir.path().join("security_progress.json").exists());
    }
}
