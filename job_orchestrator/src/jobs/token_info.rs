use crate::{EntityJob, EntityOutcome, OrchestratorError, Result};
use async_trait::async_trait;
use dex_client::{PumpClient, PumpMetadataRow, TokenMetadataService};
use harvest_core::{CancellationToken, EntityKey};
use persistence_layer::CsvTable;
use std::collections::HashSet;
use std::path::Path;
use tracing::debug;

pub const PUMP_METADATA_FILE: &str = "pump_metadata.csv";

/// Turns a failed lookup into a `failed` outcome, keeping cancellation an error
fn failed_unless_cancelled(e: impl Into<OrchestratorError>) -> Result<EntityOutcome> {
    let e = e.into();
    if e.is_cancelled() {
        return Err(e);
    }
    Ok(EntityOutcome::Failed(e.to_string()))
}

/// Rows of `security_details.csv`
pub struct SecurityJob {
    tokens: TokenMetadataService,
}

impl SecurityJob {
    pub fn new(tokens: TokenMetadataService) -> Self {
        Self { tokens }
    }
}

#[async_trait]
impl EntityJob for SecurityJob {
    fn name(&self) -> &'static str {
        "security"
    }

    fn is_cached(&self, key: &EntityKey) -> Result<bool> {
        Ok(self.tokens.has_security(key)?)
    }

    async fn process(&self, key: &EntityKey, _cancel: &CancellationToken) -> Result<EntityOutcome> {
        match self.tokens.security(key).await {
            Ok(Some(_)) => Ok(EntityOutcome::Completed("security details saved".to_string())),
            Ok(None) => Ok(EntityOutcome::Failed("no security data".to_string())),
            Err(e) => failed_unless_cancelled(e),
        }
    }
}

/// `metadata_<address>.json` documents
pub struct MetadataJob {
    tokens: TokenMetadataService,
}

impl MetadataJob {
    pub fn new(tokens: TokenMetadataService) -> Self {
        Self { tokens }
    }
}

#[async_trait]
impl EntityJob for MetadataJob {
    fn name(&self) -> &'static str {
        "metadata"
    }

    fn is_cached(&self, key: &EntityKey) -> Result<bool> {
        Ok(self.tokens.has_metadata(key))
    }

    async fn process(&self, key: &EntityKey, _cancel: &CancellationToken) -> Result<EntityOutcome> {
        match self.tokens.metadata(key).await {
            Ok(Some(cached)) => {
                let metadata = cached.into_inner();
                let label = metadata.symbol.or(metadata.name).unwrap_or_default();
                Ok(EntityOutcome::Completed(format!("metadata saved {}", label).trim_end().to_string()))
            }
            Ok(None) => Ok(EntityOutcome::Failed("no metadata".to_string())),
            Err(e) => failed_unless_cancelled(e),
        }
    }
}

/// Appends pump.fun coin documents to `pump_metadata.csv`
pub struct PumpMetadataJob {
    client: PumpClient,
    table: CsvTable,
    /// `TokenAddress` values already in the table when the run started
    known: HashSet<String>,
}

impl PumpMetadataJob {
    pub fn new(client: PumpClient, data_dir: &Path) -> Result<Self> {
        let table = CsvTable::new(data_dir.join(PUMP_METADATA_FILE));
        let known = table.keys("TokenAddress")?;
        debug!("🎰 {} pump.fun tokens already saved", known.len());
        Ok(Self { client, table, known })
    }
}

#[async_trait]
impl EntityJob for PumpMetadataJob {
    fn name(&self) -> &'static str {
        "pump_metadata"
    }

    fn is_cached(&self, key: &EntityKey) -> Result<bool> {
        Ok(self.known.contains(key.as_str()))
    }

    async fn process(&self, key: &EntityKey, _cancel: &CancellationToken) -> Result<EntityOutcome> {
        if !self.client.is_pump_token(key) {
            return Ok(EntityOutcome::Skipped("not a pump.fun token".to_string()));
        }
        match self.client.coin(key).await {
            Ok(coin) => {
                let row = PumpMetadataRow::from(coin);
                let label = row.symbol.clone();
                self.table.append(&[row])?;
                Ok(EntityOutcome::Completed(format!("saved {}", label)))
            }
            Err(e) => failed_unless_cancelled(e),
        }
    }
}
