use crate::{EntityJob, EntityOutcome, OrchestratorError, Result};
use async_trait::async_trait;
use dex_client::{BirdEyeClient, TradePages};
use harvest_core::{collect_pages, CancellationToken, EntityKey, PaginationSpec, QueryFilter};
use persistence_layer::write_rows_atomic;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Deepest offset the trades endpoint serves
pub const MAX_TRADES: usize = 10_000;

pub fn trades_path(data_dir: &Path, key: &EntityKey) -> PathBuf {
    data_dir.join(format!("trades_{}.csv", key))
}

/// Recent swaps per token, newest first, bounded by one time or block range
pub struct TradesJob {
    client: BirdEyeClient,
    data_dir: PathBuf,
    filter: QueryFilter,
}

impl TradesJob {
    pub fn new(client: BirdEyeClient, data_dir: PathBuf, filter: QueryFilter) -> Self {
        Self {
            client,
            data_dir,
            filter,
        }
    }
}

#[async_trait]
impl EntityJob for TradesJob {
    fn name(&self) -> &'static str {
        "trades"
    }

    fn is_cached(&self, key: &EntityKey) -> Result<bool> {
        Ok(trades_path(&self.data_dir, key).exists())
    }

    async fn process(&self, key: &EntityKey, cancel: &CancellationToken) -> Result<EntityOutcome> {
        let pages = TradePages {
            client: &self.client,
            key: key.clone(),
            filter: self.filter.clone(),
        };
        let spec = PaginationSpec::offset(self.client.config().page_size).with_max_records(Some(MAX_TRADES));

        let collected = match collect_pages(&pages, &spec, cancel).await {
            Ok(collected) => collected,
            Err(e) => {
                let e = OrchestratorError::from(e);
                if e.is_cancelled() {
                    return Err(e);
                }
                return Ok(EntityOutcome::Failed(e.to_string()));
            }
        };
        // a partial file would be taken as done on the next run
        if collected.is_partial() {
            warn!("⚠️ Trades for {} incomplete ({})", key.short(), collected.status());
            return Ok(EntityOutcome::Failed(format!("trades: {}", collected.status())));
        }

        write_rows_atomic(&trades_path(&self.data_dir, key), &collected.records)?;
        Ok(EntityOutcome::Completed(format!(
            "{} trades, {}",
            collected.records.len(),
            collected.status()
        )))
    }
}
