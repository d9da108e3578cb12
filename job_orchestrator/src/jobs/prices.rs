use super::StartResolver;
use crate::{EntityJob, EntityOutcome, OrchestratorError, Result};
use async_trait::async_trait;
use chrono::Utc;
use config_manager::FetchOptions;
use dex_client::TokenMetadataService;
use harvest_core::{CancellationToken, EntityKey, FetchWindow, Granularity};
use persistence_layer::write_rows_atomic;
use std::path::{Path, PathBuf};

const DAILY: &str = "1D";

pub fn price_history_path(data_dir: &Path, key: &EntityKey) -> PathBuf {
    data_dir.join(format!("price_history_{}.csv", key))
}

/// Daily price points from creation (or the default start) to now
pub struct PriceHistoryJob {
    tokens: TokenMetadataService,
    data_dir: PathBuf,
    start: StartResolver,
}

impl PriceHistoryJob {
    pub fn new(tokens: TokenMetadataService, data_dir: PathBuf, options: FetchOptions) -> Result<Self> {
        Ok(Self {
            tokens,
            data_dir,
            start: StartResolver::new(&options)?,
        })
    }
}

#[async_trait]
impl EntityJob for PriceHistoryJob {
    fn name(&self) -> &'static str {
        "prices"
    }

    fn is_cached(&self, key: &EntityKey) -> Result<bool> {
        Ok(price_history_path(&self.data_dir, key).exists())
    }

    async fn process(&self, key: &EntityKey, _cancel: &CancellationToken) -> Result<EntityOutcome> {
        let Some(start) = self.start.resolve(&self.tokens, key).await? else {
            return Ok(EntityOutcome::Skipped("no creation time".to_string()));
        };
        let Some(window) = FetchWindow::new(start, Utc::now().timestamp(), Granularity::new(DAILY)) else {
            return Ok(EntityOutcome::Skipped(format!("start {} is not in the past", start)));
        };

        let points = match self.tokens.client().history_price(key, &window).await {
            Ok(points) => points,
            Err(e) => {
                let e = OrchestratorError::from(e);
                if e.is_cancelled() {
                    return Err(e);
                }
                return Ok(EntityOutcome::Failed(e.to_string()));
            }
        };
        if points.is_empty() {
            return Ok(EntityOutcome::Failed("no price history".to_string()));
        }

        write_rows_atomic(&price_history_path(&self.data_dir, key), &points)?;
        Ok(EntityOutcome::Completed(format!("{} daily prices", points.len())))
    }
}
