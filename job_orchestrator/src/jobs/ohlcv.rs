use super::{utc_datetime, StartResolver};
use crate::{EntityJob, EntityOutcome, Result};
use async_trait::async_trait;
use chrono::Utc;
use config_manager::FetchOptions;
use dex_client::{Candle, TokenMetadataService};
use harvest_core::{
    fetch_multi_resolution, fetch_windows, CancellationToken, EntityKey, FetchWindow, Granularity,
    TaggedRecord, WindowingPolicy,
};
use persistence_layer::write_rows_atomic;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub fn ohlcv_path(data_dir: &Path, key: &EntityKey) -> PathBuf {
    data_dir.join(format!("OHLCV_history_{}.csv", key))
}

/// Row of `OHLCV_history_<address>.csv`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OhlcvRow {
    pub ts: i64,
    pub datetime: String,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub interval: String,
}

impl From<&TaggedRecord<Candle>> for OhlcvRow {
    fn from(tagged: &TaggedRecord<Candle>) -> Self {
        let c = &tagged.record;
        Self {
            ts: c.ts,
            datetime: utc_datetime(c.ts),
            open: c.open,
            high: c.high,
            low: c.low,
            close: c.close,
            volume: c.volume,
            interval: tagged.interval.label().to_string(),
        }
    }
}

/// Candles from creation to now, finer near creation and coarser later.
///
/// With `single_interval` set the whole lifetime is one request at that interval.
pub struct OhlcvJob {
    tokens: TokenMetadataService,
    policy: WindowingPolicy,
    data_dir: PathBuf,
    start: StartResolver,
    single_interval: Option<Granularity>,
    pause: Duration,
}

impl OhlcvJob {
    pub fn new(
        tokens: TokenMetadataService,
        policy: WindowingPolicy,
        data_dir: PathBuf,
        options: FetchOptions,
    ) -> Result<Self> {
        let single_interval = options.single_interval.clone().map(Granularity::new);
        // Phases are anchored at creation; only a single interval may start at the default date
        let start = match single_interval {
            Some(_) => StartResolver::new(&options)?,
            None => StartResolver::new(&options)?.creation_required(),
        };
        Ok(Self {
            tokens,
            policy,
            data_dir,
            start,
            single_interval,
            pause: options.sleep_duration(),
        })
    }
}

#[async_trait]
impl EntityJob for OhlcvJob {
    fn name(&self) -> &'static str {
        "ohlcv"
    }

    fn is_cached(&self, key: &EntityKey) -> Result<bool> {
        Ok(ohlcv_path(&self.data_dir, key).exists())
    }

    async fn process(&self, key: &EntityKey, cancel: &CancellationToken) -> Result<EntityOutcome> {
        let Some(start) = self.start.resolve(&self.tokens, key).await? else {
            return Ok(EntityOutcome::Skipped("no creation time".to_string()));
        };
        let now = Utc::now().timestamp();
        let client = self.tokens.client();

        let series = match &self.single_interval {
            Some(interval) => {
                let Some(window) = FetchWindow::new(start, now, interval.clone()) else {
                    return Ok(EntityOutcome::Skipped(format!("start {} is not in the past", start)));
                };
                fetch_windows(client, key, &[window], self.pause, cancel).await?
            }
            None => fetch_multi_resolution(client, &self.policy, key, start, now, self.pause, cancel).await?,
        };

        if series.is_empty() {
            return Ok(EntityOutcome::Failed(format!("no OHLCV data ({})", series.status())));
        }

        let rows: Vec<OhlcvRow> = series.records.iter().map(OhlcvRow::from).collect();
        write_rows_atomic(&ohlcv_path(&self.data_dir, key), &rows)?;
        Ok(EntityOutcome::Completed(format!(
            "{} candles [{}] {}",
            rows.len(),
            series.intervals().join(","),
            series.status()
        )))
    }
}
