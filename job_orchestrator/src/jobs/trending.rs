use super::utc_date;
use crate::Result;
use chrono::Utc;
use dex_client::{BirdEyeClient, TrendingPages, TrendingToken};
use harvest_core::{collect_pages, CancellationToken, PaginationSpec};
use persistence_layer::write_rows_atomic;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The listing endpoint serves at most this many ranks
pub const MAX_TRENDING: usize = 10_000;

/// Row of `top_tokens-<date>.csv`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendingRow {
    pub ts: i64,
    pub rank: Option<u32>,
    pub address: String,
    pub symbol: String,
    pub name: String,
    pub decimals: Option<u8>,
    pub price: Option<f64>,
    pub price_change_24h: Option<f64>,
    pub volume_24h: Option<f64>,
    pub volume_change_24h: Option<f64>,
    pub liquidity: Option<f64>,
    pub fdv: Option<f64>,
    pub marketcap: Option<f64>,
}

impl TrendingRow {
    fn new(ts: i64, token: TrendingToken) -> Self {
        Self {
            ts,
            rank: token.rank,
            address: token.address,
            symbol: token.symbol,
            name: token.name,
            decimals: token.decimals,
            price: token.price,
            price_change_24h: token.price_change_24h,
            volume_24h: token.volume_24h,
            volume_change_24h: token.volume_change_24h,
            liquidity: token.liquidity,
            fdv: token.fdv,
            marketcap: token.marketcap,
        }
    }
}

#[derive(Debug)]
pub struct TrendingSnapshot {
    pub path: PathBuf,
    pub rows: usize,
    /// Pages succeeded / requested
    pub status: String,
    pub partial: bool,
}

impl TrendingSnapshot {
    pub fn describe(&self) -> String {
        format!(
            "Trending snapshot: {} tokens ({}{}) -> {}",
            self.rows,
            self.status,
            if self.partial { ", partial" } else { "" },
            self.path.display()
        )
    }
}

pub fn trending_path(data_dir: &Path, date: &str) -> PathBuf {
    data_dir.join(format!("top_tokens-{}.csv", date))
}

/// Walk the ranked listing and write today's snapshot, stamped with the fetch time
pub async fn fetch_trending(
    client: &BirdEyeClient,
    data_dir: &Path,
    page_size: usize,
    cancel: &CancellationToken,
) -> Result<TrendingSnapshot> {
    let ts = Utc::now().timestamp();
    let spec = PaginationSpec::offset(page_size).with_max_records(Some(MAX_TRENDING));
    let collected = collect_pages(&TrendingPages { client }, &spec, cancel).await?;

    let partial = collected.is_partial();
    let status = collected.status();
    let rows: Vec<TrendingRow> = collected
        .records
        .into_iter()
        .map(|token| TrendingRow::new(ts, token))
        .collect();

    let path = trending_path(data_dir, &utc_date(ts));
    write_rows_atomic(&path, &rows)?;
    Ok(TrendingSnapshot {
        path,
        rows: rows.len(),
        status,
        partial,
    })
}
