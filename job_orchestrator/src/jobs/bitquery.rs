use super::utc_date;
use crate::Result;
use chrono::Utc;
use dex_client::{BitqueryClient, DailyTradePages};
use harvest_core::{collect_pages, CancellationToken, PaginationSpec};
use persistence_layer::write_rows_atomic;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug)]
pub struct BitquerySnapshot {
    pub path: PathBuf,
    pub rows: usize,
    pub status: String,
    pub partial: bool,
}

impl BitquerySnapshot {
    pub fn describe(&self) -> String {
        format!(
            "Daily token prices: {} rows ({}{}) -> {}",
            self.rows,
            self.status,
            if self.partial { ", partial" } else { "" },
            self.path.display()
        )
    }
}

pub fn daily_prices_path(data_dir: &Path, date: &str) -> PathBuf {
    data_dir.join(format!("token_prices_{}.csv", date))
}

/// Daily per-token aggregates, ranked by volume, capped at `max_records`
pub async fn fetch_daily_prices(
    client: &BitqueryClient,
    data_dir: &Path,
    cancel: &CancellationToken,
) -> Result<BitquerySnapshot> {
    let config = client.config();
    let spec = PaginationSpec::offset(config.page_size)
        .with_max_records(Some(config.max_records))
        .with_page_delay(Duration::from_millis(config.page_delay_ms));

    let collected = collect_pages(&DailyTradePages { client }, &spec, cancel).await?;
    let path = daily_prices_path(data_dir, &utc_date(Utc::now().timestamp()));
    write_rows_atomic(&path, &collected.records)?;

    Ok(BitquerySnapshot {
        path,
        rows: collected.records.len(),
        status: collected.status(),
        partial: collected.is_partial(),
    })
}
