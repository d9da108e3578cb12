use crate::{EntityJob, EntityOutcome, OrchestratorError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use config_manager::FetchOptions;
use dex_client::{MoralisClient, PairCandle, PairHistoryQuery, PairOhlcvPages, PairPages, TokenPair};
use harvest_core::{collect_pages, CancellationToken, EntityKey, HarvestError, InvokeError, PaginationSpec};
use persistence_layer::{read_rows, write_rows_atomic};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

const DEFAULT_TIMEFRAME: &str = "1h";
const CURRENCY: &str = "usd";
/// Moralis artifacts share names with the BirdEye ones, so they live apart
const MORALIS_DIR: &str = "moralis";

/// One candle of one pair in the consolidated per-token history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairPriceRow {
    pub timestamp: String,
    pub pair_address: String,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub trades: Option<u64>,
}

impl PairPriceRow {
    fn new(pair_address: &str, candle: PairCandle) -> Self {
        Self {
            timestamp: candle.timestamp,
            pair_address: pair_address.to_string(),
            open: candle.open,
            high: candle.high,
            low: candle.low,
            close: candle.close,
            volume: candle.volume,
            trades: candle.trades,
        }
    }
}

/// Merge `incoming` into `existing`: one row per (timestamp, pair), earlier rows win, sorted
fn merge_rows(existing: Vec<PairPriceRow>, incoming: Vec<PairPriceRow>) -> Vec<PairPriceRow> {
    let mut rows = existing;
    rows.extend(incoming);
    // Stable sort keeps file order among equal keys, so dedup keeps the older row
    rows.sort_by(|a, b| {
        (a.timestamp.as_str(), a.pair_address.as_str()).cmp(&(b.timestamp.as_str(), b.pair_address.as_str()))
    });
    rows.dedup_by(|b, a| a.timestamp == b.timestamp && a.pair_address == b.pair_address);
    rows
}

/// A 401 from Moralis means the plan's quota is gone; nothing later can succeed
fn halt_on_quota(e: HarvestError) -> OrchestratorError {
    match e {
        HarvestError::Invoke(InvokeError::Unauthorized) => {
            OrchestratorError::Halted("Moralis rejected the API key (quota exhausted?)".to_string())
        }
        other => other.into(),
    }
}

/// Price history for every pair where the token is the base token
pub struct MoralisPriceJob {
    client: MoralisClient,
    dir: PathBuf,
    from: DateTime<Utc>,
    timeframe: String,
    force_refresh: bool,
}

impl MoralisPriceJob {
    pub fn new(client: MoralisClient, data_dir: &Path, options: FetchOptions) -> Result<Self> {
        let from = DateTime::from_timestamp(options.default_start_ts()?, 0).unwrap_or_default();
        Ok(Self {
            client,
            dir: data_dir.join(MORALIS_DIR),
            from,
            timeframe: options
                .single_interval
                .unwrap_or_else(|| DEFAULT_TIMEFRAME.to_string()),
            force_refresh: options.force_refresh,
        })
    }

    pub fn pairs_path(&self, token: &EntityKey) -> PathBuf {
        self.dir.join(format!("pairs_{}.csv", token))
    }

    pub fn pair_history_path(&self, pair: &str) -> PathBuf {
        self.dir.join(format!("pair_history_{}.csv", pair))
    }

    pub fn price_history_path(&self, token: &EntityKey) -> PathBuf {
        self.dir.join(format!("price_history_{}.csv", token))
    }

    /// Fetch one pair's candles. A complete history is saved to `pair_history_<pair>.csv`
    /// and reused by later runs; a partial one is merged but fetched again next time.
    /// `None` when the pair failed without stopping the batch.
    async fn pair_history(&self, pair: &TokenPair, cancel: &CancellationToken) -> Result<Option<Vec<PairCandle>>> {
        let source = PairOhlcvPages {
            client: &self.client,
            query: PairHistoryQuery {
                pair_address: pair.pair_address.clone(),
                from: self.from,
                to: Utc::now(),
                timeframe: self.timeframe.clone(),
                currency: CURRENCY.to_string(),
            },
        };
        let spec = PaginationSpec::cursor(self.client.config().ohlcv_page_size);
        let collected = match collect_pages(&source, &spec, cancel).await {
            Ok(collected) => collected,
            Err(e) => match halt_on_quota(e) {
                e @ OrchestratorError::Halted(_) => return Err(e),
                e if e.is_cancelled() => return Err(e),
                e => {
                    warn!("⚠️ Pair {} history failed: {}", pair.pair_address, e);
                    return Ok(None);
                }
            },
        };
        if !collected.is_partial() {
            write_rows_atomic(&self.pair_history_path(&pair.pair_address), &collected.records)?;
        }
        Ok(Some(collected.records))
    }

    /// Pairs from `pairs_<token>.csv`, fetched and saved when absent
    async fn pairs(&self, token: &EntityKey, cancel: &CancellationToken) -> Result<Vec<TokenPair>> {
        let path = self.pairs_path(token);
        if !self.force_refresh && path.exists() {
            debug!("📂 Using cached pairs for {}", token.short());
            return Ok(read_rows(&path)?);
        }

        let source = PairPages {
            client: &self.client,
            token: token.to_string(),
        };
        let spec = PaginationSpec::cursor(self.client.config().pairs_page_size);
        let collected = collect_pages(&source, &spec, cancel).await.map_err(halt_on_quota)?;
        write_rows_atomic(&path, &collected.records)?;
        info!("🔗 {} pairs for {} ({})", collected.records.len(), token.short(), collected.status());
        Ok(collected.records)
    }
}

#[async_trait]
impl EntityJob for MoralisPriceJob {
    fn name(&self) -> &'static str {
        "moralis_prices"
    }

    async fn process(&self, key: &EntityKey, cancel: &CancellationToken) -> Result<EntityOutcome> {
        let pairs = match self.pairs(key, cancel).await {
            Ok(pairs) => pairs,
            Err(e) if e.is_cancelled() || matches!(e, OrchestratorError::Halted(_)) => return Err(e),
            Err(e) => return Ok(EntityOutcome::Failed(format!("pairs: {}", e))),
        };
        let pair_delay = Duration::from_millis(self.client.config().pair_delay_ms);
        let base_pairs: Vec<TokenPair> = pairs
            .into_iter()
            .filter(|p| p.base_token.as_deref() == Some(key.as_str()))
            .collect();
        if base_pairs.is_empty() {
            return Ok(EntityOutcome::Skipped("no pairs with the token as base".to_string()));
        }

        let consolidated = self.price_history_path(key);
        let mut pairs_saved = 0usize;
        let mut fetched = 0usize;

        for pair in &base_pairs {
            if cancel.is_cancelled() {
                return Err(HarvestError::Cancelled.into());
            }
            let history_path = self.pair_history_path(&pair.pair_address);
            let candles: Vec<PairCandle> = if !self.force_refresh && history_path.exists() {
                debug!("📂 Reusing saved history of pair {}", pair.pair_address);
                read_rows(&history_path)?
            } else {
                if fetched > 0 && !pair_delay.is_zero() {
                    tokio::time::sleep(pair_delay).await;
                }
                fetched += 1;
                match self.pair_history(pair, cancel).await? {
                    Some(candles) => candles,
                    None => continue,
                }
            };
            if candles.is_empty() {
                debug!("📭 Pair {} has no history", pair.pair_address);
                continue;
            }

            let incoming: Vec<PairPriceRow> = candles
                .into_iter()
                .map(|c| PairPriceRow::new(&pair.pair_address, c))
                .collect();
            let merged = merge_rows(read_rows(&consolidated)?, incoming);
            write_rows_atomic(&consolidated, &merged)?;
            pairs_saved += 1;
        }

        if pairs_saved == 0 {
            return Ok(EntityOutcome::Failed(format!(
                "no price history for {} pairs",
                base_pairs.len()
            )));
        }
        Ok(EntityOutcome::Completed(format!(
            "{}/{} pairs with history",
            pairs_saved,
            base_pairs.len()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::test_support::invoker;
    use config_manager::SystemConfig;
    use harvest_core::testing::ScriptedTransport;
    use crate::{BatchRunner, RunOptions};
    use harvest_core::RawResponse;
    use persistence_layer::{Outcome, ProgressLedger};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    fn row(ts: &str, pair: &str, close: f64) -> PairPriceRow {
        PairPriceRow {
            timestamp: ts.to_string(),
            pair_address: pair.to_string(),
            open: 1.0,
            high: 1.0,
            low: 1.0,
            close,
            volume: 0.0,
            trades: None,
        }
    }

    #[test]
    fn test_merge_keeps_existing_rows_and_sorts() {
        let existing = vec![row("2024-01-02", "P1", 1.0), row("2024-01-01", "P1", 2.0)];
        let incoming = vec![row("2024-01-02", "P1", 9.0), row("2024-01-02", "P2", 3.0)];

        let merged = merge_rows(existing, incoming);

        let keys: Vec<(&str, &str, f64)> = merged
            .iter()
            .map(|r| (r.timestamp.as_str(), r.pair_address.as_str(), r.close))
            .collect();
        assert_eq!(
            keys,
            vec![("2024-01-01", "P1", 2.0), ("2024-01-02", "P1", 1.0), ("2024-01-02", "P2", 3.0)]
        );
    }

    fn job(transport: Arc<ScriptedTransport>, dir: &Path) -> MoralisPriceJob {
        let mut config = SystemConfig::default().moralis;
        config.api_base_url = "https://moralis.test".to_string();
        config.api_key = "k".to_string();
        config.pair_delay_ms = 0;
        MoralisPriceJob::new(MoralisClient::new(config, invoker(transport)), dir, FetchOptions::default()).unwrap()
    }

    #[tokio::test]
    async fn test_only_base_pairs_are_fetched() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(ScriptedTransport::with_handler(|request| {
            if request.url.ends_with("/pairs") {
                return Ok(RawResponse::ok(
                    r#"{"pairs":[{"pairAddress":"P1","baseToken":"TOKEN1"},{"pairAddress":"P2","baseToken":"SOL"}]}"#,
                ));
            }
            Ok(RawResponse::ok(
                r#"{"result":[{"timestamp":"2024-01-01T01:00:00.000Z","open":1,"high":1,"low":1,"close":1},
                              {"timestamp":"2024-01-01T00:00:00.000Z","open":2,"high":2,"low":2,"close":2}]}"#,
            ))
        }));
        let job = job(transport.clone(), dir.path());
        let key = EntityKey::from("TOKEN1");

        let outcome = job.process(&key, &CancellationToken::new()).await.unwrap();

        assert_eq!(outcome, EntityOutcome::Completed("1/1 pairs with history".to_string()));
        let urls: Vec<String> = transport.requests().iter().map(|r| r.url.clone()).collect();
        assert_eq!(
            urls,
            vec![
                "https://moralis.test/token/mainnet/TOKEN1/pairs".to_string(),
                "https://moralis.test/token/mainnet/pairs/P1/ohlcv".to_string(),
            ]
        );
        let rows: Vec<PairPriceRow> = read_rows(&job.price_history_path(&key)).unwrap();
        assert_eq!(rows[0].timestamp, "2024-01-01T00:00:00.000Z");
        assert!(job.pairs_path(&key).exists());
        assert!(job.pair_history_path("P1").exists());
    }

    #[tokio::test]
    async fn test_retry_after_quota_halt_fetches_remaining_pairs() {
        let dir = tempfile::tempdir().unwrap();
        let quota_gone = Arc::new(AtomicBool::new(true));
        let blocked = quota_gone.clone();
        let transport = Arc::new(ScriptedTransport::with_handler(move |request| {
            if request.url.ends_with("/pairs") {
                return Ok(RawResponse::ok(
                    r#"{"pairs":[{"pairAddress":"P1","baseToken":"TOKEN1"},{"pairAddress":"P2","baseToken":"TOKEN1"}]}"#,
                ));
            }
            if request.url.contains("/P2/") && blocked.load(Ordering::SeqCst) {
                return Ok(RawResponse::new(401, r#"{"message":"Validation service blocked"}"#));
            }
            Ok(RawResponse::ok(
                r#"{"result":[{"timestamp":"2024-01-01T00:00:00.000Z","open":1,"high":1,"low":1,"close":1}]}"#,
            ))
        }));
        let job = job(transport.clone(), dir.path());
        let key = EntityKey::from("TOKEN1");
        let ledger_path = dir.path().join("moralis_prices_progress.json");
        let keys = vec![key.clone()];

        let first = BatchRunner::new(
            ProgressLedger::load(&ledger_path, 10),
            RunOptions::default(),
            CancellationToken::new(),
        )
        .run(&job, &keys)
        .await
        .unwrap();
        assert!(first.halted.is_some());
        assert_eq!(first.failed, 1);
        assert!(job.price_history_path(&key).exists());
        assert!(!job.pair_history_path("P2").exists());
        let requests_after_halt = transport.request_count();

        quota_gone.store(false, Ordering::SeqCst);
        let options = RunOptions {
            retry_failed: true,
            ..RunOptions::default()
        };
        let mut runner = BatchRunner::new(
            ProgressLedger::load(&ledger_path, 10),
            options,
            CancellationToken::new(),
        );
        let second = runner.run(&job, &keys).await.unwrap();

        assert_eq!(second.completed, 1);
        assert_eq!(second.already_processed, 0);
        assert_eq!(runner.ledger().status(&key), Some(Outcome::Completed));
        // Pairs and P1 come from disk; only P2 goes to the network
        let retried: Vec<String> = transport.requests()[requests_after_halt..]
            .iter()
            .map(|r| r.url.clone())
            .collect();
        assert_eq!(retried, vec!["https://moralis.test/token/mainnet/pairs/P2/ohlcv".to_string()]);
        assert!(job.pair_history_path("P2").exists());
        let rows: Vec<PairPriceRow> = read_rows(&job.price_history_path(&key)).unwrap();
        let pairs: Vec<&str> = rows.iter().map(|r| r.pair_address.as_str()).collect();
        assert_eq!(pairs, vec!["P1", "P2"]);
    }

    #[tokio::test]
    async fn test_quota_rejection_halts_the_batch() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(ScriptedTransport::new(vec![Ok(RawResponse::new(
            401,
            r#"{"message":"Validation service blocked"}"#,
        ))]));
        let job = job(transport.clone(), dir.path());

        let result = job.process(&EntityKey::from("TOKEN1"), &CancellationToken::new()).await;

        assert!(matches!(result, Err(OrchestratorError::Halted(_))));
        assert_eq!(transport.request_count(), 1);
    }

    #[tokio::test]
    async fn test_cached_pairs_skip_the_listing() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(ScriptedTransport::new(vec![]));
        let job = job(transport.clone(), dir.path());
        let key = EntityKey::from("TOKEN1");
        let other = TokenPair {
            exchange_address: None,
            exchange_name: None,
            pair_address: "P9".to_string(),
            pair_label: None,
            usd_price: None,
            volume24hr_usd: None,
            liquidity_usd: None,
            base_token: Some("SOL".to_string()),
            quote_token: Some("TOKEN1".to_string()),
            inactive_pair: None,
            token0_address: None,
            token0_symbol: None,
            token1_address: None,
            token1_symbol: None,
        };
        write_rows_atomic(&job.pairs_path(&key), &[other]).unwrap();

        let outcome = job.process(&key, &CancellationToken::new()).await.unwrap();

        assert!(matches!(outcome, EntityOutcome::Skipped(_)));
        assert_eq!(transport.request_count(), 0);
    }
}
