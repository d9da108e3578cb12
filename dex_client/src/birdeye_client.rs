use async_trait::async_trait;
use chrono::{DateTime, Utc};
use config_manager::BirdEyeConfig;
use harvest_core::{
    ApiRequest, EntityKey, FetchWindow, InvokeError, Invoker, Page, PageCursor,
    PageSource, QueryFilter, Timestamped, WindowFetcher,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

/// Standard `{ success, data }` envelope returned by every BirdEye endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct BirdEyeResponse<T> {
    #[serde(default)]
    pub success: bool,
    pub data: T,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ItemsData<T> {
    pub items: Vec<T>,
}

/// One point of `/defi/history_price`
#[derive(Debug, Clone, Deserialize)]
struct RawPricePoint {
    #[serde(rename = "unixTime")]
    unix_time: i64,
    value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub ts: i64,
    pub price: f64,
    /// UTC calendar date of `ts`
    pub date: String,
}

impl Timestamped for PricePoint {
    fn timestamp(&self) -> i64 {
        self.ts
    }
}

/// One candle of `/defi/ohlcv`
#[derive(Debug, Clone, Deserialize)]
struct RawCandle {
    #[serde(rename = "unixTime")]
    unix_time: i64,
    o: f64,
    h: f64,
    l: f64,
    c: f64,
    #[serde(default)]
    v: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub ts: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Timestamped for Candle {
    fn timestamp(&self) -> i64 {
        self.ts
    }
}

/// Trending token from `/defi/token_trending`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrendingToken {
    pub address: String,
    #[serde(default)]
    pub symbol: String,
    #[serde(default)]
    pub name: String,
    pub decimals: Option<u8>,
    pub rank: Option<u32>,
    pub price: Option<f64>,
    #[serde(rename = "price24hChangePercent")]
    pub price_change_24h: Option<f64>,
    #[serde(rename = "volume24hUSD")]
    pub volume_24h: Option<f64>,
    #[serde(rename = "volume24hChangePercent")]
    pub volume_change_24h: Option<f64>,
    pub liquidity: Option<f64>,
    pub fdv: Option<f64>,
    pub marketcap: Option<f64>,
    #[serde(rename = "logoURI")]
    pub logo_uri: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct TrendingData {
    tokens: Vec<TrendingToken>,
    #[serde(rename = "updateUnixTime")]
    update_unix_time: Option<i64>,
}

/// A swap from `/defi/v3/token/txs`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenTrade {
    pub tx_hash: String,
    pub block_unix_time: i64,
    #[serde(default)]
    pub block_number: Option<u64>,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub side: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub volume_usd: Option<f64>,
    #[serde(default)]
    pub price: Option<f64>,
}

impl Timestamped for TokenTrade {
    fn timestamp(&self) -> i64 {
        self.block_unix_time
    }
}

/// Meme-token detail document. Known fields are typed; everything else is kept verbatim
/// so the cached document is a faithful copy of what the API returned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenMetadata {
    pub address: Option<String>,
    pub name: Option<String>,
    pub symbol: Option<String>,
    pub meme_info: Option<MemeInfo>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemeInfo {
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub creation_time: Option<i64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TokenMetadata {
    pub fn creation_time(&self) -> Option<i64> {
        self.meme_info.as_ref().and_then(|m| m.creation_time)
    }
}

/// `/defi/token_security` payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenSecurity {
    pub creator_address: Option<String>,
    pub creation_tx: Option<String>,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub creation_time: Option<i64>,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub mint_time: Option<i64>,
    pub owner_address: Option<String>,
    pub top10_holder_percent: Option<f64>,
    pub top10_user_percent: Option<f64>,
    pub freezeable: Option<bool>,
    pub freeze_authority: Option<String>,
    pub mutable_metadata: Option<bool>,
    pub is_token2022: Option<bool>,
    pub non_transferable: Option<bool>,
    pub transfer_fee_enable: Option<bool>,
    pub jup_strict_list: Option<bool>,
}

/// Flat row of `security_details.csv`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityRow {
    pub address: String,
    pub creator_address: Option<String>,
    pub creation_tx: Option<String>,
    pub creation_time: Option<i64>,
    pub mint_time: Option<i64>,
    pub owner_address: Option<String>,
    pub top10_holder_percent: Option<f64>,
    pub top10_user_percent: Option<f64>,
    pub freezeable: Option<bool>,
    pub freeze_authority: Option<String>,
    pub mutable_metadata: Option<bool>,
    pub is_token2022: Option<bool>,
    pub non_transferable: Option<bool>,
    pub transfer_fee_enable: Option<bool>,
    pub jup_strict_list: Option<bool>,
}

impl SecurityRow {
    pub fn from_security(address: &str, security: TokenSecurity) -> Self {
        Self {
            address: address.to_string(),
            creator_address: security.creator_address,
            creation_tx: security.creation_tx,
            creation_time: security.creation_time,
            mint_time: security.mint_time,
            owner_address: security.owner_address,
            top10_holder_percent: security.top10_holder_percent,
            top10_user_percent: security.top10_user_percent,
            freezeable: security.freezeable,
            freeze_authority: security.freeze_authority,
            mutable_metadata: security.mutable_metadata,
            is_token2022: security.is_token2022,
            non_transferable: security.non_transferable,
            transfer_fee_enable: security.transfer_fee_enable,
            jup_strict_list: security.jup_strict_list,
        }
    }
}

/// Accepts integers, numeric strings and null
fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Number(n)) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Some(Value::String(s)) => s.trim().parse::<i64>().ok(),
        _ => None,
    })
}

/// UTC `YYYY-MM-DD` of a Unix timestamp
pub fn utc_date(ts: i64) -> String {
    DateTime::<Utc>::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d").to_string())
        .unwrap_or_default()
}

/// BirdEye API client. Every call goes through the shared retrying invoker.
#[derive(Clone)]
pub struct BirdEyeClient {
    config: BirdEyeConfig,
    invoker: Invoker,
}

impl BirdEyeClient {
    pub fn new(config: BirdEyeConfig, invoker: Invoker) -> Self {
        Self { config, invoker }
    }

    /// Get the BirdEye client configuration
    pub fn config(&self) -> &BirdEyeConfig {
        &self.config
    }

    fn request(&self, path: &str) -> ApiRequest {
        ApiRequest::get(format!("{}{}", self.config.api_base_url, path))
            .header("accept", "application/json")
            .header("x-chain", &self.config.chain)
            .header("X-API-KEY", &self.config.api_key)
    }

    /// Historical prices for `window` at the window's granularity
    pub async fn history_price(&self, key: &EntityKey, window: &FetchWindow) -> Result<Vec<PricePoint>, InvokeError> {
        let request = self
            .request("/defi/history_price")
            .query("address", key)
            .query("address_type", "token")
            .query("type", window.granularity.label())
            .query("time_from", window.start_ts)
            .query("time_to", window.end_ts);

        let response: BirdEyeResponse<ItemsData<RawPricePoint>> =
            self.invoker.fetch_json(key.as_str(), &request).await?;

        Ok(response
            .data
            .items
            .into_iter()
            .map(|p| PricePoint {
                ts: p.unix_time,
                price: p.value,
                date: utc_date(p.unix_time),
            })
            .collect())
    }

    /// OHLCV candles for `window` at the window's granularity
    pub async fn ohlcv(&self, key: &EntityKey, window: &FetchWindow) -> Result<Vec<Candle>, InvokeError> {
        let request = self
            .request("/defi/ohlcv")
            .query("address", key)
            .query("type", window.granularity.label())
            .query("time_from", window.start_ts)
            .query("time_to", window.end_ts);

        let response: BirdEyeResponse<ItemsData<RawCandle>> =
            self.invoker.fetch_json(key.as_str(), &request).await?;

        debug!("🕯️ {} {}: {} candles", key.short(), window, response.data.items.len());
        Ok(response
            .data
            .items
            .into_iter()
            .map(|c| Candle {
                ts: c.unix_time,
                open: c.o,
                high: c.h,
                low: c.l,
                close: c.c,
                volume: c.v,
            })
            .collect())
    }

    /// Meme-token detail; `None` when the API has no data for the token
    pub async fn token_metadata(&self, key: &EntityKey) -> Result<Option<TokenMetadata>, InvokeError> {
        let request = self
            .request("/defi/v3/token/meme/detail/single")
            .query("address", key);

        let response: BirdEyeResponse<Option<TokenMetadata>> =
            self.invoker.fetch_json(key.as_str(), &request).await?;
        Ok(response.data)
    }

    /// Security details; `None` when the API has no data for the token
    pub async fn token_security(&self, key: &EntityKey) -> Result<Option<TokenSecurity>, InvokeError> {
        let request = self.request("/defi/token_security").query("address", key);

        let response: BirdEyeResponse<Option<TokenSecurity>> =
            self.invoker.fetch_json(key.as_str(), &request).await?;
        Ok(response.data)
    }

    /// One page of trending tokens ranked ascending
    pub async fn trending_page(&self, offset: usize, limit: usize) -> Result<Page<TrendingToken>, InvokeError> {
        let request = self
            .request("/defi/token_trending")
            .query("sort_by", "rank")
            .query("sort_type", "asc")
            .query("offset", offset)
            .query("limit", limit);

        let response: BirdEyeResponse<TrendingData> =
            self.invoker.fetch_json("trending", &request).await?;
        debug!(
            "📊 Trending offset {}: {} tokens (updated {:?})",
            offset,
            response.data.tokens.len(),
            response.data.update_unix_time
        );
        Ok(Page::new(response.data.tokens))
    }

    /// One page of swaps for a token, filtered by time or block range
    pub async fn token_trades(
        &self,
        key: &EntityKey,
        filter: &QueryFilter,
        offset: usize,
        limit: usize,
    ) -> Result<Page<TokenTrade>, InvokeError> {
        let request = self
            .request("/defi/v3/token/txs")
            .query("address", key)
            .query("offset", offset)
            .query("limit", limit)
            .query("sort_by", "block_unix_time")
            .query("sort_type", "desc")
            .query("tx_type", "swap")
            .queries(filter.query_pairs());

        let response: BirdEyeResponse<ItemsData<TokenTrade>> =
            self.invoker.fetch_json(key.as_str(), &request).await?;
        Ok(Page::new(response.data.items))
    }
}

#[async_trait]
impl WindowFetcher for BirdEyeClient {
    type Record = Candle;

    async fn fetch_window(&self, key: &EntityKey, window: &FetchWindow) -> harvest_core::Result<Vec<Candle>> {
        Ok(self.ohlcv(key, window).await?)
    }
}

/// Offset-paginated trending listing
pub struct TrendingPages<'a> {
    pub client: &'a BirdEyeClient,
}

#[async_trait]
impl PageSource for TrendingPages<'_> {
    type Record = TrendingToken;

    async fn fetch_page(&self, cursor: &PageCursor) -> Result<Page<TrendingToken>, InvokeError> {
        let offset = cursor.offset().unwrap_or(0);
        self.client.trending_page(offset, cursor.limit()).await
    }
}

/// Offset-paginated swaps for one token under a single filter dimension
pub struct TradePages<'a> {
    pub client: &'a BirdEyeClient,
    pub key: EntityKey,
    pub filter: QueryFilter,
}

#[async_trait]
impl PageSource for TradePages<'_> {
    type Record = TokenTrade;

    async fn fetch_page(&self, cursor: &PageCursor) -> Result<Page<TokenTrade>, InvokeError> {
        let offset = cursor.offset().unwrap_or(0);
        self.client
            .token_trades(&self.key, &self.filter, offset, cursor.limit())
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config_manager::SystemConfig;
    use harvest_core::testing::ScriptedTransport;
    use harvest_core::{collect_pages, CancellationToken, Granularity, PaginationSpec, RawResponse};
    use retry_utils::RetryConfig;
    use std::sync::Arc;
    use std::time::Duration;

    fn client(transport: Arc<ScriptedTransport>) -> BirdEyeClient {
        let mut config = SystemConfig::default().birdeye;
        config.api_key = "test-key".to_string();
        config.api_base_url = "https://birdeye.test".to_string();
        let invoker = Invoker::new(transport, RetryConfig::new(3, Duration::from_millis(10), 3));
        BirdEyeClient::new(config, invoker)
    }

    #[tokio::test]
    async fn test_ohlcv_builds_request_and_parses() {
        let transport = Arc::new(ScriptedTransport::new(vec![Ok(RawResponse::ok(
            r#"{"success":true,"data":{"items":[
                {"o":1.0,"h":2.0,"l":0.5,"c":1.5,"v":100.0,"unixTime":1700000000,"type":"1m"},
                {"o":1.5,"h":1.6,"l":1.4,"c":1.55,"v":10.0,"unixTime":1700000060,"type":"1m"}
            ]}}"#,
        ))]));
        let client = client(transport.clone());
        let window = FetchWindow::new(1_700_000_000, 1_700_043_200, Granularity::new("1m")).unwrap();

        let candles = client.ohlcv(&EntityKey::from("TOKEN1"), &window).await.unwrap();

        assert_eq!(candles.len(), 2);
        assert_eq!(candles[1].close, 1.55);
        let request = &transport.requests()[0];
        assert_eq!(request.url, "https://birdeye.test/defi/ohlcv");
        assert_eq!(request.query_value("type"), Some("1m"));
        assert_eq!(request.query_value("time_to"), Some("1700043200"));
        assert!(request
            .headers
            .iter()
            .any(|(k, v)| k == "X-API-KEY" && v == "test-key"));
        assert!(request.headers.iter().any(|(k, v)| k == "x-chain" && v == "solana"));
    }

    #[tokio::test]
    async fn test_history_price_adds_date() {
        let transport = Arc::new(ScriptedTransport::new(vec![Ok(RawResponse::ok(
            r#"{"success":true,"data":{"items":[{"unixTime":1704067200,"value":0.25}]}}"#,
        ))]));
        let window = FetchWindow::new(1_704_067_200, 1_704_153_600, Granularity::new("1D")).unwrap();

        let points = client(transport)
            .history_price(&EntityKey::from("TOKEN1"), &window)
            .await
            .unwrap();

        assert_eq!(
            points,
            vec![PricePoint {
                ts: 1_704_067_200,
                price: 0.25,
                date: "2024-01-01".to_string()
            }]
        );
    }

    #[tokio::test]
    async fn test_metadata_keeps_unknown_fields_and_reads_creation_time() {
        let transport = Arc::new(ScriptedTransport::new(vec![Ok(RawResponse::ok(
            r#"{"success":true,"data":{"address":"TOKEN1","name":"Test","symbol":"TST",
                "price":0.01,"meme_info":{"source":"pump_dot_fun","creation_time":"1700000000"}}}"#,
        ))]));

        let metadata = client(transport)
            .token_metadata(&EntityKey::from("TOKEN1"))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(metadata.creation_time(), Some(1_700_000_000));
        assert_eq!(metadata.extra.get("price"), Some(&serde_json::json!(0.01)));
        let round_trip = serde_json::to_value(&metadata).unwrap();
        assert_eq!(round_trip["meme_info"]["source"], "pump_dot_fun");
    }

    #[tokio::test]
    async fn test_security_without_data_is_none() {
        let transport = Arc::new(ScriptedTransport::new(vec![Ok(RawResponse::ok(
            r#"{"success":false,"data":null}"#,
        ))]));

        let security = client(transport)
            .token_security(&EntityKey::from("TOKEN1"))
            .await
            .unwrap();
        assert!(security.is_none());
    }

    #[tokio::test]
    async fn test_trending_pages_stop_on_short_page() {
        let transport = Arc::new(ScriptedTransport::with_handler(|request| {
            let offset: usize = request.query_value("offset").unwrap_or("0").parse().unwrap_or(0);
            let count = if offset == 0 { 2 } else { 1 };
            let tokens: Vec<String> = (0..count)
                .map(|i| format!(r#"{{"address":"T{}","symbol":"S","name":"N","rank":{}}}"#, offset + i, offset + i + 1))
                .collect();
            Ok(RawResponse::ok(format!(
                r#"{{"success":true,"data":{{"updateUnixTime":1,"tokens":[{}]}}}}"#,
                tokens.join(",")
            )))
        }));
        let client = client(transport.clone());

        let collected = collect_pages(
            &TrendingPages { client: &client },
            &PaginationSpec::offset(2),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        let addresses: Vec<&str> = collected.records.iter().map(|t| t.address.as_str()).collect();
        assert_eq!(addresses, vec!["T0", "T1", "T2"]);
        assert_eq!(transport.request_count(), 2);
    }

    #[tokio::test]
    async fn test_trades_carry_one_filter_dimension() {
        let transport = Arc::new(ScriptedTransport::new(vec![Ok(RawResponse::ok(
            r#"{"success":true,"data":{"items":[],"has_next":false}}"#,
        ))]));
        let client = client(transport.clone());
        let pages = TradePages {
            client: &client,
            key: EntityKey::from("TOKEN1"),
            filter: QueryFilter::BlockRange {
                after: Some(100),
                before: None,
            },
        };

        let collected = collect_pages(&pages, &PaginationSpec::offset(50), &CancellationToken::new())
            .await
            .unwrap();

        assert!(collected.records.is_empty());
        let request = &transport.requests()[0];
        assert_eq!(request.query_value("after_block_number"), Some("100"));
        assert_eq!(request.query_value("after_time"), None);
    }
}
