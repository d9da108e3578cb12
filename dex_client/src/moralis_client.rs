use async_trait::async_trait;
use chrono::{DateTime, Utc};
use config_manager::MoralisConfig;
use harvest_core::{ApiRequest, InvokeError, Invoker, Page, PageCursor, PageSource};
use serde::{Deserialize, Serialize};

/// Cursor envelope shared by the Moralis Solana gateway list endpoints
#[derive(Debug, Clone, Deserialize)]
struct PairsResponse {
    #[serde(default)]
    pairs: Vec<RawPair>,
    cursor: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct OhlcvResponse {
    #[serde(default)]
    result: Vec<PairCandle>,
    cursor: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPair {
    exchange_address: Option<String>,
    exchange_name: Option<String>,
    pair_address: String,
    pair_label: Option<String>,
    usd_price: Option<f64>,
    volume24hr_usd: Option<f64>,
    liquidity_usd: Option<f64>,
    base_token: Option<String>,
    quote_token: Option<String>,
    inactive_pair: Option<bool>,
    #[serde(default)]
    pair: Vec<RawPairToken>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPairToken {
    token_address: Option<String>,
    token_symbol: Option<String>,
}

/// Flat row of `pairs_<token>.csv`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub exchange_address: Option<String>,
    pub exchange_name: Option<String>,
    pub pair_address: String,
    pub pair_label: Option<String>,
    pub usd_price: Option<f64>,
    pub volume24hr_usd: Option<f64>,
    pub liquidity_usd: Option<f64>,
    pub base_token: Option<String>,
    pub quote_token: Option<String>,
    pub inactive_pair: Option<bool>,
    pub token0_address: Option<String>,
    pub token0_symbol: Option<String>,
    pub token1_address: Option<String>,
    pub token1_symbol: Option<String>,
}

impl From<RawPair> for TokenPair {
    fn from(raw: RawPair) -> Self {
        let token = |i: usize| raw.pair.get(i).cloned();
        let (t0, t1) = (token(0), token(1));
        Self {
            exchange_address: raw.exchange_address,
            exchange_name: raw.exchange_name,
            pair_address: raw.pair_address,
            pair_label: raw.pair_label,
            usd_price: raw.usd_price,
            volume24hr_usd: raw.volume24hr_usd,
            liquidity_usd: raw.liquidity_usd,
            base_token: raw.base_token,
            quote_token: raw.quote_token,
            inactive_pair: raw.inactive_pair,
            token0_address: t0.as_ref().and_then(|t| t.token_address.clone()),
            token0_symbol: t0.and_then(|t| t.token_symbol),
            token1_address: t1.as_ref().and_then(|t| t.token_address.clone()),
            token1_symbol: t1.and_then(|t| t.token_symbol),
        }
    }
}

/// One OHLCV bucket of a pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairCandle {
    pub timestamp: String,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    #[serde(default)]
    pub volume: f64,
    #[serde(default)]
    pub trades: Option<u64>,
}

/// Query for one pair's price history
#[derive(Debug, Clone)]
pub struct PairHistoryQuery {
    pub pair_address: String,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub timeframe: String,
    pub currency: String,
}

fn iso(ts: &DateTime<Utc>) -> String {
    ts.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

#[derive(Clone)]
pub struct MoralisClient {
    config: MoralisConfig,
    invoker: Invoker,
}

impl MoralisClient {
    pub fn new(config: MoralisConfig, invoker: Invoker) -> Self {
        Self { config, invoker }
    }

    pub fn config(&self) -> &MoralisConfig {
        &self.config
    }

    fn request(&self, path: &str) -> ApiRequest {
        ApiRequest::get(format!("{}{}", self.config.api_base_url, path))
            .header("Accept", "application/json")
            .header("X-API-Key", &self.config.api_key)
    }

    /// One page of pairs trading `token`
    pub async fn pairs_page(&self, token: &str, cursor: &PageCursor) -> Result<Page<TokenPair>, InvokeError> {
        let mut request = self
            .request(&format!("/token/mainnet/{}/pairs", token))
            .query("limit", cursor.limit());
        if let Some(token) = cursor.token() {
            request = request.query("cursor", token);
        }

        let response: PairsResponse = self.invoker.fetch_json(token, &request).await?;
        Ok(Page::with_cursor(
            response.pairs.into_iter().map(TokenPair::from).collect(),
            response.cursor,
        ))
    }

    /// One page of OHLCV buckets for a pair
    pub async fn pair_ohlcv_page(
        &self,
        query: &PairHistoryQuery,
        cursor: &PageCursor,
    ) -> Result<Page<PairCandle>, InvokeError> {
        let mut request = self
            .request(&format!("/token/mainnet/pairs/{}/ohlcv", query.pair_address))
            .query("fromDate", iso(&query.from))
            .query("toDate", iso(&query.to))
            .query("timeframe", &query.timeframe)
            .query("currency", &query.currency)
            .query("limit", cursor.limit());
        if let Some(token) = cursor.token() {
            request = request.query("cursor", token);
        }

        let response: OhlcvResponse = self
            .invoker
            .fetch_json(&query.pair_address, &request)
            .await?;
        Ok(Page::with_cursor(response.result, response.cursor))
    }
}

/// Cursor-paginated pairs of one token
pub struct PairPages<'a> {
    pub client: &'a MoralisClient,
    pub token: String,
}

#[async_trait]
impl PageSource for PairPages<'_> {
    type Record = TokenPair;

    async fn fetch_page(&self, cursor: &PageCursor) -> Result<Page<TokenPair>, InvokeError> {
        self.client.pairs_page(&self.token, cursor).await
    }
}

/// Cursor-paginated OHLCV history of one pair
pub struct PairOhlcvPages<'a> {
    pub client: &'a MoralisClient,
    pub query: PairHistoryQuery,
}

#[async_trait]
impl PageSource for PairOhlcvPages<'_> {
    type Record = PairCandle;

    async fn fetch_page(&self, cursor: &PageCursor) -> Result<Page<PairCandle>, InvokeError> {
        self.client.pair_ohlcv_page(&self.query, cursor).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config_manager::SystemConfig;
    use harvest_core::testing::ScriptedTransport;
    use harvest_core::{collect_pages, CancellationToken, PaginationSpec, RawResponse};
    use retry_utils::RetryConfig;
    use std::sync::Arc;
    use std::time::Duration;

    fn client(transport: Arc<ScriptedTransport>) -> MoralisClient {
        let mut config = SystemConfig::default().moralis;
        config.api_base_url = "https://moralis.test".to_string();
        config.api_key = "k".to_string();
        MoralisClient::new(
            config,
            Invoker::new(transport, RetryConfig::new(2, Duration::from_millis(1), 3)),
        )
    }

    fn pair(address: &str) -> String {
        format!(
            r#"{{"pairAddress":"{}","baseToken":"TOKEN1","quoteToken":"SOL",
                "pair":[{{"tokenAddress":"TOKEN1","tokenSymbol":"TST"}},{{"tokenAddress":"SOL","tokenSymbol":"SOL"}}]}}"#,
            address
        )
    }

    #[tokio::test]
    async fn test_pairs_follow_cursor_until_absent() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            Ok(RawResponse::ok(format!(
                r#"{{"pairs":[{},{}],"cursor":"next-1"}}"#,
                pair("P1"),
                pair("P2")
            ))),
            Ok(RawResponse::ok(format!(r#"{{"pairs":[{},{}],"cursor":null}}"#, pair("P3"), pair("P4")))),
        ]));
        let client = client(transport.clone());

        let collected = collect_pages(
            &PairPages {
                client: &client,
                token: "TOKEN1".to_string(),
            },
            &PaginationSpec::cursor(2),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(collected.records.len(), 4);
        assert_eq!(collected.records[0].token1_symbol.as_deref(), Some("SOL"));
        let requests = transport.requests();
        assert_eq!(requests[0].query_value("cursor"), None);
        assert_eq!(requests[1].query_value("cursor"), Some("next-1"));
    }

    #[tokio::test]
    async fn test_quota_block_is_unauthorized() {
        let transport = Arc::new(ScriptedTransport::new(vec![Ok(RawResponse::new(
            401,
            r#"{"message":"Validation service blocked: quota exceeded"}"#,
        ))]));
        let client = client(transport.clone());

        let result = client
            .pairs_page("TOKEN1", &PageCursor::Token { token: None, limit: 25 })
            .await;

        assert_eq!(result.unwrap_err(), InvokeError::Unauthorized);
        assert_eq!(transport.request_count(), 1);
    }

    #[tokio::test]
    async fn test_ohlcv_query_parameters() {
        let transport = Arc::new(ScriptedTransport::new(vec![Ok(RawResponse::ok(
            r#"{"result":[{"timestamp":"2024-01-01T00:00:00.000Z","open":1,"high":2,"low":0.5,"close":1.5,"volume":10,"trades":3}]}"#,
        ))]));
        let client = client(transport.clone());
        let query = PairHistoryQuery {
            pair_address: "P1".to_string(),
            from: DateTime::from_timestamp(1_704_067_200, 0).unwrap(),
            to: DateTime::from_timestamp(1_704_153_600, 0).unwrap(),
            timeframe: "1h".to_string(),
            currency: "usd".to_string(),
        };

        let page = client
            .pair_ohlcv_page(&query, &PageCursor::Token { token: None, limit: 100 })
            .await
            .unwrap();

        assert_eq!(page.records[0].trades, Some(3));
        assert!(page.next_cursor.is_none());
        let request = &transport.requests()[0];
        assert_eq!(request.url, "https://moralis.test/token/mainnet/pairs/P1/ohlcv");
        assert_eq!(request.query_value("fromDate"), Some("2024-01-01T00:00:00Z"));
        assert_eq!(request.query_value("limit"), Some("100"));
    }
}
