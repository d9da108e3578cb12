use async_trait::async_trait;
use config_manager::BitqueryConfig;
use harvest_core::{ApiRequest, InvokeError, Invoker, Page, PageCursor, PageSource};
use serde::{Deserialize, Serialize};
use serde_json::json;

/// Daily per-token DEX trade aggregates, ordered by USD volume
const DAILY_TRADES_QUERY: &str = r#"
query DailyTokenTrades($count: Int!, $offset: Int!) {
  Solana {
    DEXTradeByTokens(
      orderBy: {descendingByField: "volume"}
      limit: {count: $count, offset: $offset}
    ) {
      Block {
        datefield: Date(interval: {in: days, count: 1})
      }
      volume: sum(of: Trade_AmountInUSD)
      med: median(of: Trade_AmountInUSD)
      low: quantile(of: Trade_AmountInUSD, level: 0.025)
      high: quantile(of: Trade_AmountInUSD, level: 0.975)
      med_price: median(of: Trade_PriceInUSD)
      low_price: quantile(of: Trade_PriceInUSD, level: 0.025)
      high_price: quantile(of: Trade_PriceInUSD, level: 0.975)
      Trade {
        Currency {
          Symbol
          MintAddress
        }
        Dex {
          ProtocolName
        }
      }
      count
    }
  }
}
"#;

#[derive(Debug, Deserialize)]
struct GraphQlResponse {
    data: Option<SolanaData>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct SolanaData {
    #[serde(rename = "Solana")]
    solana: DexTrades,
}

#[derive(Debug, Deserialize)]
struct DexTrades {
    #[serde(rename = "DEXTradeByTokens", default)]
    rows: Vec<RawTradeRow>,
}

#[derive(Debug, Deserialize)]
struct RawTradeRow {
    #[serde(rename = "Block")]
    block: RawBlock,
    #[serde(rename = "Trade")]
    trade: RawTrade,
    count: Option<NumberLike>,
    volume: Option<NumberLike>,
    med: Option<NumberLike>,
    low: Option<NumberLike>,
    high: Option<NumberLike>,
    med_price: Option<NumberLike>,
    low_price: Option<NumberLike>,
    high_price: Option<NumberLike>,
}

#[derive(Debug, Deserialize)]
struct RawBlock {
    datefield: String,
}

#[derive(Debug, Deserialize)]
struct RawTrade {
    #[serde(rename = "Currency")]
    currency: RawCurrency,
    #[serde(rename = "Dex")]
    dex: RawDex,
}

#[derive(Debug, Deserialize)]
struct RawCurrency {
    #[serde(rename = "Symbol", default)]
    symbol: String,
    #[serde(rename = "MintAddress")]
    mint_address: String,
}

#[derive(Debug, Deserialize)]
struct RawDex {
    #[serde(rename = "ProtocolName", default)]
    protocol_name: String,
}

/// Bitquery returns aggregates as strings or numbers depending on the field
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum NumberLike {
    Number(f64),
    Text(String),
}

impl NumberLike {
    fn value(&self) -> Option<f64> {
        match self {
            NumberLike::Number(n) => Some(*n),
            NumberLike::Text(s) => s.parse().ok(),
        }
    }
}

fn number(value: &Option<NumberLike>) -> Option<f64> {
    value.as_ref().and_then(NumberLike::value)
}

/// Row of `token_prices_<date>.csv`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyTokenStats {
    #[serde(rename = "Date")]
    pub date: String,
    #[serde(rename = "Dex")]
    pub dex: String,
    pub symbol: String,
    #[serde(rename = "TokenAddress")]
    pub token_address: String,
    pub count: Option<u64>,
    pub low_price: Option<f64>,
    pub median_price: Option<f64>,
    pub high_price: Option<f64>,
    pub low: Option<f64>,
    pub median: Option<f64>,
    pub high: Option<f64>,
    pub volume: Option<f64>,
}

impl From<RawTradeRow> for DailyTokenStats {
    fn from(raw: RawTradeRow) -> Self {
        Self {
            count: number(&raw.count).map(|c| c as u64),
            low_price: number(&raw.low_price),
            median_price: number(&raw.med_price),
            high_price: number(&raw.high_price),
            low: number(&raw.low),
            median: number(&raw.med),
            high: number(&raw.high),
            volume: number(&raw.volume),
            date: raw.block.datefield,
            dex: raw.trade.dex.protocol_name,
            symbol: raw.trade.currency.symbol,
            token_address: raw.trade.currency.mint_address,
        }
    }
}

#[derive(Clone)]
pub struct BitqueryClient {
    config: BitqueryConfig,
    invoker: Invoker,
}

impl BitqueryClient {
    pub fn new(config: BitqueryConfig, invoker: Invoker) -> Self {
        Self { config, invoker }
    }

    pub fn config(&self) -> &BitqueryConfig {
        &self.config
    }

    /// One page of the daily aggregate query.
    ///
    /// GraphQL reports failures inside an HTTP 200 body; those are treated as
    /// malformed responses and retried.
    pub async fn daily_trades_page(&self, offset: usize, count: usize) -> Result<Page<DailyTokenStats>, InvokeError> {
        let body = json!({
            "query": DAILY_TRADES_QUERY,
            "variables": { "count": count, "offset": offset },
        });
        let request = ApiRequest::post_json(&self.config.endpoint, body)
            .header("X-API-KEY", &self.config.api_key);

        let response: GraphQlResponse = self
            .invoker
            .fetch_validated("bitquery", &request, |r: &GraphQlResponse| {
                if let Some(error) = r.errors.first() {
                    return Err(format!("GraphQL error: {}", error.message));
                }
                if r.data.is_none() {
                    return Err("GraphQL response without data".to_string());
                }
                Ok(())
            })
            .await?;

        let rows = response
            .data
            .map(|d| d.solana.rows)
            .unwrap_or_default()
            .into_iter()
            .map(DailyTokenStats::from)
            .collect();
        Ok(Page::new(rows))
    }
}

/// Offset-paginated daily aggregates
pub struct DailyTradePages<'a> {
    pub client: &'a BitqueryClient,
}

#[async_trait]
impl PageSource for DailyTradePages<'_> {
    type Record = DailyTokenStats;

    async fn fetch_page(&self, cursor: &PageCursor) -> Result<Page<DailyTokenStats>, InvokeError> {
        self.client
            .daily_trades_page(cursor.offset().unwrap_or(0), cursor.limit())
            .await
    }
}
