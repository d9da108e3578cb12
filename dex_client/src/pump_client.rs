use config_manager::PumpConfig;
use harvest_core::{ApiRequest, EntityKey, InvokeError, Invoker};
use serde::{Deserialize, Serialize};

/// pump.fun coin document (the fields the metadata table keeps)
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PumpCoin {
    pub mint: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub symbol: String,
    pub description: Option<String>,
    pub image_uri: Option<String>,
    pub metadata_uri: Option<String>,
    pub twitter: Option<String>,
    pub telegram: Option<String>,
    pub website: Option<String>,
    pub creator: Option<String>,
    pub created_timestamp: Option<i64>,
    pub raydium_pool: Option<String>,
    pub complete: Option<bool>,
    pub total_supply: Option<f64>,
    pub market_cap: Option<f64>,
    pub usd_market_cap: Option<f64>,
}

/// Row of `pump_metadata.csv`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PumpMetadataRow {
    #[serde(rename = "TokenAddress")]
    pub token_address: String,
    pub name: String,
    pub symbol: String,
    pub description: Option<String>,
    pub image_uri: Option<String>,
    pub metadata_uri: Option<String>,
    pub twitter: Option<String>,
    pub telegram: Option<String>,
    pub website: Option<String>,
    pub creator: Option<String>,
    pub created_timestamp: Option<i64>,
    pub raydium_pool: Option<String>,
    pub complete: Option<bool>,
    pub total_supply: Option<f64>,
    pub market_cap: Option<f64>,
    pub usd_market_cap: Option<f64>,
}

impl From<PumpCoin> for PumpMetadataRow {
    fn from(coin: PumpCoin) -> Self {
        Self {
            token_address: coin.mint,
            name: coin.name,
            symbol: coin.symbol,
            description: coin.description,
            image_uri: coin.image_uri,
            metadata_uri: coin.metadata_uri,
            twitter: coin.twitter,
            telegram: coin.telegram,
            website: coin.website,
            creator: coin.creator,
            created_timestamp: coin.created_timestamp,
            raydium_pool: coin.raydium_pool,
            complete: coin.complete,
            total_supply: coin.total_supply,
            market_cap: coin.market_cap,
            usd_market_cap: coin.usd_market_cap,
        }
    }
}

#[derive(Clone)]
pub struct PumpClient {
    config: PumpConfig,
    invoker: Invoker,
}

impl PumpClient {
    pub fn new(config: PumpConfig, invoker: Invoker) -> Self {
        Self { config, invoker }
    }

    /// Only mints with the pump.fun vanity suffix are served by this API
    pub fn is_pump_token(&self, key: &EntityKey) -> bool {
        key.as_str().ends_with(&self.config.address_suffix)
    }

    pub async fn coin(&self, key: &EntityKey) -> Result<PumpCoin, InvokeError> {
        let request = ApiRequest::get(format!("{}/coins/{}", self.config.api_base_url, key))
            .header("accept", "application/json");
        self.invoker.fetch_json(key.as_str(), &request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config_manager::SystemConfig;
    use harvest_core::testing::ScriptedTransport;
    use harvest_core::RawResponse;
    use retry_utils::RetryConfig;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_coin_to_row() {
        let transport = Arc::new(ScriptedTransport::new(vec![Ok(RawResponse::ok(
            r#"{"mint":"Abcpump","name":"Pumped","symbol":"PMP","creator":"C","created_timestamp":1700000000000,"complete":false,"bonding_curve":"X"}"#,
        ))]));
        let client = PumpClient::new(
            SystemConfig::default().pump,
            Invoker::new(transport.clone(), RetryConfig::new(0, Duration::from_millis(1), 3)),
        );
        let key = EntityKey::from("Abcpump");

        assert!(client.is_pump_token(&key));
        assert!(!client.is_pump_token(&EntityKey::from("So1111")));

        let row = PumpMetadataRow::from(client.coin(&key).await.unwrap());
        assert_eq!(row.token_address, "Abcpump");
        assert_eq!(row.complete, Some(false));
        assert_eq!(
            transport.requests()[0].url,
            "https://frontend-api.pump.fun/coins/Abcpump"
        );
    }
}
