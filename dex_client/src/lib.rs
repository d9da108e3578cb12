// DEX data clients - BirdEye, Moralis, Bitquery and pump.fun adapters
// Each adapter builds requests for the shared invoker and converts envelopes into typed records

pub mod birdeye_client;
pub mod bitquery_client;
pub mod moralis_client;
pub mod pump_client;
pub mod token_metadata_service;

// Re-export configs from config_manager
pub use config_manager::{BirdEyeConfig, BitqueryConfig, MoralisConfig, PumpConfig};

pub use birdeye_client::{
    BirdEyeClient, Candle, MemeInfo, PricePoint, SecurityRow, TokenMetadata, TokenSecurity,
    TokenTrade, TradePages, TrendingPages, TrendingToken, utc_date,
};
pub use bitquery_client::{BitqueryClient, DailyTokenStats, DailyTradePages};
pub use moralis_client::{MoralisClient, PairCandle, PairHistoryQuery, PairOhlcvPages, PairPages, TokenPair};
pub use pump_client::{PumpClient, PumpCoin, PumpMetadataRow};
pub use token_metadata_service::TokenMetadataService;

use harvest_core::{HarvestError, InvokeError};
use persistence_layer::PersistenceError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DexClientError {
    #[error("Request error: {0}")]
    Request(#[from] HarvestError),
    #[error("Storage error: {0}")]
    Persistence(#[from] PersistenceError),
}

impl From<InvokeError> for DexClientError {
    fn from(e: InvokeError) -> Self {
        DexClientError::Request(HarvestError::Invoke(e))
    }
}

pub type Result<T> = std::result::Result<T, DexClientError>;
