pub mod bitquery;
pub mod moralis;
pub mod ohlcv;
pub mod prices;
pub mod program_txs;
pub mod token_info;
pub mod trades;
pub mod trending;

pub use bitquery::BitquerySnapshot;
pub use moralis::MoralisPriceJob;
pub use ohlcv::OhlcvJob;
pub use prices::PriceHistoryJob;
pub use program_txs::ProgramTxsJob;
pub use token_info::{MetadataJob, PumpMetadataJob, SecurityJob};
pub use trades::TradesJob;
pub use trending::TrendingSnapshot;

use crate::{OrchestratorError, Result};
use chrono::{DateTime, Utc};
use config_manager::FetchOptions;
pub(crate) use dex_client::utc_date;
use dex_client::TokenMetadataService;
use harvest_core::EntityKey;
use tracing::{debug, warn};

/// Where a token's history starts, shared by the BirdEye series jobs
pub(crate) struct StartResolver {
    /// `None` when tokens without a creation time are skipped
    default_start: Option<i64>,
    fetch_security: bool,
}

impl StartResolver {
    pub(crate) fn new(options: &FetchOptions) -> Result<Self> {
        let default_start = if options.skip_missing {
            None
        } else {
            Some(options.default_start_ts()?)
        };
        Ok(Self {
            default_start,
            fetch_security: options.fetch_security,
        })
    }

    /// Resolve only to a real creation time; the default start is never used
    pub(crate) fn creation_required(mut self) -> Self {
        self.default_start = None;
        self
    }

    /// Creation time of `key`, else the default start, else `None` (skip).
    ///
    /// Security details are fetched first when requested, since they are the
    /// preferred source of the creation time. Lookup failures fall back to
    /// the default start; only cancellation propagates.
    pub(crate) async fn resolve(&self, tokens: &TokenMetadataService, key: &EntityKey) -> Result<Option<i64>> {
        if self.fetch_security {
            if let Err(e) = tokens.security(key).await {
                let e = OrchestratorError::from(e);
                if e.is_cancelled() {
                    return Err(e);
                }
                warn!("⚠️ Security details for {} unavailable: {}", key.short(), e);
            }
        }

        match tokens.creation_time(key).await {
            Ok(Some(ts)) => Ok(Some(ts)),
            Ok(None) => Ok(self.default_start),
            Err(e) => {
                let e = OrchestratorError::from(e);
                if e.is_cancelled() {
                    return Err(e);
                }
                debug!("Creation time lookup for {} failed: {}", key.short(), e);
                Ok(self.default_start)
            }
        }
    }
}

pub(crate) fn utc_datetime(ts: i64) -> String {
    DateTime::<Utc>::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_date_helpers_agree() {
        assert_eq!(utc_date(1_704_067_200), "2024-01-01");
        assert_eq!(utc_datetime(1_704_153_599), "2024-01-01 23:59:59");
        assert!(utc_datetime(1_704_110_400).starts_with(&utc_date(1_704_110_400)));
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use config_manager::SystemConfig;
    use dex_client::{BirdEyeClient, TokenMetadataService};
    use harvest_core::testing::ScriptedTransport;
    use harvest_core::Invoker;
    use retry_utils::RetryConfig;
    use std::path::Path;
    use std::sync::Arc;
    use std::time::Duration;

    pub fn invoker(transport: Arc<ScriptedTransport>) -> Invoker {
        Invoker::new(transport, RetryConfig::new(1, Duration::from_millis(1), 3))
    }

    pub fn birdeye(transport: Arc<ScriptedTransport>) -> BirdEyeClient {
        let mut config = SystemConfig::default().birdeye;
        config.api_base_url = "https://birdeye.test".to_string();
        config.api_key = "k".to_string();
        BirdEyeClient::new(config, invoker(transport))
    }

    pub fn token_service(transport: Arc<ScriptedTransport>, dir: &Path) -> TokenMetadataService {
        TokenMetadataService::new(birdeye(transport), dir, false)
    }

    /// Unix seconds of a query parameter of a recorded request
    pub fn query_ts(request: &harvest_core::ApiRequest, key: &str) -> i64 {
        request
            .query_value(key)
            .and_then(|v| v.parse().ok())
            .unwrap_or_default()
    }
}
