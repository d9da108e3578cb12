// Solana RPC Client - program signatures and transaction details over JSON-RPC
// Signatures are paged with the `before` cursor; details are fetched through a bounded worker pool

use async_trait::async_trait;
use config_manager::SolanaRpcConfig;
use harvest_core::{run_bounded, ApiRequest, HarvestError, InvokeError, Invoker, Page, PageCursor, PageSource};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum SolanaClientError {
    #[error("RPC request error: {0}")]
    Request(#[from] HarvestError),
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl From<InvokeError> for SolanaClientError {
    fn from(e: InvokeError) -> Self {
        SolanaClientError::Request(HarvestError::Invoke(e))
    }
}

pub type Result<T> = std::result::Result<T, SolanaClientError>;

/// Solana RPC response structures
#[derive(Debug, Deserialize)]
pub struct RpcResponse<T> {
    pub result: Option<T>,
    pub error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

/// Entry of `getSignaturesForAddress`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignatureInfo {
    pub signature: String,
    pub slot: Option<u64>,
    #[serde(rename = "blockTime")]
    pub block_time: Option<i64>,
    pub err: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTransaction {
    slot: u64,
    block_time: Option<i64>,
    meta: Option<RawMeta>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawMeta {
    #[serde(default)]
    fee: u64,
    err: Option<Value>,
    #[serde(default)]
    pre_token_balances: Vec<Value>,
    #[serde(default)]
    post_token_balances: Vec<Value>,
}

/// Row of the program transactions file; `raw` is the compact JSON of the RPC result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionDetail {
    pub signature: String,
    pub slot: u64,
    pub block_time: Option<i64>,
    pub fee: u64,
    pub success: bool,
    pub token_balances_changed: bool,
    pub raw: String,
}

impl TransactionDetail {
    fn from_result(signature: &str, result: Value) -> Result<Self> {
        let raw = result.to_string();
        let parsed: RawTransaction = serde_json::from_value(result)
            .map_err(|e| SolanaClientError::InvalidResponse(format!("{}: {}", signature, e)))?;
        let (fee, success, changed) = match parsed.meta {
            Some(meta) => (
                meta.fee,
                meta.err.is_none(),
                meta.pre_token_balances != meta.post_token_balances,
            ),
            None => (0, true, false),
        };
        Ok(Self {
            signature: signature.to_string(),
            slot: parsed.slot,
            block_time: parsed.block_time,
            fee,
            success,
            token_balances_changed: changed,
            raw,
        })
    }
}

/// Outcome of one fan-out batch
#[derive(Debug, Default)]
pub struct DetailBatch {
    pub details: Vec<TransactionDetail>,
    pub failed: Vec<String>,
}

/// Main Solana RPC Client
#[derive(Clone)]
pub struct SolanaClient {
    config: SolanaRpcConfig,
    invoker: Invoker,
    request_id_counter: Arc<AtomicU64>,
}

impl SolanaClient {
    pub fn new(config: SolanaRpcConfig, invoker: Invoker) -> Self {
        Self {
            config,
            invoker,
            request_id_counter: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn config(&self) -> &SolanaRpcConfig {
        &self.config
    }

    fn next_request_id(&self) -> u64 {
        self.request_id_counter.fetch_add(1, Ordering::SeqCst)
    }

    /// Generic RPC request; an `error` member is retried like a malformed body
    async fn rpc_request<T>(&self, entity: &str, method: &str, params: Value) -> Result<Option<T>>
    where
        T: serde::de::DeserializeOwned + Send,
    {
        let body = json!({
            "jsonrpc": "2.0",
            "id": self.next_request_id(),
            "method": method,
            "params": params
        });
        let request = ApiRequest::post_json(&self.config.rpc_url, body);

        let response: RpcResponse<T> = self
            .invoker
            .fetch_validated(entity, &request, |r: &RpcResponse<T>| match &r.error {
                Some(e) => Err(format!("RPC error {}: {}", e.code, e.message)),
                None => Ok(()),
            })
            .await?;
        Ok(response.result)
    }

    /// One page of signatures for `address`, newest first, strictly before `before`
    pub async fn signatures_page(
        &self,
        address: &str,
        before: Option<&str>,
        limit: usize,
    ) -> Result<Vec<SignatureInfo>> {
        let mut options = serde_json::Map::new();
        options.insert("limit".to_string(), json!(limit));
        if let Some(before) = before {
            options.insert("before".to_string(), json!(before));
        }

        let signatures: Option<Vec<SignatureInfo>> = self
            .rpc_request(address, "getSignaturesForAddress", json!([address, options]))
            .await?;
        Ok(signatures.unwrap_or_default())
    }

    /// Transaction details; `None` when the node no longer has the transaction
    pub async fn transaction(&self, signature: &str) -> Result<Option<TransactionDetail>> {
        let params = json!([
            signature,
            { "encoding": "json", "maxSupportedTransactionVersion": 0 }
        ]);
        let result: Option<Value> = self.rpc_request(signature, "getTransaction", params).await?;
        match result {
            Some(Value::Null) | None => Ok(None),
            Some(value) => TransactionDetail::from_result(signature, value).map(Some),
        }
    }

    /// Fetch details for every signature with at most `max_concurrent_requests` in flight.
    ///
    /// Returns once all lookups finished. Signatures whose lookup failed or
    /// returned nothing are listed in `failed`.
    pub async fn transactions(&self, signatures: Vec<String>) -> Result<DetailBatch> {
        if signatures.is_empty() {
            return Ok(DetailBatch::default());
        }
        let client = self.clone();
        let results = run_bounded(signatures, self.config.max_concurrent_requests, move |signature: String| {
            let client = client.clone();
            async move { client.transaction(&signature).await }
        })
        .await?;

        let mut batch = DetailBatch::default();
        for (signature, result) in results {
            match result {
                Ok(Some(detail)) => batch.details.push(detail),
                Ok(None) => {
                    debug!("No transaction found for {}", signature);
                    batch.failed.push(signature);
                }
                Err(e) => {
                    warn!("Transaction lookup failed for {}: {}", signature, e);
                    batch.failed.push(signature);
                }
            }
        }
        info!(
            "🔎 Fetched {} transactions ({} failed)",
            batch.details.len(),
            batch.failed.len()
        );
        Ok(batch)
    }
}

/// Cursor pagination over a program's signatures: the next cursor is the last signature seen
pub struct SignaturePages<'a> {
    pub client: &'a SolanaClient,
    pub address: String,
    /// Where the first page starts; later pages follow the page cursor
    pub before: Option<String>,
}

#[async_trait]
impl PageSource for SignaturePages<'_> {
    type Record = SignatureInfo;

    async fn fetch_page(&self, cursor: &PageCursor) -> std::result::Result<Page<SignatureInfo>, InvokeError> {
        let signatures = self
            .client
            .signatures_page(
                &self.address,
                cursor.token().or(self.before.as_deref()),
                cursor.limit(),
            )
            .await
            .map_err(|e| match e {
                SolanaClientError::Request(HarvestError::Invoke(invoke)) => invoke,
                SolanaClientError::Request(e) if e.is_cancelled() => InvokeError::Cancelled,
                other => InvokeError::Exhausted {
                    attempts: 1,
                    last: other.to_string(),
                },
            })?;
        let next = signatures.last().map(|s| s.signature.clone());
        Ok(Page::with_cursor(signatures, next))
    }
}
