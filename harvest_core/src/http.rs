use crate::error::{HarvestError, InvokeError};
use async_trait::async_trait;
use retry_utils::{retry_with_backoff, RetryConfig, RetryError, RetryableError};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

/// One fully parameterised request
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: HttpMethod,
    pub url: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub body: Option<serde_json::Value>,
}

impl ApiRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Get,
            url: url.into(),
            query: Vec::new(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn post_json(url: impl Into<String>, body: serde_json::Value) -> Self {
        Self {
            method: HttpMethod::Post,
            url: url.into(),
            query: Vec::new(),
            headers: Vec::new(),
            body: Some(body),
        }
    }

    pub fn query(mut self, key: &str, value: impl ToString) -> Self {
        self.query.push((key.to_string(), value.to_string()));
        self
    }

    pub fn queries<I>(mut self, pairs: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        self.query.extend(pairs);
        self
    }

    pub fn header(mut self, key: &str, value: impl ToString) -> Self {
        self.headers.push((key.to_string(), value.to_string()));
        self
    }

    pub fn query_value(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// URL with the query string appended, as written to the error log
    pub fn display_url(&self) -> String {
        if self.query.is_empty() {
            return self.url.clone();
        }
        let query = self
            .query
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&");
        format!("{}?{}", self.url, query)
    }
}

#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub body: String,
}

impl RawResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn ok(body: impl Into<String>) -> Self {
        Self::new(200, body)
    }
}

#[derive(Error, Debug, Clone)]
#[error("{0}")]
pub struct TransportError(pub String);

/// Network seam. Production uses reqwest; tests script responses.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: &ApiRequest) -> Result<RawResponse, TransportError>;
}

/// Append-only diagnostic sink for every non-success attempt
pub trait ErrorSink: Send + Sync {
    fn record(&self, entity: &str, error: &str, url: &str);
}

pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Result<Self, HarvestError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: &ApiRequest) -> Result<RawResponse, TransportError> {
        let mut builder = match request.method {
            HttpMethod::Get => self.client.get(&request.url),
            HttpMethod::Post => self.client.post(&request.url),
        };
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        for (key, value) in &request.headers {
            builder = builder.header(key.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| TransportError(e.to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| TransportError(e.to_string()))?;

        Ok(RawResponse { status, body })
    }
}

/// Why one attempt did not produce a document
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AttemptFailure {
    #[error("{0}")]
    Transport(String),
    #[error("HTTP {0}")]
    Status(u16),
    #[error("{0}")]
    Malformed(String),
}

/// Status codes that are never retried unless configured otherwise
pub const DEFAULT_PERMANENT_STATUSES: [u16; 7] = [400, 401, 403, 404, 405, 410, 422];

/// Issues one logical request, retrying transient failures with doubling backoff.
///
/// Every failed attempt is reported to the error sink before the retry decision.
#[derive(Clone)]
pub struct Invoker {
    transport: Arc<dyn HttpTransport>,
    retry: RetryConfig,
    permanent_statuses: Vec<u16>,
    error_sink: Option<Arc<dyn ErrorSink>>,
    cancel: Option<CancellationToken>,
}

impl Invoker {
    pub fn new(transport: Arc<dyn HttpTransport>, retry: RetryConfig) -> Self {
        Self {
            transport,
            retry,
            permanent_statuses: DEFAULT_PERMANENT_STATUSES.to_vec(),
            error_sink: None,
            cancel: None,
        }
    }

    pub fn with_permanent_statuses(mut self, statuses: Vec<u16>) -> Self {
        self.permanent_statuses = statuses;
        self
    }

    pub fn with_error_sink(mut self, sink: Arc<dyn ErrorSink>) -> Self {
        self.error_sink = Some(sink);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn retry_config(&self) -> &RetryConfig {
        &self.retry
    }

    pub fn classify(&self, failure: &AttemptFailure) -> RetryableError {
        match failure {
            AttemptFailure::Status(401) => RetryableError::Permanent,
            AttemptFailure::Status(429) => RetryableError::RateLimit,
            AttemptFailure::Status(code) if self.permanent_statuses.contains(code) => {
                RetryableError::Permanent
            }
            _ => RetryableError::Transient,
        }
    }

    /// Fetch and decode a JSON document
    pub async fn fetch_json<D>(&self, entity: &str, request: &ApiRequest) -> Result<D, InvokeError>
    where
        D: DeserializeOwned + Send,
    {
        self.fetch_validated(entity, request, |_: &D| Ok(())).await
    }

    /// Fetch and decode a JSON document, treating a failed `validate` as a
    /// malformed (retryable) body. Used for envelopes that report errors with HTTP 200.
    pub async fn fetch_validated<D, V>(
        &self,
        entity: &str,
        request: &ApiRequest,
        validate: V,
    ) -> Result<D, InvokeError>
    where
        D: DeserializeOwned + Send,
        V: Fn(&D) -> Result<(), String> + Send + Sync,
    {
        if self.cancel.as_ref().is_some_and(|t| t.is_cancelled()) {
            return Err(InvokeError::Cancelled);
        }

        let result = retry_with_backoff(
            || self.attempt(entity, request, &validate),
            &self.retry,
            |failure: &AttemptFailure| self.classify(failure),
        )
        .await;

        result.map_err(|e| match e {
            RetryError::Permanent {
                last: AttemptFailure::Status(401),
                ..
            } => InvokeError::Unauthorized,
            RetryError::Permanent {
                last: AttemptFailure::Status(code),
                ..
            } => InvokeError::PermanentStatus(code),
            other => InvokeError::Exhausted {
                attempts: other.attempts(),
                last: other.into_last().to_string(),
            },
        })
    }

    async fn attempt<D, V>(
        &self,
        entity: &str,
        request: &ApiRequest,
        validate: &V,
    ) -> Result<D, AttemptFailure>
    where
        D: DeserializeOwned,
        V: Fn(&D) -> Result<(), String>,
    {
        debug!("🌐 {} {}", entity, request.display_url());

        let outcome = match self.transport.send(request).await {
            Err(e) => Err(AttemptFailure::Transport(e.to_string())),
            Ok(response) if response.status == 200 => {
                match serde_json::from_str::<D>(&response.body) {
                    Ok(document) => validate(&document)
                        .map(|_| document)
                        .map_err(AttemptFailure::Malformed),
                    Err(e) => Err(AttemptFailure::Malformed(format!("JSON decode error: {}", e))),
                }
            }
            Ok(response) => Err(AttemptFailure::Status(response.status)),
        };

        if let Err(failure) = &outcome {
            self.record_failure(entity, failure, request);
        }
        outcome
    }

    fn record_failure(&self, entity: &str, failure: &AttemptFailure, request: &ApiRequest) {
        if let AttemptFailure::Status(401) = failure {
            warn!("🔒 Authorization rejected for {} - check API key", entity);
        }
        if let Some(sink) = &self.error_sink {
            sink.record(entity, &failure.to_string(), &request.display_url());
        }
    }
}
