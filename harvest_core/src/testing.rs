//! In-memory doubles for the network and error-log seams.

use crate::http::{ApiRequest, ErrorSink, HttpTransport, RawResponse, TransportError};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;

type Handler = Box<dyn Fn(&ApiRequest) -> Result<RawResponse, TransportError> + Send + Sync>;

/// Replays scripted responses in order, or answers through a routing closure,
/// and records every request it sees.
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Result<RawResponse, TransportError>>>,
    handler: Option<Handler>,
    requests: Mutex<Vec<ApiRequest>>,
}

impl ScriptedTransport {
    pub fn new(responses: Vec<Result<RawResponse, TransportError>>) -> Self {
        Self {
            script: Mutex::new(responses.into()),
            handler: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn with_handler<F>(handler: F) -> Self
    where
        F: Fn(&ApiRequest) -> Result<RawResponse, TransportError> + Send + Sync + 'static,
    {
        Self {
            script: Mutex::new(VecDeque::new()),
            handler: Some(Box::new(handler)),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<ApiRequest> {
        self.requests
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or_default()
    }
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    async fn send(&self, request: &ApiRequest) -> Result<RawResponse, TransportError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }
        if let Some(handler) = &self.handler {
            return handler(request);
        }
        self.script
            .lock()
            .ok()
            .and_then(|mut script| script.pop_front())
            .unwrap_or_else(|| Err(TransportError("script exhausted".to_string())))
    }
}

/// Collects `(entity, error, url)` triples
#[derive(Default)]
pub struct RecordingSink {
    entries: Mutex<Vec<(String, String, String)>>,
}

impl RecordingSink {
    pub fn entries(&self) -> Vec<(String, String, String)> {
        self.entries
            .lock()
            .map(|e| e.clone())
            .unwrap_or_default()
    }
}

impl ErrorSink for RecordingSink {
    fn record(&self, entity: &str, error: &str, url: &str) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.push((entity.to_string(), error.to_string(), url.to_string()));
        }
    }
}
