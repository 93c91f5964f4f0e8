use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, RANGE, USER_AGENT};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use crate::cancel::CancelToken;
use crate::domain::ConversionResponse;
use crate::error::KiraError;

/// Transport to the dataset file service.
pub trait StoreBackend: Send + Sync {
    fn get_file(&self, path: &str) -> Result<Vec<u8>, KiraError>;
    fn get_range(&self, path: &str, start: u64, end: u64) -> Result<Vec<u8>, KiraError>;
    fn submit_conversion(&self, path: &str) -> Result<ConversionResponse, KiraError>;
}

#[derive(Clone)]
pub struct HttpStoreBackend {
    client: Client,
    base_url: String,
    cancel: CancelToken,
}

impl HttpStoreBackend {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, KiraError> {
        let client = Client::builder()
            .default_headers(default_headers()?)
            .timeout(timeout)
            .build()
            .map_err(|err| KiraError::RemoteHttp(err.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            cancel: CancelToken::new(),
        })
    }

    /// Retry back-off wakes up and fails with `Cancelled` once `cancel` fires.
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    fn file_url(&self, path: &str) -> String {
        format!("{}/file/{}", self.base_url, path)
    }

    fn handle_status(
        path: &str,
        response: reqwest::blocking::Response,
    ) -> Result<reqwest::blocking::Response, KiraError> {
        if response.status().is_success() {
            return Ok(response);
        }
        Err(KiraError::RemoteFetch {
            path: path.to_string(),
            status: response.status().as_u16(),
        })
    }

    fn send_with_retries<F>(&self, mut make_req: F) -> Result<reqwest::blocking::Response, KiraError>
    where
        F: FnMut() -> reqwest::blocking::RequestBuilder,
    {
        const MAX_RETRIES: usize = 3;
        const BASE_DELAY_MS: u64 = 200;
        let mut attempt = 0usize;
        loop {
            self.cancel.check()?;
            let response = make_req().send();
            match response {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if attempt < MAX_RETRIES && is_retryable_status(status) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        warn!(status, attempt, "file service busy, retrying");
                        self.cancel.wait(Duration::from_millis(delay))?;
                        attempt += 1;
                        continue;
                    }
                    return Ok(resp);
                }
                Err(err) => {
                    if attempt < MAX_RETRIES && is_retryable_error(&err) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        warn!(error = %err, attempt, "file service unreachable, retrying");
                        self.cancel.wait(Duration::from_millis(delay))?;
                        attempt += 1;
                        continue;
                    }
                    return Err(KiraError::RemoteHttp(err.to_string()));
                }
            }
        }
    }
}

impl StoreBackend for HttpStoreBackend {
    fn get_file(&self, path: &str) -> Result<Vec<u8>, KiraError> {
        let url = self.file_url(path);
        let response = self.send_with_retries(|| self.client.get(&url))?;
        let response = Self::handle_status(path, response)?;
        let bytes = response
            .bytes()
            .map_err(|err| KiraError::RemoteHttp(err.to_string()))?;
        Ok(bytes.to_vec())
    }

    fn get_range(&self, path: &str, start: u64, end: u64) -> Result<Vec<u8>, KiraError> {
        let url = self.file_url(path);
        let range = range_header(start, end);
        let response = self.send_with_retries(|| self.client.get(&url).header(RANGE, &range))?;
        let response = Self::handle_status(path, response)?;
        let bytes = response
            .bytes()
            .map_err(|err| KiraError::RemoteHttp(err.to_string()))?;
        Ok(bytes.to_vec())
    }

    fn submit_conversion(&self, path: &str) -> Result<ConversionResponse, KiraError> {
        let url = format!("{}/convert", self.base_url);
        let body = serde_json::json!({ "path": path });
        let response = self.send_with_retries(|| self.client.post(&url).json(&body))?;
        if !response.status().is_success() {
            return Err(KiraError::Conversion {
                path: path.to_string(),
                reason: format!("failed to start conversion (status {})", response.status()),
            });
        }
        let raw: Value = response
            .json()
            .map_err(|err| KiraError::invalid_payload(path, err))?;
        serde_json::from_value(raw).map_err(|err| KiraError::invalid_payload(path, err))
    }
}

/// Inclusive `Range` header value for the half-open span `[start, end)`.
pub(crate) fn range_header(start: u64, end: u64) -> String {
    format!("bytes={}-{}", start, end.saturating_sub(1))
}

fn default_headers() -> Result<HeaderMap, KiraError> {
    let mut headers = HeaderMap::new();
    headers.insert(
        USER_AGENT,
        HeaderValue::from_str(&format!("kira-ce/{}", env!("CARGO_PKG_VERSION")))
            .map_err(|err| KiraError::RemoteHttp(err.to_string()))?,
    );
    Ok(headers)
}

pub(crate) fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

pub(crate) fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}

/// Parsed JSON documents keyed by storage path. Entries are never evicted;
/// the cache lives as long as the session that owns it.
#[derive(Debug, Default)]
pub struct DocumentCache {
    entries: Mutex<HashMap<String, Arc<Value>>>,
}

impl DocumentCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &str) -> Option<Arc<Value>> {
        self.entries
            .lock()
            .ok()
            .and_then(|entries| entries.get(path).cloned())
    }

    pub fn insert(&self, path: &str, value: Arc<Value>) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(path.to_string(), value);
        }
    }

    pub fn contains(&self, path: &str) -> bool {
        self.entries
            .lock()
            .map(|entries| entries.contains_key(path))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|entries| entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.clear();
        }
    }
}

/// Remote object store client: cached documents, uncached byte ranges.
pub struct RemoteStore<B: StoreBackend> {
    backend: B,
    cache: DocumentCache,
    cancel: CancelToken,
}

impl<B: StoreBackend> RemoteStore<B> {
    pub fn new(backend: B) -> Self {
        Self::with_cancel(backend, CancelToken::new())
    }

    pub fn with_cancel(backend: B, cancel: CancelToken) -> Self {
        Self {
            backend,
            cache: DocumentCache::new(),
            cancel,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn cache(&self) -> &DocumentCache {
        &self.cache
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn fetch_document(&self, path: &str) -> Result<Arc<Value>, KiraError> {
        if let Some(existing) = self.cache.get(path) {
            debug!(path, "document cache hit");
            return Ok(existing);
        }
        self.cancel.check()?;
        let bytes = self.backend.get_file(path)?;
        let value: Value =
            serde_json::from_slice(&bytes).map_err(|err| KiraError::invalid_payload(path, err))?;
        let value = Arc::new(value);
        self.cache.insert(path, value.clone());
        Ok(value)
    }

    pub fn fetch_typed<T: DeserializeOwned>(&self, path: &str) -> Result<T, KiraError> {
        let value = self.fetch_document(path)?;
        T::deserialize(value.as_ref()).map_err(|err| KiraError::invalid_payload(path, err))
    }

    /// Bytes `[start, end)` of `path`, trimmed if the server over-delivers.
    pub fn fetch_byte_range(&self, path: &str, start: u64, end: u64) -> Result<Vec<u8>, KiraError> {
        if start >= end {
            return Ok(Vec::new());
        }
        self.cancel.check()?;
        debug!(path, start, end, "range fetch");
        let mut bytes = self.backend.get_range(path, start, end)?;
        let expected = end - start;
        if (bytes.len() as u64) < expected {
            return Err(KiraError::ShortRange {
                path: path.to_string(),
                expected,
                received: bytes.len() as u64,
            });
        }
        bytes.truncate(expected as usize);
        Ok(bytes)
    }

    /// Small text files such as conversion status markers. Not cached.
    pub fn fetch_text(&self, path: &str) -> Result<String, KiraError> {
        self.cancel.check()?;
        let bytes = self.backend.get_file(path)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    pub fn submit_conversion(&self, path: &str) -> Result<ConversionResponse, KiraError> {
        self.cancel.check()?;
        let response = self.backend.submit_conversion(path)?;
        response.validate(path)?;
        Ok(response)
    }
}
