use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::cancel::CancelToken;
use crate::domain::DatasetRecord;
use crate::error::KiraError;
use crate::store::{is_retryable_error, is_retryable_status};

pub const ALLOWED_OBJECT_TYPES: [&str; 3] = [
    "single_cell_experiment",
    "spatial_experiment",
    "spatial_feature_experiment",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SearchQuery {
    And { children: Vec<SearchQuery> },
    Text { text: String },
    Path { path: String },
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueryPage {
    pub results: Vec<DatasetRecord>,
    #[serde(default)]
    pub next: Option<String>,
}

/// Transport to the metadata search index.
pub trait IndexBackend: Send + Sync {
    /// Non-recursive listing of `path`; directories carry a trailing `/`.
    fn list(&self, path: &str) -> Result<Vec<String>, KiraError>;
    /// One page of results. `page` is `None` for the first page, otherwise
    /// the `next` link of the previous page.
    fn query(
        &self,
        page: Option<&str>,
        limit: usize,
        body: &SearchQuery,
    ) -> Result<QueryPage, KiraError>;
}

#[derive(Clone)]
pub struct HttpIndexClient {
    client: Client,
    base_url: String,
    cancel: CancelToken,
}

impl HttpIndexClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, KiraError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("kira-ce/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| KiraError::SearchHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|err| KiraError::SearchHttp(err.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            cancel: CancelToken::new(),
        })
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    fn page_url(&self, page: Option<&str>, limit: usize) -> String {
        let stub = match page {
            None => format!("{}/query?translate=true", self.base_url),
            Some(next) if next.starts_with("http://") || next.starts_with("https://") => {
                next.to_string()
            }
            Some(next) => format!("{}/{}", self.base_url, next.trim_start_matches('/')),
        };
        format!("{stub}&limit={limit}")
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
            match make_req().send() {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if attempt < MAX_RETRIES && is_retryable_status(status) {
                        warn!(status, attempt, "search index busy, retrying");
                        self.cancel.wait(Duration::from_millis(BASE_DELAY_MS * (attempt as u64 + 1)))?;
                        attempt += 1;
                        continue;
                    }
                    return Ok(resp);
                }
                Err(err) => {
                    if attempt < MAX_RETRIES && is_retryable_error(&err) {
                        warn!(error = %err, attempt, "search index unreachable, retrying");
                        self.cancel.wait(Duration::from_millis(BASE_DELAY_MS * (attempt as u64 + 1)))?;
                        attempt += 1;
                        continue;
                    }
                    return Err(KiraError::SearchHttp(err.to_string()));
                }
            }
        }
    }
}

impl IndexBackend for HttpIndexClient {
    fn list(&self, path: &str) -> Result<Vec<String>, KiraError> {
        let url = format!("{}/list", self.base_url);
        let response = self
            .send_with_retries(|| {
                self.client
                    .get(&url)
                    .query(&[("path", path), ("recursive", "false")])
            })
            .map_err(|err| match err {
                KiraError::Cancelled => err,
                _ => KiraError::DirectoryListing {
                    path: path.to_string(),
                },
            })?;
        if !response.status().is_success() {
            return Err(KiraError::DirectoryListing {
                path: path.to_string(),
            });
        }
        response
            .json::<Vec<String>>()
            .map_err(|err| KiraError::invalid_payload(path, err))
    }

    fn query(
        &self,
        page: Option<&str>,
        limit: usize,
        body: &SearchQuery,
    ) -> Result<QueryPage, KiraError> {
        let url = self.page_url(page, limit);
        let response = self.send_with_retries(|| self.client.post(&url).json(body))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "search query failed".to_string());
            return Err(KiraError::SearchQuery { status, message });
        }
        response
            .json::<QueryPage>()
            .map_err(|err| KiraError::invalid_payload(&url, err))
    }
}

/// Free-text clause restricted to the explorable object types, ANDed with an
/// optional path-prefix clause.
pub fn build_query(text: Option<&str>, path_prefix: Option<&str>) -> SearchQuery {
    let type_condition = ALLOWED_OBJECT_TYPES
        .iter()
        .map(|kind| format!("object.type: {kind}"))
        .collect::<Vec<_>>()
        .join(" OR ");

    let text = match text.map(str::trim).filter(|text| !text.is_empty()) {
        Some(user) => format!("({user}) AND ({type_condition})"),
        None => type_condition,
    };
    let text_clause = SearchQuery::Text { text };

    match path_prefix.map(str::trim).filter(|path| !path.is_empty()) {
        Some(path) => SearchQuery::And {
            children: vec![
                text_clause,
                SearchQuery::Path {
                    path: path.to_string(),
                },
            ],
        },
        None => text_clause,
    }
}

pub struct SearchClient<'a, I: IndexBackend> {
    index: &'a I,
}

impl<'a, I: IndexBackend> SearchClient<'a, I> {
    pub fn new(index: &'a I) -> Self {
        Self { index }
    }

    /// Collects up to `limit` records, following `next` links.
    pub fn find_experiments(
        &self,
        text: Option<&str>,
        path_prefix: Option<&str>,
        limit: usize,
    ) -> Result<Vec<DatasetRecord>, KiraError> {
        let query = build_query(text, path_prefix);
        let mut collected = Vec::new();
        let mut next: Option<String> = None;

        while collected.len() < limit {
            let remaining = limit - collected.len();
            let page = self.index.query(next.as_deref(), remaining, &query)?;
            debug!(hits = page.results.len(), "search page received");
            collected.extend(page.results.into_iter().take(remaining));
            match page.next {
                Some(link) => next = Some(link),
                None => break,
            }
        }

        Ok(collected)
    }
}
