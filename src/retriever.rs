//! Retriever capability and an HTTP search-service adapter.
//!
//! The research loop only needs read access to a document collection: given a
//! query and a limit, return hits ordered most-relevant first. An empty result
//! is a valid answer, not an error.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Opaque handle naming the collection to search.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CollectionHandle(String);

impl CollectionHandle {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CollectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CollectionHandle {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// One retrieved document fragment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relevance: Option<f64>,
}

impl SearchHit {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            metadata: serde_json::Map::new(),
            relevance: None,
        }
    }

    pub fn with_relevance(mut self, relevance: f64) -> Self {
        self.relevance = Some(relevance);
        self
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RetrievalError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("search service returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("invalid search response: {0}")]
    InvalidResponse(String),

    #[error("retriever configuration error: {0}")]
    Config(String),
}

/// Read-only search over a document collection.
#[async_trait]
pub trait Retriever: Send + Sync {
    /// Return at most `limit` hits, most relevant first.
    async fn search(
        &self,
        collection: &CollectionHandle,
        query: &str,
        limit: usize,
    ) -> Result<Vec<SearchHit>, RetrievalError>;
}

// =============================================================================
// HTTP adapter
// =============================================================================

/// Search service speaking
/// `POST {base}/collections/{collection}/search` with `{query, limit}`.
#[derive(Debug, Clone)]
pub struct HttpRetriever {
    client: reqwest::Client,
    base_url: Url,
}

#[derive(Serialize)]
struct SearchApiRequest<'a> {
    query: &'a str,
    limit: usize,
}

#[derive(Deserialize)]
struct SearchApiResponse {
    #[serde(default)]
    hits: Vec<SearchHit>,
}

impl HttpRetriever {
    pub fn new(base_url: &str) -> Result<Self, RetrievalError> {
        Self::with_config(base_url, Duration::from_secs(30))
    }

    /// Create from `DEEPSEARCH_RETRIEVER_URL` and `DEEPSEARCH_RETRIEVER_TIMEOUT_SECONDS`.
    pub fn from_env() -> Result<Self, RetrievalError> {
        let base_url = std::env::var("DEEPSEARCH_RETRIEVER_URL")
            .map_err(|_| RetrievalError::Config("DEEPSEARCH_RETRIEVER_URL not set".into()))?;
        let timeout = std::env::var("DEEPSEARCH_RETRIEVER_TIMEOUT_SECONDS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(30));
        Self::with_config(&base_url, timeout)
    }

    pub fn with_config(base_url: &str, timeout: Duration) -> Result<Self, RetrievalError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| RetrievalError::Config(format!("invalid base URL {base_url:?}: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(RetrievalError::Config(format!(
                "base URL cannot carry a path: {base_url}"
            )));
        }

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .gzip(true)
            .build()
            .map_err(|e| RetrievalError::Config(format!("failed to create HTTP client: {e}")))?;

        Ok(Self { client, base_url })
    }

    /// Collection names are pushed as a single escaped path segment.
    fn search_url(&self, collection: &CollectionHandle) -> Result<Url, RetrievalError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| RetrievalError::Config("base URL cannot carry a path".into()))?
            .pop_if_empty()
            .extend(["collections", collection.as_str(), "search"]);
        Ok(url)
    }
}

#[async_trait]
impl Retriever for HttpRetriever {
    async fn search(
        &self,
        collection: &CollectionHandle,
        query: &str,
        limit: usize,
    ) -> Result<Vec<SearchHit>, RetrievalError> {
        let url = self.search_url(collection)?;
        let response = self
            .client
            .post(url)
            .json(&SearchApiRequest { query, limit })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(RetrievalError::Status {
                status: status.as_u16(),
                message: message.chars().take(500).collect(),
            });
        }

        let body = response.text().await?;
        let parsed: SearchApiResponse = serde_json::from_str(&body)
            .map_err(|e| RetrievalError::InvalidResponse(e.to_string()))?;

        let mut hits = parsed.hits;
        hits.truncate(limit);
        debug!(collection = %collection, hits = hits.len(), "search completed");
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_url_escapes_collection() {
        let r = HttpRetriever::new("http://localhost:8000/api/").unwrap();
        let url = r.search_url(&CollectionHandle::new("ai docs")).unwrap();
        assert_eq!(
            url.as_str(),
            "http://localhost:8000/api/collections/ai%20docs/search"
        );
    }

    #[test]
    fn rejects_invalid_base_url() {
        assert!(matches!(
            HttpRetriever::new("not a url"),
            Err(RetrievalError::Config(_))
        ));
        assert!(matches!(
            HttpRetriever::new("mailto:someone@example.com"),
            Err(RetrievalError::Config(_))
        ));
    }

    #[test]
    fn hit_metadata_is_optional() {
        let hit: SearchHit =
            serde_json::from_str(r#"{"id":"doc_4","text":"ZigZaggeron-7"}"#).unwrap();
        assert_eq!(hit, SearchHit::new("doc_4", "ZigZaggeron-7"));
    }

    #[test]
    fn relevance_is_serialized_only_when_set() {
        let plain = serde_json::to_value(SearchHit::new("doc_1", "a")).unwrap();
        assert!(plain.get("relevance").is_none());
        assert!(plain.get("metadata").is_none());

        let scored = SearchHit::new("doc_1", "a").with_relevance(0.75);
        let value = serde_json::to_value(&scored).unwrap();
        assert_eq!(value["relevance"], 0.75);

        let parsed: SearchHit =
            serde_json::from_str(r#"{"id":"doc_1","text":"a","relevance":0.75}"#).unwrap();
        assert_eq!(parsed, scored);
    }
}
