//! Web search collaborator
//!
//! `tavily_search` goes through the `SearchBackend` trait; Tavily is the
//! production backend.

use std::fmt::Write as _;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub const TAVILY_SEARCH_URL: &str = "https://api.tavily.com/search";

/// One search result
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    #[serde(rename = "content", default)]
    pub snippet: String,
}

#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("search is not configured (TAVILY_API_KEY is unset)")]
    NotConfigured,

    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("search API error ({status}): {body}")]
    Api { status: u16, body: String },
}

#[async_trait]
pub trait SearchBackend: Send + Sync {
    /// Ordered results for `query`
    async fn search(&self, query: &str) -> Result<Vec<SearchHit>, SearchError>;
}

/// Tavily search API client
pub struct TavilySearch {
    client: reqwest::Client,
    api_key: String,
    url: String,
}

impl TavilySearch {
    pub fn new(api_key: impl Into<String>) -> Result<Self, SearchError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            url: TAVILY_SEARCH_URL.to_string(),
        })
    }
}

#[derive(Serialize)]
struct TavilyRequest<'a> {
    api_key: &'a str,
    query: &'a str,
    search_depth: &'static str,
    max_results: u32,
}

#[derive(Deserialize)]
struct TavilyResponse {
    #[serde(default)]
    results: Vec<SearchHit>,
}

#[async_trait]
impl SearchBackend for TavilySearch {
    async fn search(&self, query: &str) -> Result<Vec<SearchHit>, SearchError> {
        let response = self
            .client
            .post(&self.url)
            .json(&TavilyRequest {
                api_key: &self.api_key,
                query,
                search_depth: "advanced",
                max_results: 5,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(SearchError::Api { status, body });
        }

        let body: TavilyResponse = response.json().await?;
        Ok(body.results)
    }
}

/// Backend used when no API key is configured
pub struct UnconfiguredSearch;

#[async_trait]
impl SearchBackend for UnconfiguredSearch {
    async fn search(&self, _query: &str) -> Result<Vec<SearchHit>, SearchError> {
        Err(SearchError::NotConfigured)
    }
}

/// Numbered list the model reads
pub fn format_hits(hits: &[SearchHit]) -> String {
    if hits.is_empty() {
        return "No results found.".to_string();
    }
    let mut output = String::new();
    for (i, hit) in hits.iter().enumerate() {
        let _ = writeln!(
            output,
            "{}. **{}**\n   {}\n   {}\n",
            i + 1,
            hit.title,
            hit.url,
            hit.snippet
        );
    }
    output
}
