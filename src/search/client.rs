//! HTTP client for the video search results page.
//!
//! The page is served differently to non-browser agents, so requests carry
//! a desktop browser user agent and an English locale.

use std::time::Duration;

use reqwest::header::{ACCEPT_LANGUAGE, HeaderMap, HeaderValue};

use super::{SearchError, SearchResult, extract};
use crate::config::SearchConfig;

const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Search client
pub struct YouTubeClient {
    http_client: reqwest::Client,
    base_url: String,
    qualifier: String,
}

impl YouTubeClient {
    /// Create a client from the search settings.
    pub fn new(config: &SearchConfig) -> Result<Self, SearchError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));

        let http_client = reqwest::Client::builder()
            .user_agent(BROWSER_USER_AGENT)
            .default_headers(headers)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| SearchError::Network(e.to_string()))?;

        Ok(Self {
            http_client,
            base_url: config.base_url.clone(),
            qualifier: config.qualifier.clone(),
        })
    }

    /// Build the results page URL for a query.
    pub fn search_url(&self, query: &str) -> String {
        let full_query = if self.qualifier.is_empty() {
            query.trim().to_string()
        } else {
            format!("{} {}", query.trim(), self.qualifier)
        };
        format!(
            "{}?search_query={}",
            self.base_url,
            urlencoding::encode(&full_query)
        )
    }

    /// Fetch the results page for `query` and extract its results.
    pub async fn search(&self, query: &str) -> Result<Vec<SearchResult>, SearchError> {
        let url = self.search_url(query);
        tracing::debug!(target: "search", %url, "Requesting results page");

        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .map_err(|e| SearchError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SearchError::Status(status.as_u16()));
        }

        let body = response
            .text()
            .await
            .map_err(|e| SearchError::Network(e.to_string()))?;

        let results = extract(&body)?;
        tracing::info!(target: "search", query, count = results.len(), "Search complete");
        Ok(results)
    }
}
