//! Remote search: turn a text query into a short list of playable results.
//!
//! - [`client`] performs the HTTP request against the results page
//! - [`extract`] parses the page into [`SearchResult`]s
//!
//! The [`SearchApi`] trait sits between the two so the interactive shell
//! can be exercised without network access.

pub mod client;
pub mod extract;

use async_trait::async_trait;

pub use client::YouTubeClient;
pub use extract::{MAX_RESULTS, extract};

/// One video found by a search.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchResult {
    /// Remote video identifier
    pub id: String,
    /// Video title
    pub title: String,
    /// Channel name
    pub channel: String,
    /// Duration as displayed by the source (e.g. "3:45")
    pub duration: String,
    /// Thumbnail URL, when the page lists one
    pub thumbnail: Option<String>,
}

impl SearchResult {
    /// One-line rendering: `title [duration] - channel`.
    pub fn display_line(&self) -> String {
        format!("{} [{}] - {}", self.title, self.duration, self.channel)
    }
}

/// Search errors.
#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("could not find result data in response")]
    NoDataBlock,

    #[error("failed to parse result data: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("network error: {0}")]
    Network(String),

    #[error("HTTP {0}")]
    Status(u16),
}

/// A source of search results.
#[async_trait]
pub trait SearchApi: Send + Sync {
    /// Run a search and return at most [`MAX_RESULTS`] results.
    async fn search(&self, query: &str) -> Result<Vec<SearchResult>, SearchError>;
}

#[async_trait]
impl SearchApi for YouTubeClient {
    async fn search(&self, query: &str) -> Result<Vec<SearchResult>, SearchError> {
        self.search(query).await
    }
}
