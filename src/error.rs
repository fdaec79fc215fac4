//! Application-wide error types.
//!
//! Each subsystem owns a specific error enum via `thiserror`; this module
//! aggregates them so callers that touch several subsystems can use one
//! `Result`. The CLI layer converts everything to `anyhow`.
//!
//! # Example
//!
//! ```ignore
//! use tunedeck::error::{Result, ResultExt};
//!
//! fn load_library(dir: &Path) -> Result<Vec<TrackFile>> {
//!     let tracks = library::read_tracks(dir).with_context("while scanning library")?;
//!     Ok(tracks)
//! }
//! ```

use crate::config::ConfigError;
use crate::download::DownloadError;
use crate::player::PlayerError;
use crate::search::SearchError;

/// Application-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level application error.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// File I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Search request or result extraction failed
    #[error("Search error: {0}")]
    Search(#[from] SearchError),

    /// Acquisition could not be started
    #[error("Download error: {0}")]
    Download(#[from] DownloadError),

    /// Audio playback error
    #[error("Playback error: {0}")]
    Playback(#[from] PlayerError),

    /// Configuration could not be written
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Generic error with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Add context to an error.
    pub fn context(self, ctx: impl Into<String>) -> Self {
        Self::WithContext {
            context: ctx.into(),
            source: Box::new(self),
        }
    }
}

/// Extension trait for adding context to Results.
pub trait ResultExt<T> {
    /// Add context to an error result.
    fn with_context(self, ctx: impl Into<String>) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn with_context(self, ctx: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.context(ctx))
    }
}

impl<T> ResultExt<T> for std::result::Result<T, std::io::Error> {
    fn with_context(self, ctx: impl Into<String>) -> Result<T> {
        self.map_err(|e| Error::Io(e).context(ctx))
    }
}

impl<T> ResultExt<T> for std::result::Result<T, PlayerError> {
    fn with_context(self, ctx: impl Into<String>) -> Result<T> {
        self.map_err(|e| Error::Playback(e).context(ctx))
    }
}
