//! Error types for archive sources.

use std::path::PathBuf;

use thiserror::Error;

use crate::download::DownloadError;

/// Errors raised by an [`ArchiveSource`](super::ArchiveSource).
#[derive(Debug, Error)]
pub enum SourceError {
    /// A request failed after retries.
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: DownloadError,
    },

    /// The page document names no text service.
    #[error("no text service listed for page {page_url}\n  Suggestion: use local OCR for this page")]
    NoTextService { page_url: String },

    /// The text service answered with no text.
    #[error("remote text for {url} is empty")]
    EmptyText { url: String },

    /// Writing an output file failed.
    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// No source registered under the name.
    #[error("unknown archive source '{name}'\n  Suggestion: available sources: {available}")]
    UnknownSource { name: String, available: String },
}

impl SourceError {
    pub fn request(url: impl Into<String>, source: DownloadError) -> Self {
        Self::Request {
            url: url.into(),
            source,
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
