//! Error types for the download module.
//!
//! Every variant carries the URL or path it concerns so that log lines and
//! persisted failure reasons are actionable on their own.

use std::path::PathBuf;

use thiserror::Error;

use super::integrity::IntegrityFailure;

/// Errors that can occur while talking to the archive or writing artifacts.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// Network-level error (DNS resolution, connection refused, TLS errors, etc.)
    #[error("network error fetching {url}: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// Request timed out before completion.
    #[error("timeout fetching {url}")]
    Timeout { url: String },

    /// HTTP error response (4xx client errors, 5xx server errors).
    #[error("HTTP {status} fetching {url}")]
    HttpStatus {
        url: String,
        status: u16,
        /// The Retry-After header value, if present.
        retry_after: Option<String>,
    },

    /// File system error while writing an artifact.
    #[error("IO error writing to {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The provided URL is malformed or invalid.
    #[error("invalid URL: {url}")]
    InvalidUrl { url: String },

    /// A finished artifact failed verification.
    #[error("integrity check failed for {path}: {failure}")]
    Integrity {
        path: PathBuf,
        failure: IntegrityFailure,
    },

    /// The server answered with an HTML page where a binary artifact was expected.
    ///
    /// The archive serves HTML error and throttle pages with status 200.
    #[error("unexpected content type '{content_type}' from {url}")]
    UnexpectedContent { url: String, content_type: String },

    /// The server answered successfully with an empty body.
    #[error("empty response body from {url}")]
    EmptyBody { url: String },

    /// A JSON document could not be decoded into the expected shape.
    #[error("malformed JSON from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },

    /// The HTTP client could not be constructed.
    #[error("failed to build HTTP client: {reason}\n  Suggestion: check the HTTPS_PROXY/HTTP_PROXY environment variables")]
    ClientBuild { reason: String },
}

impl DownloadError {
    /// Creates a network error from a reqwest error.
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Network {
            url: url.into(),
            source,
        }
    }

    /// Creates an HTTP status error.
    pub fn http_status(url: impl Into<String>, status: u16) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
            retry_after: None,
        }
    }

    /// Creates an HTTP status error with a Retry-After header value.
    pub fn http_status_with_retry_after(
        url: impl Into<String>,
        status: u16,
        retry_after: Option<String>,
    ) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
            retry_after,
        }
    }

    /// Creates a timeout error.
    pub fn timeout(url: impl Into<String>) -> Self {
        Self::Timeout { url: url.into() }
    }

    /// Creates an IO error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates an invalid URL error.
    pub fn invalid_url(url: impl Into<String>) -> Self {
        Self::InvalidUrl { url: url.into() }
    }

    /// Creates an integrity error.
    pub fn integrity(path: impl Into<PathBuf>, failure: IntegrityFailure) -> Self {
        Self::Integrity {
            path: path.into(),
            failure,
        }
    }

    /// Creates an unexpected-content error.
    pub fn unexpected_content(url: impl Into<String>, content_type: impl Into<String>) -> Self {
        Self::UnexpectedContent {
            url: url.into(),
            content_type: content_type.into(),
        }
    }

    /// Creates an empty-body error.
    pub fn empty_body(url: impl Into<String>) -> Self {
        Self::EmptyBody { url: url.into() }
    }

    /// Creates a JSON decode error.
    pub fn decode(url: impl Into<String>, source: serde_json::Error) -> Self {
        Self::Decode {
            url: url.into(),
            source,
        }
    }

    /// Creates a client construction error.
    pub fn client_build(reason: impl Into<String>) -> Self {
        Self::ClientBuild { reason: reason.into() }
    }

    /// Returns the raw Retry-After header value carried by a status error.
    #[must_use]
    pub fn retry_after(&self) -> Option<&str> {
        match self {
            Self::HttpStatus { retry_after, .. } => retry_after.as_deref(),
            _ => None,
        }
    }
}

// No From<reqwest::Error> / From<std::io::Error>: every variant needs the URL
// or path as context, so callers go through the helper constructors.
