//! Newsarchive Core Library
//!
//! Builds a local, resumable archive of a historical newspaper: every issue,
//! every page artifact, and optional OCR text, from a paginated public
//! archive API.
//!
//! # Architecture
//!
//! - [`source`] - archive dialects behind the [`source::ArchiveSource`] trait
//! - [`download`] - HTTP client, pacing, retry, integrity gate and the
//!   issue-by-issue [`download::DownloadEngine`]
//! - [`store`] - the crash-safe `download_metadata.json` state file
//! - [`ocr`] - two-tier text extraction (remote text and a local model)
//! - [`harness`] - memory and wall-clock supervisor for long runs

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod download;
pub mod harness;
pub mod model;
pub mod ocr;
pub mod source;
pub mod store;
mod user_agent;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export commonly used types
pub use download::{
    DEFAULT_MAX_RETRIES, DownloadEngine, DownloadStats, EngineError, FailureType, HttpClient,
    RateLimiter, RetryDecision, RetryPolicy, RunOptions, RunSummary, SpeedProfile, classify_error,
};
pub use model::{Identifier, IssueMetadata, ModelError, PageMetadata, parse_year_range};
pub use ocr::{OcrMode, OcrOrchestrator};
pub use source::{ArchiveSource, SourceContext, build_default_source_registry};
pub use store::{MetadataStore, StoreError};
