//! Fetching page artifacts from the archive.
//!
//! # Architecture
//!
//! - [`HttpClient`] - one reqwest client per run, streaming bodies to disk
//! - [`RateLimiter`] - per-site spacing, burst ceiling and Retry-After blocks
//! - [`RetryPolicy`] / [`retry_with_backoff`] - exponential backoff for transient failures
//! - [`verify_artifact`] - the integrity gate every artifact must pass
//! - [`DownloadEngine`] - the resumable issue-by-issue pipeline
//!
//! # Example
//!
//! ```no_run
//! use newsarchive_core::download::HttpClient;
//! use std::path::Path;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = HttpClient::new();
//! let bytes = client
//!     .stream_to_path("https://tile.loc.gov/page.pdf", Path::new("./page.pdf"))
//!     .await?;
//! println!("saved {bytes} bytes");
//! # Ok(())
//! # }
//! ```

mod client;
pub mod constants;
mod engine;
mod error;
mod integrity;
mod profile;
pub mod rate_limiter;
mod retry;
mod stats;

pub use client::HttpClient;
pub use engine::{DownloadEngine, EngineError, IssueState, RunOptions};
pub use error::DownloadError;
pub use integrity::{IntegrityFailure, is_artifact_complete, verify_artifact};
pub use profile::SpeedProfile;
pub use rate_limiter::{RateLimiter, extract_site, parse_retry_after};
pub use retry::{
    DEFAULT_MAX_RETRIES, FailureType, RetryDecision, RetryPolicy, classify_error, retry_with_backoff,
};
pub use stats::{DownloadStats, RunSummary};

// No module-local Result alias: signatures spell out `Result<T, DownloadError>`.
