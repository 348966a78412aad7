//! Archive sources: the remote collection dialects the pipeline can talk to.
//!
//! # Architecture
//!
//! - [`ArchiveSource`] - async trait every archive implements
//! - [`SourceContext`] - shared HTTP client, rate-limit gate, retry policy
//! - [`SourceRegistry`] - name-to-constructor table (`loc`)
//! - [`LocSource`] - the Library of Congress newspaper collection
//!
//! Sources never panic on bad remote data. Request failures become empty
//! results, error entries in a [`Discovery`], or a [`SourceError`] for the
//! single page concerned.

mod error;
mod loc;
pub mod payload;
mod registry;

pub use error::SourceError;
pub use loc::{DEFAULT_BASE_URL, LocSource};
pub use registry::{SourceConstructor, SourceRegistry, build_default_source_registry};

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::download::{DownloadStats, HttpClient, RateLimiter, RetryPolicy};
use crate::model::{Identifier, IssueMetadata, NewspaperInfo, OcrResult, PageMetadata, TitleResult};

/// Everything a source needs to make paced, retried requests.
///
/// Built once at pipeline start and cloned into each source.
#[derive(Debug, Clone)]
pub struct SourceContext {
    pub http: HttpClient,
    pub limiter: Arc<RateLimiter>,
    pub policy: RetryPolicy,
    /// Spacing between lightweight document requests on one site.
    pub scan_delay: Duration,
    /// Overrides the source's default API base URL.
    pub base_url: Option<String>,
    pub stats: Arc<DownloadStats>,
}

impl SourceContext {
    #[must_use]
    pub fn new(http: HttpClient, limiter: Arc<RateLimiter>, scan_delay: Duration) -> Self {
        Self {
            http,
            limiter,
            policy: RetryPolicy::default(),
            scan_delay,
            base_url: None,
            stats: Arc::new(DownloadStats::new()),
        }
    }

    #[must_use]
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    #[must_use]
    pub fn with_stats(mut self, stats: Arc<DownloadStats>) -> Self {
        self.stats = stats;
        self
    }
}

/// Result of issue discovery for one identifier.
#[derive(Debug, Clone, Default)]
pub struct Discovery {
    /// Issues sorted by (date, edition).
    pub issues: Vec<IssueMetadata>,
    /// Display title recovered from a title-level record.
    pub title: Option<String>,
    /// Collection result pages fetched successfully.
    pub pages_fetched: usize,
    /// Pages that could not be fetched, one message each.
    pub errors: Vec<String>,
}

/// Where a page artifact can be downloaded from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactLocation {
    pub url: String,
    pub expected_size: Option<u64>,
}

/// A remote newspaper archive.
///
/// Uses `async_trait` so sources can live behind `Arc<dyn ArchiveSource>`
/// in the registry.
#[async_trait]
pub trait ArchiveSource: Send + Sync {
    /// Short machine name (`loc`).
    fn name(&self) -> &str;

    /// Human-readable archive name.
    fn display_name(&self) -> &str;

    /// Lists every issue of `identifier`, optionally restricted to `years`.
    async fn discover_issues(
        &self,
        identifier: &Identifier,
        years: Option<&BTreeSet<i32>>,
    ) -> Discovery;

    /// Lists the pages of one issue in the archive's page order.
    ///
    /// An empty list means the archive has no page artifacts for the issue.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] only when no document variant could be fetched.
    async fn list_pages(&self, issue: &IssueMetadata) -> Result<Vec<PageMetadata>, SourceError>;

    /// Resolves the artifact URL of a page whose `pdf_url` is unknown.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] when the page document cannot be fetched.
    async fn resolve_artifact_url(&self, page: &PageMetadata) -> Result<ArtifactLocation, SourceError>;

    /// Fetches archive-computed text for a page, cleans it and writes the
    /// tier-1 output file under `output_dir`.
    async fn fetch_remote_text(&self, page: &PageMetadata, output_dir: &Path) -> OcrResult;

    /// Free-text title search. Failures yield an empty list.
    async fn search_titles(&self, query: &str) -> Vec<TitleResult>;

    /// Title, place and year span of a newspaper, if the archive knows it.
    async fn newspaper_info(&self, identifier: &Identifier) -> Option<NewspaperInfo>;

    /// Locator of an issue, used to rebuild retries from stored records.
    fn build_issue_url(&self, identifier: &Identifier, date: &str, edition: u32) -> String;

    /// Locator of a page, used by OCR batch mode.
    fn build_page_url(&self, identifier: &Identifier, date: &str, edition: u32, page: u32) -> String;
}
