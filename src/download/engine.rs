//! Issue-by-issue download pipeline.
//!
//! The [`DownloadEngine`] walks the issues of one periodical in date order.
//! For each issue it lists the pages, downloads every page artifact through
//! the integrity gate, persists the outcome to the metadata store and, when
//! configured, runs OCR over the pages it got. Runs are resumable: the store
//! says what was done, the disk says whether it is still true.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use newsarchive_core::download::{DownloadEngine, HttpClient, RateLimiter, RunOptions, SpeedProfile};
//! use newsarchive_core::model::Identifier;
//! use newsarchive_core::source::{SourceContext, build_default_source_registry};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let profile = SpeedProfile::Safe;
//! let limiter = Arc::new(RateLimiter::new(profile.download_delay()));
//! let ctx = SourceContext::new(HttpClient::new(), limiter, profile.scan_delay());
//! let source = build_default_source_registry().build("loc", ctx.clone())?;
//! let mut engine = DownloadEngine::new(source, &ctx, profile, "./newspapers");
//! let summary = engine.run(RunOptions::new(Identifier::parse("sn83045462")?)).await?;
//! println!("downloaded {} issues", summary.downloaded);
//! # Ok(())
//! # }
//! ```

mod error_mapping;
mod persistence;

use std::collections::BTreeSet;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use futures_util::FutureExt;
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

use super::constants::LOW_DISK_SPACE_BYTES;
use super::integrity::{IntegrityFailure, verify_artifact};
use super::profile::SpeedProfile;
use super::retry::{RetryPolicy, retry_with_backoff};
use super::stats::{DownloadStats, RunSummary};
use super::{DownloadError, HttpClient, RateLimiter};
use crate::model::{DownloadResult, Identifier, IssueMetadata, PageMetadata};
use crate::ocr::{OcrJob, OcrOrchestrator, apply_outcomes};
use crate::source::{ArchiveSource, SourceContext};
use crate::store::{FailureReason, MetadataStore, PageRecord, StoreError, StoreState, relative_path};

use error_mapping::{actionable_download_message, actionable_source_message};
use persistence::{Verification, failed_record, issue_record, retry_candidates, verify_recorded_issue};

/// Errors that abort a whole run. Per-issue failures never do.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("cannot create output directory {path}: {source}\n  Suggestion: check the --output path and its permissions")]
    OutputDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Lifecycle of one issue within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueState {
    Unseen,
    DiscoveringPages,
    Downloading,
    Partial,
    Complete,
    Failed,
}

impl IssueState {
    /// Whether the engine may move from `self` to `next`.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        use IssueState::{Complete, DiscoveringPages, Downloading, Failed, Partial, Unseen};
        matches!(
            (self, next),
            (Unseen | Partial | Failed, DiscoveringPages)
                | (DiscoveringPages, Downloading | Failed)
                | (Downloading, Complete | Partial | Failed)
        )
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unseen => "unseen",
            Self::DiscoveringPages => "discovering_pages",
            Self::Downloading => "downloading",
            Self::Partial => "partial",
            Self::Complete => "complete",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for IssueState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What to download in one run.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub identifier: Identifier,
    pub years: Option<BTreeSet<i32>>,
    /// Reprocess failed and incomplete issues from the store instead of discovering.
    pub retry_failed: bool,
    pub max_issues: Option<usize>,
}

impl RunOptions {
    #[must_use]
    pub fn new(identifier: Identifier) -> Self {
        Self {
            identifier,
            years: None,
            retry_failed: false,
            max_issues: None,
        }
    }
}

/// Sequential, resumable download pipeline for one output directory.
pub struct DownloadEngine {
    source: Arc<dyn ArchiveSource>,
    http: HttpClient,
    limiter: Arc<RateLimiter>,
    policy: RetryPolicy,
    profile: SpeedProfile,
    stats: Arc<DownloadStats>,
    output_dir: PathBuf,
    store: MetadataStore,
    ocr: Option<OcrOrchestrator>,
}

impl fmt::Debug for DownloadEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DownloadEngine")
            .field("source", &self.source.name())
            .field("profile", &self.profile)
            .field("output_dir", &self.output_dir)
            .field("ocr", &self.ocr)
            .finish_non_exhaustive()
    }
}

impl DownloadEngine {
    /// Creates an engine sharing the client, gate, policy and counters of `ctx`.
    #[must_use]
    pub fn new(
        source: Arc<dyn ArchiveSource>,
        ctx: &SourceContext,
        profile: SpeedProfile,
        output_dir: impl Into<PathBuf>,
    ) -> Self {
        let output_dir = output_dir.into();
        debug!(
            source = source.name(),
            %profile,
            max_retries = ctx.policy.max_attempts(),
            rate_limit_disabled = ctx.limiter.is_disabled(),
            "creating download engine"
        );
        Self {
            source,
            http: ctx.http.clone(),
            limiter: Arc::clone(&ctx.limiter),
            policy: ctx.policy.clone(),
            profile,
            stats: Arc::clone(&ctx.stats),
            store: MetadataStore::new(&output_dir),
            output_dir,
            ocr: None,
        }
    }

    /// Runs OCR over each issue's pages right after they are downloaded.
    #[must_use]
    pub fn with_ocr(mut self, orchestrator: OcrOrchestrator) -> Self {
        self.ocr = Some(orchestrator).filter(|o| o.mode().is_enabled());
        self
    }

    #[must_use]
    pub fn stats(&self) -> &DownloadStats {
        &self.stats
    }

    #[must_use]
    pub fn store(&self) -> &MetadataStore {
        &self.store
    }

    /// Runs the pipeline and returns its summary.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] only when the output directory cannot be
    /// created or the store cannot be written. Issue failures are counted
    /// in the summary instead.
    #[instrument(skip(self, options), fields(identifier = %options.identifier))]
    pub async fn run(&mut self, options: RunOptions) -> Result<RunSummary, EngineError> {
        let started = Instant::now();
        tokio::fs::create_dir_all(&self.output_dir)
            .await
            .map_err(|source| EngineError::OutputDir {
                path: self.output_dir.clone(),
                source,
            })?;

        let mut state = self.store.load();
        state.identifier = Some(options.identifier.to_string());
        self.log_banner(&options, &state);
        self.log_disk_space();

        let mut issues = if options.retry_failed {
            retry_candidates(
                &state,
                self.source.as_ref(),
                &options.identifier,
                options.years.as_ref(),
            )
        } else {
            let discovery = self
                .source
                .discover_issues(&options.identifier, options.years.as_ref())
                .await;
            for message in &discovery.errors {
                warn!(error = %message, "discovery page failed");
            }
            if let Some(title) = discovery.title.filter(|t| !t.is_empty()) {
                info!(title = %title, "newspaper title");
                state.title = Some(title);
            }
            discovery.issues
        };

        if let Some(max) = options.max_issues
            && issues.len() > max
        {
            info!(max, found = issues.len(), "limiting run to the first issues");
            issues.truncate(max);
        }

        if issues.is_empty() {
            warn!("no issues found");
            warn!("  the identifier may be wrong, not digitized for these years, or the network is down");
            if options.retry_failed {
                warn!("  no previously failed downloads exist");
            }
            info!(
                "check the identifier with `newsarchive info {}`",
                options.identifier
            );
            return Ok(self.stats.summary(0, started.elapsed()));
        }

        let total = issues.len();
        info!(issues = total, "processing issues");
        for (index, mut issue) in issues.into_iter().enumerate() {
            if issue.title.is_empty() {
                issue.title = state.title.clone().unwrap_or_default();
            }
            info!(
                progress = format!("{}/{total}", index + 1),
                issue = %issue.key(),
                "processing issue"
            );

            let outcome = AssertUnwindSafe(self.process_issue(&issue, &mut state))
                .catch_unwind()
                .await;
            match outcome {
                Ok(Ok(issue_state)) => debug!(issue = %issue.key(), state = %issue_state, "issue done"),
                Ok(Err(e)) => return Err(e),
                Err(panic) => {
                    let message = panic_message(panic.as_ref());
                    error!(issue = %issue.key(), panic = %message, "unexpected error processing issue");
                    self.stats.increment_failed();
                    state.record_failure(&issue.key(), failed_record(&issue, FailureReason::UnexpectedError));
                    self.store.save(&state)?;
                }
            }
        }

        let summary = self.stats.summary(total, started.elapsed());
        log_summary(&summary);
        Ok(summary)
    }

    /// Moves one issue through its states, persisting the final one.
    async fn process_issue(
        &mut self,
        issue: &IssueMetadata,
        state: &mut StoreState,
    ) -> Result<IssueState, EngineError> {
        let key = issue.key();
        let previous = state.downloaded.get(&key).cloned();
        let mut current = if state.failed.contains_key(&key) {
            IssueState::Failed
        } else {
            IssueState::Unseen
        };

        if let Some(record) = &previous {
            match verify_recorded_issue(&self.output_dir, record).await {
                Verification::Verified => {
                    info!(issue = %key, "already downloaded, skipping");
                    self.stats.increment_skipped();
                    return Ok(IssueState::Complete);
                }
                Verification::Incomplete => {
                    info!(
                        issue = %key,
                        pages = format!("{}/{}", record.downloaded_pages, record.total_pages),
                        "previously incomplete, fetching missing pages"
                    );
                    current = IssueState::Partial;
                }
                Verification::Damaged { bad, total } => {
                    warn!(issue = %key, bad, total, "recorded pages missing or corrupt, re-downloading");
                    current = IssueState::Partial;
                }
            }
            state.downloaded.remove(&key);
            self.store.save(state)?;
        }

        advance(&key, &mut current, IssueState::DiscoveringPages);
        let pages = match self.source.list_pages(issue).await {
            Ok(pages) => pages,
            Err(e) => {
                warn!(issue = %key, error = %actionable_source_message(&e), "page list unavailable");
                Vec::new()
            }
        };
        if pages.is_empty() {
            warn!(issue = %key, "no page artifacts found");
            advance(&key, &mut current, IssueState::Failed);
            self.stats.increment_failed();
            state.record_failure(&key, failed_record(issue, FailureReason::NoPdfFilesFound));
            self.store.save(state)?;
            return Ok(current);
        }

        advance(&key, &mut current, IssueState::Downloading);
        let mut downloaded = Vec::new();
        let mut jobs = Vec::new();
        for page in &pages {
            let dest = self.artifact_path(page);
            let result = self.download_page(page, &dest).await;
            let Some(path) = result.path.filter(|_| result.success) else {
                error!(
                    issue = %key,
                    page = page.page_num,
                    error = result.error.as_deref().unwrap_or("unknown"),
                    "page download failed"
                );
                continue;
            };
            let size = tokio::fs::metadata(&path)
                .await
                .map_or(result.size_bytes, |m| m.len());
            downloaded.push(PageRecord {
                page: page.page_num,
                file: self.relative(&path),
                size,
                ocr: std::collections::BTreeMap::new(),
            });
            jobs.push(OcrJob {
                page: page.clone(),
                artifact: path,
            });
        }

        if downloaded.is_empty() {
            advance(&key, &mut current, IssueState::Failed);
            error!(issue = %key, "no pages could be downloaded");
            self.stats.increment_failed();
            state.record_failure(&key, failed_record(issue, FailureReason::AllPageDownloadsFailed));
            self.store.save(state)?;
            return Ok(current);
        }

        let record = issue_record(issue, downloaded, pages.len(), previous.as_ref());
        if record.complete {
            advance(&key, &mut current, IssueState::Complete);
            self.stats.increment_downloaded();
        } else {
            advance(&key, &mut current, IssueState::Partial);
            self.stats.increment_partial();
        }
        info!(
            issue = %key,
            pages = format!("{}/{}", record.downloaded_pages, record.total_pages),
            state = %current,
            "issue downloaded"
        );
        state.record_download(&key, record);
        self.store.save(state)?;

        if let Some(ocr) = self.ocr.as_mut() {
            let outcomes = ocr.process_pages(&jobs).await;
            if let Some(record) = state.downloaded.get_mut(&key) {
                apply_outcomes(record, &self.output_dir, &outcomes);
                self.store.save(state)?;
            }
        }

        Ok(current)
    }

    /// Downloads one page artifact to `dest`.
    ///
    /// An artifact already at `dest` that passes the integrity gate is kept
    /// and reported with zero bytes transferred. Otherwise the artifact is
    /// streamed to `{dest}.tmp`, verified, and only then renamed into place.
    #[instrument(skip(self, page), fields(page = page.page_num, date = %page.issue_date))]
    pub async fn download_page(&self, page: &PageMetadata, dest: &Path) -> DownloadResult {
        match verify_artifact(dest, page.expected_size).await {
            Ok(_) => {
                debug!(path = %dest.display(), "artifact already on disk");
                return DownloadResult::ok(dest.to_path_buf(), 0);
            }
            Err(IntegrityFailure::Missing) => {}
            Err(failure) => {
                warn!(path = %dest.display(), %failure, "existing artifact rejected, re-downloading");
                remove_if_present(dest).await;
            }
        }

        let location = match self.source.resolve_artifact_url(page).await {
            Ok(location) => location,
            Err(e) => return DownloadResult::failed(actionable_source_message(&e)),
        };
        let expected = page.expected_size.or(location.expected_size);
        let tmp = temp_path(dest);

        let fetched = match retry_with_backoff(
            &self.policy,
            &self.limiter,
            &location.url,
            self.profile.download_delay(),
            |_| self.stats.increment_retried(),
            || self.fetch_verified(&location.url, &tmp, expected),
        )
        .await
        {
            Ok(bytes) => tokio::fs::rename(&tmp, dest)
                .await
                .map(|()| bytes)
                .map_err(|e| DownloadError::io(dest, e)),
            Err(e) => Err(e),
        };

        match fetched {
            Ok(bytes) => {
                self.stats.record_page(bytes);
                debug!(path = %dest.display(), bytes, "artifact saved");
                DownloadResult::ok(dest.to_path_buf(), bytes)
            }
            Err(e) => {
                remove_if_present(&tmp).await;
                DownloadResult::failed(actionable_download_message(&e))
            }
        }
    }

    /// One attempt: stream to `tmp` and verify it.
    async fn fetch_verified(&self, url: &str, tmp: &Path, expected: Option<u64>) -> Result<u64, DownloadError> {
        self.http.stream_to_path(url, tmp).await?;
        match verify_artifact(tmp, expected).await {
            Ok(bytes) => Ok(bytes),
            Err(failure) => {
                remove_if_present(tmp).await;
                Err(DownloadError::integrity(tmp, failure))
            }
        }
    }

    fn artifact_path(&self, page: &PageMetadata) -> PathBuf {
        self.output_dir
            .join(page.year().to_string())
            .join(page.artifact_file_name())
    }

    fn relative(&self, path: &Path) -> String {
        relative_path(&self.output_dir, path)
    }

    fn log_banner(&self, options: &RunOptions, state: &StoreState) {
        let years = options.years.as_ref().map_or_else(
            || "all available".to_string(),
            |ys| match (ys.first(), ys.last()) {
                (Some(first), Some(last)) if first != last => format!("{first}-{last}"),
                (Some(first), _) => first.to_string(),
                _ => "all available".to_string(),
            },
        );
        info!("{}", "=".repeat(70));
        info!("{} newspaper download", self.source.display_name());
        info!(
            identifier = %options.identifier,
            title = state.title.as_deref().unwrap_or("unknown"),
            "newspaper"
        );
        info!(years = %years, "years");
        info!(output = %self.output_dir.display(), "output");
        info!(
            speed = %self.profile,
            delay_secs = self.profile.download_delay().as_secs(),
            "speed"
        );
        if options.retry_failed {
            info!("mode: retrying previously failed downloads");
        }
        info!("{}", "=".repeat(70));
    }

    fn log_disk_space(&self) {
        match available_space(&self.output_dir) {
            Some(free) => {
                #[allow(clippy::cast_precision_loss)]
                let free_gb = free as f64 / (1024.0 * 1024.0 * 1024.0);
                info!(free_gb = format!("{free_gb:.1}"), "available disk space");
                if free < LOW_DISK_SPACE_BYTES {
                    warn!("less than 1 GB of free disk space");
                }
            }
            None => debug!("could not determine free disk space"),
        }
    }
}

/// Records a state change, flagging transitions outside the lifecycle.
fn advance(key: &str, current: &mut IssueState, next: IssueState) {
    if !current.can_transition_to(next) {
        warn!(issue = key, from = %current, to = %next, "unexpected issue state transition");
    }
    debug!(issue = key, from = %current, to = %next, "issue state");
    *current = next;
}

fn temp_path(dest: &Path) -> PathBuf {
    let mut name = dest.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

async fn remove_if_present(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!(path = %path.display(), "removed temporary file"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "could not remove temporary file"),
    }
}

/// Free space on the disk holding `dir` (longest matching mount point).
fn available_space(dir: &Path) -> Option<u64> {
    let dir = dir.canonicalize().ok()?;
    let disks = sysinfo::Disks::new_with_refreshed_list();
    disks
        .list()
        .iter()
        .filter(|disk| dir.starts_with(disk.mount_point()))
        .max_by_key(|disk| disk.mount_point().as_os_str().len())
        .map(sysinfo::Disk::available_space)
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

fn log_summary(summary: &RunSummary) {
    info!("{}", "=".repeat(70));
    info!("DOWNLOAD COMPLETE");
    info!(
        issues = summary.issues_total,
        downloaded = summary.downloaded,
        skipped = summary.skipped,
        partial = summary.partial,
        failed = summary.failed,
        pages = summary.pages_fetched,
        retries = summary.retries,
        megabytes = format!("{:.2}", summary.megabytes()),
        minutes = format!("{:.1}", summary.elapsed.as_secs_f64() / 60.0),
        "run summary"
    );
    info!("{}", "=".repeat(70));
    if !summary.is_clean() {
        info!(
            failed = summary.failed,
            partial = summary.partial,
            "some issues did not finish; rerun with --retry-failed"
        );
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_issue_state_transitions() {
        use IssueState::*;
        assert!(Unseen.can_transition_to(DiscoveringPages));
        assert!(DiscoveringPages.can_transition_to(Downloading));
        assert!(DiscoveringPages.can_transition_to(Failed));
        assert!(Downloading.can_transition_to(Complete));
        assert!(Downloading.can_transition_to(Partial));
        assert!(Partial.can_transition_to(DiscoveringPages));
        assert!(Failed.can_transition_to(DiscoveringPages));

        assert!(!Unseen.can_transition_to(Complete));
        assert!(!Complete.can_transition_to(DiscoveringPages));
        assert!(!DiscoveringPages.can_transition_to(Complete));
    }

    #[test]
    fn test_temp_path_appends_suffix() {
        assert_eq!(
            temp_path(Path::new("/out/1900/a_page01.pdf")),
            PathBuf::from("/out/1900/a_page01.pdf.tmp")
        );
    }

    #[tokio::test]
    async fn test_remove_if_present_tolerates_missing_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let tmp = dir.path().join("page01.pdf.tmp");
        std::fs::write(&tmp, b"partial").unwrap();
        remove_if_present(&tmp).await;
        assert!(!tmp.exists());
        remove_if_present(&tmp).await;
        assert!(!tmp.exists());
    }

    #[test]
    fn test_panic_message_variants() {
        let boxed: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(panic_message(boxed.as_ref()), "boom");
        let boxed: Box<dyn std::any::Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(boxed.as_ref()), "bang");
        let boxed: Box<dyn std::any::Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(boxed.as_ref()), "unknown panic");
    }

    #[test]
    fn test_run_options_defaults() {
        let options = RunOptions::new(Identifier::parse("sn83045462").unwrap());
        assert!(options.years.is_none());
        assert!(!options.retry_failed);
        assert!(options.max_issues.is_none());
    }

    #[test]
    fn test_available_space_for_temp_dir() {
        let dir = tempfile::TempDir::new().unwrap();
        // Some sandboxes expose no disks; only check consistency when they do.
        if let Some(free) = available_space(dir.path()) {
            assert!(free > 0);
        }
    }
}
