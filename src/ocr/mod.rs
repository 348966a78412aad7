//! Two-tier OCR for downloaded pages.
//!
//! Tier 1 asks the archive for text it already computed and cleans it up.
//! Tier 2 runs a local recognition model over the page artifacts in small
//! batches. The tiers are independent: either may fail for a page without
//! affecting the other, and every outcome lands in the page's `ocr` map in
//! the metadata store.

mod batch;
mod model;
mod output;
mod postprocess;

pub use batch::{BatchSummary, run_batch};
pub use model::{
    CommandModel, CommandModelLoader, LayoutRegion, ModelHandle, ModelLoader, OcrError, PageImage,
    RecognitionModel,
};
pub use output::{OcrTier, render_text_file, text_output_path, write_text_file};
pub use postprocess::{clean_remote_text, is_heading, word_count};

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use tracing::{info, instrument, warn};

use crate::model::{OcrResult, PageMetadata};
use crate::source::ArchiveSource;
use crate::store::{IssueRecord, OcrRecord, relative_path, timestamp_now};

/// Pages per tier-2 model call.
pub const DEFAULT_BATCH_SIZE: usize = 4;

/// Which tiers to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OcrMode {
    #[default]
    None,
    Tier1,
    Tier2,
    Both,
}

impl OcrMode {
    #[must_use]
    pub fn runs_remote(self) -> bool {
        matches!(self, Self::Tier1 | Self::Both)
    }

    #[must_use]
    pub fn runs_local(self) -> bool {
        matches!(self, Self::Tier2 | Self::Both)
    }

    #[must_use]
    pub fn is_enabled(self) -> bool {
        self != Self::None
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Tier1 => "tier1",
            Self::Tier2 => "tier2",
            Self::Both => "both",
        }
    }
}

impl fmt::Display for OcrMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OcrMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "none" | "off" => Ok(Self::None),
            "tier1" | "loc" | "remote" => Ok(Self::Tier1),
            "tier2" | "surya" | "local" => Ok(Self::Tier2),
            "both" => Ok(Self::Both),
            other => Err(format!(
                "unknown OCR mode '{other}' (expected none, tier1, tier2 or both)"
            )),
        }
    }
}

/// A downloaded page queued for OCR.
#[derive(Debug, Clone)]
pub struct OcrJob {
    pub page: PageMetadata,
    pub artifact: PathBuf,
}

/// Tier outcomes for one page. `None` means the tier was not requested.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageOcrOutcome {
    pub page_num: u32,
    pub remote: Option<OcrResult>,
    pub local: Option<OcrResult>,
}

impl PageOcrOutcome {
    fn tiers(&self) -> impl Iterator<Item = (OcrTier, &OcrResult)> {
        [(OcrTier::Remote, &self.remote), (OcrTier::Local, &self.local)]
            .into_iter()
            .filter_map(|(tier, result)| result.as_ref().map(|r| (tier, r)))
    }
}

/// Runs the requested tiers over pages of one issue at a time.
pub struct OcrOrchestrator {
    mode: OcrMode,
    force: bool,
    batch_size: usize,
    output_dir: PathBuf,
    source: Arc<dyn ArchiveSource>,
    model: ModelHandle,
}

impl fmt::Debug for OcrOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OcrOrchestrator")
            .field("mode", &self.mode)
            .field("force", &self.force)
            .field("batch_size", &self.batch_size)
            .field("output_dir", &self.output_dir)
            .field("source", &self.source.name())
            .field("model", &self.model)
            .finish()
    }
}

impl OcrOrchestrator {
    #[must_use]
    pub fn new(
        mode: OcrMode,
        source: Arc<dyn ArchiveSource>,
        output_dir: impl Into<PathBuf>,
        loader: Arc<dyn ModelLoader>,
    ) -> Self {
        Self {
            mode,
            force: false,
            batch_size: DEFAULT_BATCH_SIZE,
            output_dir: output_dir.into(),
            source,
            model: ModelHandle::new(loader),
        }
    }

    /// Regenerate outputs that already exist.
    #[must_use]
    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    #[must_use]
    pub fn mode(&self) -> OcrMode {
        self.mode
    }

    /// Runs every requested tier over `jobs`, returning one outcome per job
    /// in input order.
    #[instrument(skip(self, jobs), fields(pages = jobs.len(), mode = %self.mode))]
    pub async fn process_pages(&mut self, jobs: &[OcrJob]) -> Vec<PageOcrOutcome> {
        let mut outcomes: Vec<PageOcrOutcome> = jobs
            .iter()
            .map(|job| PageOcrOutcome {
                page_num: job.page.page_num,
                ..PageOcrOutcome::default()
            })
            .collect();

        if self.mode.runs_remote() {
            for (job, outcome) in jobs.iter().zip(outcomes.iter_mut()) {
                outcome.remote = Some(self.run_remote(job).await);
            }
        }

        if self.mode.runs_local() {
            let local = self.run_local(jobs).await;
            for (outcome, result) in outcomes.iter_mut().zip(local) {
                outcome.local = Some(result);
            }
        }

        for (job, outcome) in jobs.iter().zip(&outcomes) {
            for (tier, result) in outcome.tiers() {
                log_outcome(&job.page, tier, result);
            }
        }
        outcomes
    }

    async fn run_remote(&self, job: &OcrJob) -> OcrResult {
        let path = text_output_path(&self.output_dir, &job.page, OcrTier::Remote);
        if !self.force && path.exists() {
            return OcrResult::skipped(path);
        }
        self.source.fetch_remote_text(&job.page, &self.output_dir).await
    }

    async fn run_local(&mut self, jobs: &[OcrJob]) -> Vec<OcrResult> {
        let mut results: Vec<Option<OcrResult>> = vec![None; jobs.len()];
        let mut pending = Vec::new();

        for (index, job) in jobs.iter().enumerate() {
            let path = text_output_path(&self.output_dir, &job.page, OcrTier::Local);
            if !self.force && path.exists() {
                results[index] = Some(OcrResult::skipped(path));
            } else {
                pending.push(index);
            }
        }

        for chunk in pending.chunks(self.batch_size) {
            if let Err(e) = self.model.ensure_loaded().await {
                for &index in chunk {
                    results[index] = Some(OcrResult::failed(e.to_string()));
                }
                continue;
            }

            let mut batch = Vec::with_capacity(chunk.len());
            let mut images = Vec::with_capacity(chunk.len());
            for &index in chunk {
                let artifact = &jobs[index].artifact;
                match tokio::fs::read(artifact).await {
                    Ok(bytes) => {
                        batch.push(index);
                        images.push(PageImage {
                            path: artifact.clone(),
                            bytes,
                        });
                    }
                    Err(e) => {
                        let err = OcrError::Artifact {
                            path: artifact.clone(),
                            reason: e.to_string(),
                        };
                        results[index] = Some(OcrResult::failed(err.to_string()));
                    }
                }
            }
            if batch.is_empty() {
                continue;
            }

            // `run_batch` consumes the image buffers.
            match self.model.run_batch(images).await {
                Ok(pages) => {
                    for (&index, lines) in batch.iter().zip(pages) {
                        results[index] = Some(self.write_local(&jobs[index].page, &lines));
                    }
                }
                Err(e) => {
                    warn!(error = %e, pages = batch.len(), "tier-2 batch failed");
                    for &index in &batch {
                        results[index] = Some(OcrResult::failed(e.to_string()));
                    }
                }
            }
        }

        results
            .into_iter()
            .map(|r| r.unwrap_or_else(|| OcrResult::failed("page not processed")))
            .collect()
    }

    fn write_local(&self, page: &PageMetadata, lines: &[String]) -> OcrResult {
        let path = text_output_path(&self.output_dir, page, OcrTier::Local);
        let text = lines.join("\n");
        match write_text_file(&path, page, OcrTier::Local, &text) {
            Ok(words) => OcrResult::ok(path, words),
            Err(e) => OcrResult::failed(format!("failed to write {}: {e}", path.display())),
        }
    }
}

fn log_outcome(page: &PageMetadata, tier: OcrTier, result: &OcrResult) {
    if result.skipped {
        info!(date = %page.issue_date, page = page.page_num, %tier, "OCR output exists, skipped");
    } else if result.success {
        info!(
            date = %page.issue_date,
            page = page.page_num,
            %tier,
            words = result.word_count,
            "OCR complete"
        );
    } else {
        warn!(
            date = %page.issue_date,
            page = page.page_num,
            %tier,
            error = result.error.as_deref().unwrap_or("unknown"),
            "OCR failed"
        );
    }
}

/// Persists successful tier outcomes into the issue record's page entries.
///
/// A skipped output is recorded only when the page has no entry for that
/// tier yet; failures leave the map untouched.
pub fn apply_outcomes(record: &mut IssueRecord, output_dir: &Path, outcomes: &[PageOcrOutcome]) {
    for outcome in outcomes {
        let Some(page) = record.page_mut(outcome.page_num) else {
            continue;
        };
        for (tier, result) in outcome.tiers() {
            let (true, Some(path)) = (result.success, result.text_path.as_ref()) else {
                continue;
            };
            let file = relative_path(output_dir, path);
            if result.skipped {
                if page.ocr.contains_key(tier.key()) {
                    continue;
                }
                let words = existing_word_count(path);
                page.ocr.insert(
                    tier.key().to_string(),
                    OcrRecord {
                        file,
                        words,
                        processed_at: timestamp_now(),
                    },
                );
            } else {
                page.ocr.insert(
                    tier.key().to_string(),
                    OcrRecord {
                        file,
                        words: result.word_count,
                        processed_at: timestamp_now(),
                    },
                );
            }
        }
    }
}

/// Word count of an existing text file's body (after the `# ---` header).
fn existing_word_count(path: &Path) -> usize {
    let Ok(contents) = std::fs::read_to_string(path) else {
        return 0;
    };
    let body = contents
        .split_once("# ---\n")
        .map_or(contents.as_str(), |(_, body)| body);
    word_count(body)
}
