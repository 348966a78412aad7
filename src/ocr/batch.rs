//! OCR over an existing download directory, without downloading.

use serde::Serialize;
use tracing::{info, instrument, warn};

use super::{OcrJob, OcrOrchestrator, PageOcrOutcome, apply_outcomes};
use crate::model::{Identifier, PageMetadata};
use crate::store::{IssueRecord, MetadataStore, StoreError};

/// Totals for one batch-mode run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub issues: usize,
    pub pages: usize,
    pub succeeded: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl BatchSummary {
    fn tally(&mut self, outcomes: &[PageOcrOutcome]) {
        self.pages += outcomes.len();
        for result in outcomes.iter().flat_map(|o| o.tiers()).map(|(_, r)| r) {
            if result.skipped {
                self.skipped += 1;
            } else if result.success {
                self.succeeded += 1;
            } else {
                self.failed += 1;
            }
        }
    }
}

/// Rebuilds page jobs from the store's downloaded records (optionally only
/// the issues of `date`) and runs the orchestrator over each issue, saving
/// the store after every issue.
///
/// # Errors
///
/// Returns [`StoreError`] if the store cannot be saved.
#[instrument(skip(orchestrator, store), fields(identifier = %identifier))]
pub async fn run_batch(
    orchestrator: &mut OcrOrchestrator,
    store: &MetadataStore,
    identifier: &Identifier,
    date: Option<&str>,
) -> Result<BatchSummary, StoreError> {
    let mut state = store.load();
    let mut summary = BatchSummary::default();

    let keys: Vec<String> = state
        .downloaded
        .iter()
        .filter(|(_, record)| date.is_none_or(|d| record.date == d))
        .map(|(key, _)| key.clone())
        .collect();

    if keys.is_empty() {
        warn!(date = date.unwrap_or("any"), "no downloaded issues to process");
        return Ok(summary);
    }
    info!(issues = keys.len(), mode = %orchestrator.mode(), "starting OCR batch");

    for key in keys {
        let Some(record) = state.downloaded.get_mut(&key) else {
            continue;
        };
        normalize_legacy_record(record);
        let jobs = jobs_for_record(orchestrator, identifier, record);
        if jobs.is_empty() {
            continue;
        }

        let outcomes = orchestrator.process_pages(&jobs).await;
        apply_outcomes(record, &orchestrator.output_dir, &outcomes);
        summary.issues += 1;
        summary.tally(&outcomes);
        store.save(&state)?;
    }

    info!(
        issues = summary.issues,
        pages = summary.pages,
        succeeded = summary.succeeded,
        skipped = summary.skipped,
        failed = summary.failed,
        "OCR batch finished"
    );
    Ok(summary)
}

/// Records written before per-page entries existed name a single `file`;
/// treat it as page 1 so OCR results have somewhere to go.
fn normalize_legacy_record(record: &mut IssueRecord) {
    if record.pages.is_empty()
        && let Some(file) = record.file.clone()
    {
        record.pages.push(crate::store::PageRecord {
            page: 1,
            file,
            size: 0,
            ocr: std::collections::BTreeMap::new(),
        });
    }
}

fn jobs_for_record(
    orchestrator: &OcrOrchestrator,
    identifier: &Identifier,
    record: &IssueRecord,
) -> Vec<OcrJob> {
    record
        .pages
        .iter()
        .map(|page| OcrJob {
            page: PageMetadata {
                issue_date: record.date.clone(),
                edition: record.edition,
                page_num: page.page,
                url: orchestrator.source.build_page_url(
                    identifier,
                    &record.date,
                    record.edition,
                    page.page,
                ),
                pdf_url: None,
                expected_size: None,
                identifier: identifier.clone(),
            },
            artifact: orchestrator.output_dir.join(&page.file),
        })
        .collect()
}
