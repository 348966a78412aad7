use std::collections::BTreeSet;
use std::path::Path;

use tracing::{debug, info, warn};

use crate::download::integrity::verify_artifact;
use crate::model::{Identifier, IssueMetadata, parse_issue_date};
use crate::source::ArchiveSource;
use crate::store::{FailedRecord, FailureReason, IssueRecord, PageRecord, StoreState, timestamp_now};

/// What re-validation concluded about a recorded issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Verification {
    /// Every page is on disk and intact.
    Verified,
    /// Pages are intact but the issue was only partly downloaded.
    Incomplete,
    /// `bad` of `total` page files were missing or corrupt.
    Damaged { bad: usize, total: usize },
}

/// Re-checks every page file of `record`. Corrupt files are deleted so the
/// next download attempt starts clean.
pub(super) async fn verify_recorded_issue(output_dir: &Path, record: &IssueRecord) -> Verification {
    let files = record.page_files();
    let mut bad = 0;
    for file in &files {
        let path = output_dir.join(file);
        let expected = record
            .pages
            .iter()
            .find(|p| p.file == *file)
            .map(|p| p.size)
            .filter(|&size| size > 0);
        if let Err(failure) = verify_artifact(&path, expected).await {
            debug!(path = %path.display(), %failure, "recorded page failed verification");
            bad += 1;
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = %path.display(), error = %e, "could not remove corrupt page"),
            }
        }
    }

    if files.is_empty() || bad > 0 {
        Verification::Damaged {
            bad: bad.max(usize::from(files.is_empty())),
            total: files.len(),
        }
    } else if record.complete {
        Verification::Verified
    } else {
        Verification::Incomplete
    }
}

/// Issues to reprocess in retry mode: every failed record plus every
/// incomplete download, restricted to `years` when given.
pub(super) fn retry_candidates(
    state: &StoreState,
    source: &dyn ArchiveSource,
    identifier: &Identifier,
    years: Option<&BTreeSet<i32>>,
) -> Vec<IssueMetadata> {
    let title = state.title.clone().unwrap_or_default();
    let wanted = |date: &str| match parse_issue_date(date) {
        Ok((_, year)) => years.is_none_or(|ys| ys.contains(&year)).then_some(year),
        Err(e) => {
            warn!(date, error = %e, "skipping stored record with a malformed date");
            None
        }
    };

    let failed = state.failed.values().filter_map(|record| {
        let year = wanted(&record.date)?;
        let url = if record.item_url.is_empty() {
            source.build_issue_url(identifier, &record.date, record.edition)
        } else {
            record.item_url.clone()
        };
        Some(IssueMetadata {
            date: record.date.clone(),
            edition: record.edition,
            url,
            year,
            identifier: identifier.clone(),
            title: title.clone(),
        })
    });

    let incomplete = state
        .downloaded
        .values()
        .filter(|record| !record.complete)
        .filter_map(|record| {
            let year = wanted(&record.date)?;
            Some(IssueMetadata {
                date: record.date.clone(),
                edition: record.edition,
                url: source.build_issue_url(identifier, &record.date, record.edition),
                year,
                identifier: identifier.clone(),
                title: title.clone(),
            })
        });

    let mut issues: Vec<IssueMetadata> = failed.chain(incomplete).collect();
    issues.sort_by(|a, b| (&a.date, a.edition).cmp(&(&b.date, b.edition)));
    issues.dedup_by(|a, b| a.date == b.date && a.edition == b.edition);

    if issues.is_empty() {
        info!("no failed or incomplete downloads to retry");
    } else {
        info!(issues = issues.len(), "found issues to retry");
    }
    issues
}

/// Builds the downloaded record, carrying over OCR entries of pages that
/// were recorded before.
pub(super) fn issue_record(
    issue: &IssueMetadata,
    mut pages: Vec<PageRecord>,
    total_pages: usize,
    previous: Option<&IssueRecord>,
) -> IssueRecord {
    if let Some(previous) = previous {
        for page in &mut pages {
            if let Some(old) = previous.page(page.page)
                && old.file == page.file
            {
                for (tier, entry) in &old.ocr {
                    page.ocr.entry(tier.clone()).or_insert_with(|| entry.clone());
                }
            }
        }
    }

    IssueRecord {
        date: issue.date.clone(),
        edition: issue.edition,
        total_pages,
        downloaded_pages: pages.len(),
        complete: pages.len() == total_pages,
        file: pages.first().map(|p| p.file.clone()),
        downloaded_at: Some(timestamp_now()),
        pages,
    }
}

pub(super) fn failed_record(issue: &IssueMetadata, reason: FailureReason) -> FailedRecord {
    FailedRecord {
        date: issue.date.clone(),
        edition: issue.edition,
        item_url: issue.url.clone(),
        reason,
        failed_at: timestamp_now(),
    }
}
