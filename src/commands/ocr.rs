//! OCR command handler: text extraction over an existing download.

use anyhow::{Context, Result, bail};
use newsarchive_core::MetadataStore;
use newsarchive_core::ocr::{BatchSummary, OcrMode, run_batch};
use tracing::info;

use crate::ProcessExit;
use crate::app::context::RunContext;
use crate::cli::OcrArgs;

pub(crate) async fn run_ocr_command(ctx: &RunContext, args: &OcrArgs) -> Result<ProcessExit> {
    let output_dir = ctx.output_dir(args.output.as_deref(), &args.identifier);
    let store = MetadataStore::new(&output_dir);
    if !store.path().exists() {
        bail!(
            "No download metadata found at {}\n  Suggestion: run `newsarchive download {}` first or pass --output",
            store.path().display(),
            args.identifier
        );
    }

    let mut orchestrator = ctx.ocr_orchestrator(args.ocr, OcrMode::Both, &output_dir, args.force_ocr, None);
    if !orchestrator.mode().is_enabled() {
        info!("OCR mode is none, nothing to do");
        return Ok(ProcessExit::Success);
    }

    let summary = run_batch(&mut orchestrator, &store, &args.identifier, args.date.as_deref())
        .await
        .context("OCR batch aborted")?;
    info!(
        issues = summary.issues,
        pages = summary.pages,
        succeeded = summary.succeeded,
        skipped = summary.skipped,
        failed = summary.failed,
        "OCR batch finished"
    );
    Ok(batch_exit_outcome(&summary))
}

fn batch_exit_outcome(summary: &BatchSummary) -> ProcessExit {
    if summary.failed == 0 {
        ProcessExit::Success
    } else if summary.succeeded + summary.skipped > 0 {
        ProcessExit::Partial
    } else {
        ProcessExit::Failure
    }
}
