//! Download command handler: runs the engine for one identifier.

use std::io::IsTerminal;
use std::sync::Arc;

use anyhow::{Context, Result};
use newsarchive_core::{DownloadEngine, OcrMode, RunOptions};
use tracing::info;

use crate::ProcessExit;
use crate::app::context::RunContext;
use crate::app::exit_handler::determine_exit_outcome;
use crate::app::progress_manager::{spawn_progress_ui, stop_progress_ui};
use crate::app::terminal;
use crate::cli::DownloadArgs;

pub(crate) async fn run_download_command(ctx: &RunContext, args: &DownloadArgs, quiet: bool) -> Result<ProcessExit> {
    let output_dir = ctx.output_dir(args.output.as_deref(), &args.identifier);
    let orchestrator = ctx.ocr_orchestrator(
        args.ocr,
        OcrMode::None,
        &output_dir,
        args.force_ocr,
        args.ocr_batch_size.map(usize::from),
    );
    info!(output = %output_dir.display(), ocr = %orchestrator.mode(), "preparing download");

    let mut engine = DownloadEngine::new(Arc::clone(&ctx.source), &ctx.source_ctx, ctx.profile, &output_dir)
        .with_ocr(orchestrator);

    let mut options = RunOptions::new(args.identifier.clone());
    options.years.clone_from(&args.years);
    options.retry_failed = args.retry_failed;
    options.max_issues = args
        .max_issues
        .map(usize::try_from)
        .transpose()
        .context("--max-issues is too large for this platform")?;

    let use_spinner = terminal::should_use_spinner(std::io::stderr().is_terminal(), quiet, terminal::is_dumb_terminal());
    let (handle, stop) = spawn_progress_ui(use_spinner, Arc::clone(&ctx.source_ctx.stats));
    let result = engine.run(options).await;
    stop_progress_ui(handle, &stop).await;

    let summary = result.context("Download run aborted")?;
    Ok(determine_exit_outcome(&summary))
}
