//! Shared runtime context built from CLI flags and the config file.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use newsarchive_core::download::constants::{CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS};
use newsarchive_core::model::Identifier;
use newsarchive_core::ocr::{CommandModelLoader, DEFAULT_BATCH_SIZE, OcrMode, OcrOrchestrator};
use newsarchive_core::{
    ArchiveSource, HttpClient, RateLimiter, RetryPolicy, SourceContext, SpeedProfile,
    build_default_source_registry,
};
use tracing::debug;

use crate::app_config::FileConfig;

/// Overrides the archive API base URL (mirrors, tests).
pub(crate) const ENV_BASE_URL: &str = "NEWSARCHIVE_BASE_URL";

/// Parent of per-identifier output directories when neither flag nor config names one.
pub(crate) const DEFAULT_DOWNLOAD_ROOT: &str = "downloads";

const SOURCE_NAME: &str = "loc";

/// Client, pacing gate, policy and source, built once per invocation.
pub(crate) struct RunContext {
    pub(crate) config: FileConfig,
    pub(crate) profile: SpeedProfile,
    pub(crate) source_ctx: SourceContext,
    pub(crate) source: Arc<dyn ArchiveSource>,
}

impl RunContext {
    /// Builds the context; `speed` is the CLI flag, which beats the config file.
    pub(crate) fn build(config: FileConfig, speed: Option<SpeedProfile>) -> Result<Self> {
        let profile = speed.or(config.speed).unwrap_or_default();
        let http = HttpClient::with_timeouts(
            config.connect_timeout_secs.unwrap_or(CONNECT_TIMEOUT_SECS),
            config.read_timeout_secs.unwrap_or(READ_TIMEOUT_SECS),
        )
        .context("Failed to build HTTP client")?;
        let limiter = Arc::new(RateLimiter::new(profile.download_delay()));
        let mut source_ctx = SourceContext::new(http, limiter, profile.scan_delay())
            .with_policy(RetryPolicy::with_max_attempts(config.max_retries_or_default()));
        if let Some(base_url) = base_url_override() {
            debug!(%base_url, "using archive base URL override");
            source_ctx = source_ctx.with_base_url(base_url);
        }
        let source = build_default_source_registry()
            .build(SOURCE_NAME, source_ctx.clone())
            .context("Failed to build archive source")?;
        Ok(Self {
            config,
            profile,
            source_ctx,
            source,
        })
    }

    /// `--output`, else `{config output_dir}/{id}`, else `downloads/{id}`.
    pub(crate) fn output_dir(&self, explicit: Option<&Path>, identifier: &Identifier) -> PathBuf {
        resolve_output_dir(explicit, self.config.output_dir.as_deref(), identifier)
    }

    /// OCR orchestrator for `mode`; CLI `mode` beats the config file.
    pub(crate) fn ocr_orchestrator(
        &self,
        mode: Option<OcrMode>,
        default_mode: OcrMode,
        output_dir: &Path,
        force: bool,
        batch_size: Option<usize>,
    ) -> OcrOrchestrator {
        let mode = mode.or(self.config.ocr).unwrap_or(default_mode);
        let loader = Arc::new(CommandModelLoader::new(self.config.tier2_command.clone()));
        OcrOrchestrator::new(mode, Arc::clone(&self.source), output_dir, loader)
            .with_force(force)
            .with_batch_size(
                batch_size
                    .or(self.config.ocr_batch_size)
                    .unwrap_or(DEFAULT_BATCH_SIZE),
            )
    }
}

fn base_url_override() -> Option<String> {
    std::env::var(ENV_BASE_URL)
        .ok()
        .map(|value| value.trim().trim_end_matches('/').to_string())
        .filter(|value| !value.is_empty())
}

fn resolve_output_dir(explicit: Option<&Path>, configured_root: Option<&Path>, identifier: &Identifier) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }
    configured_root
        .unwrap_or_else(|| Path::new(DEFAULT_DOWNLOAD_ROOT))
        .join(identifier.as_str())
}
