//! OCR text files: naming and provenance header.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::model::{PageMetadata, issue_key};

/// Which OCR tier produced a text file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OcrTier {
    /// Tier 1: text pre-computed by the archive.
    Remote,
    /// Tier 2: text recognised locally by a model.
    Local,
}

impl OcrTier {
    /// Key used in the store's per-page `ocr` map.
    #[must_use]
    pub fn key(self) -> &'static str {
        match self {
            Self::Remote => "tier1",
            Self::Local => "tier2",
        }
    }

    fn file_suffix(self) -> &'static str {
        match self {
            Self::Remote => "remote",
            Self::Local => "local",
        }
    }

    fn method_label(self) -> &'static str {
        match self {
            Self::Remote => "remote-text",
            Self::Local => "local-model",
        }
    }
}

impl fmt::Display for OcrTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// `{output}/{year}/{id}_{date}_ed-{ed}_page{NN}_{remote|local}.txt`
#[must_use]
pub fn text_output_path(output_dir: &Path, page: &PageMetadata, tier: OcrTier) -> PathBuf {
    output_dir.join(page.year().to_string()).join(format!(
        "{}_{}_page{:02}_{}.txt",
        page.identifier,
        issue_key(&page.issue_date, page.edition),
        page.page_num,
        tier.file_suffix()
    ))
}

/// Renders the provenance header followed by the text.
#[must_use]
pub fn render_text_file(page: &PageMetadata, tier: OcrTier, text: &str) -> String {
    format!(
        "# OCR Text: {} {}\n# Page: {}\n# OCR Method: {}\n# ---\n\n{text}",
        page.identifier,
        page.issue_date,
        page.page_num,
        tier.method_label()
    )
}

/// Writes a text file (creating its directory) and returns its word count.
///
/// # Errors
///
/// Returns the underlying I/O error.
pub fn write_text_file(
    path: &Path,
    page: &PageMetadata,
    tier: OcrTier,
    text: &str,
) -> std::io::Result<usize> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, render_text_file(page, tier, text))?;
    Ok(super::postprocess::word_count(text))
}
