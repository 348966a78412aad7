//! Durable record of what a run has downloaded or failed.
//!
//! One JSON document per output directory (`download_metadata.json`). It is
//! rewritten in full after every state change using a write-temp, sync,
//! backup, rename sequence, so the canonical file is always either the old
//! or the new document. [`MetadataStore::load`] never fails: a corrupt file
//! falls back to the backup, and a corrupt backup to an empty state.
//!
//! The store is advisory. The download engine re-checks every recorded
//! file on disk before trusting an entry.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

/// File name of the store inside the output directory.
pub const METADATA_FILE: &str = "download_metadata.json";

/// Errors raised while persisting the store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to serialize download metadata: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl StoreError {
    fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Why an issue ended up in the failed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    NoPdfFilesFound,
    AllPageDownloadsFailed,
    UnexpectedError,
}

impl FailureReason {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NoPdfFilesFound => "no_pdf_files_found",
            Self::AllPageDownloadsFailed => "all_page_downloads_failed",
            Self::UnexpectedError => "unexpected_error",
        }
    }
}

/// OCR output recorded for one page and tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OcrRecord {
    /// Path relative to the output directory.
    pub file: String,
    pub words: usize,
    pub processed_at: String,
}

/// One downloaded page of an issue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRecord {
    pub page: u32,
    /// Path relative to the output directory.
    pub file: String,
    #[serde(default)]
    pub size: u64,
    /// Keyed by tier name (`tier1`, `tier2`).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub ocr: BTreeMap<String, OcrRecord>,
}

fn default_true() -> bool {
    true
}

fn default_edition() -> u32 {
    1
}

/// An issue with at least one page on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueRecord {
    pub date: String,
    #[serde(default = "default_edition")]
    pub edition: u32,
    #[serde(default)]
    pub pages: Vec<PageRecord>,
    #[serde(default)]
    pub total_pages: usize,
    #[serde(default)]
    pub downloaded_pages: usize,
    /// Older records have no flag; they were only written on full success.
    #[serde(default = "default_true")]
    pub complete: bool,
    /// First page file. The only page reference in single-file records.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub downloaded_at: Option<String>,
}

impl IssueRecord {
    /// Relative paths of every page file, falling back to the single-file field.
    #[must_use]
    pub fn page_files(&self) -> Vec<&str> {
        if self.pages.is_empty() {
            self.file.as_deref().into_iter().collect()
        } else {
            self.pages.iter().map(|p| p.file.as_str()).collect()
        }
    }

    #[must_use]
    pub fn page(&self, page: u32) -> Option<&PageRecord> {
        self.pages.iter().find(|p| p.page == page)
    }

    pub fn page_mut(&mut self, page: u32) -> Option<&mut PageRecord> {
        self.pages.iter_mut().find(|p| p.page == page)
    }
}

/// An issue that produced no usable pages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedRecord {
    pub date: String,
    #[serde(default = "default_edition")]
    pub edition: u32,
    #[serde(default, alias = "url")]
    pub item_url: String,
    pub reason: FailureReason,
    #[serde(default)]
    pub failed_at: String,
}

/// The whole persisted document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreState {
    #[serde(default, alias = "lccn", skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
    #[serde(default, alias = "newspaper_title", skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Keyed by issue key (`{date}_ed-{edition}`).
    #[serde(default)]
    pub downloaded: BTreeMap<String, IssueRecord>,
    #[serde(default)]
    pub failed: BTreeMap<String, FailedRecord>,
}

impl StoreState {
    /// Records a (possibly partial) success and clears any failure for the key.
    pub fn record_download(&mut self, key: &str, record: IssueRecord) {
        self.failed.remove(key);
        self.downloaded.insert(key.to_string(), record);
    }

    /// Records a failure; a failed issue has no downloaded entry.
    pub fn record_failure(&mut self, key: &str, record: FailedRecord) {
        self.downloaded.remove(key);
        self.failed.insert(key.to_string(), record);
    }
}

/// `path` relative to `output_dir`, with forward slashes on every platform.
#[must_use]
pub fn relative_path(output_dir: &Path, path: &Path) -> String {
    path.strip_prefix(output_dir)
        .unwrap_or(path)
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// UTC timestamp in the store's format (RFC 3339, whole seconds).
#[must_use]
pub fn timestamp_now() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

/// Handle on the store file of one output directory.
#[derive(Debug, Clone)]
pub struct MetadataStore {
    path: PathBuf,
}

impl MetadataStore {
    #[must_use]
    pub fn new(output_dir: &Path) -> Self {
        Self {
            path: output_dir.join(METADATA_FILE),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn backup_path(&self) -> PathBuf {
        self.path.with_extension("json.bak")
    }

    #[must_use]
    pub fn temp_path(&self) -> PathBuf {
        self.path.with_extension("json.tmp")
    }

    /// Loads the store. Never fails.
    ///
    /// A missing file yields an empty state. An unreadable or corrupt file
    /// falls back to the backup, then to an empty state.
    #[instrument(skip(self), fields(path = %self.path.display()))]
    pub fn load(&self) -> StoreState {
        if !self.path.exists() {
            debug!("no download metadata yet, starting fresh");
            return StoreState::default();
        }

        match read_state(&self.path) {
            Ok(state) => return state,
            Err(reason) => warn!(%reason, "download metadata unreadable, trying backup"),
        }

        let backup = self.backup_path();
        match read_state(&backup) {
            Ok(state) => {
                info!(backup = %backup.display(), "recovered download metadata from backup");
                state
            }
            Err(reason) => {
                warn!(%reason, "backup unusable as well, starting with empty metadata");
                StoreState::default()
            }
        }
    }

    /// Persists `state` atomically.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when serialization or any file operation fails.
    /// The canonical file is left untouched in that case.
    #[instrument(skip(self, state), fields(path = %self.path.display()))]
    pub fn save(&self, state: &StoreState) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(state)?;
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
        }

        let temp = self.temp_path();
        let mut file = File::create(&temp).map_err(|e| StoreError::io(&temp, e))?;
        file.write_all(&bytes)
            .and_then(|()| file.sync_all())
            .map_err(|e| StoreError::io(&temp, e))?;
        drop(file);

        if self.path.exists() {
            let backup = self.backup_path();
            fs::copy(&self.path, &backup).map_err(|e| StoreError::io(&backup, e))?;
        }
        fs::rename(&temp, &self.path).map_err(|e| StoreError::io(&self.path, e))?;

        debug!(
            downloaded = state.downloaded.len(),
            failed = state.failed.len(),
            "download metadata saved"
        );
        Ok(())
    }
}

fn read_state(path: &Path) -> Result<StoreState, String> {
    let raw = fs::read_to_string(path).map_err(|e| format!("{}: {e}", path.display()))?;
    serde_json::from_str(&raw).map_err(|e| format!("{}: {e}", path.display()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(date: &str, complete: bool) -> IssueRecord {
        IssueRecord {
            date: date.to_string(),
            edition: 1,
            pages: vec![PageRecord {
                page: 1,
                file: format!("1900/x_{date}_ed-1_page01.pdf"),
                size: 2048,
                ocr: BTreeMap::new(),
            }],
            total_pages: 1,
            downloaded_pages: 1,
            complete,
            file: Some(format!("1900/x_{date}_ed-1_page01.pdf")),
            downloaded_at: Some("2024-01-01T00:00:00Z".to_string()),
        }
    }

    #[test]
    fn test_load_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = MetadataStore::new(dir.path());
        assert_eq!(store.load(), StoreState::default());
    }

    #[test]
    fn test_save_then_load_and_backup_rotation() {
        let dir = TempDir::new().unwrap();
        let store = MetadataStore::new(dir.path());

        let mut state = StoreState {
            identifier: Some("sn83045462".to_string()),
            ..StoreState::default()
        };
        state.record_download("1900-01-01_ed-1", record("1900-01-01", true));
        store.save(&state).unwrap();
        assert!(!store.backup_path().exists());
        assert!(!store.temp_path().exists());

        state.record_download("1900-01-02_ed-1", record("1900-01-02", true));
        store.save(&state).unwrap();
        assert!(store.backup_path().exists());

        let loaded = store.load();
        assert_eq!(loaded, state);
        let backup: StoreState =
            serde_json::from_str(&fs::read_to_string(store.backup_path()).unwrap()).unwrap();
        assert_eq!(backup.downloaded.len(), 1);
    }

    #[test]
    fn test_corrupt_file_recovers_from_backup() {
        let dir = TempDir::new().unwrap();
        let store = MetadataStore::new(dir.path());
        let mut state = StoreState::default();
        state.record_download("1900-01-01_ed-1", record("1900-01-01", true));
        store.save(&state).unwrap();
        store.save(&state).unwrap();

        fs::write(store.path(), "{ truncated").unwrap();
        assert_eq!(store.load(), state);
    }

    #[test]
    fn test_corrupt_file_and_backup_yield_empty_state() {
        let dir = TempDir::new().unwrap();
        let store = MetadataStore::new(dir.path());
        fs::write(store.path(), "not json").unwrap();
        fs::write(store.backup_path(), "also not json").unwrap();
        assert_eq!(store.load(), StoreState::default());
    }

    #[test]
    fn test_success_clears_failure_and_failure_clears_download() {
        let mut state = StoreState::default();
        state.record_failure(
            "1900-01-01_ed-1",
            FailedRecord {
                date: "1900-01-01".to_string(),
                edition: 1,
                item_url: "https://example.com/item".to_string(),
                reason: FailureReason::NoPdfFilesFound,
                failed_at: String::new(),
            },
        );
        state.record_download("1900-01-01_ed-1", record("1900-01-01", true));
        assert!(state.failed.is_empty());
        assert_eq!(state.downloaded.len(), 1);
    }

    #[test]
    fn test_reads_legacy_field_names_and_shapes() {
        let raw = r#"{
            "lccn": "sn83045462",
            "newspaper_title": "Evening Star",
            "downloaded": {
                "1900-01-01_ed-1": {"date": "1900-01-01", "edition": 1, "file": "1900/a.pdf"}
            },
            "failed": {
                "1900-01-02_ed-1": {"date": "1900-01-02", "edition": 1,
                    "url": "https://example.com/item/", "reason": "all_page_downloads_failed"}
            }
        }"#;
        let state: StoreState = serde_json::from_str(raw).unwrap();
        assert_eq!(state.identifier.as_deref(), Some("sn83045462"));
        assert_eq!(state.title.as_deref(), Some("Evening Star"));

        let legacy = &state.downloaded["1900-01-01_ed-1"];
        assert!(legacy.complete);
        assert_eq!(legacy.page_files(), vec!["1900/a.pdf"]);

        let failed = &state.failed["1900-01-02_ed-1"];
        assert_eq!(failed.item_url, "https://example.com/item/");
        assert_eq!(failed.reason, FailureReason::AllPageDownloadsFailed);
    }

    #[test]
    fn test_reason_serializes_snake_case() {
        let json = serde_json::to_string(&FailureReason::UnexpectedError).unwrap();
        assert_eq!(json, format!("\"{}\"", FailureReason::UnexpectedError.as_str()));
    }

    #[test]
    fn test_relative_path_uses_forward_slashes() {
        let out = Path::new("/data/papers");
        assert_eq!(
            relative_path(out, &out.join("1900").join("a_page01.pdf")),
            "1900/a_page01.pdf"
        );
        assert_eq!(relative_path(out, Path::new("elsewhere.pdf")), "elsewhere.pdf");
    }
}
