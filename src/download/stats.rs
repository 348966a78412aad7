//! Run counters shared by the engine and the archive source.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use serde::Serialize;

/// Statistics for one download run.
///
/// Atomic so the source (discovery fan-out) and the engine can update the
/// same instance through an `Arc`.
#[derive(Debug, Default)]
pub struct DownloadStats {
    downloaded: AtomicUsize,
    skipped: AtomicUsize,
    failed: AtomicUsize,
    partial: AtomicUsize,
    bytes: AtomicU64,
    pages_fetched: AtomicUsize,
    retried: AtomicUsize,
}

impl DownloadStats {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn downloaded(&self) -> usize {
        self.downloaded.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn skipped(&self) -> usize {
        self.skipped.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn failed(&self) -> usize {
        self.failed.load(Ordering::SeqCst)
    }

    /// Issues that were recorded with some but not all pages.
    #[must_use]
    pub fn partial(&self) -> usize {
        self.partial.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::SeqCst)
    }

    /// Page artifacts actually transferred (skips excluded).
    #[must_use]
    pub fn pages_fetched(&self) -> usize {
        self.pages_fetched.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn retried(&self) -> usize {
        self.retried.load(Ordering::SeqCst)
    }

    pub(crate) fn increment_downloaded(&self) {
        self.downloaded.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_failed(&self) {
        self.failed.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_partial(&self) {
        self.partial.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn record_page(&self, bytes: u64) {
        self.pages_fetched.fetch_add(1, Ordering::SeqCst);
        self.bytes.fetch_add(bytes, Ordering::SeqCst);
    }

    pub(crate) fn increment_retried(&self) {
        self.retried.fetch_add(1, Ordering::SeqCst);
    }

    /// Freezes the counters into a summary.
    #[must_use]
    pub fn summary(&self, issues_total: usize, elapsed: Duration) -> RunSummary {
        RunSummary {
            issues_total,
            downloaded: self.downloaded(),
            skipped: self.skipped(),
            failed: self.failed(),
            partial: self.partial(),
            bytes: self.bytes(),
            pages_fetched: self.pages_fetched(),
            retries: self.retried(),
            elapsed,
        }
    }
}

/// Final report of a download run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub issues_total: usize,
    pub downloaded: usize,
    pub skipped: usize,
    pub failed: usize,
    pub partial: usize,
    pub bytes: u64,
    pub pages_fetched: usize,
    pub retries: usize,
    #[serde(with = "duration_secs")]
    pub elapsed: Duration,
}

impl RunSummary {
    /// True when nothing failed and nothing was left partial.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failed == 0 && self.partial == 0
    }

    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn megabytes(&self) -> f64 {
        self.bytes as f64 / 1024.0 / 1024.0
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_summary_reflects_counters() {
        let stats = DownloadStats::new();
        stats.increment_downloaded();
        stats.increment_skipped();
        stats.increment_skipped();
        stats.record_page(1024 * 1024);
        stats.increment_retried();

        let summary = stats.summary(3, Duration::from_secs(90));
        assert_eq!(summary.downloaded, 1);
        assert_eq!(summary.skipped, 2);
        assert_eq!(summary.pages_fetched, 1);
        assert_eq!(summary.retries, 1);
        assert!((summary.megabytes() - 1.0).abs() < f64::EPSILON);
        assert!(summary.is_clean());
    }

    #[test]
    fn test_summary_not_clean_with_partial_issue() {
        let stats = DownloadStats::new();
        stats.increment_partial();
        assert!(!stats.summary(1, Duration::ZERO).is_clean());
    }
}
