//! Constants for the download module (timeouts, pacing, integrity).

use std::time::Duration;

/// Default HTTP connect timeout (30 seconds).
pub const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default HTTP read timeout (5 minutes for large page scans).
pub const READ_TIMEOUT_SECS: u64 = 300;

/// Warning threshold for cumulative pacing delay per site.
pub const CUMULATIVE_DELAY_WARNING_THRESHOLD: Duration = Duration::from_secs(300);

/// Maximum Retry-After value honoured (1 hour).
pub const MAX_RETRY_AFTER: Duration = Duration::from_secs(3600);

/// Requests allowed per site inside [`BURST_WINDOW`] before the gate holds back.
///
/// The archive blocks a client for 5 minutes after 20 requests in one minute.
pub const BURST_LIMIT: usize = 20;

/// Sliding window for [`BURST_LIMIT`].
pub const BURST_WINDOW: Duration = Duration::from_secs(60);

/// Smallest artifact accepted as a complete page.
pub const MIN_ARTIFACT_BYTES: u64 = 1000;

/// Leading bytes of every valid page artifact.
pub const ARTIFACT_SIGNATURE: &[u8] = b"%PDF-";

/// Free space below which a run logs a warning.
pub const LOW_DISK_SPACE_BYTES: u64 = 1024 * 1024 * 1024;
