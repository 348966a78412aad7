//! Exit code logic for the archive process.
//!
//! Single responsibility: map a run summary to the process exit outcome.

use newsarchive_core::RunSummary;

use crate::ProcessExit;

/// Success when nothing failed, partial when some issues failed or are
/// incomplete but others made it, failure when nothing made it.
pub(crate) fn determine_exit_outcome(summary: &RunSummary) -> ProcessExit {
    let incomplete = summary.failed + summary.partial;
    if incomplete == 0 {
        ProcessExit::Success
    } else if summary.downloaded + summary.skipped + summary.partial > 0 {
        ProcessExit::Partial
    } else {
        ProcessExit::Failure
    }
}
