use crate::download::DownloadError;
use crate::download::retry::{FailureType, classify_error};
use crate::source::SourceError;

pub(super) fn http_status(error: &DownloadError) -> Option<u16> {
    match error {
        DownloadError::HttpStatus { status, .. } => Some(*status),
        _ => None,
    }
}

/// Error text for a failed page, with a hint on what to do about it.
pub(super) fn actionable_download_message(error: &DownloadError) -> String {
    let base = error.to_string();
    if base.contains("Suggestion:") {
        return base;
    }

    let suggestion = match (classify_error(error), http_status(error)) {
        (FailureType::RateLimited, _) => {
            "The archive is throttling requests. Rerun later with --speed safe."
        }
        (_, Some(404)) => "The archive no longer lists this page. Rerun with --retry-failed later.",
        (_, Some(401 | 403)) => "The archive refused access. Check network/VPN restrictions.",
        (FailureType::Transient, _) => {
            "Check network connectivity, then rerun with --retry-failed."
        }
        (FailureType::Permanent, _) => match error {
            DownloadError::Io { .. } => "Check free disk space and output directory permissions.",
            _ => "Rerun with -vv for request details.",
        },
    };

    format!("{base}\n  Suggestion: {suggestion}")
}

pub(super) fn actionable_source_message(error: &SourceError) -> String {
    match error {
        SourceError::Request { source, .. } => actionable_download_message(source),
        other => other.to_string(),
    }
}
