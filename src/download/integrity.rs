//! Artifact integrity gate.
//!
//! A page artifact counts as downloaded only if it exists, is at least
//! [`MIN_ARTIFACT_BYTES`] long, matches the size the source reported (when it
//! reported one) and starts with the PDF signature. Anything else is
//! re-downloaded.

use std::path::Path;

use thiserror::Error;
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tracing::debug;

use super::constants::{ARTIFACT_SIGNATURE, MIN_ARTIFACT_BYTES};

/// Why an artifact was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IntegrityFailure {
    #[error("file is missing")]
    Missing,

    #[error("file is only {actual} bytes (minimum {MIN_ARTIFACT_BYTES})")]
    TooSmall { actual: u64 },

    #[error("expected {expected} bytes, found {actual}")]
    SizeMismatch { expected: u64, actual: u64 },

    #[error("file does not start with the PDF signature")]
    BadSignature,

    #[error("file could not be read: {0}")]
    Unreadable(String),
}

/// Verifies the artifact at `path` and returns its size on success.
///
/// # Errors
///
/// Returns the first [`IntegrityFailure`] encountered.
pub async fn verify_artifact(path: &Path, expected_size: Option<u64>) -> Result<u64, IntegrityFailure> {
    let metadata = match tokio::fs::metadata(path).await {
        Ok(metadata) if metadata.is_file() => metadata,
        Ok(_) => return Err(IntegrityFailure::Missing),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(IntegrityFailure::Missing);
        }
        Err(e) => return Err(IntegrityFailure::Unreadable(e.to_string())),
    };

    let actual = metadata.len();
    if actual < MIN_ARTIFACT_BYTES {
        return Err(IntegrityFailure::TooSmall { actual });
    }
    if let Some(expected) = expected_size.filter(|&expected| expected > 0)
        && expected != actual
    {
        return Err(IntegrityFailure::SizeMismatch { expected, actual });
    }

    let mut header = [0_u8; 5];
    let mut file = File::open(path)
        .await
        .map_err(|e| IntegrityFailure::Unreadable(e.to_string()))?;
    file.read_exact(&mut header)
        .await
        .map_err(|e| IntegrityFailure::Unreadable(e.to_string()))?;
    if header != ARTIFACT_SIGNATURE {
        return Err(IntegrityFailure::BadSignature);
    }

    debug!(path = %path.display(), bytes = actual, "artifact verified");
    Ok(actual)
}

/// Convenience wrapper returning a plain boolean.
pub async fn is_artifact_complete(path: &Path, expected_size: Option<u64>) -> bool {
    verify_artifact(path, expected_size).await.is_ok()
}
