//! PID marker file used by `--kill` from another terminal.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use super::HarnessError;

/// Overrides the marker location.
pub const ENV_PID_FILE: &str = "HARNESS_PID_FILE";

const DEFAULT_MARKER_NAME: &str = "newsarchive-harness.pid";

/// `$HARNESS_PID_FILE`, else `{temp}/newsarchive-harness.pid`.
#[must_use]
pub fn default_marker_path() -> PathBuf {
    std::env::var_os(ENV_PID_FILE)
        .filter(|value| !value.is_empty())
        .map_or_else(|| std::env::temp_dir().join(DEFAULT_MARKER_NAME), PathBuf::from)
}

/// Marker file removed when dropped, on every exit path of the harness.
#[derive(Debug)]
pub struct PidMarker {
    path: PathBuf,
}

impl PidMarker {
    /// Writes `pid` to `path`.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::Marker`] if the file cannot be written.
    pub fn create(path: &Path, pid: u32) -> Result<Self, HarnessError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| HarnessError::marker(path, source))?;
        }
        std::fs::write(path, pid.to_string()).map_err(|source| HarnessError::marker(path, source))?;
        debug!(path = %path.display(), pid, "wrote pid marker");
        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PidMarker {
    fn drop(&mut self) {
        remove_marker(&self.path);
    }
}

/// PID stored in the marker, if the marker exists and is well formed.
#[must_use]
pub fn read_marker(path: &Path) -> Option<u32> {
    std::fs::read_to_string(path).ok()?.trim().parse().ok()
}

pub fn remove_marker(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => debug!(path = %path.display(), "removed pid marker"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "could not remove pid marker"),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_marker_written_and_removed_on_drop() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("nested/harness.pid");
        {
            let marker = PidMarker::create(&path, 4242).unwrap();
            assert_eq!(marker.path(), path.as_path());
            assert_eq!(read_marker(&path), Some(4242));
        }
        assert!(!path.exists());
    }

    #[test]
    fn test_read_marker_rejects_garbage() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("harness.pid");
        assert_eq!(read_marker(&path), None);
        std::fs::write(&path, "not a pid").unwrap();
        assert_eq!(read_marker(&path), None);
        std::fs::write(&path, " 17\n").unwrap();
        assert_eq!(read_marker(&path), Some(17));
    }
}
