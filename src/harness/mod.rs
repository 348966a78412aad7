//! Resource supervisor for long archive runs.
//!
//! The harness starts the downloader as a child in its own process group,
//! polls the memory and CPU of the whole process tree, and force-kills the
//! tree when it outgrows its memory ceiling or its wall-clock budget. The
//! harness never blocks on the child: waiting, polling and Ctrl-C are raced
//! in one `select!` loop.

mod limits;
mod pidfile;
mod tree;

pub use limits::{DEFAULT_POLL_INTERVAL, DEFAULT_TIMEOUT_MINUTES, ENV_MEM_MB, ENV_TIMEOUT, HarnessLimits};
pub use pidfile::{ENV_PID_FILE, PidMarker, default_marker_path, read_marker, remove_marker};
pub use tree::{TreeSample, TreeSampler, terminate_tree, tree_members, wait_for_exit};

use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use std::time::Duration;

use thiserror::Error;
use tokio::process::{Child, Command};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{info, instrument, warn};

/// How long `--kill` waits for the tree to disappear.
pub const KILL_WAIT: Duration = Duration::from_secs(5);

const MIB: u64 = 1024 * 1024;

/// Errors raised by the harness itself (not by the child).
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("invalid {name}='{value}': expected a positive integer")]
    InvalidLimit { name: &'static str, value: String },

    #[error("failed to start {program}: {source}\n  Suggestion: build the newsarchive binary or pass --program")]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write pid marker {path}: {source}")]
    Marker {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed waiting for child process: {0}")]
    Wait(#[source] std::io::Error),
}

impl HarnessError {
    fn marker(path: &Path, source: std::io::Error) -> Self {
        Self::Marker {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// How a supervised run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HarnessOutcome {
    /// The child exited with status 0.
    Success,
    /// The child exited on its own with a non-zero status (or a signal).
    ExitFailure { code: Option<i32> },
    MemoryExceeded { used_bytes: u64, limit_bytes: u64 },
    TimedOut { elapsed: Duration },
    Interrupted,
}

impl HarnessOutcome {
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    /// Process exit code for the harness binary.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        i32::from(!self.is_success())
    }

    fn from_status(status: ExitStatus) -> Self {
        if status.success() {
            Self::Success
        } else {
            Self::ExitFailure {
                code: status.code(),
            }
        }
    }
}

impl fmt::Display for HarnessOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => f.write_str("completed successfully"),
            Self::ExitFailure { code: Some(code) } => write!(f, "exited with code {code}"),
            Self::ExitFailure { code: None } => f.write_str("terminated by a signal"),
            Self::MemoryExceeded {
                used_bytes,
                limit_bytes,
            } => write!(
                f,
                "killed: memory {}MB over limit {}MB",
                used_bytes / MIB,
                limit_bytes / MIB
            ),
            Self::TimedOut { elapsed } => {
                write!(f, "killed: timeout after {:.1} min", elapsed.as_secs_f64() / 60.0)
            }
            Self::Interrupted => f.write_str("interrupted"),
        }
    }
}

/// Runs one child under [`HarnessLimits`].
#[derive(Debug, Clone)]
pub struct Supervisor {
    program: PathBuf,
    args: Vec<OsString>,
    limits: HarnessLimits,
    marker_path: PathBuf,
}

impl Supervisor {
    #[must_use]
    pub fn new(program: impl Into<PathBuf>, args: Vec<OsString>, limits: HarnessLimits) -> Self {
        Self {
            program: program.into(),
            args,
            limits,
            marker_path: default_marker_path(),
        }
    }

    #[must_use]
    pub fn with_marker_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.marker_path = path.into();
        self
    }

    #[must_use]
    pub fn limits(&self) -> &HarnessLimits {
        &self.limits
    }

    /// Starts the child and supervises it until it exits or is killed.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError`] if the marker cannot be written, the child
    /// cannot be started, or waiting on it fails.
    #[instrument(name = "harness", skip(self), fields(program = %self.program.display()))]
    pub async fn run(&self) -> Result<HarnessOutcome, HarnessError> {
        let _marker = PidMarker::create(&self.marker_path, std::process::id())?;

        info!(
            args = ?self.args,
            memory_mb = self.limits.memory_mb(),
            timeout_min = self.limits.timeout.as_secs() / 60,
            "starting child"
        );
        let mut child = self.spawn()?;
        let Some(pid) = child.id() else {
            // Already exited and reaped.
            let status = child.wait().await.map_err(HarnessError::Wait)?;
            return Ok(HarnessOutcome::from_status(status));
        };
        info!(pid, marker = %self.marker_path.display(), "child started (stop it with --kill)");

        let started = Instant::now();
        let mut sampler = TreeSampler::new();
        let mut ticker = tokio::time::interval(self.limits.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);
        let mut interrupt_armed = true;

        loop {
            tokio::select! {
                status = child.wait() => {
                    let status = status.map_err(HarnessError::Wait)?;
                    let outcome = HarnessOutcome::from_status(status);
                    log_outcome(&outcome);
                    return Ok(outcome);
                }
                signal = &mut ctrl_c, if interrupt_armed => {
                    if let Err(e) = signal {
                        warn!(error = %e, "cannot listen for Ctrl-C");
                        interrupt_armed = false;
                        continue;
                    }
                    info!("interrupted, killing child process tree");
                    return self.kill_child(&mut child, pid, HarnessOutcome::Interrupted).await;
                }
                _ = ticker.tick() => {
                    let elapsed = started.elapsed();
                    if let Some(sample) = sampler.sample(pid) {
                        info!(
                            memory_mb = sample.memory_bytes / MIB,
                            cpu_percent = format!("{:.0}", sample.cpu_percent),
                            processes = sample.processes,
                            elapsed_min = format!("{:.1}", elapsed.as_secs_f64() / 60.0),
                            "child usage"
                        );
                        if sample.memory_bytes > self.limits.memory_bytes {
                            warn!(
                                memory_mb = sample.memory_bytes / MIB,
                                limit_mb = self.limits.memory_mb(),
                                "memory limit exceeded, killing"
                            );
                            let outcome = HarnessOutcome::MemoryExceeded {
                                used_bytes: sample.memory_bytes,
                                limit_bytes: self.limits.memory_bytes,
                            };
                            return self.kill_child(&mut child, pid, outcome).await;
                        }
                    }
                    if elapsed > self.limits.timeout {
                        warn!(elapsed_secs = elapsed.as_secs(), "timeout exceeded, killing");
                        return self.kill_child(&mut child, pid, HarnessOutcome::TimedOut { elapsed }).await;
                    }
                }
            }
        }
    }

    fn spawn(&self) -> Result<Child, HarnessError> {
        let mut command = Command::new(&self.program);
        command.args(&self.args).kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);
        #[cfg(windows)]
        {
            const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
            command.creation_flags(CREATE_NEW_PROCESS_GROUP);
        }
        command.spawn().map_err(|source| HarnessError::Spawn {
            program: self.program.clone(),
            source,
        })
    }

    async fn kill_child(
        &self,
        child: &mut Child,
        pid: u32,
        outcome: HarnessOutcome,
    ) -> Result<HarnessOutcome, HarnessError> {
        terminate_tree(pid);
        if let Err(e) = child.start_kill() {
            // Usually means the child is already gone.
            tracing::debug!(error = %e, "start_kill after tree kill");
        }
        child.wait().await.map_err(HarnessError::Wait)?;
        log_outcome(&outcome);
        Ok(outcome)
    }
}

fn log_outcome(outcome: &HarnessOutcome) {
    if outcome.is_success() {
        info!(outcome = %outcome, "child finished");
    } else {
        warn!(outcome = %outcome, "child failed or was terminated");
    }
}

/// Result of `--kill`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KillReport {
    NoMarker,
    Killed { pid: u32, processes: usize, exited: bool },
    AlreadyGone { pid: u32 },
}

impl fmt::Display for KillReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoMarker => f.write_str("no harness pid marker found, nothing to kill"),
            Self::Killed {
                pid,
                processes,
                exited: true,
            } => write!(f, "killed process tree rooted at {pid} ({processes} processes)"),
            Self::Killed { pid, processes, .. } => write!(
                f,
                "signalled process tree rooted at {pid} ({processes} processes), some still running"
            ),
            Self::AlreadyGone { pid } => write!(f, "process {pid} already gone"),
        }
    }
}

/// Kills the tree recorded in the marker at `path`, waits up to
/// [`KILL_WAIT`] for it to disappear, and removes the marker.
#[instrument(name = "harness")]
pub async fn kill_from_marker(path: &Path) -> KillReport {
    let Some(pid) = read_marker(path) else {
        return KillReport::NoMarker;
    };
    let killed = terminate_tree(pid);
    let report = if killed.is_empty() {
        KillReport::AlreadyGone { pid }
    } else {
        KillReport::Killed {
            pid,
            processes: killed.len(),
            exited: wait_for_exit(&killed, KILL_WAIT).await,
        }
    };
    remove_marker(path);
    report
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_exit_codes() {
        assert_eq!(HarnessOutcome::Success.exit_code(), 0);
        assert_eq!(HarnessOutcome::Interrupted.exit_code(), 1);
        assert_eq!(HarnessOutcome::ExitFailure { code: Some(3) }.exit_code(), 1);
        assert_eq!(
            HarnessOutcome::TimedOut {
                elapsed: Duration::from_secs(1)
            }
            .exit_code(),
            1
        );
    }

    #[test]
    fn test_outcome_display() {
        let outcome = HarnessOutcome::MemoryExceeded {
            used_bytes: 300 * MIB,
            limit_bytes: 200 * MIB,
        };
        assert_eq!(outcome.to_string(), "killed: memory 300MB over limit 200MB");
        assert_eq!(
            HarnessOutcome::ExitFailure { code: Some(2) }.to_string(),
            "exited with code 2"
        );
    }

    #[tokio::test]
    async fn test_kill_without_marker_reports_it() {
        let dir = tempfile::TempDir::new().unwrap();
        let report = kill_from_marker(&dir.path().join("missing.pid")).await;
        assert_eq!(report, KillReport::NoMarker);
    }

    #[tokio::test]
    async fn test_kill_stale_marker_removes_it() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("stale.pid");
        std::fs::write(&path, (u32::MAX - 1).to_string()).unwrap();
        let report = kill_from_marker(&path).await;
        assert_eq!(report, KillReport::AlreadyGone { pid: u32::MAX - 1 });
        assert!(!path.exists());
    }
}
