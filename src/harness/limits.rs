//! Resource ceilings for a supervised run.

use std::time::Duration;

use sysinfo::System;
use tracing::debug;

use super::HarnessError;

/// Memory ceiling in MiB. Defaults to 75% of currently available memory.
pub const ENV_MEM_MB: &str = "HARNESS_MEM_MB";

/// Wall-clock ceiling in minutes.
pub const ENV_TIMEOUT: &str = "HARNESS_TIMEOUT";

pub const DEFAULT_TIMEOUT_MINUTES: u64 = 120;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

const MIB: u64 = 1024 * 1024;

/// Ceilings checked on every poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarnessLimits {
    pub memory_bytes: u64,
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl HarnessLimits {
    /// Reads `HARNESS_MEM_MB` and `HARNESS_TIMEOUT`, falling back to defaults.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::InvalidLimit`] when a variable is set but is
    /// not a positive integer.
    pub fn from_env() -> Result<Self, HarnessError> {
        Self::from_lookup(|name| std::env::var(name).ok(), available_memory)
    }

    fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
        available: impl FnOnce() -> u64,
    ) -> Result<Self, HarnessError> {
        let memory_bytes = match positive(&lookup, ENV_MEM_MB)? {
            Some(mb) => mb * MIB,
            None => default_memory_ceiling(available()),
        };
        let minutes = positive(&lookup, ENV_TIMEOUT)?.unwrap_or(DEFAULT_TIMEOUT_MINUTES);
        let limits = Self {
            memory_bytes,
            timeout: Duration::from_secs(minutes * 60),
            poll_interval: DEFAULT_POLL_INTERVAL,
        };
        debug!(
            memory_mb = limits.memory_mb(),
            timeout_min = minutes,
            "harness limits"
        );
        Ok(limits)
    }

    #[must_use]
    pub fn with_memory_mb(mut self, mb: u64) -> Self {
        self.memory_bytes = mb.max(1) * MIB;
        self
    }

    #[must_use]
    pub fn with_timeout_minutes(mut self, minutes: u64) -> Self {
        self.timeout = Duration::from_secs(minutes * 60);
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_memory_bytes(mut self, bytes: u64) -> Self {
        self.memory_bytes = bytes;
        self
    }

    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval.max(Duration::from_millis(10));
        self
    }

    #[must_use]
    pub fn memory_mb(&self) -> u64 {
        self.memory_bytes / MIB
    }
}

fn positive(lookup: &impl Fn(&str) -> Option<String>, name: &'static str) -> Result<Option<u64>, HarnessError> {
    let Some(raw) = lookup(name) else {
        return Ok(None);
    };
    match raw.trim().parse::<u64>() {
        Ok(value) if value > 0 => Ok(Some(value)),
        _ => Err(HarnessError::InvalidLimit { name, value: raw }),
    }
}

/// Three quarters of `available`, never below 1 MiB.
fn default_memory_ceiling(available: u64) -> u64 {
    (available / 4 * 3).max(MIB)
}

fn available_memory() -> u64 {
    let mut system = System::new();
    system.refresh_memory();
    system.available_memory()
}
