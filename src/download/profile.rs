//! Speed profiles: how politely a run paces itself.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Pacing preset chosen per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SpeedProfile {
    /// 15s between artifact downloads, 3s between scan requests.
    #[default]
    Safe,
    /// 4s between artifact downloads, 2s between scan requests.
    Standard,
}

impl SpeedProfile {
    /// Spacing between page-artifact downloads on one site.
    #[must_use]
    pub fn download_delay(self) -> Duration {
        match self {
            Self::Safe => Duration::from_secs(15),
            Self::Standard => Duration::from_secs(4),
        }
    }

    /// Spacing between lightweight JSON and text requests on one site.
    #[must_use]
    pub fn scan_delay(self) -> Duration {
        match self {
            Self::Safe => Duration::from_secs(3),
            Self::Standard => Duration::from_secs(2),
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Safe => "safe",
            Self::Standard => "standard",
        }
    }
}

impl fmt::Display for SpeedProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SpeedProfile {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "safe" => Ok(Self::Safe),
            "standard" => Ok(Self::Standard),
            other => Err(format!("unknown speed profile '{other}' (expected safe or standard)")),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_delays() {
        assert_eq!(SpeedProfile::Safe.download_delay(), Duration::from_secs(15));
        assert_eq!(SpeedProfile::Safe.scan_delay(), Duration::from_secs(3));
        assert_eq!(SpeedProfile::Standard.download_delay(), Duration::from_secs(4));
        assert_eq!(SpeedProfile::Standard.scan_delay(), Duration::from_secs(2));
    }

    #[test]
    fn test_profile_parse() {
        assert_eq!("SAFE".parse::<SpeedProfile>().unwrap(), SpeedProfile::Safe);
        assert_eq!(" standard ".parse::<SpeedProfile>().unwrap(), SpeedProfile::Standard);
        assert!("fast".parse::<SpeedProfile>().is_err());
        assert_eq!(SpeedProfile::default(), SpeedProfile::Safe);
    }
}
