//! Value types shared by every pipeline stage.
//!
//! Discovery produces [`IssueMetadata`] and [`PageMetadata`]; the download and
//! OCR stages return [`DownloadResult`] and [`OcrResult`]. Only projections of
//! these results are persisted (see [`crate::store`]).

use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use std::sync::LazyLock;

use chrono::{Datelike, NaiveDate};
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Catalog key format: 1-3 lowercase letters followed by 8-10 digits.
#[allow(clippy::expect_used)]
static IDENTIFIER_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z]{1,3}\d{8,10}$").expect("identifier regex is valid") // Static pattern, safe to panic
});

/// Errors raised while validating user-supplied model values.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ModelError {
    /// The identifier does not match the catalog key format.
    #[error("invalid identifier '{value}': expected 1-3 lowercase letters followed by 8-10 digits")]
    InvalidIdentifier {
        /// The rejected input.
        value: String,
    },

    /// A year selection string could not be parsed.
    #[error("invalid year selection '{value}': {reason}")]
    InvalidYears {
        /// The rejected input.
        value: String,
        /// What was wrong with it.
        reason: String,
    },

    /// A date string is not a valid `YYYY-MM-DD` calendar date.
    #[error("invalid date '{value}': expected YYYY-MM-DD")]
    InvalidDate {
        /// The rejected input.
        value: String,
    },
}

/// Archive catalog key naming one periodical (e.g. `sn83045462`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identifier(String);

impl Identifier {
    /// Validates and wraps an identifier. Surrounding whitespace is ignored.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::InvalidIdentifier`] if the value does not match
    /// the catalog key format.
    pub fn parse(value: &str) -> Result<Self, ModelError> {
        let trimmed = value.trim();
        if IDENTIFIER_PATTERN.is_match(trimmed) {
            Ok(Self(trimmed.to_string()))
        } else {
            Err(ModelError::InvalidIdentifier {
                value: value.to_string(),
            })
        }
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Builds the natural key of an issue: `{date}_ed-{edition}`.
#[must_use]
pub fn issue_key(date: &str, edition: u32) -> String {
    format!("{date}_ed-{edition}")
}

/// Parses a strict `YYYY-MM-DD` date and returns it with its year.
///
/// # Errors
///
/// Returns [`ModelError::InvalidDate`] for anything else.
pub fn parse_issue_date(value: &str) -> Result<(NaiveDate, i32), ModelError> {
    let date = NaiveDate::parse_from_str(value, "%Y-%m-%d").map_err(|_| ModelError::InvalidDate {
        value: value.to_string(),
    })?;
    Ok((date, date.year()))
}

/// One published edition of a periodical on one date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueMetadata {
    /// ISO calendar date (`YYYY-MM-DD`).
    pub date: String,
    /// Edition number, 1 unless the source reports several same-day editions.
    pub edition: u32,
    /// Discovery locator used to fetch the issue-detail document.
    pub url: String,
    /// Year derived from `date`.
    pub year: i32,
    pub identifier: Identifier,
    /// Display title of the periodical, possibly empty.
    pub title: String,
}

impl IssueMetadata {
    /// Returns the issue key (`{date}_ed-{edition}`).
    #[must_use]
    pub fn key(&self) -> String {
        issue_key(&self.date, self.edition)
    }
}

/// One physical page within an issue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageMetadata {
    pub issue_date: String,
    pub edition: u32,
    /// 1-based position in the source's page order.
    pub page_num: u32,
    /// Page-level document locator.
    pub url: String,
    /// Downloadable artifact URL, when the issue document already named it.
    pub pdf_url: Option<String>,
    /// Artifact size reported by the source, if any.
    pub expected_size: Option<u64>,
    pub identifier: Identifier,
}

impl PageMetadata {
    /// Year of the issue this page belongs to (0 when the date is malformed).
    #[must_use]
    pub fn year(&self) -> i32 {
        self.issue_date
            .get(..4)
            .and_then(|y| y.parse().ok())
            .unwrap_or_default()
    }

    /// Deterministic artifact file name:
    /// `{identifier}_{date}_ed-{edition}_page{NN}.pdf`.
    #[must_use]
    pub fn artifact_file_name(&self) -> String {
        format!(
            "{}_{}_page{:02}.pdf",
            self.identifier,
            issue_key(&self.issue_date, self.edition),
            self.page_num
        )
    }
}

/// Outcome of downloading one page artifact.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DownloadResult {
    pub success: bool,
    pub path: Option<PathBuf>,
    /// Bytes transferred over the network; zero for an in-place skip.
    pub size_bytes: u64,
    pub error: Option<String>,
}

impl DownloadResult {
    /// Successful download (or verified skip) at `path`.
    #[must_use]
    pub fn ok(path: PathBuf, size_bytes: u64) -> Self {
        Self {
            success: true,
            path: Some(path),
            size_bytes,
            error: None,
        }
    }

    /// Failed download with a human-readable reason.
    #[must_use]
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Self::default()
        }
    }
}

/// Outcome of one OCR tier on one page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OcrResult {
    pub success: bool,
    pub text_path: Option<PathBuf>,
    pub word_count: usize,
    pub error: Option<String>,
    /// True when an existing output was kept instead of regenerated.
    pub skipped: bool,
}

impl OcrResult {
    #[must_use]
    pub fn ok(text_path: PathBuf, word_count: usize) -> Self {
        Self {
            success: true,
            text_path: Some(text_path),
            word_count,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn skipped(text_path: PathBuf) -> Self {
        Self {
            success: true,
            text_path: Some(text_path),
            skipped: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Self::default()
        }
    }
}

/// A periodical matched by a title search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TitleResult {
    pub identifier: String,
    pub title: String,
    pub place: String,
    pub dates: String,
    pub url: String,
}

/// Summary information about one periodical.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewspaperInfo {
    pub identifier: String,
    pub title: String,
    pub place: String,
    pub start_year: Option<i32>,
    pub end_year: Option<i32>,
    pub url: String,
}

/// Parses a year selection such as `1900-1905,1910` into a sorted set.
///
/// # Errors
///
/// Returns [`ModelError::InvalidYears`] for empty parts, non-numeric parts,
/// or reversed ranges.
pub fn parse_year_range(value: &str) -> Result<BTreeSet<i32>, ModelError> {
    let invalid = |reason: String| ModelError::InvalidYears {
        value: value.to_string(),
        reason,
    };
    let parse_year = |raw: &str| {
        raw.trim()
            .parse::<i32>()
            .map_err(|_| invalid(format!("'{}' is not a year", raw.trim())))
    };

    let mut years = BTreeSet::new();
    for part in value.split(',') {
        let part = part.trim();
        if part.is_empty() {
            return Err(invalid("empty entry".to_string()));
        }
        if let Some((start, end)) = part.split_once('-') {
            let (start, end) = (parse_year(start)?, parse_year(end)?);
            if end < start {
                return Err(invalid(format!("range {start}-{end} is reversed")));
            }
            years.extend(start..=end);
        } else {
            years.insert(parse_year(part)?);
        }
    }
    Ok(years)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier_accepts_catalog_keys() {
        assert!(Identifier::parse("sn83045462").is_ok());
        assert!(Identifier::parse("a12345678").is_ok());
        assert!(Identifier::parse("abc1234567890").is_ok());
        assert_eq!(
            Identifier::parse("  sn87080287 ").unwrap().as_str(),
            "sn87080287"
        );
    }

    #[test]
    fn test_identifier_rejects_malformed_keys() {
        for bad in ["", "SN83045462", "sn1234567", "sn12345678901", "abcd12345678", "sn8304546x"] {
            assert!(Identifier::parse(bad).is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn test_issue_key_format() {
        assert_eq!(issue_key("1900-01-02", 1), "1900-01-02_ed-1");
    }

    #[test]
    fn test_artifact_file_name_zero_pads_page() {
        let page = PageMetadata {
            issue_date: "1901-03-04".to_string(),
            edition: 2,
            page_num: 7,
            url: String::new(),
            pdf_url: None,
            expected_size: None,
            identifier: Identifier::parse("sn12345678").unwrap(),
        };
        assert_eq!(
            page.artifact_file_name(),
            "sn12345678_1901-03-04_ed-2_page07.pdf"
        );
        assert_eq!(page.year(), 1901);
    }

    #[test]
    fn test_parse_issue_date_rejects_short_and_non_numeric() {
        assert_eq!(parse_issue_date("1900-05-06").unwrap().1, 1900);
        assert!(parse_issue_date("1900").is_err());
        assert!(parse_issue_date("19x0-01-01").is_err());
        assert!(parse_issue_date("1900-13-01").is_err());
    }

    #[test]
    fn test_parse_year_range_mixed() {
        let years = parse_year_range("1900-1902, 1910,1901").unwrap();
        assert_eq!(years.into_iter().collect::<Vec<_>>(), vec![1900, 1901, 1902, 1910]);
    }

    #[test]
    fn test_parse_year_range_rejects_reversed_and_garbage() {
        assert!(parse_year_range("1905-1900").is_err());
        assert!(parse_year_range("19o5").is_err());
        assert!(parse_year_range("1900,,1901").is_err());
    }
}
