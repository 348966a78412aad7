//! Cleanup of remote (archive-provided) OCR text.
//!
//! The archive's text already follows column reading order. What needs fixing
//! is line-level noise from the scan layout: words hyphenated at column
//! edges, lone column-rule glyphs, and missing breaks between articles.

use std::sync::LazyLock;

use regex::Regex;

/// Single-glyph lines produced by vertical column rules.
const ARTIFACT_GLYPHS: &[char] = &['|', 'i', 'j', 'I', 'l'];

/// Minimum trimmed length for an all-caps line to count as a heading.
const MIN_HEADING_CHARS: usize = 6;

#[allow(clippy::expect_used)]
static HYPHENATED_TAIL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\w+-$").expect("hyphen regex is valid")); // Static pattern, safe to panic

#[allow(clippy::expect_used)]
static BLANK_RUNS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n{3,}").expect("blank-run regex is valid")); // Static pattern, safe to panic

/// Returns true for an all-caps line that looks like an article heading.
///
/// ```
/// use newsarchive_core::ocr::is_heading;
///
/// assert!(is_heading("LOCAL NEWS"));
/// assert!(!is_heading("NEWS"));
/// assert!(!is_heading("JULY 4TH"));
/// assert!(!is_heading("Local News"));
/// ```
#[must_use]
pub fn is_heading(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.chars().count() >= MIN_HEADING_CHARS
        && trimmed.chars().any(char::is_alphabetic)
        && !trimmed.chars().any(char::is_lowercase)
        && !trimmed.chars().any(|c| c.is_ascii_digit())
}

fn is_artifact_line(trimmed: &str) -> bool {
    let mut chars = trimmed.chars();
    matches!((chars.next(), chars.next()), (Some(c), None) if ARTIFACT_GLYPHS.contains(&c))
}

fn starts_lowercase(line: &str) -> bool {
    line.trim().chars().next().is_some_and(char::is_lowercase)
}

/// Cleans remote OCR text.
///
/// 1. `word-` at a line end joins the next line when it starts lowercase.
/// 2. Lines consisting of one column-rule glyph are dropped.
/// 3. A heading gets one blank line before it unless the previous
///    non-blank line was a heading too.
/// 4. Runs of blank lines collapse to a single blank line.
///
/// ```
/// use newsarchive_core::ocr::clean_remote_text;
///
/// assert_eq!(clean_remote_text("com-\nplete story"), "complete story");
/// ```
#[must_use]
pub fn clean_remote_text(raw: &str) -> String {
    let lines: Vec<&str> = raw.split('\n').collect();
    let mut out: Vec<String> = Vec::with_capacity(lines.len());

    let mut i = 0;
    while i < lines.len() {
        let line = lines[i];
        let trimmed = line.trim();

        if is_artifact_line(trimmed) {
            i += 1;
            continue;
        }

        if HYPHENATED_TAIL.is_match(trimmed)
            && let Some(next) = lines.get(i + 1)
            && starts_lowercase(next)
        {
            let root = &trimmed[..trimmed.len() - 1];
            out.push(format!("{root}{}", next.trim()));
            i += 2;
            continue;
        }

        if is_heading(trimmed)
            && let Some(previous) = out.iter().rev().find(|l| !l.trim().is_empty())
            && !is_heading(previous)
        {
            out.push(String::new());
        }

        out.push(line.to_string());
        i += 1;
    }

    BLANK_RUNS.replace_all(&out.join("\n"), "\n\n").into_owned()
}

/// Counts whitespace-separated words.
#[must_use]
pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}
