//! CLI argument definitions using clap derive macros.

use std::collections::BTreeSet;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use newsarchive_core::model::{Identifier, ModelError, parse_issue_date, parse_year_range};
use newsarchive_core::ocr::OcrMode;
use newsarchive_core::SpeedProfile;

/// Archive a historical newspaper: every issue, every page, optional OCR text.
///
/// Runs resume where they stopped. Find identifiers with `newsarchive search`.
#[derive(Parser, Debug)]
#[command(name = "newsarchive")]
#[command(author, version, about)]
pub(crate) struct Cli {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub(crate) verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub(crate) quiet: bool,

    /// Read defaults from this config file instead of the default location
    #[arg(long, value_name = "PATH", global = true)]
    pub(crate) config: Option<PathBuf>,

    #[command(subcommand)]
    pub(crate) command: Command,
}

#[derive(Subcommand, Debug)]
pub(crate) enum Command {
    /// Search newspaper titles by name
    Search(SearchArgs),
    /// Show title, place and year span of a newspaper
    Info(InfoArgs),
    /// Download every issue of a newspaper
    Download(DownloadArgs),
    /// Run OCR over pages that are already downloaded
    Ocr(OcrArgs),
}

#[derive(Args, Debug)]
pub(crate) struct SearchArgs {
    /// Free-text title query (e.g. "Evening Star")
    pub(crate) query: String,

    /// Print results as JSON
    #[arg(long)]
    pub(crate) json: bool,
}

#[derive(Args, Debug)]
pub(crate) struct InfoArgs {
    /// Catalog identifier (e.g. sn83045462)
    #[arg(value_parser = parse_identifier)]
    pub(crate) identifier: Identifier,

    /// Print the record as JSON
    #[arg(long)]
    pub(crate) json: bool,
}

#[derive(Args, Debug)]
pub(crate) struct DownloadArgs {
    /// Catalog identifier (e.g. sn83045462)
    #[arg(value_parser = parse_identifier)]
    pub(crate) identifier: Identifier,

    /// Years to download (e.g. "1900-1905" or "1900,1903,1910")
    #[arg(short, long, value_parser = parse_years)]
    pub(crate) years: Option<BTreeSet<i32>>,

    /// Output directory (default: downloads/<identifier>)
    #[arg(short, long, value_name = "DIR")]
    pub(crate) output: Option<PathBuf>,

    /// Only retry failed and partially downloaded issues
    #[arg(long)]
    pub(crate) retry_failed: bool,

    /// Pacing profile: "safe" (15s between pages) or "standard" (4s)
    #[arg(long, value_parser = parse_speed)]
    pub(crate) speed: Option<SpeedProfile>,

    /// Stop after this many issues
    #[arg(long, value_name = "N", value_parser = clap::value_parser!(u64).range(1..))]
    pub(crate) max_issues: Option<u64>,

    /// OCR to run on downloaded pages: none, tier1 (loc), tier2 (surya), both
    #[arg(long, value_name = "MODE", value_parser = parse_ocr_mode)]
    pub(crate) ocr: Option<OcrMode>,

    /// Regenerate OCR text files that already exist
    #[arg(long)]
    pub(crate) force_ocr: bool,

    /// Pages per local-model batch (1-64)
    #[arg(long, value_name = "N", value_parser = clap::value_parser!(u16).range(1..=64))]
    pub(crate) ocr_batch_size: Option<u16>,
}

#[derive(Args, Debug)]
pub(crate) struct OcrArgs {
    /// Catalog identifier (e.g. sn83045462)
    #[arg(value_parser = parse_identifier)]
    pub(crate) identifier: Identifier,

    /// Directory of a previous download (default: downloads/<identifier>)
    #[arg(short, long, value_name = "DIR")]
    pub(crate) output: Option<PathBuf>,

    /// Only process the issue(s) published on this date
    #[arg(long, value_name = "YYYY-MM-DD", value_parser = parse_date)]
    pub(crate) date: Option<String>,

    /// OCR tiers to run (default: both)
    #[arg(long, value_name = "MODE", value_parser = parse_ocr_mode)]
    pub(crate) ocr: Option<OcrMode>,

    /// Regenerate OCR text files that already exist
    #[arg(long)]
    pub(crate) force_ocr: bool,
}

fn parse_identifier(value: &str) -> Result<Identifier, ModelError> {
    Identifier::parse(value)
}

fn parse_years(value: &str) -> Result<BTreeSet<i32>, ModelError> {
    parse_year_range(value)
}

fn parse_date(value: &str) -> Result<String, ModelError> {
    parse_issue_date(value).map(|_| value.to_string())
}

fn parse_speed(value: &str) -> Result<SpeedProfile, String> {
    value.parse()
}

fn parse_ocr_mode(value: &str) -> Result<OcrMode, String> {
    value.parse()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn download(args: &[&str]) -> DownloadArgs {
        let mut argv = vec!["newsarchive", "download"];
        argv.extend_from_slice(args);
        match Cli::try_parse_from(argv).unwrap().command {
            Command::Download(args) => args,
            other => panic!("expected download, got {other:?}"),
        }
    }

    #[test]
    fn test_cli_subcommand_is_required() {
        let err = Cli::try_parse_from(["newsarchive"]).unwrap_err();
        assert_eq!(
            err.kind(),
            clap::error::ErrorKind::DisplayHelpOnMissingArgumentOrSubcommand
        );
    }

    #[test]
    fn test_cli_verbose_flag_increments_count() {
        let cli = Cli::try_parse_from(["newsarchive", "-vv", "search", "star"]).unwrap();
        assert_eq!(cli.verbose, 2);

        let cli = Cli::try_parse_from(["newsarchive", "search", "star", "--verbose"]).unwrap();
        assert_eq!(cli.verbose, 1);
    }

    #[test]
    fn test_cli_quiet_and_config_are_global() {
        let cli = Cli::try_parse_from([
            "newsarchive",
            "info",
            "sn83045462",
            "-q",
            "--config",
            "/tmp/na.toml",
        ])
        .unwrap();
        assert!(cli.quiet);
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/na.toml")));
    }

    #[test]
    fn test_cli_help_flag_shows_usage() {
        let err = Cli::try_parse_from(["newsarchive", "--help"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayHelp);
    }

    #[test]
    fn test_cli_version_flag_shows_version() {
        let err = Cli::try_parse_from(["newsarchive", "--version"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayVersion);
    }

    #[test]
    fn test_cli_search_json() {
        let cli = Cli::try_parse_from(["newsarchive", "search", "Evening Star", "--json"]).unwrap();
        match cli.command {
            Command::Search(args) => {
                assert_eq!(args.query, "Evening Star");
                assert!(args.json);
            }
            other => panic!("expected search, got {other:?}"),
        }
    }

    #[test]
    fn test_cli_download_defaults() {
        let args = download(&["sn83045462"]);
        assert_eq!(args.identifier.as_str(), "sn83045462");
        assert!(args.years.is_none());
        assert!(args.output.is_none());
        assert!(!args.retry_failed);
        assert!(args.speed.is_none());
        assert!(args.max_issues.is_none());
        assert!(args.ocr.is_none());
        assert!(!args.force_ocr);
    }

    #[test]
    fn test_cli_download_all_flags() {
        let args = download(&[
            "sn83045462",
            "--years",
            "1900-1902,1910",
            "--output",
            "out",
            "--retry-failed",
            "--speed",
            "standard",
            "--max-issues",
            "3",
            "--ocr",
            "loc",
            "--force-ocr",
            "--ocr-batch-size",
            "8",
        ]);
        assert_eq!(
            args.years.unwrap().into_iter().collect::<Vec<_>>(),
            vec![1900, 1901, 1902, 1910]
        );
        assert_eq!(args.output, Some(PathBuf::from("out")));
        assert!(args.retry_failed);
        assert_eq!(args.speed, Some(SpeedProfile::Standard));
        assert_eq!(args.max_issues, Some(3));
        assert_eq!(args.ocr, Some(OcrMode::Tier1));
        assert!(args.force_ocr);
        assert_eq!(args.ocr_batch_size, Some(8));
    }

    #[test]
    fn test_cli_rejects_malformed_identifier() {
        let err = Cli::try_parse_from(["newsarchive", "download", "SN-1"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }

    #[test]
    fn test_cli_rejects_bad_values() {
        for argv in [
            vec!["newsarchive", "download", "sn83045462", "--years", "1905-1900"],
            vec!["newsarchive", "download", "sn83045462", "--speed", "ludicrous"],
            vec!["newsarchive", "download", "sn83045462", "--max-issues", "0"],
            vec!["newsarchive", "download", "sn83045462", "--ocr-batch-size", "65"],
            vec!["newsarchive", "ocr", "sn83045462", "--date", "1900-13-01"],
            vec!["newsarchive", "ocr", "sn83045462", "--ocr", "tesseract"],
        ] {
            let err = Cli::try_parse_from(argv.clone()).unwrap_err();
            assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation, "{argv:?}");
        }
    }

    #[test]
    fn test_cli_ocr_subcommand() {
        let cli = Cli::try_parse_from([
            "newsarchive",
            "ocr",
            "sn83045462",
            "--date",
            "1900-01-02",
            "--ocr",
            "surya",
        ])
        .unwrap();
        match cli.command {
            Command::Ocr(args) => {
                assert_eq!(args.date.as_deref(), Some("1900-01-02"));
                assert_eq!(args.ocr, Some(OcrMode::Tier2));
                assert!(!args.force_ocr);
            }
            other => panic!("expected ocr, got {other:?}"),
        }
    }
}
