//! Search command handler: title search against the archive.

use std::fmt::Write as _;

use anyhow::{Context, Result};
use newsarchive_core::model::TitleResult;

use crate::ProcessExit;
use crate::app::context::RunContext;
use crate::cli::SearchArgs;

pub(crate) async fn run_search_command(ctx: &RunContext, args: &SearchArgs) -> Result<ProcessExit> {
    let results = ctx.source.search_titles(&args.query).await;

    if args.json {
        let json = serde_json::to_string_pretty(&results).context("Failed to serialize search results")?;
        println!("{json}");
        return Ok(ProcessExit::Success);
    }

    if results.is_empty() {
        println!("No newspapers found matching that query.");
        println!("Try broader search terms or check spelling.");
        return Ok(ProcessExit::Success);
    }
    print!("{}", render_search_table(&results));
    Ok(ProcessExit::Success)
}

fn render_search_table(results: &[TitleResult]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "\nFound {} newspaper(s):\n", results.len());
    let _ = writeln!(out, "{:<16} {:<45} {:<25} Dates", "Identifier", "Title", "Place");
    let _ = writeln!(out, "{}", "-".repeat(100));
    for result in results {
        let _ = writeln!(
            out,
            "{:<16} {:<45} {:<25} {}",
            result.identifier,
            truncate(&result.title, 43),
            truncate(&result.place, 23),
            result.dates
        );
    }
    let _ = writeln!(out, "\nTo download a newspaper, run:");
    let _ = writeln!(out, "  newsarchive download {}", results[0].identifier);
    out
}

fn truncate(value: &str, max_chars: usize) -> String {
    value.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn title(identifier: &str, title: &str) -> TitleResult {
        TitleResult {
            identifier: identifier.to_string(),
            title: title.to_string(),
            place: "Washington, DC".to_string(),
            dates: "1854-1972".to_string(),
            url: String::new(),
        }
    }

    #[test]
    fn test_table_lists_every_result_and_a_hint() {
        let table = render_search_table(&[
            title("sn83045462", "Evening Star"),
            title("sn83030214", "New-York Tribune"),
        ]);
        assert!(table.contains("Found 2 newspaper(s)"));
        assert!(table.contains("sn83030214       New-York Tribune"));
        assert!(table.contains("newsarchive download sn83045462"));
    }

    #[test]
    fn test_long_titles_are_cut() {
        let long = "The Weekly Courier and Advertiser of the Upper Valley Counties";
        let table = render_search_table(&[title("sn83045462", long)]);
        assert!(table.contains(&long[..43]));
        assert!(!table.contains(long));
    }
}
