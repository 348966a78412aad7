//! Info command handler: one newspaper's catalog record.

use std::fmt::Write as _;

use anyhow::{Context, Result};
use newsarchive_core::model::NewspaperInfo;

use crate::ProcessExit;
use crate::app::context::RunContext;
use crate::cli::InfoArgs;

pub(crate) async fn run_info_command(ctx: &RunContext, args: &InfoArgs) -> Result<ProcessExit> {
    let info = ctx.source.newspaper_info(&args.identifier).await;

    if args.json {
        let json = serde_json::to_string_pretty(&info).context("Failed to serialize newspaper info")?;
        println!("{json}");
        return Ok(if info.is_some() { ProcessExit::Success } else { ProcessExit::Failure });
    }

    let Some(info) = info else {
        println!("No newspaper found with identifier: {}", args.identifier);
        println!("Check the identifier and try again.");
        return Ok(ProcessExit::Failure);
    };
    print!("{}", render_info(&info));
    Ok(ProcessExit::Success)
}

fn render_info(info: &NewspaperInfo) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "\n{:<15} {}", "Title:", info.title);
    let _ = writeln!(out, "{:<15} {}", "Identifier:", info.identifier);
    let _ = writeln!(out, "{:<15} {}", "Location:", info.place);
    let years = match (info.start_year, info.end_year) {
        (Some(start), Some(end)) => {
            let _ = writeln!(out, "{:<15} {start}-{end}", "Date range:");
            format!(" --years {start}-{end}")
        }
        _ => String::new(),
    };
    let _ = writeln!(out, "{:<15} {}", "URL:", info.url);
    let _ = writeln!(out, "\nTo download, run:");
    let _ = writeln!(out, "  newsarchive download {}{years}", info.identifier);
    out
}
