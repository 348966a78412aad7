//! CLI entry point for the newspaper archiver.

use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use tracing::debug;

mod app;
mod app_config;
mod cli;
mod commands;

use app::context::RunContext;
use app::terminal;
use cli::{Cli, Command};

/// Process exit outcome: 0 success, 1 failure, 2 partial.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ProcessExit {
    Success,
    Partial,
    Failure,
}

impl From<ProcessExit> for ExitCode {
    fn from(value: ProcessExit) -> Self {
        match value {
            ProcessExit::Success => Self::SUCCESS,
            ProcessExit::Failure => Self::from(1),
            ProcessExit::Partial => Self::from(2),
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let cli = Cli::parse();
    match run(cli).await {
        Ok(outcome) => outcome.into(),
        Err(error) => {
            eprintln!("Error: {error:#}");
            ProcessExit::Failure.into()
        }
    }
}

async fn run(cli: Cli) -> Result<ProcessExit> {
    let config = app_config::load_config(cli.config.as_deref())?;
    terminal::init_tracing(terminal::default_level(cli.quiet, cli.verbose, config.verbosity));
    debug!(?cli, ?config, "CLI arguments parsed");

    let speed = match &cli.command {
        Command::Download(args) => args.speed,
        _ => None,
    };
    let ctx = RunContext::build(config, speed)?;

    match &cli.command {
        Command::Search(args) => commands::run_search_command(&ctx, args).await,
        Command::Info(args) => commands::run_info_command(&ctx, args).await,
        Command::Download(args) => commands::run_download_command(&ctx, args, cli.quiet).await,
        Command::Ocr(args) => commands::run_ocr_command(&ctx, args).await,
    }
}
