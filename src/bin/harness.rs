//! Resource-limited runner for long archive jobs.
//!
//! ```text
//! newsarchive-harness --mem-mb 2048 --timeout-min 600 -- download sn83045462 --ocr both
//! newsarchive-harness --kill
//! ```

use std::ffi::OsString;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use newsarchive_core::harness::{HarnessLimits, Supervisor, default_marker_path, kill_from_marker};
use tracing::info;

/// Run newsarchive under a memory ceiling and a wall-clock timeout.
///
/// Limits default to HARNESS_MEM_MB (else 75% of available memory) and
/// HARNESS_TIMEOUT minutes (else 120). Flags win over the environment.
#[derive(Parser, Debug)]
#[command(name = "newsarchive-harness")]
#[command(author, version, about)]
struct HarnessArgs {
    /// Memory ceiling for the whole process tree, in MiB
    #[arg(long, value_name = "N", value_parser = clap::value_parser!(u64).range(1..))]
    mem_mb: Option<u64>,

    /// Wall-clock limit in minutes
    #[arg(long, value_name = "N", value_parser = clap::value_parser!(u64).range(1..))]
    timeout_min: Option<u64>,

    /// Seconds between usage polls
    #[arg(long, value_name = "N", value_parser = clap::value_parser!(u64).range(1..))]
    poll_secs: Option<u64>,

    /// Program to supervise (default: the newsarchive binary next to this one)
    #[arg(long, value_name = "PATH")]
    program: Option<PathBuf>,

    /// Kill a running harness's process tree and exit
    #[arg(long, conflicts_with_all = ["mem_mb", "timeout_min", "poll_secs", "program", "args"])]
    kill: bool,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Arguments passed to the supervised program
    #[arg(last = true, value_name = "ARGS")]
    args: Vec<OsString>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = HarnessArgs::parse();
    init_tracing(args.verbose);
    match run(args).await {
        Ok(code) => code,
        Err(error) => {
            eprintln!("Error: {error:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: HarnessArgs) -> Result<ExitCode> {
    let marker_path = default_marker_path();
    if args.kill {
        let report = kill_from_marker(&marker_path).await;
        info!(%report, "kill request handled");
        println!("{report}");
        return Ok(ExitCode::SUCCESS);
    }

    let mut limits = HarnessLimits::from_env()?;
    if let Some(mb) = args.mem_mb {
        limits = limits.with_memory_mb(mb);
    }
    if let Some(minutes) = args.timeout_min {
        limits = limits.with_timeout_minutes(minutes);
    }
    if let Some(secs) = args.poll_secs {
        limits = limits.with_poll_interval(Duration::from_secs(secs));
    }

    let program = match args.program {
        Some(program) => program,
        None => sibling_binary()?,
    };
    let outcome = Supervisor::new(program, args.args, limits)
        .with_marker_path(marker_path)
        .run()
        .await?;
    println!("harness: {outcome}");
    Ok(if outcome.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn sibling_binary() -> Result<PathBuf> {
    let exe = std::env::current_exe().context("Cannot locate the harness executable")?;
    Ok(exe.with_file_name(format!("newsarchive{}", std::env::consts::EXE_SUFFIX)))
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .try_init();
}
