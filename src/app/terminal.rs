//! Terminal capabilities and tracing setup.

use crate::app_config::VerbositySetting;

pub(crate) fn no_color_env_requested() -> bool {
    std::env::var_os("NO_COLOR").is_some_and(|value| !value.is_empty())
}

pub(crate) fn is_dumb_terminal() -> bool {
    std::env::var("TERM")
        .map(|value| value.eq_ignore_ascii_case("dumb"))
        .unwrap_or(false)
}

pub(crate) fn should_use_spinner(stderr_is_terminal: bool, quiet: bool, dumb_terminal: bool) -> bool {
    stderr_is_terminal && !quiet && !dumb_terminal
}

/// Filter used when `RUST_LOG` is unset.
///
/// Priority: `-q` > `-v` count > config `verbosity` > `info`.
pub(crate) fn default_level(quiet: bool, verbose: u8, configured: Option<VerbositySetting>) -> &'static str {
    if quiet {
        return "error";
    }
    match verbose {
        0 => match configured {
            Some(VerbositySetting::Quiet) => "error",
            Some(VerbositySetting::Verbose) => "debug",
            Some(VerbositySetting::Debug) => "trace",
            Some(VerbositySetting::Default) | None => "info",
        },
        1 => "debug",
        _ => "trace",
    }
}

/// Installs the stderr subscriber. `RUST_LOG` wins over `default_level`.
pub(crate) fn init_tracing(default_level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    let no_color = no_color_env_requested() || is_dumb_terminal();
    let _ = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_ansi(!no_color)
        .with_env_filter(filter)
        .try_init();
}
