// Entrypoint for the CLI application.
// - Keeps `main` small: resolve the configuration and hand it to `ui::run`.
// - Every failure ends the run with exit status 1.

use std::process::ExitCode;

use clap::{CommandFactory, Parser};
use crossterm::style::Stylize;
use dropbox_upload::config::{normalize_args, Args, Config};
use dropbox_upload::ui;
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    init_tracing();

    let args = Args::parse_from(normalize_args(std::env::args_os()));
    let config = match Config::resolve(args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            eprintln!();
            // Usage goes to stdout like `--help`; nothing to do if that fails.
            let _ = Args::command().print_help();
            return ExitCode::FAILURE;
        }
    };

    // Authorization failures land here too and exit 1 like any other
    // failure, so scripts never read a run that uploaded nothing as success.
    match ui::run(&config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {:#}", "error:".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

/// Diagnostics go to stderr, filtered by `RUST_LOG` (default `warn`) so
/// they stay out of the regular output.
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
