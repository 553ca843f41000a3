//! CLI entry point for ydownloader.

use std::process::ExitCode;

use clap::Parser;
use tracing::debug;

mod app;
mod cli;

use app::exit::ProcessExit;
use app::terminal;
use cli::Args;

#[tokio::main]
async fn main() -> ExitCode {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    terminal::init_tracing(
        terminal::default_log_level(args.quiet, args.verbose),
        terminal::no_color_env_requested() || terminal::is_dumb_terminal(),
    );
    debug!(?args, "CLI arguments parsed");

    match app::run(args).await {
        Ok(exit) => exit.into(),
        Err(error) => {
            eprintln!("Error: {error:#}");
            ProcessExit::Failure.into()
        }
    }
}
