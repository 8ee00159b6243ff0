//! Landcube CLI - Command-line interface
//!
//! Thin adapter wiring the tiled pipeline to files, stores and the terminal.

mod cli;
mod commands;
mod config;
mod errors;
mod output;
mod output_types;
mod progress;
mod storage;

use clap::Parser;
use cli::Cli;

fn main() {
    // Logs go to stderr so --json output stays parseable
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let result = tokio::runtime::Runtime::new()
        .map_err(anyhow::Error::from)
        .and_then(|runtime| runtime.block_on(commands::execute(cli)));

    if let Err(e) = result {
        let error = errors::from_anyhow(e);
        error.display();
        std::process::exit(error.exit_code);
    }
}
