
use clap::Parser;
use colored::Colorize;
use std::process;

mod aggregate;
mod cache;
mod churn;
mod cli;
mod diff;
mod error;
mod filter;
mod message;
mod pipeline;
mod prefetch;
mod rename;
mod report;
mod svn;
mod util;

use crate::cli::Cli;
use crate::error::ChurnError;

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli) {
        Ok(_) => {
            process::exit(0);
        }
        Err(e) => {
            eprintln!("{} {:#}", "error:".red().bold(), e);
            process::exit(exit_code(&e));
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let config = cli.into_config()?;
    let cancel = prefetch::CancelToken::default();
    pipeline::run(&config, &cancel)
}

fn init_tracing(verbose: u8) {
    let filter = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn exit_code(error: &anyhow::Error) -> i32 {
    error
        .downcast_ref::<ChurnError>()
        .map(ChurnError::exit_code)
        .unwrap_or(1)
}
