//! kiln - build orchestration front-end for web and desktop apps
//!
//! kiln resolves user configuration, drives an external bundling engine to
//! produce development or production artifacts, and — for desktop targets —
//! supervises the runtime process through coordinated dev and build
//! lifecycles.
//!
//! # Features
//! - One config, two platforms: web pages and desktop main/preload/renderer
//! - Coordinated desktop builds with a single owner for the shared output dir
//! - Dev-process supervision with debounced restarts and operator commands
//! - Build diagnostics: asset sizes, gzip totals, dependency-cycle checks

use clap::Parser;
use colored::Colorize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod bundler;
mod cli;
mod compile;
mod config;
mod desktop;
mod error;
mod report;
mod utils;

pub use cli::Cli;

/// Initialize the logging/tracing system
fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("kiln=debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("kiln=info"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_tracing(cli.verbose);

    if let Err(err) = cli.execute().await {
        eprintln!("\n{} {:#}", "✗".red().bold(), err);
        std::process::exit(error::exit_code_for(&err));
    }
}
