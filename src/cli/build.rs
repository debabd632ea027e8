//! Build command implementation

use std::path::PathBuf;
use std::time::Instant;

use anyhow::Result;
use clap::Args;
use colored::Colorize;
use tracing::info;

use crate::compile::{self, Command, CompileRequest, Platform};
use crate::utils::format_duration;

/// Build the project for production
#[derive(Args, Debug)]
pub struct BuildCommand {
    /// Environment mode (dev, test, staging, ...)
    #[arg(short, long)]
    pub mode: Option<String>,

    /// Platform to compile for
    #[arg(short, long, value_enum, default_value = "web")]
    pub platform: Platform,
}

impl BuildCommand {
    pub async fn execute(&self, config_path: &str) -> Result<()> {
        let start = Instant::now();

        info!("Loading configuration from {}", config_path);
        eprintln!("{} Building project...", "→".blue());

        compile::start(CompileRequest {
            command: Command::Build,
            mode: self.mode.clone(),
            platform: self.platform,
            config_file: Some(PathBuf::from(config_path)),
        })
        .await?;

        eprintln!(
            "\n{} Build complete in {}\n",
            "✓".green().bold(),
            format_duration(start.elapsed())
        );

        Ok(())
    }
}
