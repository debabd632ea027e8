//! Development command implementation

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use colored::Colorize;
use tracing::info;

use crate::compile::{self, Command, CompileRequest, Platform};

/// Start development mode with watch builds
#[derive(Args, Debug)]
pub struct DevCommand {
    /// Environment mode (dev, test, staging, ...)
    #[arg(short, long)]
    pub mode: Option<String>,

    /// Platform to compile for
    #[arg(short, long, value_enum, default_value = "web")]
    pub platform: Platform,
}

impl DevCommand {
    pub async fn execute(&self, config_path: &str) -> Result<()> {
        info!("Loading configuration from {}", config_path);

        eprintln!(
            "{} Starting {} development mode{}\n",
            "→".blue(),
            self.platform.as_str().cyan(),
            self.mode
                .as_deref()
                .map(|mode| format!(" ({})", mode).dimmed().to_string())
                .unwrap_or_default()
        );

        compile::start(CompileRequest {
            command: Command::Dev,
            mode: self.mode.clone(),
            platform: self.platform,
            config_file: Some(PathBuf::from(config_path)),
        })
        .await
    }
}
