//! Command-line interface for kiln
//!
//! Provides the main CLI structure using clap with subcommands for:
//! - `dev` (alias `server`): development mode with watch builds
//! - `build`: production build

mod build;
mod dev;

use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::Colorize;

pub use build::BuildCommand;
pub use dev::DevCommand;

/// kiln - build orchestration for web and desktop apps
#[derive(Parser, Debug)]
#[command(name = "kiln")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to kiln.toml config file
    #[arg(short, long, global = true, default_value = "kiln.toml")]
    pub config: String,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start development mode with watch builds
    #[command(alias = "server")]
    Dev(DevCommand),

    /// Build the project for production
    Build(BuildCommand),
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(&self) -> Result<()> {
        print_banner();

        match &self.command {
            Commands::Dev(cmd) => cmd.execute(&self.config).await,
            Commands::Build(cmd) => cmd.execute(&self.config).await,
        }
    }
}

/// Print the kiln banner
fn print_banner() {
    eprintln!(
        "\n{} {} {}\n",
        "⚒".cyan(),
        "kiln".bold().cyan(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
}
