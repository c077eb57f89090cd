//! CLI type definitions
//!
//! This module contains clap command structures that define the CLI interface.

use clap::{Parser, Subcommand};

use super::commands::config::ConfigArgs;
use super::commands::run::RunArgs;

/// Command-line arguments.
#[derive(Parser, Debug)]
#[command(name = "crunch")]
#[command(about = "Crunch - issue pipeline simulation", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output in JSON format
    #[arg(short, long, global = true)]
    pub json: bool,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a session until disapproval saturates or Ctrl-C
    Run(RunArgs),

    /// Print the effective configuration
    Config(ConfigArgs),
}
