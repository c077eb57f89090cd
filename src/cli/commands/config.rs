//! `crunch config`: show the effective configuration.

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;
use std::path::PathBuf;

use crate::cli::output::{output, CommandOutput};
use crate::domain::models::Config;

/// Arguments of `crunch config`.
#[derive(Args, Debug)]
pub struct ConfigArgs {
    /// Read this file instead of .crunch/config.yaml and .crunch/local.yaml
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

/// The effective configuration.
#[derive(Debug, Serialize)]
pub struct ConfigOutput {
    /// Configuration after all layers were merged.
    #[serde(flatten)]
    pub config: Config,
}

impl CommandOutput for ConfigOutput {
    fn to_human(&self) -> String {
        serde_yaml::to_string(&self.config).unwrap_or_default()
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(&self.config).unwrap_or_default()
    }
}

/// Print the effective configuration.
pub async fn execute(args: ConfigArgs, json_mode: bool) -> Result<()> {
    let config = super::load_config(args.config.as_deref()).context("Failed to load configuration")?;
    output(&ConfigOutput { config }, json_mode);
    Ok(())
}
