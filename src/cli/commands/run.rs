//! `crunch run`: play one session headless.

use anyhow::{Context, Result};
use clap::Args;
use console::style;
use serde::Serialize;
use std::path::PathBuf;
use tokio::task::JoinHandle;

use crate::cli::output::{detail_table, output, CommandOutput};
use crate::domain::models::Config;
use crate::infrastructure::config::ConfigLoader;
use crate::infrastructure::logging::{LogConfig, LoggerImpl};
use crate::services::clock::format_elapsed;
use crate::services::{Session, SessionSummary};

/// Arguments of `crunch run`.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Read this file instead of .crunch/config.yaml and .crunch/local.yaml
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Leave backlog issues unassigned
    #[arg(long)]
    pub no_autopilot: bool,

    /// Seed for the issue generator
    #[arg(long)]
    pub seed: Option<u64>,

    /// Suppress the live status line
    #[arg(short, long)]
    pub quiet: bool,
}

/// Outcome of `crunch run`.
#[derive(Debug, Serialize)]
pub struct RunOutput {
    /// Whether the session was cut short by Ctrl-C
    pub interrupted: bool,
    /// Final state of the session.
    #[serde(flatten)]
    pub summary: SessionSummary,
}

impl CommandOutput for RunOutput {
    fn to_human(&self) -> String {
        let heading = if self.interrupted {
            style("Session interrupted").yellow().bold()
        } else {
            style("Game over").red().bold()
        };
        let summary = &self.summary;
        let table = detail_table(&[
            ("Survived", summary.elapsed.clone()),
            ("Issues generated", summary.issues_generated.to_string()),
            ("Issues completed", summary.issues_completed.to_string()),
            ("Left in backlog", summary.backlog_size.to_string()),
            ("Left with worker", summary.active_size.to_string()),
            ("Final disapproval", format!("{:.2}", summary.final_disapproval)),
        ]);
        format!("{heading}\n{table}")
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

/// Apply command-line overrides on top of the loaded configuration.
fn apply_overrides(config: &mut Config, args: &RunArgs) {
    if args.no_autopilot {
        config.autopilot.enabled = false;
    }
    if let Some(seed) = args.seed {
        config.generator.seed = Some(seed);
    }
}

/// Play one session and print its summary.
pub async fn execute(args: RunArgs, json_mode: bool) -> Result<()> {
    let mut config =
        super::load_config(args.config.as_deref()).context("Failed to load configuration")?;
    apply_overrides(&mut config, &args);
    ConfigLoader::validate(&config)?;

    let _logger = LoggerImpl::init(&LogConfig::from_settings(&config.logging)?)
        .context("Failed to initialize logging")?;

    let session = Session::new(&config).context("Failed to build session")?;
    session.start();

    let status = (!json_mode && !args.quiet).then(|| spawn_status_line(&session));

    let interrupted = tokio::select! {
        _ = session.wait_for_end() => false,
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for Ctrl-C")?;
            true
        }
    };
    if interrupted {
        session.stop();
    }
    let summary = session.wait_for_end().await;

    if let Some(status) = status {
        status.abort();
    }

    output(
        &RunOutput {
            interrupted,
            summary,
        },
        json_mode,
    );
    Ok(())
}

/// Print one status line per disapproval sample.
fn spawn_status_line(session: &Session) -> JoinHandle<()> {
    let session = session.clone();
    let mut updates = session.monitor().events().subscribe();
    tokio::spawn(async move {
        while let Some(envelope) = updates.recv().await {
            let disapproval = envelope.payload.disapproval();
            let level = if disapproval >= 75.0 {
                style(format!("{disapproval:6.2}")).red().bold()
            } else if disapproval >= 40.0 {
                style(format!("{disapproval:6.2}")).yellow()
            } else {
                style(format!("{disapproval:6.2}")).green()
            };
            eprintln!(
                "[{}] disapproval {level} | backlog {}/{} | worker {}/{} | stress {:.2}",
                format_elapsed(session.clock().spent_time()),
                session.backlog().size(),
                session.backlog().capacity(),
                session.worker().queue().size(),
                session.worker().max_active_issues(),
                session.worker().last_stress(),
            );
        }
    })
}
