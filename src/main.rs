//! Crunch CLI entry point.

use clap::Parser;

use crunch::cli::{Cli, Commands};

// One thread keeps every simulation loop on a single timeline.
#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run(args) => crunch::cli::commands::run::execute(args, cli.json).await,
        Commands::Config(args) => crunch::cli::commands::config::execute(args, cli.json).await,
    };

    if let Err(err) = result {
        crunch::cli::handle_error(err, cli.json);
    }
}
