mod cli;
mod commands;
mod config;
mod error;
mod logging;
mod utils;

use crate::cli::{Cli, Commands};
use crate::config::PartialEngineConfig;
use crate::error::Result;
use clap::Parser;
use tracing::{debug, error, info};

fn main() {
    if let Err(e) = run_app() {
        eprintln!("\n❌ Error: {}", e);
        std::process::exit(1);
    }
}

fn run_app() -> Result<()> {
    let cli = Cli::parse();
    logging::setup_logging(cli.verbose, cli.quiet, cli.log_file.clone())?;

    info!("zgrun v{} starting up.", env!("CARGO_PKG_VERSION"));
    debug!("Full CLI arguments parsed: {:?}", &cli);

    let partial = match &cli.config {
        Some(path) => PartialEngineConfig::from_file(path)?,
        None => PartialEngineConfig::default(),
    };
    let config = partial.merge_with_cli(&cli)?;
    debug!("Resolved engine configuration: {:?}", config);

    let threads = cli.threads;
    let command_result = match cli.command {
        Commands::Run(args) => {
            info!("Dispatching to 'run' command.");
            commands::run::run(args, &config)
        }
        Commands::Track(args) => {
            info!("Dispatching to 'track' command.");
            commands::track::run(args, threads, &config)
        }
    };

    match &command_result {
        Ok(()) => info!("Command completed successfully."),
        Err(e) => error!("Command failed: {}", e),
    }
    command_result
}
