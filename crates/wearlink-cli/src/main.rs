//! Wearlink CLI entry point

use clap::Parser;
use tracing::{error, info};

use wearlink_cli::{cli::Cli, commands::CommandDispatcher, config::CliAppConfig, error::Result};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let cli = Cli::parse();

    // Load configuration
    let config = load_configuration(&cli)?;

    // Initialize logging; stdout carries the JSON output
    setup_logging(cli.verbose || config.cli.verbose);
    match &cli.config {
        Some(path) => info!("Loaded configuration from: {}", path),
        None => info!("Using default configuration"),
    }

    if let Err(e) = CommandDispatcher::execute(cli, config).await {
        error!("Command execution failed: {}", e);
        std::process::exit(1);
    }

    Ok(())
}

/// Setup logging based on verbosity level
fn setup_logging(verbose: bool) {
    let log_level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Load configuration from file or use defaults
fn load_configuration(cli: &Cli) -> Result<CliAppConfig> {
    if let Some(config_path) = &cli.config {
        Ok(CliAppConfig::load_from_file(config_path)?)
    } else {
        Ok(CliAppConfig::default())
    }
}
