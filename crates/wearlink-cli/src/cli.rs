//! Command-line interface definitions and parsing

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    pub config: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Connect to a simulated wearable and exercise the session
    Simulate {
        /// APDU command (hex) to execute after connecting; repeatable
        #[arg(short, long = "apdu")]
        apdus: Vec<String>,

        /// Route RTM JSON messages read line by line from stdin
        #[arg(long)]
        rtm: bool,

        /// Override the simulated connect delay in milliseconds
        #[arg(long)]
        connect_delay_ms: Option<u64>,

        /// Override the simulated APDU response delay in milliseconds
        #[arg(long)]
        apdu_delay_ms: Option<u64>,

        /// Overall connect timeout in seconds
        #[arg(long)]
        connect_timeout: Option<u64>,
    },
    /// Print an example configuration file
    ExampleConfig,
}
