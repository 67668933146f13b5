use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "stratum-bridge",
    version,
    about = "Multi-port Stratum V1 mining relay",
    long_about = "A Stratum V1 relay that terminates miner connections on a per-coin \
                 port map, rewrites credentials toward a single upstream account, and \
                 tracks per-share accept/reject outcomes across a relay cluster."
)]
pub struct Args {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the relay
    Start {
        /// Run until the accept loops exit instead of waiting for Ctrl+C
        #[arg(short, long)]
        daemon: bool,
    },

    /// Validate a configuration file
    Config {
        /// Configuration file to validate
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Show effective configuration
        #[arg(long)]
        show: bool,
    },

    /// Generate an example configuration file
    Init {
        /// Output file path
        #[arg(short, long, default_value = "stratum-bridge.toml")]
        output: PathBuf,

        /// Overwrite existing file
        #[arg(long)]
        force: bool,
    },
}

impl Args {
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }
}
