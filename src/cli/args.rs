//! CLI argument definitions using clap
//!
//! Commands:
//! - cellbatch serve --config <path> [--port <port>]
//! - cellbatch check-config --config <path>

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// cellbatch - OData $batch server for cell/box collections
#[derive(Parser, Debug)]
#[command(name = "cellbatch")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Load config and schema, then serve $batch requests
    Serve {
        /// Path to configuration file
        #[arg(long, default_value = "./cellbatch.json")]
        config: PathBuf,

        /// Override the configured listen port
        #[arg(long)]
        port: Option<u16>,
    },

    /// Validate a configuration file and print the effective settings
    CheckConfig {
        /// Path to configuration file
        #[arg(long, default_value = "./cellbatch.json")]
        config: PathBuf,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}
