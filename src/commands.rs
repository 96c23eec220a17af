//! CLI command definitions
//!
//! Defines the clap commands for the tester CLI.

use clap::{Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum Commands {
    /// Run every script in a directory once
    Run {
        /// Directory containing the scenario scripts
        dir: PathBuf,

        /// Output format
        #[arg(long, value_enum, default_value_t = Format::Pretty)]
        format: Format,

        /// Print request/response details for every test
        #[arg(long, short)]
        verbose: bool,
    },

    /// Run all scripts, then re-run them as they change
    Watch {
        /// Directory containing the scenario scripts
        dir: PathBuf,

        /// Address for the live report server (overrides the config file)
        #[arg(long)]
        addr: Option<String>,
    },

    /// List discovered scripts and the functions available to them
    #[command(alias = "ls")]
    List {
        /// Directory containing the scenario scripts
        dir: PathBuf,
    },
}

/// Reporter used by `run`
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Format {
    /// Colored, human-readable output
    Pretty,
    /// One JSON object per line
    Json,
}
