//! CLI command definitions
//!
//! Defines the clap commands for the scenario runner CLI.

use clap::Subcommand;
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum Commands {
    /// Execute scenario files against live infrastructure
    Run {
        /// Scenario files (.json/.yaml) or directories containing them
        paths: Vec<PathBuf>,

        /// Environment entries as KEY=VALUE, overriding the process env
        /// Can be specified multiple times: -e BASE_URL=http://localhost -e STAGE=dev
        #[arg(long = "env", short = 'e')]
        env: Vec<String>,

        /// Stop after the first failing scenario
        #[arg(long)]
        fail_fast: bool,

        /// Print each verdict as JSON instead of the colored report
        #[arg(long)]
        json: bool,
    },

    /// List scenario files found under a directory
    List {
        /// Root directory to search
        #[arg(default_value = "tests")]
        dir: PathBuf,
    },

    /// Load and validate scenarios without executing them
    Validate {
        /// Scenario files or directories
        paths: Vec<PathBuf>,
    },
}
