//! Command line definition

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "bootkeepctl")]
#[command(about = "Bootkeep - inspect and control the device update supervisor", long_about = None)]
#[command(version)]
#[command(disable_help_subcommand = true)]
pub struct Cli {
    /// Configuration file (overrides $BOOTKEEP_CONFIG and the default path)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Commands {
    /// Show installed versions, confirmation state and pending requests
    Status {
        /// Output JSON only
        #[arg(long)]
        json: bool,
    },

    /// Ask the supervisor to stop the application and check for updates
    ForceUpdate,

    /// Check a local artifact against an expected SHA-256 digest
    Verify {
        /// Artifact file
        file: PathBuf,

        /// Expected digest, hex
        hash: String,
    },
}
