//! CLI command definitions using clap.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// depgroup - dependency-ordered scaling
#[derive(Parser, Debug)]
#[command(name = "depgroup")]
#[command(version)]
#[command(about = "Scale groups of workloads in dependency order")]
#[command(
    long_about = "depgroup reconciles DeploymentGroup manifests: every item is held at zero \
                  capacity until each item it depends on is ready, then scaled to its target."
)]
pub struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true, default_value_t = false)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Check a group manifest for field errors, duplicate items and cycles
    Validate {
        /// Group manifest (YAML, or JSON by extension)
        manifest: PathBuf,
    },

    /// Run passes against in-memory workloads and print each result
    Simulate {
        /// Group manifest (YAML, or JSON by extension)
        manifest: PathBuf,

        /// Initial workloads as a YAML/JSON list; defaults to every item
        /// present with no capacity set
        #[arg(short, long)]
        workloads: Option<PathBuf>,

        /// Number of passes; workloads settle between passes
        #[arg(short, long, default_value_t = 3)]
        passes: u32,
    },

    /// Run the controller loop until Ctrl+C
    Run {
        /// Group manifests
        #[arg(required = true)]
        manifests: Vec<PathBuf>,

        /// Configuration file (TOML, or JSON by extension)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Seconds between simulated capacity manager rounds
        #[arg(long, default_value_t = 2)]
        settle_secs: u64,
    },
}
