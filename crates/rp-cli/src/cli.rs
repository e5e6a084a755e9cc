//! Command-line argument definitions.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Recording session control for `RecPilot`.
///
/// Keeps the control app's clock reconciled with an external recorder and
/// exports logged markers into the recorder's timeline.
#[derive(Debug, Parser)]
#[command(name = "recpilot", version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to config file.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run the session control loop: JSON requests on stdin, one JSON
    /// response per line on stdout.
    Serve,

    /// Archive a whole session: pair uploaded recordings with logged
    /// segments and zip the per-take exports.
    FinalExport {
        /// JSON document describing the session and its segments.
        #[arg(long)]
        metadata: PathBuf,

        /// Directory holding the uploaded recorder files.
        #[arg(long)]
        recordings: PathBuf,
    },

    /// Upgrade the marker log to the current column layout.
    Migrate,

    /// Show configuration and marker log statistics.
    Status,
}
