//! Command-line argument definitions.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::commands::events::EventsArgs;
use crate::commands::export::ExportArgs;
use crate::commands::import::ImportArgs;
use crate::commands::parse::ParseArgs;
use crate::commands::watch::WatchArgs;

/// Live Firebase Analytics event viewer.
///
/// Reads Android logcat output, recognizes the analytics SDK's event log
/// lines and shows each event with its decoded parameters.
#[derive(Debug, Parser)]
#[command(name = "fa", version, about, long_about = None)]
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
    /// Stream events from a device (or a log file) as they are logged.
    Watch(WatchArgs),

    /// Parse a saved logcat capture.
    Parse(ParseArgs),

    /// Query stored events.
    Events(EventsArgs),

    /// Show stored captures and event counts.
    Status,

    /// Write a JSON backup of all stored data.
    Export(ExportArgs),

    /// Restore a JSON backup.
    Import(ImportArgs),
}
