//! Implementation of the `fa export` command.
//!
//! Writes every capture and event as a versioned JSON backup, to a file or
//! to stdout.

use std::fs;
use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use fa_db::Database;

#[derive(Debug, Args)]
pub struct ExportArgs {
    /// Write the backup here instead of stdout.
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,
}

/// Runs the export command, returning the number of events exported.
pub fn run<W: Write>(writer: &mut W, db: &Database, args: &ExportArgs) -> Result<usize> {
    let backup = db.export_backup().context("failed to read database")?;
    let json = backup.to_json_pretty()?;

    match &args.output {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
            fs::write(path, json)
                .with_context(|| format!("failed to write {}", path.display()))?;
            tracing::info!(path = %path.display(), "backup written");
        }
        None => writeln!(writer, "{json}")?,
    }
    Ok(backup.data.events.len())
}
