//! Import command for restoring a backup into the local `SQLite` store.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use fa_db::{Backup, Database, ImportStats};

use crate::commands::util::read_input;

#[derive(Debug, Args)]
pub struct ImportArgs {
    /// Backup file to read (`-` or omitted for stdin).
    #[arg(short, long, value_name = "FILE")]
    pub input: Option<PathBuf>,
}

pub fn run(db: &mut Database, args: &ImportArgs) -> Result<ImportStats> {
    let bytes = read_input(args.input.as_deref())?;
    let json = String::from_utf8(bytes).context("backup is not valid UTF-8")?;
    import_json(db, &json)
}

fn import_json(db: &mut Database, json: &str) -> Result<ImportStats> {
    let backup = Backup::from_json(json).context("invalid backup")?;
    let stats = db.import_backup(&backup)?;
    Ok(stats)
}
