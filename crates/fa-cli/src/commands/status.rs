//! Status command for summarizing stored captures and events.

use std::io::Write;

use anyhow::Result;

use fa_db::Database;

use crate::Config;

pub fn run<W: Write>(writer: &mut W, db: &Database, config: &Config) -> Result<()> {
    let captures = db.list_captures()?;
    let total = db.count_events()?;

    writeln!(writer, "fa-watch status")?;
    writeln!(writer, "Database: {}", config.database_path.display())?;
    writeln!(writer, "Captures: {}", captures.len())?;
    if let Some(last) = captures.last() {
        writeln!(
            writer,
            "Last capture: {} ({})",
            last.started_at.format("%Y-%m-%d %H:%M:%S UTC"),
            last.source
        )?;
    }

    if total == 0 {
        writeln!(writer, "No events recorded.")?;
        return Ok(());
    }

    writeln!(writer, "Events: {total}")?;
    for count in db.event_counts()? {
        writeln!(writer, "- {}: {}", count.name, count.count)?;
    }

    Ok(())
}
