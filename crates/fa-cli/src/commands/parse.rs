//! Offline parsing of a saved logcat capture.

use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, FixedOffset, Local};
use clap::Args;
use fa_core::AnalyticsEvent;
use fa_db::Database;
use rayon::prelude::*;

use crate::Config;
use crate::commands::util::read_input;
use crate::display::OutputMode;

#[derive(Debug, Args)]
pub struct ParseArgs {
    /// Capture file (`-` for stdin).
    #[arg(value_name = "FILE", default_value = "-")]
    pub input: PathBuf,

    /// Instant used to infer the year of log timestamps (RFC 3339; default now).
    #[arg(long, value_parser = parse_reference)]
    pub reference: Option<DateTime<FixedOffset>>,

    /// Print events as JSON lines.
    #[arg(long)]
    pub json: bool,

    /// Save events to the database under a new capture.
    #[arg(long)]
    pub save: bool,

    /// Disable colors.
    #[arg(long)]
    pub no_color: bool,
}

fn parse_reference(s: &str) -> Result<DateTime<FixedOffset>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(s)
}

/// Parses every line of `text` against `reference`, keeping input order.
pub fn parse_capture(text: &str, reference: &DateTime<FixedOffset>) -> Vec<AnalyticsEvent> {
    let lines: Vec<&str> = text.lines().collect();
    lines
        .par_iter()
        .filter_map(|line| fa_core::parse_at(line, reference))
        .collect()
}

/// Runs the parse command, returning the number of events found.
pub fn run<W: Write>(
    writer: &mut W,
    args: &ParseArgs,
    config: &Config,
    db: Option<&mut Database>,
) -> Result<usize> {
    let bytes = read_input(Some(&args.input))?;
    let text = String::from_utf8_lossy(&bytes);
    let reference = args
        .reference
        .unwrap_or_else(|| Local::now().fixed_offset());
    let events = parse_capture(&text, &reference);
    tracing::debug!(
        lines = text.lines().count(),
        events = events.len(),
        "parsed capture"
    );

    if let Some(db) = db {
        let label = if args.input.as_os_str() == "-" {
            "stdin".to_string()
        } else {
            args.input.display().to_string()
        };
        let capture = db
            .start_capture(&label, None)
            .context("failed to start capture")?;
        let saved = db
            .insert_events(Some(&capture.id), &events)
            .context("failed to save events")?;
        tracing::info!(capture_id = %capture.id, saved, "saved events");
    }

    let output = OutputMode::new(args.json, config.color && !args.no_color);
    for event in &events {
        output.write_event(writer, event)?;
    }
    Ok(events.len())
}
