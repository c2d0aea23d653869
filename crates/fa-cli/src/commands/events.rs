//! Events command for querying the local `SQLite` database.

use std::io::Write;

use anyhow::Result;
use clap::Args;
use fa_db::{Database, EventQuery};

use crate::Config;
use crate::commands::util::parse_datetime;
use crate::display::OutputMode;

#[derive(Debug, Args)]
pub struct EventsArgs {
    /// Only events with this name.
    #[arg(long)]
    pub name: Option<String>,

    /// Only events from this capture.
    #[arg(long, value_name = "ID")]
    pub capture: Option<String>,

    /// Events at or after this time (RFC 3339 or e.g. "2 hours ago").
    #[arg(long)]
    pub after: Option<String>,

    /// Events before this time (RFC 3339 or e.g. "2 hours ago").
    #[arg(long)]
    pub before: Option<String>,

    /// Show only the most recent N events.
    #[arg(long, value_name = "N")]
    pub limit: Option<usize>,

    /// Print events as JSON lines.
    #[arg(long)]
    pub json: bool,

    /// Disable colors.
    #[arg(long)]
    pub no_color: bool,
}

impl EventsArgs {
    fn query(&self) -> Result<EventQuery> {
        Ok(EventQuery {
            name: self.name.clone(),
            capture_id: self.capture.clone(),
            after: self.after.as_deref().map(parse_datetime).transpose()?,
            before: self.before.as_deref().map(parse_datetime).transpose()?,
            limit: self.limit,
        })
    }
}

/// Runs the events command, returning the number of events written.
pub fn run<W: Write>(writer: &mut W, db: &Database, args: &EventsArgs, config: &Config) -> Result<usize> {
    let events = db.list_events(&args.query()?)?;
    let output = OutputMode::new(args.json, config.color && !args.no_color);
    for stored in &events {
        output.write_event(writer, &stored.event)?;
    }
    Ok(events.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use insta::assert_snapshot;

    fn args() -> EventsArgs {
        EventsArgs {
            name: None,
            capture: None,
            after: None,
            before: None,
            limit: None,
            json: false,
            no_color: true,
        }
    }

    fn seeded_db() -> Database {
        let reference: DateTime<Utc> = "2025-01-05T12:00:00Z".parse().unwrap();
        let lines = [
            "01-05 10:00:00.000  1  2 V FA      : Logging event (FE): login, Bundle[{method=email}]",
            "01-05 10:05:00.000  1  2 V FA      : Logging event (FE): purchase, Bundle[{value=Double(3.5), currency=EUR}]",
            "01-05 10:10:00.000  1  2 V FA      : Logging event (FE): purchase, Bundle[{value=Double(7.0), currency=EUR}]",
        ];
        let events: Vec<_> = lines
            .iter()
            .filter_map(|line| fa_core::parse_at(line, &reference))
            .collect();
        let mut db = Database::open_in_memory().unwrap();
        db.insert_events(None, &events).unwrap();
        db
    }

    #[test]
    fn test_events_command_filters_by_name() {
        let db = seeded_db();
        let args = EventsArgs {
            name: Some("purchase".to_string()),
            ..args()
        };
        let mut out = Vec::new();
        let count = run(&mut out, &db, &args, &Config::default()).unwrap();

        assert_eq!(count, 2);
        assert_snapshot!(String::from_utf8(out).unwrap(), @r"
        01-05 10:05:00.000  purchase
            currency = EUR
            value = 3.5
        01-05 10:10:00.000  purchase
            currency = EUR
            value = 7.0
        ");
    }

    #[test]
    fn test_events_command_time_window_and_limit() {
        let db = seeded_db();
        let args = EventsArgs {
            after: Some("2025-01-05T10:05:00Z".to_string()),
            limit: Some(1),
            json: true,
            ..args()
        };
        let mut out = Vec::new();
        run(&mut out, &db, &args, &Config::default()).unwrap();

        let output = String::from_utf8(out).unwrap();
        let value: serde_json::Value = serde_json::from_str(output.trim()).unwrap();
        assert_eq!(value["timestamp"], "2025-01-05T10:10:00Z");
        assert_eq!(value["parameters"]["value"], "7.0");
    }

    #[test]
    fn test_events_command_rejects_bad_time() {
        let db = seeded_db();
        let args = EventsArgs {
            before: Some("soon".to_string()),
            ..args()
        };
        assert!(run(&mut Vec::new(), &db, &args, &Config::default()).is_err());
    }
}
