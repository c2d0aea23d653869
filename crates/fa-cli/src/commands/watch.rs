//! Live capture of analytics events from a device or a log stream.

use std::io::Write;
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Args;
use fa_core::Params;
use fa_db::Database;

use crate::Config;
use crate::commands::util::parse_key_value;
use crate::display::OutputMode;
use crate::filter::EventFilter;
use crate::source::{AdbSource, FileSource, LineSource, read_line_lossy};

/// Lines buffered between the reader thread and the parser.
const LINE_BUFFER: usize = 1024;

#[derive(Debug, Args)]
pub struct WatchArgs {
    /// Read a saved log instead of a device (`-` for stdin).
    #[arg(short, long, value_name = "FILE")]
    pub input: Option<PathBuf>,

    /// Device serial, as listed by `adb devices`.
    #[arg(short, long)]
    pub serial: Option<String>,

    /// Enable analytics debug mode for this package.
    #[arg(short, long)]
    pub package: Option<String>,

    /// Skip `setprop` on the device.
    #[arg(long)]
    pub no_setup: bool,

    /// Show only these event names.
    #[arg(long, value_name = "NAME")]
    pub only: Vec<String>,

    /// Hide these event names (in addition to configured exclusions).
    #[arg(long, value_name = "NAME")]
    pub exclude: Vec<String>,

    /// Attach a manual parameter to every event.
    #[arg(long = "set", value_name = "KEY=VALUE", value_parser = parse_key_value)]
    pub manual: Vec<(String, String)>,

    /// Stop after this many seconds.
    #[arg(long, value_name = "SECS")]
    pub duration: Option<u64>,

    /// Save events to the database under a new capture.
    #[arg(long)]
    pub save: bool,

    /// Print events as JSON lines.
    #[arg(long)]
    pub json: bool,

    /// Disable colors.
    #[arg(long)]
    pub no_color: bool,
}

/// Counters reported when a watch ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatchSummary {
    pub lines: usize,
    pub events: usize,
    pub shown: usize,
    pub saved: usize,
}

/// Per-event processing shared by every source.
pub struct WatchOptions {
    pub filter: EventFilter,
    pub manual: Params,
    pub output: OutputMode,
    pub duration: Option<Duration>,
}

impl WatchOptions {
    pub fn from_args(args: &WatchArgs, config: &Config) -> Self {
        let exclude = config
            .exclude_events
            .iter()
            .chain(&args.exclude)
            .cloned();
        Self {
            filter: EventFilter::new(args.only.iter().cloned(), exclude),
            manual: args.manual.iter().cloned().collect(),
            output: OutputMode::new(args.json, config.color && !args.no_color),
            duration: args.duration.map(Duration::from_secs),
        }
    }
}

pub fn run<W: Write>(
    writer: &mut W,
    args: &WatchArgs,
    config: &Config,
    db: Option<&mut Database>,
) -> Result<WatchSummary> {
    let options = WatchOptions::from_args(args, config);
    let source: Box<dyn LineSource> = match &args.input {
        Some(path) => Box::new(FileSource::new(path)),
        None => Box::new(AdbSource {
            adb_path: config.adb_path.clone(),
            serial: args.serial.clone(),
            package: args.package.clone(),
            log_tags: config.log_tags.clone(),
            setup: !args.no_setup,
        }),
    };
    watch(writer, source.as_ref(), &options, db)
}

/// Streams lines from `source` until it ends or the duration elapses.
///
/// A reader thread feeds a bounded channel; this thread parses, filters,
/// prints and saves. A read error ends the watch with that error.
pub fn watch<W: Write>(
    writer: &mut W,
    source: &dyn LineSource,
    options: &WatchOptions,
    mut db: Option<&mut Database>,
) -> Result<WatchSummary> {
    let opened = source.open()?;
    let capture_id = match db.as_deref_mut() {
        Some(db) => Some(
            db.start_capture(&source.label(), source.device().as_deref())
                .context("failed to start capture")?
                .id,
        ),
        None => None,
    };

    let _guard = opened.guard;
    let mut reader = opened.reader;
    let (tx, rx) = mpsc::sync_channel(LINE_BUFFER);
    thread::spawn(move || {
        let mut buf = Vec::new();
        loop {
            let line = read_line_lossy(&mut reader, &mut buf);
            let done = !matches!(line, Ok(Some(_)));
            let line = line.transpose();
            if let Some(line) = line {
                if tx.send(line).is_err() {
                    break;
                }
            }
            if done {
                break;
            }
        }
    });
    tracing::debug!(source = %source.label(), "watching");

    let deadline = options.duration.map(|d| Instant::now() + d);
    let mut summary = WatchSummary::default();
    while let Some(line) = next_line(&rx, deadline) {
        let line = line.with_context(|| format!("failed to read from {}", source.label()))?;
        summary.lines += 1;

        let Some(event) = fa_core::parse(&line) else {
            continue;
        };
        let event = if options.manual.is_empty() {
            event
        } else {
            event.with_manual_parameters(options.manual.clone())
        };
        let event = options.filter.apply(event);
        summary.events += 1;

        if let Some(db) = db.as_deref_mut() {
            summary.saved += db
                .insert_events(capture_id.as_deref(), std::slice::from_ref(&event))
                .context("failed to save event")?;
        }
        if event.is_filtered {
            tracing::debug!(name = %event.name, "event filtered");
            continue;
        }
        options.output.write_event(writer, &event)?;
        writer.flush()?;
        summary.shown += 1;
    }

    tracing::info!(
        lines = summary.lines,
        events = summary.events,
        shown = summary.shown,
        saved = summary.saved,
        "watch finished"
    );
    Ok(summary)
}

/// Next message from the reader, or `None` once it is done or time is up.
fn next_line<T>(rx: &Receiver<T>, deadline: Option<Instant>) -> Option<T> {
    let Some(deadline) = deadline else {
        return rx.recv().ok();
    };
    let remaining = deadline.saturating_duration_since(Instant::now());
    if remaining.is_zero() {
        tracing::info!("watch duration elapsed");
        return None;
    }
    match rx.recv_timeout(remaining) {
        Ok(message) => Some(message),
        Err(RecvTimeoutError::Timeout) => {
            tracing::info!("watch duration elapsed");
            None
        }
        Err(RecvTimeoutError::Disconnected) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{self, BufRead, Cursor};

    use fa_db::EventQuery;
    use insta::assert_snapshot;

    use crate::source::OpenedSource;

    const CAPTURE: &str = "\
--------- beginning of main
01-05 10:00:00.100  1234  5678 V FA      : Logging event (FE): screen_view(_vs), Bundle[{ga_screen(_sn)=Home}]
01-05 10:00:01.200  1234  5678 I ActivityManager: Displayed com.example/.MainActivity
01-05 10:00:02.300  1234  5678 V FA      : Logging event (FE): add_to_cart, Bundle[{item_id=sku1, quantity=Long(2)}]
01-05 10:00:03.400  1234  5678 W FA      : Invalid default event parameter type. Name, value: cart_total_items, 1
";

    /// In-memory source for driving the pipeline.
    struct StaticSource(&'static str);

    impl LineSource for StaticSource {
        fn label(&self) -> String {
            "test".to_string()
        }

        fn open(&self) -> Result<OpenedSource> {
            Ok(OpenedSource {
                reader: Box::new(Cursor::new(self.0.as_bytes())),
                guard: None,
            })
        }
    }

    /// A reader that fails on the first read.
    struct BrokenSource;

    impl LineSource for BrokenSource {
        fn label(&self) -> String {
            "broken".to_string()
        }

        fn open(&self) -> Result<OpenedSource> {
            struct Broken;
            impl io::Read for Broken {
                fn read(&mut self, _: &mut [u8]) -> io::Result<usize> {
                    Err(io::Error::other("device disconnected"))
                }
            }
            let reader: Box<dyn BufRead + Send> = Box::new(io::BufReader::new(Broken));
            Ok(OpenedSource {
                reader,
                guard: None,
            })
        }
    }

    /// A source that cannot be opened at all.
    struct MissingSource;

    impl LineSource for MissingSource {
        fn label(&self) -> String {
            "missing.log".to_string()
        }

        fn open(&self) -> Result<OpenedSource> {
            anyhow::bail!("failed to open missing.log")
        }
    }

    fn options() -> WatchOptions {
        WatchOptions {
            filter: EventFilter::default(),
            manual: Params::new(),
            output: OutputMode::Text { color: false },
            duration: None,
        }
    }

    #[test]
    fn test_watch_prints_matched_events() {
        let mut out = Vec::new();
        let summary = watch(&mut out, &StaticSource(CAPTURE), &options(), None).unwrap();

        assert_eq!(
            summary,
            WatchSummary {
                lines: 5,
                events: 3,
                shown: 3,
                saved: 0
            }
        );
        assert_snapshot!(String::from_utf8(out).unwrap(), @r"
        01-05 10:00:00.100  screen_view
            ga_screen = Home
        01-05 10:00:02.300  add_to_cart
            item_id = sku1
            quantity = 2
        01-05 10:00:03.400  fa_invalid_default_param
            cart_total_items = 1
        ");
    }

    #[test]
    fn test_filtered_events_are_hidden_but_saved() {
        let mut db = Database::open_in_memory().unwrap();
        let options = WatchOptions {
            filter: EventFilter::new(Vec::new(), vec!["screen_view".to_string()]),
            manual: Params::from([("tester".to_string(), "qa-1".to_string())]),
            ..options()
        };
        let mut out = Vec::new();
        let summary = watch(&mut out, &StaticSource(CAPTURE), &options, Some(&mut db)).unwrap();

        assert_eq!(summary.events, 3);
        assert_eq!(summary.shown, 2);
        assert_eq!(summary.saved, 3);
        assert!(!String::from_utf8(out).unwrap().contains("screen_view"));

        let stored = db.list_events(&EventQuery::default()).unwrap();
        assert_eq!(stored.len(), 3);
        assert!(stored[0].event.is_filtered);
        assert_eq!(
            stored[1].event.manual_parameters.get("tester").map(String::as_str),
            Some("qa-1")
        );
        let captures = db.list_captures().unwrap();
        assert_eq!(captures.len(), 1);
        assert_eq!(captures[0].source, "test");
        assert!(stored.iter().all(|e| e.capture_id.as_deref() == Some(captures[0].id.as_str())));
    }

    #[test]
    fn test_read_error_ends_watch_with_error() {
        let mut out = Vec::new();
        let err = watch(&mut out, &BrokenSource, &options(), None).unwrap_err();
        assert!(format!("{err:#}").contains("device disconnected"));
    }

    #[test]
    fn test_source_open_failure_records_no_capture() {
        let mut db = Database::open_in_memory().unwrap();
        let mut out = Vec::new();
        let err = watch(&mut out, &MissingSource, &options(), Some(&mut db)).unwrap_err();

        assert!(err.to_string().contains("missing.log"));
        assert!(db.list_captures().unwrap().is_empty());
    }

    #[test]
    fn test_zero_duration_stops_immediately() {
        let options = WatchOptions {
            duration: Some(Duration::ZERO),
            ..options()
        };
        let mut out = Vec::new();
        let summary = watch(&mut out, &StaticSource(CAPTURE), &options, None).unwrap();
        assert_eq!(summary, WatchSummary::default());
        assert!(out.is_empty());
    }

    #[test]
    fn test_options_merge_config_and_flags() {
        let config = Config {
            exclude_events: vec!["screen_view".to_string(), "user_engagement".to_string()],
            color: true,
            ..Config::default()
        };
        let args = WatchArgs {
            input: None,
            serial: None,
            package: None,
            no_setup: false,
            only: vec!["screen_view".to_string()],
            exclude: vec!["login".to_string()],
            manual: vec![("tester".to_string(), "qa".to_string())],
            duration: Some(30),
            save: false,
            json: false,
            no_color: true,
        };

        let options = WatchOptions::from_args(&args, &config);
        assert!(!options.filter.is_filtered("screen_view"));
        assert!(options.filter.is_filtered("login"));
        assert!(options.filter.is_filtered("purchase"));
        assert_eq!(options.output, OutputMode::Text { color: false });
        assert_eq!(options.duration, Some(Duration::from_secs(30)));
        assert_eq!(options.manual.get("tester").map(String::as_str), Some("qa"));
    }
}
