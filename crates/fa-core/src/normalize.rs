//! Building canonical events from format-specific extractions.
//!
//! Logcat timestamps carry month, day and time of day but no year. The year
//! is inferred from a reference instant (normally "now") with a window biased
//! towards the recent past, so captures replayed shortly after New Year still
//! land in the previous year.

use std::sync::LazyLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use chrono::{DateTime, Datelike, Duration, NaiveDate, SecondsFormat, TimeZone, Utc};
use regex::Regex;

use crate::event::AnalyticsEvent;
use crate::parser::LogFormat;
use crate::types::{EventId, EventName, Params};

/// A candidate further than this in the future is taken to be from last year.
const MAX_FUTURE_DAYS: i64 = 30;

/// A candidate further than this in the past is taken to be from next year.
const MAX_PAST_DAYS: i64 = 335;

/// `MM-DD HH:MM:SS[.fff]`, fraction of one to six digits.
static PARTIAL_TIMESTAMP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(\d{1,2})-(\d{1,2})\s+(\d{1,2}):(\d{2}):(\d{2})(?:\.(\d{1,6}))?\s*$").unwrap()
});

/// Process-wide origin for the id clock.
static CLOCK_ORIGIN: LazyLock<Instant> = LazyLock::new(Instant::now);

/// Last clock reading handed out, so readings are strictly increasing.
static LAST_CLOCK_READING: AtomicU64 = AtomicU64::new(0);

/// What a matcher pulled out of a line, before normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extraction {
    /// The matcher that produced this extraction.
    pub format: LogFormat,
    pub name: EventName,
    pub raw_timestamp: Option<String>,
    pub parameters: Params,
    pub items: Vec<Params>,
}

/// Month/day/time fields of a year-less timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PartialTimestamp {
    month: u32,
    day: u32,
    hour: u32,
    minute: u32,
    second: u32,
    nanos: u32,
}

impl PartialTimestamp {
    fn parse(raw: &str) -> Option<Self> {
        let caps = PARTIAL_TIMESTAMP.captures(raw)?;
        let field = |idx: usize| caps.get(idx)?.as_str().parse::<u32>().ok();
        let nanos = match caps.get(6) {
            Some(fraction) => {
                let digits = fraction.as_str();
                let scale = 10u32.pow(9 - u32::try_from(digits.len()).ok()?);
                digits.parse::<u32>().ok()? * scale
            }
            None => 0,
        };
        Some(Self {
            month: field(1)?,
            day: field(2)?,
            hour: field(3)?,
            minute: field(4)?,
            second: field(5)?,
            nanos,
        })
    }

    /// The instant this timestamp denotes in `year`, in the time zone `tz`.
    fn in_year<Tz: TimeZone>(self, year: i32, tz: &Tz) -> Option<DateTime<Utc>> {
        let naive = NaiveDate::from_ymd_opt(year, self.month, self.day)?.and_hms_nano_opt(
            self.hour,
            self.minute,
            self.second,
            self.nanos,
        )?;
        // A wall-clock time skipped by a DST jump resolves an hour later.
        tz.from_local_datetime(&naive)
            .earliest()
            .or_else(|| tz.from_local_datetime(&(naive + Duration::hours(1))).earliest())
            .map(|dt| dt.with_timezone(&Utc))
    }
}

/// Resolves a year-less logcat timestamp against `reference`.
///
/// The candidate is built in the reference's year and time zone. If it lies
/// more than 30 days after the reference the previous year is used; if it
/// lies more than 335 days before, the next year. A date that does not exist
/// in the reference year (`02-29`) is tried in the previous year and kept
/// only if it falls inside that window. Returns `None` when `raw` is not
/// a partial timestamp or no year places it in the window.
pub fn resolve_timestamp<Tz: TimeZone>(raw: &str, reference: &DateTime<Tz>) -> Option<DateTime<Utc>> {
    let partial = PartialTimestamp::parse(raw)?;
    let tz = reference.timezone();
    let year = reference.year();
    let reference_utc = reference.with_timezone(&Utc);

    let Some(candidate) = partial.in_year(year, &tz) else {
        // Only the previous year can be close enough, e.g. `02-29` early in a common year.
        return partial
            .in_year(year - 1, &tz)
            .filter(|previous| reference_utc - *previous <= Duration::days(MAX_PAST_DAYS));
    };
    if candidate - reference_utc > Duration::days(MAX_FUTURE_DAYS) {
        partial.in_year(year - 1, &tz)
    } else if reference_utc - candidate > Duration::days(MAX_PAST_DAYS) {
        partial.in_year(year + 1, &tz)
    } else {
        Some(candidate)
    }
}

/// Builds the canonical event for an extraction.
///
/// Falls back to the reference instant when the raw timestamp is missing or
/// unparseable; `raw_timestamp` is kept exactly as extracted either way.
pub fn normalize<Tz: TimeZone>(extraction: Extraction, reference: &DateTime<Tz>) -> AnalyticsEvent {
    let timestamp = extraction
        .raw_timestamp
        .as_deref()
        .and_then(|raw| resolve_timestamp(raw, reference))
        .unwrap_or_else(|| {
            tracing::trace!(raw = ?extraction.raw_timestamp, "timestamp unresolved, using reference");
            reference.with_timezone(&Utc)
        });

    AnalyticsEvent {
        id: event_id(timestamp, &extraction.name),
        timestamp,
        raw_timestamp: extraction.raw_timestamp,
        name: extraction.name,
        parameters: extraction.parameters,
        items: extraction.items,
        manual_parameters: Params::new(),
        is_filtered: false,
    }
}

/// `{timestamp}_{name}_{clock}`.
///
/// Unique within a process because the clock reading strictly increases. No
/// guarantee holds across processes or machines.
fn event_id(timestamp: DateTime<Utc>, name: &EventName) -> EventId {
    let id = format!(
        "{}_{}_{}",
        timestamp.to_rfc3339_opts(SecondsFormat::AutoSi, true),
        name,
        clock_reading()
    );
    EventId::new(id).unwrap_or_else(|_| unreachable!("event id always contains the event name"))
}

/// Nanoseconds since the process clock origin, strictly increasing per call.
fn clock_reading() -> u64 {
    let now = u64::try_from(CLOCK_ORIGIN.elapsed().as_nanos()).unwrap_or(u64::MAX);
    let previous = LAST_CLOCK_READING
        .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |last| {
            Some(now.max(last.saturating_add(1)))
        })
        .unwrap_or_else(|last| last);
    now.max(previous.saturating_add(1))
}
