//! Storage layer for captured analytics events.
//!
//! Provides persistence for parsed events and capture sessions using
//! `rusqlite`, plus a versioned JSON backup format.
//!
//! # Thread Safety
//!
//! The [`Database`] type wraps a `rusqlite::Connection`, which is `Send` but not `Sync`.
//! A `Database` can be moved to the thread that consumes parsed events but cannot be
//! shared across threads without external synchronization.
//!
//! # Schema
//!
//! Timestamps are stored as TEXT in RFC 3339 with nanosecond precision and a `Z`
//! suffix (e.g. `2025-01-05T10:00:00.123000000Z`). The fixed width keeps
//! lexicographic ordering equal to chronological ordering.
//!
//! Parameter maps and items are stored as JSON text. Each event optionally
//! belongs to a capture, one run of `fa watch` or `fa parse` with `--save`.

use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use fa_core::{AnalyticsEvent, EventId, EventName, Params};
use rusqlite::{Connection, Statement, Transaction, params, params_from_iter};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Backup format version written by [`Database::export_backup`].
pub const BACKUP_VERSION: u32 = 1;

const EVENT_COLUMNS: &str = "id, timestamp, raw_timestamp, name, parameters, items, manual_parameters, is_filtered, capture_id";

/// Database errors.
#[derive(Debug, Error)]
pub enum DbError {
    /// An error from the underlying database.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// Failed to encode or decode JSON.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    /// Failed to parse a stored timestamp.
    #[error("invalid timestamp for {id}: {timestamp}")]
    TimestampParse {
        id: String,
        timestamp: String,
        #[source]
        source: chrono::ParseError,
    },
    /// A stored event row could not be turned back into an event.
    #[error("invalid event data for {event_id}: {message}")]
    InvalidEventData { event_id: String, message: String },
    /// The backup was written by an incompatible version.
    #[error("unsupported backup version {found}")]
    UnsupportedBackupVersion { found: u64 },
}

/// Database connection wrapper.
///
/// See the [module documentation](self) for thread safety considerations.
pub struct Database {
    conn: Connection,
}

/// One capture session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureRecord {
    pub id: String,
    pub started_at: DateTime<Utc>,
    /// Where lines came from: `adb`, a file path, or `stdin`.
    pub source: String,
    /// Device serial, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
}

/// An event as stored, with the capture it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredEvent {
    #[serde(flatten)]
    pub event: AnalyticsEvent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capture_id: Option<String>,
}

/// Filters for [`Database::list_events`]. Unset fields do not filter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventQuery {
    pub name: Option<String>,
    pub capture_id: Option<String>,
    /// Inclusive lower bound.
    pub after: Option<DateTime<Utc>>,
    /// Exclusive upper bound.
    pub before: Option<DateTime<Utc>>,
    /// Keep only the most recent `limit` matches.
    pub limit: Option<usize>,
}

/// Number of stored events with one name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventCount {
    pub name: String,
    pub count: i64,
}

/// Versioned export of the whole database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Backup {
    pub version: u32,
    pub export_timestamp: DateTime<Utc>,
    pub data: BackupData,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupData {
    #[serde(default)]
    pub captures: Vec<CaptureRecord>,
    #[serde(default)]
    pub events: Vec<StoredEvent>,
}

/// Rows actually inserted by an import; duplicates are not counted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportStats {
    pub captures: usize,
    pub events: usize,
}

impl Backup {
    /// Parses a backup, rejecting versions other than [`BACKUP_VERSION`].
    pub fn from_json(json: &str) -> Result<Self, DbError> {
        let value: serde_json::Value = serde_json::from_str(json)?;
        let found = value
            .get("version")
            .and_then(serde_json::Value::as_u64)
            .unwrap_or(0);
        if found != u64::from(BACKUP_VERSION) {
            return Err(DbError::UnsupportedBackupVersion { found });
        }
        Ok(serde_json::from_value(value)?)
    }

    pub fn to_json_pretty(&self) -> Result<String, DbError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

impl Database {
    /// Opens a database at the given path, creating it if necessary.
    ///
    /// The database schema is automatically initialized on first open.
    pub fn open(path: &Path) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Opens an in-memory database.
    ///
    /// Useful for testing. The database is destroyed when the connection closes.
    pub fn open_in_memory() -> Result<Self, DbError> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Initializes the database schema. Idempotent.
    fn init(&self) -> Result<(), DbError> {
        self.conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS captures (
                id TEXT PRIMARY KEY,
                started_at TEXT NOT NULL,
                source TEXT NOT NULL,
                device TEXT
            );

            -- parameters, items, manual_parameters: JSON text
            CREATE TABLE IF NOT EXISTS events (
                id TEXT PRIMARY KEY,
                timestamp TEXT NOT NULL,
                raw_timestamp TEXT,
                name TEXT NOT NULL,
                parameters TEXT NOT NULL DEFAULT '{}',
                items TEXT NOT NULL DEFAULT '[]',
                manual_parameters TEXT NOT NULL DEFAULT '{}',
                is_filtered INTEGER NOT NULL DEFAULT 0,
                capture_id TEXT,
                FOREIGN KEY (capture_id) REFERENCES captures(id) ON DELETE SET NULL
            );

            CREATE INDEX IF NOT EXISTS idx_events_timestamp ON events(timestamp);
            CREATE INDEX IF NOT EXISTS idx_events_name ON events(name);
            CREATE INDEX IF NOT EXISTS idx_events_capture ON events(capture_id);
            ",
        )?;
        Ok(())
    }

    /// Records the start of a new capture session.
    pub fn start_capture(
        &mut self,
        source: &str,
        device: Option<&str>,
    ) -> Result<CaptureRecord, DbError> {
        let capture = CaptureRecord {
            id: Uuid::new_v4().to_string(),
            started_at: Utc::now(),
            source: source.to_string(),
            device: device.map(str::to_string),
        };
        self.conn.execute(
            "INSERT INTO captures (id, started_at, source, device) VALUES (?, ?, ?, ?)",
            params![
                capture.id,
                format_timestamp(capture.started_at),
                capture.source,
                capture.device,
            ],
        )?;
        tracing::debug!(capture_id = %capture.id, source, "started capture");
        Ok(capture)
    }

    /// Lists captures, oldest first.
    pub fn list_captures(&self) -> Result<Vec<CaptureRecord>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, started_at, source, device FROM captures ORDER BY started_at ASC, id ASC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<String>>(3)?,
            ))
        })?;
        let mut captures = Vec::new();
        for row in rows {
            let (id, started_at, source, device) = row?;
            let started_at = parse_timestamp(&started_at, &id)?;
            captures.push(CaptureRecord {
                id,
                started_at,
                source,
                device,
            });
        }
        Ok(captures)
    }

    /// Inserts a batch of events, ignoring duplicates by ID.
    ///
    /// Events are attached to `capture_id` when that capture exists.
    pub fn insert_events(
        &mut self,
        capture_id: Option<&str>,
        events: &[AnalyticsEvent],
    ) -> Result<usize, DbError> {
        if events.is_empty() {
            return Ok(0);
        }
        let tx = self.conn.transaction()?;
        let mut inserted = 0;
        {
            let mut stmt = prepare_event_insert(&tx)?;
            for event in events {
                inserted += insert_event(&mut stmt, event, capture_id)?;
            }
        }
        tx.commit()?;
        Ok(inserted)
    }

    /// Lists events matching `query`, ordered by timestamp then ID.
    pub fn list_events(&self, query: &EventQuery) -> Result<Vec<StoredEvent>, DbError> {
        let mut clauses = Vec::new();
        let mut values = Vec::new();
        if let Some(name) = &query.name {
            clauses.push("name = ?");
            values.push(name.clone());
        }
        if let Some(capture_id) = &query.capture_id {
            clauses.push("capture_id = ?");
            values.push(capture_id.clone());
        }
        if let Some(after) = query.after {
            clauses.push("timestamp >= ?");
            values.push(format_timestamp(after));
        }
        if let Some(before) = query.before {
            clauses.push("timestamp < ?");
            values.push(format_timestamp(before));
        }
        let where_clause = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };
        let sql = match query.limit {
            Some(limit) => format!(
                "
                SELECT {EVENT_COLUMNS} FROM (
                    SELECT {EVENT_COLUMNS} FROM events {where_clause}
                    ORDER BY timestamp DESC, id DESC
                    LIMIT {limit}
                )
                ORDER BY timestamp ASC, id ASC
                "
            ),
            None => format!(
                "SELECT {EVENT_COLUMNS} FROM events {where_clause} ORDER BY timestamp ASC, id ASC"
            ),
        };

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(values.iter()), |row| {
            Ok(EventRow {
                id: row.get(0)?,
                timestamp: row.get(1)?,
                raw_timestamp: row.get(2)?,
                name: row.get(3)?,
                parameters: row.get(4)?,
                items: row.get(5)?,
                manual_parameters: row.get(6)?,
                is_filtered: row.get(7)?,
                capture_id: row.get(8)?,
            })
        })?;
        let mut events = Vec::new();
        for row in rows {
            events.push(row?.into_stored()?);
        }
        Ok(events)
    }

    pub fn count_events(&self) -> Result<i64, DbError> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM events", [], |row| row.get(0))?)
    }

    /// Event counts per name, most frequent first.
    pub fn event_counts(&self) -> Result<Vec<EventCount>, DbError> {
        let mut stmt = self.conn.prepare(
            "
            SELECT name, COUNT(*) AS count
            FROM events
            GROUP BY name
            ORDER BY count DESC, name ASC
            ",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(EventCount {
                name: row.get(0)?,
                count: row.get(1)?,
            })
        })?;
        let mut counts = Vec::new();
        for row in rows {
            counts.push(row?);
        }
        Ok(counts)
    }

    /// Snapshot of all captures and events.
    pub fn export_backup(&self) -> Result<Backup, DbError> {
        Ok(Backup {
            version: BACKUP_VERSION,
            export_timestamp: Utc::now(),
            data: BackupData {
                captures: self.list_captures()?,
                events: self.list_events(&EventQuery::default())?,
            },
        })
    }

    /// Restores a backup, keeping existing rows on ID conflicts.
    pub fn import_backup(&mut self, backup: &Backup) -> Result<ImportStats, DbError> {
        if backup.version != BACKUP_VERSION {
            return Err(DbError::UnsupportedBackupVersion {
                found: u64::from(backup.version),
            });
        }
        let mut stats = ImportStats::default();
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO captures (id, started_at, source, device) VALUES (?, ?, ?, ?)",
            )?;
            for capture in &backup.data.captures {
                stats.captures += stmt.execute(params![
                    capture.id,
                    format_timestamp(capture.started_at),
                    capture.source,
                    capture.device,
                ])?;
            }
        }
        {
            let mut stmt = prepare_event_insert(&tx)?;
            for stored in &backup.data.events {
                stats.events += insert_event(&mut stmt, &stored.event, stored.capture_id.as_deref())?;
            }
        }
        tx.commit()?;
        tracing::debug!(
            captures = stats.captures,
            events = stats.events,
            "imported backup"
        );
        Ok(stats)
    }
}

/// Unknown capture IDs are stored as NULL rather than violating the foreign key.
fn prepare_event_insert<'tx>(tx: &'tx Transaction<'_>) -> Result<Statement<'tx>, DbError> {
    Ok(tx.prepare(
        "
        INSERT OR IGNORE INTO events
        (id, timestamp, raw_timestamp, name, parameters, items, manual_parameters, is_filtered, capture_id)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, (SELECT id FROM captures WHERE id = ?))
        ",
    )?)
}

fn insert_event(
    stmt: &mut Statement<'_>,
    event: &AnalyticsEvent,
    capture_id: Option<&str>,
) -> Result<usize, DbError> {
    Ok(stmt.execute(params![
        event.id.as_str(),
        format_timestamp(event.timestamp),
        event.raw_timestamp,
        event.name.as_str(),
        serde_json::to_string(&event.parameters)?,
        serde_json::to_string(&event.items)?,
        serde_json::to_string(&event.manual_parameters)?,
        event.is_filtered,
        capture_id,
    ])?)
}

#[derive(Debug)]
struct EventRow {
    id: String,
    timestamp: String,
    raw_timestamp: Option<String>,
    name: String,
    parameters: String,
    items: String,
    manual_parameters: String,
    is_filtered: bool,
    capture_id: Option<String>,
}

impl EventRow {
    fn into_stored(self) -> Result<StoredEvent, DbError> {
        let timestamp = parse_timestamp(&self.timestamp, &self.id)?;
        let parameters: Params = parse_json(&self.parameters, &self.id)?;
        let items: Vec<Params> = parse_json(&self.items, &self.id)?;
        let manual_parameters: Params = parse_json(&self.manual_parameters, &self.id)?;
        let name = EventName::new(self.name).map_err(|err| invalid_data(&self.id, &err))?;
        let id = EventId::new(self.id).map_err(|err| invalid_data("", &err))?;
        Ok(StoredEvent {
            event: AnalyticsEvent {
                id,
                timestamp,
                raw_timestamp: self.raw_timestamp,
                name,
                parameters,
                items,
                manual_parameters,
                is_filtered: self.is_filtered,
            },
            capture_id: self.capture_id,
        })
    }
}

fn invalid_data(event_id: &str, err: &impl std::fmt::Display) -> DbError {
    DbError::InvalidEventData {
        event_id: event_id.to_string(),
        message: err.to_string(),
    }
}

fn parse_json<T: serde::de::DeserializeOwned>(data: &str, event_id: &str) -> Result<T, DbError> {
    serde_json::from_str(data).map_err(|err| invalid_data(event_id, &err))
}

fn parse_timestamp(timestamp: &str, id: &str) -> Result<DateTime<Utc>, DbError> {
    DateTime::parse_from_rfc3339(timestamp)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|source| DbError::TimestampParse {
            id: id.to_string(),
            timestamp: timestamp.to_string(),
            source,
        })
}

fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Nanos, true)
}
