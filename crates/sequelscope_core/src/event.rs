//! Change events and the capture coordinates they are tagged with.
//!
//! A [`ChangeEvent`] is produced exactly once per observed source-side event
//! and is never mutated afterwards: all fields are private and only readable
//! through accessors.

use crate::error::WatchResult;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Serialize;
use std::cmp::Ordering;
use std::fmt;

/// Kind of change event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum EventKind {
    /// Rows in a table were inserted, updated or deleted.
    #[serde(rename = "row_change")]
    RowChange,
    /// A statement was executed.
    #[serde(rename = "query")]
    QueryExecuted,
}

impl EventKind {
    /// Returns the wire name of this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::RowChange => "row_change",
            EventKind::QueryExecuted => "query",
        }
    }
}

/// A coordinate in the binary replication log.
///
/// Positions order by file sequence number, then by offset. The sequence is
/// the numeric extension of the file name, so `binlog.1000000` follows
/// `binlog.999999`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BinlogPosition {
    /// Log file name (e.g. `binlog.000042`).
    pub file: String,
    /// Byte offset inside the file.
    pub position: u64,
}

impl BinlogPosition {
    /// Creates a new binlog position.
    pub fn new(file: impl Into<String>, position: u64) -> Self {
        Self {
            file: file.into(),
            position,
        }
    }

    /// Splits the file name into its base name and numeric sequence.
    fn file_sequence(&self) -> (&str, Option<u64>) {
        match self.file.rsplit_once('.') {
            Some((base, ext)) => (base, ext.parse().ok()),
            None => (self.file.as_str(), None),
        }
    }
}

impl Ord for BinlogPosition {
    fn cmp(&self, other: &Self) -> Ordering {
        self.file_sequence()
            .cmp(&other.file_sequence())
            .then_with(|| self.file.cmp(&other.file))
            .then_with(|| self.position.cmp(&other.position))
    }
}

impl PartialOrd for BinlogPosition {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for BinlogPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.position)
    }
}

/// Resume state of a capture strategy.
///
/// Cursors of the same variant order the way the source orders them: binlog
/// positions by file sequence and offset, watermarks by time. Cursors
/// are never persisted; a restart resolves a fresh one.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CaptureCursor {
    /// Binlog file name and byte offset (streaming capture).
    Binlog(BinlogPosition),
    /// Last seen audit-log event time (polling capture).
    Watermark(NaiveDateTime),
}

impl fmt::Display for CaptureCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureCursor::Binlog(pos) => write!(f, "binlog {pos}"),
            CaptureCursor::Watermark(ts) => write!(f, "watermark {ts}"),
        }
    }
}

/// A raw event as a capture strategy observed it, before translation.
#[derive(Debug, Clone, PartialEq)]
pub enum RawCaptureEvent {
    /// Rows of a table were mutated.
    RowMutation {
        /// Database (schema) name.
        database: String,
        /// Table name.
        table: String,
        /// Number of affected rows.
        rows: usize,
        /// Source timestamp.
        timestamp: DateTime<Utc>,
        /// Coordinate just after the event.
        position: CaptureCursor,
    },
    /// A statement was executed.
    StatementExecuted {
        /// Default database of the statement, empty when unknown.
        database: String,
        /// Full statement text.
        query: String,
        /// Source timestamp.
        timestamp: DateTime<Utc>,
        /// Coordinate just after the event.
        position: CaptureCursor,
    },
}

impl RawCaptureEvent {
    /// Returns the coordinate this event was observed at.
    pub fn position(&self) -> &CaptureCursor {
        match self {
            RawCaptureEvent::RowMutation { position, .. }
            | RawCaptureEvent::StatementExecuted { position, .. } => position,
        }
    }
}

/// A normalized change notification.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    kind: EventKind,
    database: String,
    table: Option<String>,
    query: Option<String>,
    timestamp: DateTime<Utc>,
    sequence: CaptureCursor,
}

impl ChangeEvent {
    /// Creates a row-change event.
    pub fn row_change(
        database: impl Into<String>,
        table: impl Into<String>,
        timestamp: DateTime<Utc>,
        sequence: CaptureCursor,
    ) -> Self {
        Self {
            kind: EventKind::RowChange,
            database: database.into(),
            table: Some(table.into()),
            query: None,
            timestamp,
            sequence,
        }
    }

    /// Creates a query-executed event.
    pub fn query_executed(
        database: impl Into<String>,
        query: impl Into<String>,
        timestamp: DateTime<Utc>,
        sequence: CaptureCursor,
    ) -> Self {
        Self {
            kind: EventKind::QueryExecuted,
            database: database.into(),
            table: None,
            query: Some(query.into()),
            timestamp,
            sequence,
        }
    }

    /// Returns the event kind.
    pub fn kind(&self) -> EventKind {
        self.kind
    }

    /// Returns the database name.
    pub fn database(&self) -> &str {
        &self.database
    }

    /// Returns the table name (row changes only).
    pub fn table(&self) -> Option<&str> {
        self.table.as_deref()
    }

    /// Returns the statement text (executed queries only).
    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    /// Returns the source timestamp.
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Returns the resume token the event was observed at.
    pub fn sequence(&self) -> &CaptureCursor {
        &self.sequence
    }

    /// Returns true if the statement text mentions `table`, ignoring case.
    pub fn mentions_table(&self, table: &str) -> bool {
        match &self.query {
            Some(query) if !table.is_empty() => {
                query.to_lowercase().contains(&table.to_lowercase())
            }
            _ => false,
        }
    }

    /// Returns the wire form pushed to subscribers.
    pub fn notification(&self) -> Notification<'_> {
        Notification {
            kind: self.kind,
            database: &self.database,
            table: self.table.as_deref(),
            query: self.query.as_deref(),
        }
    }

    /// Encodes the wire form as a JSON object.
    pub fn to_json(&self) -> WatchResult<String> {
        Ok(serde_json::to_string(&self.notification())?)
    }
}

/// JSON message sent to subscribers.
///
/// Serializes as `{"type":..,"database":..}` plus `table` for row changes or
/// `query` for executed statements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Notification<'a> {
    /// Event kind.
    #[serde(rename = "type")]
    pub kind: EventKind,
    /// Database name.
    pub database: &'a str,
    /// Table name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table: Option<&'a str>,
    /// Statement text.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<&'a str>,
}
