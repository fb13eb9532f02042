//! Polling capture: scans the query audit log on a fixed period.

use crate::strategy::CaptureStrategy;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use sequelscope_core::{CaptureCursor, RawCaptureEvent, WatchError, WatchResult};
use std::time::Duration;
use tokio::time::{interval, Interval, MissedTickBehavior};
use tracing::{debug, warn};

/// One row of the audit log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditRow {
    /// When the statement was logged.
    pub event_time: NaiveDateTime,
    /// Statement text.
    pub query: String,
}

impl AuditRow {
    /// Creates an audit row.
    pub fn new(event_time: NaiveDateTime, query: impl Into<String>) -> Self {
        Self {
            event_time,
            query: query.into(),
        }
    }
}

/// Read access to the audit log table.
#[async_trait]
pub trait AuditLogSource: Send + Sync {
    /// Returns up to `limit` rows logged strictly after `watermark`,
    /// oldest first.
    async fn fetch_since(&self, watermark: NaiveDateTime, limit: usize) -> WatchResult<Vec<AuditRow>>;
}

/// Capture strategy over the audit log table.
///
/// Each [`CaptureStrategy::next_batch`] call waits for the next tick and
/// returns the rows newer than the watermark. A failed tick leaves the
/// watermark alone so the next tick reads the same window again.
pub struct PollingCapture<A: AuditLogSource> {
    source: A,
    ticker: Interval,
    cursor: CaptureCursor,
    watermark: NaiveDateTime,
    batch: usize,
    noise_marker: String,
}

impl<A: AuditLogSource> PollingCapture<A> {
    /// Creates a polling capture.
    ///
    /// `audit_table` may be schema-qualified; statements mentioning its bare
    /// name are the watcher's own traffic and are dropped.
    pub fn new(
        source: A,
        watermark: NaiveDateTime,
        period: Duration,
        batch: usize,
        audit_table: &str,
    ) -> Self {
        let mut ticker = interval(period.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let bare = audit_table.rsplit('.').next().unwrap_or(audit_table);
        Self {
            source,
            ticker,
            cursor: CaptureCursor::Watermark(watermark),
            watermark,
            batch: batch.max(1),
            noise_marker: bare.to_ascii_lowercase(),
        }
    }

    /// Returns the last seen event time.
    pub fn watermark(&self) -> NaiveDateTime {
        self.watermark
    }

    fn is_noise(&self, row: &AuditRow) -> bool {
        row.query.to_ascii_lowercase().contains(&self.noise_marker)
    }
}

#[async_trait]
impl<A: AuditLogSource> CaptureStrategy for PollingCapture<A> {
    fn name(&self) -> &'static str {
        "audit-log"
    }

    fn cursor(&self) -> &CaptureCursor {
        &self.cursor
    }

    async fn next_batch(&mut self) -> WatchResult<Vec<RawCaptureEvent>> {
        self.ticker.tick().await;

        let mut rows = self
            .source
            .fetch_since(self.watermark, self.batch)
            .await
            .map_err(|e| match e {
                WatchError::PollQuery(_) => e,
                other => WatchError::PollQuery(other.to_string()),
            })?;

        rows.retain(|row| row.event_time > self.watermark);
        rows.sort_by_key(|row| row.event_time);
        rows.truncate(self.batch);

        let mut events = Vec::with_capacity(rows.len());
        for row in rows {
            // Noise still advances the watermark so it is never re-read.
            self.watermark = row.event_time;
            if self.is_noise(&row) {
                debug!(query = %row.query, "Skipping audit-log self query");
                continue;
            }
            events.push(RawCaptureEvent::StatementExecuted {
                database: String::new(),
                query: row.query,
                timestamp: DateTime::<Utc>::from_naive_utc_and_offset(row.event_time, Utc),
                position: CaptureCursor::Watermark(row.event_time),
            });
        }
        self.cursor = CaptureCursor::Watermark(self.watermark);

        if events.len() == self.batch {
            warn!(batch = self.batch, "Audit-log batch full; more rows pending");
        }
        Ok(events)
    }

    fn records_activity(&self) -> bool {
        true
    }

    fn backs_off(&self) -> bool {
        false
    }
}
