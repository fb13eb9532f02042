//! Streaming capture: tails the binary replication log.

use crate::strategy::CaptureStrategy;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sequelscope_core::{BinlogPosition, CaptureCursor, RawCaptureEvent, WatchError, WatchResult};
use tracing::{debug, info, trace};

/// A decoded binlog event, reduced to the shapes capture cares about.
#[derive(Debug, Clone, PartialEq)]
pub enum BinlogRecord {
    /// A rows event (write, update or delete).
    Rows {
        /// Database name from the table map.
        database: String,
        /// Table name from the table map.
        table: String,
        /// Number of affected rows.
        rows: usize,
        /// Event timestamp.
        timestamp: DateTime<Utc>,
        /// Position after the event.
        position: BinlogPosition,
    },
    /// A statement event.
    Statement {
        /// Default database of the statement.
        database: String,
        /// Statement text.
        query: String,
        /// Event timestamp.
        timestamp: DateTime<Utc>,
        /// Position after the event.
        position: BinlogPosition,
    },
    /// The server switched to a new log file.
    Rotate(BinlogPosition),
    /// Any other event shape.
    Other(BinlogPosition),
}

/// An open replication stream.
#[async_trait]
pub trait BinlogSource: Send {
    /// Blocks until the next event arrives.
    ///
    /// Returns `Ok(None)` once the stream has ended. A retryable error leaves
    /// the stream usable; any other error means it must be reopened.
    async fn next_record(&mut self) -> WatchResult<Option<BinlogRecord>>;
}

/// Opens replication streams.
#[async_trait]
pub trait BinlogConnector: Send + Sync {
    /// Authenticates, registers as a replica and starts streaming at `from`.
    async fn connect(&self, from: &BinlogPosition) -> WatchResult<Box<dyn BinlogSource>>;
}

/// Connection state of a [`StreamingCapture`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// No stream has been opened yet.
    Idle,
    /// A stream is open but no event has been read from it.
    Connected,
    /// Events are being read.
    Streaming,
    /// The stream failed or ended and will be reopened from the cursor.
    Disconnected,
}

/// Capture strategy over a binlog replication stream.
pub struct StreamingCapture<C: BinlogConnector> {
    connector: C,
    source: Option<Box<dyn BinlogSource>>,
    cursor: CaptureCursor,
    position: BinlogPosition,
    state: StreamState,
}

impl<C: BinlogConnector> StreamingCapture<C> {
    /// Creates a streaming capture starting at `start`.
    pub fn new(connector: C, start: BinlogPosition) -> Self {
        Self {
            connector,
            source: None,
            cursor: CaptureCursor::Binlog(start.clone()),
            position: start,
            state: StreamState::Idle,
        }
    }

    /// Returns the connection state.
    pub fn state(&self) -> StreamState {
        self.state
    }

    fn advance(&mut self, position: BinlogPosition) {
        // Artificial events (e.g. the initial rotate) may carry position 0.
        if position.position == 0 && position.file == self.position.file {
            return;
        }
        self.cursor = CaptureCursor::Binlog(position.clone());
        self.position = position;
    }

    async fn open(&mut self) -> WatchResult<()> {
        let source = self.connector.connect(&self.position).await.map_err(|e| {
            self.state = StreamState::Disconnected;
            e
        })?;
        info!(position = %self.position, "Binlog stream connected");
        self.source = Some(source);
        self.state = StreamState::Connected;
        Ok(())
    }

    fn disconnect(&mut self) {
        self.source = None;
        self.state = StreamState::Disconnected;
    }
}

#[async_trait]
impl<C: BinlogConnector> CaptureStrategy for StreamingCapture<C> {
    fn name(&self) -> &'static str {
        "binlog"
    }

    fn cursor(&self) -> &CaptureCursor {
        &self.cursor
    }

    async fn next_batch(&mut self) -> WatchResult<Vec<RawCaptureEvent>> {
        loop {
            if self.source.is_none() {
                self.open().await?;
            }

            let next = match self.source.as_mut() {
                Some(source) => source.next_record().await,
                None => continue,
            };

            let record = match next {
                Ok(Some(record)) => record,
                Ok(None) => {
                    self.disconnect();
                    return Err(WatchError::capture_fatal(format!(
                        "binlog stream ended at {}",
                        self.position
                    )));
                }
                Err(e) => {
                    if !e.is_retryable() {
                        self.disconnect();
                    }
                    return Err(e);
                }
            };
            self.state = StreamState::Streaming;

            match record {
                BinlogRecord::Rows {
                    database,
                    table,
                    rows,
                    timestamp,
                    position,
                } => {
                    self.advance(position);
                    return Ok(vec![RawCaptureEvent::RowMutation {
                        database,
                        table,
                        rows,
                        timestamp,
                        position: self.cursor.clone(),
                    }]);
                }
                BinlogRecord::Statement {
                    database,
                    query,
                    timestamp,
                    position,
                } => {
                    self.advance(position);
                    return Ok(vec![RawCaptureEvent::StatementExecuted {
                        database,
                        query,
                        timestamp,
                        position: self.cursor.clone(),
                    }]);
                }
                BinlogRecord::Rotate(position) => {
                    debug!(position = %position, "Binlog rotated");
                    self.cursor = CaptureCursor::Binlog(position.clone());
                    self.position = position;
                }
                BinlogRecord::Other(position) => {
                    trace!(position = %position, "Ignoring binlog event");
                    self.advance(position);
                }
            }
        }
    }
}

impl<C: BinlogConnector> Drop for StreamingCapture<C> {
    fn drop(&mut self) {
        if self.source.is_some() {
            debug!(position = %self.position, "Closing binlog stream");
        }
    }
}
