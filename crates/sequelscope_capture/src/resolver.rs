//! Initial capture coordinate resolution.

use crate::config::CaptureMode;
use async_trait::async_trait;
use chrono::NaiveDateTime;
use sequelscope_core::{BinlogPosition, CaptureCursor, WatchResult};
use tracing::{error, info};

/// Read-only status queries against the source database.
#[async_trait]
pub trait PositionSource: Send + Sync {
    /// Returns the current binlog file and offset.
    async fn binlog_status(&self) -> WatchResult<BinlogPosition>;

    /// Returns the source's current time, the starting audit watermark.
    async fn current_time(&self) -> WatchResult<NaiveDateTime>;
}

/// Resolves the cursor a capture strategy starts from.
pub struct PositionResolver<P: PositionSource> {
    source: P,
}

impl<P: PositionSource> PositionResolver<P> {
    /// Creates a resolver over a position source.
    pub fn new(source: P) -> Self {
        Self { source }
    }

    /// Resolves the starting cursor for `mode`.
    ///
    /// Fails with `SourceUnavailable` when the database cannot be reached or
    /// the status query fails.
    pub async fn resolve(&self, mode: CaptureMode) -> WatchResult<CaptureCursor> {
        let cursor = match mode {
            CaptureMode::Streaming => self.source.binlog_status().await.map(CaptureCursor::Binlog),
            CaptureMode::Polling => self.source.current_time().await.map(CaptureCursor::Watermark),
        };

        match &cursor {
            Ok(cursor) => info!(%mode, %cursor, "Resolved capture position"),
            Err(e) => error!(%mode, error = %e, "Failed to resolve capture position"),
        }
        cursor
    }
}
