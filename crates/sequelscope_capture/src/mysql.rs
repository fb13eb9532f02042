//! MySQL adapters for the capture traits, built on `mysql_async`.

use crate::config::{CaptureConfig, CaptureMode};
use crate::polling::{AuditLogSource, AuditRow, PollingCapture};
use crate::resolver::{PositionResolver, PositionSource};
use crate::strategy::CaptureStrategy;
use crate::streaming::{BinlogConnector, BinlogRecord, BinlogSource, StreamingCapture};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use futures::StreamExt;
use mysql_async::binlog::events::EventData;
use mysql_async::prelude::*;
use mysql_async::{BinlogStream, BinlogStreamRequest, Conn, Opts, Pool, Row};
use sequelscope_core::{BinlogPosition, CaptureCursor, WatchError, WatchResult};
use tracing::{debug, info, warn};

fn parse_url(url: &str, purpose: &str) -> WatchResult<Opts> {
    Opts::from_url(url)
        .map_err(|e| WatchError::InvalidConfig(format!("invalid {purpose} URL: {e}")))
}

/// Status queries over a connection pool.
pub struct MySqlPositionSource {
    pool: Pool,
}

impl MySqlPositionSource {
    /// Creates a position source over `pool`.
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    async fn conn(&self) -> WatchResult<Conn> {
        self.pool
            .get_conn()
            .await
            .map_err(|e| WatchError::SourceUnavailable(format!("connection failed: {e}")))
    }
}

#[async_trait]
impl PositionSource for MySqlPositionSource {
    async fn binlog_status(&self) -> WatchResult<BinlogPosition> {
        let mut conn = self.conn().await?;

        // MySQL 8.2+ renamed the statement; older servers only know the old one.
        let rows: Vec<Row> = match conn.query("SHOW BINARY LOG STATUS").await {
            Ok(rows) => rows,
            Err(_) => conn.query("SHOW MASTER STATUS").await.map_err(|e| {
                WatchError::SourceUnavailable(format!("binlog status query failed: {e}"))
            })?,
        };

        let row = rows.into_iter().next().ok_or_else(|| {
            WatchError::SourceUnavailable(
                "binlog status returned no rows; binary logging may be disabled".into(),
            )
        })?;

        let file: String = row.get_opt(0).and_then(Result::ok).unwrap_or_default();
        let position: u64 = row.get_opt(1).and_then(Result::ok).unwrap_or(4);
        if file.is_empty() {
            return Err(WatchError::SourceUnavailable(
                "binlog status returned an empty file name".into(),
            ));
        }
        Ok(BinlogPosition::new(file, position))
    }

    async fn current_time(&self) -> WatchResult<NaiveDateTime> {
        let mut conn = self.conn().await?;
        let now: Option<NaiveDateTime> = conn
            .query_first("SELECT NOW(6)")
            .await
            .map_err(|e| WatchError::SourceUnavailable(format!("time query failed: {e}")))?;
        now.ok_or_else(|| WatchError::SourceUnavailable("time query returned no rows".into()))
    }
}

/// Opens replication streams as a replica with a fixed server id.
pub struct MySqlBinlogConnector {
    opts: Opts,
    server_id: u32,
}

impl MySqlBinlogConnector {
    /// Creates a connector from a replication URL.
    pub fn new(replication_url: &str, server_id: u32) -> WatchResult<Self> {
        Ok(Self {
            opts: parse_url(replication_url, "replication")?,
            server_id,
        })
    }
}

#[async_trait]
impl BinlogConnector for MySqlBinlogConnector {
    async fn connect(&self, from: &BinlogPosition) -> WatchResult<Box<dyn BinlogSource>> {
        let conn = Conn::new(self.opts.clone())
            .await
            .map_err(|e| WatchError::capture_fatal(format!("replication connect failed: {e}")))?;

        let request = BinlogStreamRequest::new(self.server_id)
            .with_filename(from.file.as_bytes())
            .with_pos(from.position);
        let stream = conn
            .get_binlog_stream(request)
            .await
            .map_err(|e| WatchError::capture_fatal(format!("binlog dump failed: {e}")))?;

        Ok(Box::new(MySqlBinlogSource {
            stream,
            file: from.file.clone(),
        }))
    }
}

/// A live binlog stream.
pub struct MySqlBinlogSource {
    stream: BinlogStream,
    file: String,
}

#[async_trait]
impl BinlogSource for MySqlBinlogSource {
    async fn next_record(&mut self) -> WatchResult<Option<BinlogRecord>> {
        let event = match self.stream.next().await {
            Some(Ok(event)) => event,
            Some(Err(e)) => {
                return Err(WatchError::capture_fatal(format!("binlog read failed: {e}")))
            }
            None => return Ok(None),
        };

        let header = event.header();
        let position = BinlogPosition::new(self.file.clone(), u64::from(header.log_pos()));
        let timestamp = DateTime::<Utc>::from_timestamp(i64::from(header.timestamp()), 0)
            .unwrap_or_else(Utc::now);

        let data = event
            .read_data()
            .map_err(|e| WatchError::capture_retryable(format!("event decode failed: {e}")))?;

        let record = match data {
            Some(EventData::RotateEvent(rotate)) => {
                self.file = rotate.name().into_owned();
                BinlogRecord::Rotate(BinlogPosition::new(self.file.clone(), rotate.position()))
            }
            Some(EventData::QueryEvent(query)) => BinlogRecord::Statement {
                database: query.schema().into_owned(),
                query: query.query().into_owned(),
                timestamp,
                position,
            },
            Some(EventData::RowsEvent(rows)) => match self.stream.get_tme(rows.table_id()) {
                Some(tme) => BinlogRecord::Rows {
                    database: tme.database_name().into_owned(),
                    table: tme.table_name().into_owned(),
                    rows: rows.rows(tme).count(),
                    timestamp,
                    position,
                },
                None => {
                    warn!(table_id = rows.table_id(), "Rows event without table map");
                    BinlogRecord::Other(position)
                }
            },
            _ => BinlogRecord::Other(position),
        };
        Ok(Some(record))
    }
}

/// The general query log, read through a connection pool.
pub struct MySqlAuditLog {
    pool: Pool,
    select: String,
    noise_pattern: String,
}

impl MySqlAuditLog {
    /// Creates a reader for `table`, which must be a validated identifier.
    pub fn new(pool: Pool, table: &str) -> Self {
        let bare = table.rsplit('.').next().unwrap_or(table);
        Self {
            pool,
            select: format!(
                "SELECT event_time, argument FROM {table} \
                 WHERE event_time > ? AND command_type IN ('Query', 'Execute') \
                 AND argument NOT LIKE ? \
                 ORDER BY event_time ASC LIMIT ?"
            ),
            noise_pattern: format!("%{bare}%"),
        }
    }
}

#[async_trait]
impl AuditLogSource for MySqlAuditLog {
    async fn fetch_since(&self, watermark: NaiveDateTime, limit: usize) -> WatchResult<Vec<AuditRow>> {
        let mut conn = self
            .pool
            .get_conn()
            .await
            .map_err(|e| WatchError::PollQuery(format!("connection failed: {e}")))?;

        let rows: Vec<(NaiveDateTime, Vec<u8>)> = conn
            .exec(
                self.select.as_str(),
                (watermark, self.noise_pattern.as_str(), limit as u64),
            )
            .await
            .map_err(|e| WatchError::PollQuery(e.to_string()))?;

        debug!(rows = rows.len(), %watermark, "Audit log polled");
        Ok(rows
            .into_iter()
            .map(|(event_time, argument)| {
                AuditRow::new(event_time, String::from_utf8_lossy(&argument).into_owned())
            })
            .collect())
    }
}

/// Returns the pool that serves status queries for `config.mode`.
///
/// Streaming reads the binlog status over the replication credential;
/// polling reads the clock over the metadata connection it later polls with.
fn status_pool(config: &CaptureConfig) -> WatchResult<Pool> {
    let opts = match config.mode {
        CaptureMode::Streaming => parse_url(&config.replication_url, "replication")?,
        CaptureMode::Polling => parse_url(&config.metadata_url, "metadata")?,
    };
    Ok(Pool::new(opts))
}

/// Resolves the position capture would start from right now.
pub async fn resolve_start(config: &CaptureConfig) -> WatchResult<CaptureCursor> {
    config.validate()?;
    let pool = status_pool(config)?;
    let cursor = PositionResolver::new(MySqlPositionSource::new(pool.clone()))
        .resolve(config.mode)
        .await;
    pool.disconnect().await.ok();
    cursor
}

/// Resolves the starting position and builds the configured strategy.
///
/// Fails with `SourceUnavailable` when the database cannot be reached; the
/// caller disables capture and keeps serving.
pub async fn build_strategy(config: &CaptureConfig) -> WatchResult<Box<dyn CaptureStrategy>> {
    config.validate()?;
    let pool = status_pool(config)?;
    let resolved = PositionResolver::new(MySqlPositionSource::new(pool.clone()))
        .resolve(config.mode)
        .await;

    match (config.mode, resolved) {
        (_, Err(e)) => {
            pool.disconnect().await.ok();
            Err(e)
        }
        (CaptureMode::Streaming, Ok(CaptureCursor::Binlog(start))) => {
            pool.disconnect().await.ok();
            let connector = MySqlBinlogConnector::new(&config.replication_url, config.server_id)?;
            info!(server_id = config.server_id, "Binlog capture configured");
            Ok(Box::new(StreamingCapture::new(connector, start)))
        }
        (CaptureMode::Polling, Ok(CaptureCursor::Watermark(watermark))) => {
            info!(table = %config.audit_table, "Audit-log capture configured");
            Ok(Box::new(PollingCapture::new(
                MySqlAuditLog::new(pool, &config.audit_table),
                watermark,
                config.poll_interval,
                config.poll_batch,
                &config.audit_table,
            )))
        }
        (mode, Ok(other)) => {
            pool.disconnect().await.ok();
            Err(WatchError::InvalidConfig(format!(
                "{mode} capture cannot start from {other}"
            )))
        }
    }
}
