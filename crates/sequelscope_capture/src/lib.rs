//! # SequelScope Capture
//!
//! Observes mutations inside a MySQL server and feeds them to the
//! [`sequelscope_core`] fan-out.
//!
//! Two interchangeable [`CaptureStrategy`] implementations exist:
//!
//! - [`StreamingCapture`] tails the binary replication log as a replica,
//!   yielding row-mutation and statement events
//! - [`PollingCapture`] scans the query audit log on a fixed period for rows
//!   newer than its watermark
//!
//! [`build_strategy`] resolves the starting position and picks the strategy
//! from a [`CaptureConfig`]; a [`CaptureRunner`] then drives it until shutdown.
//! Positions are never persisted: a restart resolves a fresh one and events
//! during downtime are not replayed.

#![deny(unsafe_code)]
#![warn(missing_docs)]
// Production code MUST NOT use panic!/unwrap()/expect()
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod config;
mod mysql;
mod polling;
mod resolver;
mod runner;
mod strategy;
mod streaming;

pub use config::{
    connection_url, CaptureConfig, CaptureMode, RetryConfig, DEFAULT_AUDIT_TABLE, DEFAULT_SERVER_ID,
};
pub use mysql::{
    build_strategy, resolve_start, MySqlAuditLog, MySqlBinlogConnector, MySqlBinlogSource,
    MySqlPositionSource,
};
pub use polling::{AuditLogSource, AuditRow, PollingCapture};
pub use resolver::{PositionResolver, PositionSource};
pub use runner::{CaptureRunner, CaptureStats};
pub use strategy::CaptureStrategy;
pub use streaming::{BinlogConnector, BinlogRecord, BinlogSource, StreamState, StreamingCapture};
