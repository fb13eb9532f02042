//! # SequelScope Server
//!
//! Pushes change notifications to browser dashboards over websockets.
//!
//! Routes:
//!
//! - `GET /ws` upgrades to a websocket; every change event is sent as one
//!   JSON text frame and inbound frames are ignored
//! - `GET /health` reports the capture health (200 while capturing, 503
//!   otherwise)
//! - `GET /activity/:table` lists the latest audit-log statements that
//!   mention a table, newest first
//!
//! A subscriber whose socket write fails or stalls past the write timeout is
//! dropped; it never holds up the others.

#![deny(unsafe_code)]
#![warn(missing_docs)]
// Production code MUST NOT use panic!/unwrap()/expect()
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod config;
mod error;
mod handler;
mod server;
mod ws;

pub use config::{ServerConfig, DEFAULT_WRITE_TIMEOUT};
pub use error::{ServerError, ServerResult};
pub use handler::{router, AppState};
pub use server::WatchServer;
pub use ws::ChannelSubscriber;
