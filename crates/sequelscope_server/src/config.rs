//! Server configuration.

use sequelscope_core::DEFAULT_TABLE_LOOKUP_LIMIT;
use std::net::SocketAddr;
use std::time::Duration;

/// Default time a single websocket write may take before it counts as failed.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Configuration for the live-update server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Longest a single outbound frame may take to write before the
    /// subscriber is dropped.
    pub write_timeout: Duration,
    /// Maximum events returned by a per-table activity lookup.
    pub activity_limit: usize,
}

impl ServerConfig {
    /// Creates a new server configuration.
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            activity_limit: DEFAULT_TABLE_LOOKUP_LIMIT,
        }
    }

    /// Sets the per-frame write timeout.
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout.max(Duration::from_millis(1));
        self
    }

    /// Sets the activity lookup limit.
    pub fn with_activity_limit(mut self, limit: usize) -> Self {
        self.activity_limit = limit;
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new(SocketAddr::from(([127, 0, 0, 1], 4001)))
    }
}
