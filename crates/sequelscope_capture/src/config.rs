//! Configuration for the capture subsystem.

use rand::Rng;
use sequelscope_core::{WatchError, WatchResult};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Default synthetic replica server id.
pub const DEFAULT_SERVER_ID: u32 = 100;

/// Default audit table polled in [`CaptureMode::Polling`].
pub const DEFAULT_AUDIT_TABLE: &str = "mysql.general_log";

/// Which capture strategy to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CaptureMode {
    /// Tail the binary replication log.
    #[default]
    Streaming,
    /// Poll the query audit log table.
    Polling,
}

impl fmt::Display for CaptureMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureMode::Streaming => f.write_str("streaming"),
            CaptureMode::Polling => f.write_str("polling"),
        }
    }
}

impl FromStr for CaptureMode {
    type Err = WatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "streaming" | "binlog" => Ok(CaptureMode::Streaming),
            "polling" | "audit" => Ok(CaptureMode::Polling),
            other => Err(WatchError::InvalidConfig(format!(
                "unknown capture mode: {other}"
            ))),
        }
    }
}

/// Configuration for capture.
///
/// The replication URL carries the low-privilege replication credential and
/// is kept apart from the URL used for metadata and audit-log queries.
#[derive(Clone)]
pub struct CaptureConfig {
    /// Strategy to run.
    pub mode: CaptureMode,
    /// Connection URL for metadata and audit-log queries.
    pub metadata_url: String,
    /// Connection URL for the replication stream and status query.
    pub replication_url: String,
    /// Server id announced when registering as a replica.
    pub server_id: u32,
    /// Interval between audit-log polls.
    pub poll_interval: Duration,
    /// Maximum audit rows read per poll.
    pub poll_batch: usize,
    /// Fully qualified audit table.
    pub audit_table: String,
    /// Backoff between failed stream reads.
    pub retry: RetryConfig,
}

impl fmt::Debug for CaptureConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaptureConfig")
            .field("mode", &self.mode)
            .field("metadata_url", &"[REDACTED]")
            .field("replication_url", &"[REDACTED]")
            .field("server_id", &self.server_id)
            .field("poll_interval", &self.poll_interval)
            .field("poll_batch", &self.poll_batch)
            .field("audit_table", &self.audit_table)
            .field("retry", &self.retry)
            .finish()
    }
}

impl CaptureConfig {
    /// Creates a configuration for the given mode.
    pub fn new(mode: CaptureMode) -> Self {
        Self {
            mode,
            metadata_url: String::new(),
            replication_url: String::new(),
            server_id: DEFAULT_SERVER_ID,
            poll_interval: Duration::from_secs(1),
            poll_batch: 10,
            audit_table: DEFAULT_AUDIT_TABLE.to_string(),
            retry: RetryConfig::default(),
        }
    }

    /// Sets the metadata connection URL.
    pub fn with_metadata_url(mut self, url: impl Into<String>) -> Self {
        self.metadata_url = url.into();
        self
    }

    /// Sets the replication connection URL.
    pub fn with_replication_url(mut self, url: impl Into<String>) -> Self {
        self.replication_url = url.into();
        self
    }

    /// Sets the replica server id.
    pub fn with_server_id(mut self, server_id: u32) -> Self {
        self.server_id = server_id;
        self
    }

    /// Sets the poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Sets the poll batch size.
    pub fn with_poll_batch(mut self, batch: usize) -> Self {
        self.poll_batch = batch;
        self
    }

    /// Sets the audit table.
    pub fn with_audit_table(mut self, table: impl Into<String>) -> Self {
        self.audit_table = table.into();
        self
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Checks the configuration for the selected mode.
    pub fn validate(&self) -> WatchResult<()> {
        match self.mode {
            CaptureMode::Streaming => {
                if self.replication_url.is_empty() {
                    return Err(WatchError::InvalidConfig(
                        "streaming capture needs a replication URL".into(),
                    ));
                }
            }
            CaptureMode::Polling => {
                if self.metadata_url.is_empty() {
                    return Err(WatchError::InvalidConfig(
                        "polling capture needs a metadata URL".into(),
                    ));
                }
                if self.poll_batch == 0 {
                    return Err(WatchError::InvalidConfig("poll batch must be positive".into()));
                }
                if self.poll_interval.is_zero() {
                    return Err(WatchError::InvalidConfig(
                        "poll interval must be positive".into(),
                    ));
                }
                if !is_qualified_identifier(&self.audit_table) {
                    return Err(WatchError::InvalidConfig(format!(
                        "invalid audit table name: {}",
                        self.audit_table
                    )));
                }
            }
        }
        Ok(())
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self::new(CaptureMode::default())
    }
}

/// Normalizes a data source name to a `mysql://` URL.
///
/// URLs pass through unchanged. Driver-style names of the form
/// `user:password@tcp(host:port)/database?params` are rewritten, with the
/// user and password percent-encoded. Driver parameters are dropped.
pub fn connection_url(dsn: &str) -> WatchResult<String> {
    let dsn = dsn.trim();
    if dsn.starts_with("mysql://") {
        return Ok(dsn.to_string());
    }

    let invalid = || WatchError::InvalidConfig("unrecognized data source name".into());
    let (credentials, rest) = dsn.rsplit_once('@').ok_or_else(invalid)?;
    let (user, password) = match credentials.split_once(':') {
        Some((user, password)) => (user, Some(password)),
        None => (credentials, None),
    };

    let rest = rest.strip_prefix("tcp(").ok_or_else(invalid)?;
    let (host, path) = rest.split_once(')').ok_or_else(invalid)?;
    let host = if host.is_empty() { "127.0.0.1:3306" } else { host };
    let path = path.split('?').next().unwrap_or_default();
    let path = if path.is_empty() { "/" } else { path };

    let mut out = format!("mysql://{}", percent_encode(user));
    if let Some(password) = password {
        out.push(':');
        out.push_str(&percent_encode(password));
    }
    out.push('@');
    out.push_str(host);
    out.push_str(path);
    Ok(out)
}

fn percent_encode(raw: &str) -> String {
    url::form_urlencoded::byte_serialize(raw.as_bytes()).collect()
}

/// Accepts `table` or `schema.table` made of ASCII word characters.
fn is_qualified_identifier(name: &str) -> bool {
    let parts: Vec<&str> = name.split('.').collect();
    parts.len() <= 2
        && parts.iter().all(|part| {
            !part.is_empty() && part.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        })
}

/// Configuration for backoff after capture failures.
///
/// Capture never gives up; the delay grows exponentially up to `max_delay`.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Delay after the first failure.
    pub initial_delay: Duration,
    /// Cap on the delay.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to add jitter to delays.
    pub add_jitter: bool,
    /// Consecutive failures before health reports degraded.
    pub unhealthy_after: u32,
}

impl RetryConfig {
    /// Creates a retry configuration with default delays.
    pub fn new() -> Self {
        Self {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            add_jitter: true,
            unhealthy_after: 5,
        }
    }

    /// Creates a configuration that retries immediately.
    pub fn immediate() -> Self {
        Self {
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            add_jitter: false,
            unhealthy_after: u32::MAX,
        }
    }

    /// Sets the initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Enables or disables jitter.
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.add_jitter = jitter;
        self
    }

    /// Sets the degraded-health threshold.
    pub fn with_unhealthy_after(mut self, failures: u32) -> Self {
        self.unhealthy_after = failures.max(1);
        self
    }

    /// Calculates the delay after the given number of consecutive failures.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let base_delay = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        let delay_secs = base_delay.min(self.max_delay.as_secs_f64());

        if self.add_jitter {
            // Up to 25% jitter
            let jitter = delay_secs * 0.25 * rand::thread_rng().gen::<f64>();
            Duration::from_secs_f64(delay_secs + jitter)
        } else {
            Duration::from_secs_f64(delay_secs)
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new()
    }
}
