//! Error types for the change watcher.

use thiserror::Error;

/// Result type for watcher operations.
pub type WatchResult<T> = Result<T, WatchError>;

/// Errors that can occur while capturing or delivering changes.
///
/// None of these reach an HTTP response. Only [`WatchError::SourceUnavailable`]
/// at startup changes process behavior, and it only disables capture.
#[derive(Error, Debug)]
pub enum WatchError {
    /// The database could not be reached or the status query failed.
    #[error("source unavailable: {0}")]
    SourceUnavailable(String),

    /// The capture stream failed mid-flight.
    #[error("capture stream error: {message}")]
    CaptureStream {
        /// Error message.
        message: String,
        /// Whether the stream survives the error and can be read again.
        retryable: bool,
    },

    /// Writing to a single subscriber failed.
    #[error("delivery to subscriber {subscriber} failed: {reason}")]
    DeliveryFailure {
        /// Subscriber that failed.
        subscriber: u64,
        /// Failure reason.
        reason: String,
    },

    /// A poll tick against the audit log failed.
    #[error("poll query error: {0}")]
    PollQuery(String),

    /// An event could not be encoded for the wire.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration was rejected.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl WatchError {
    /// Creates a capture error after which the same stream can be read again.
    pub fn capture_retryable(message: impl Into<String>) -> Self {
        Self::CaptureStream {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a capture error that leaves the stream unusable.
    pub fn capture_fatal(message: impl Into<String>) -> Self {
        Self::CaptureStream {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if the failing stream can simply be read again.
    ///
    /// Poll failures are retryable because the next tick re-reads the same window.
    pub fn is_retryable(&self) -> bool {
        match self {
            WatchError::CaptureStream { retryable, .. } => *retryable,
            WatchError::PollQuery(_) => true,
            WatchError::DeliveryFailure { .. } => true,
            _ => false,
        }
    }
}
