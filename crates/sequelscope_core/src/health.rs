//! Capture health signal surfaced to operators.

use parking_lot::RwLock;
use serde::Serialize;

/// Current state of the capture subsystem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum CaptureHealth {
    /// Capture has not produced its first result yet.
    Starting,
    /// Capture is delivering events.
    Capturing,
    /// Capture keeps failing and is retrying.
    Degraded {
        /// Failures since the last success.
        consecutive_failures: u32,
    },
    /// Capture never started; the dashboard runs without live updates.
    Disabled {
        /// Why capture is disabled.
        reason: String,
    },
    /// Capture was shut down.
    Stopped,
}

impl CaptureHealth {
    /// Returns true if live updates are flowing.
    pub fn is_ready(&self) -> bool {
        matches!(self, CaptureHealth::Capturing)
    }
}

/// Shared, lock-protected holder of the current [`CaptureHealth`].
pub struct HealthMonitor {
    state: RwLock<CaptureHealth>,
}

impl HealthMonitor {
    /// Creates a monitor in the [`CaptureHealth::Starting`] state.
    pub fn new() -> Self {
        Self {
            state: RwLock::new(CaptureHealth::Starting),
        }
    }

    /// Returns the current state.
    pub fn current(&self) -> CaptureHealth {
        self.state.read().clone()
    }

    /// Records a successful capture step.
    pub fn record_success(&self) {
        let mut state = self.state.write();
        if *state != CaptureHealth::Capturing {
            *state = CaptureHealth::Capturing;
        }
    }

    /// Records a failed capture step.
    ///
    /// The state only turns [`CaptureHealth::Degraded`] once
    /// `consecutive_failures` reaches `threshold`.
    pub fn record_failure(&self, consecutive_failures: u32, threshold: u32) {
        if consecutive_failures >= threshold {
            *self.state.write() = CaptureHealth::Degraded {
                consecutive_failures,
            };
        }
    }

    /// Marks capture as disabled.
    pub fn disable(&self, reason: impl Into<String>) {
        *self.state.write() = CaptureHealth::Disabled {
            reason: reason.into(),
        };
    }

    /// Marks capture as stopped.
    pub fn stop(&self) {
        *self.state.write() = CaptureHealth::Stopped;
    }
}

impl Default for HealthMonitor {
    fn default() -> Self {
        Self::new()
    }
}
