//! Process-wide watcher state, built once at startup and passed explicitly.

use crate::activity::RecentActivityBuffer;
use crate::broadcast::Broadcaster;
use crate::health::HealthMonitor;
use crate::registry::SubscriberRegistry;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared state of the change watcher.
///
/// The capture loop and the connection handlers communicate only through
/// the subscriber registry and the activity buffer held here.
pub struct WatchContext {
    registry: Arc<SubscriberRegistry>,
    activity: Arc<RecentActivityBuffer>,
    health: Arc<HealthMonitor>,
    capture_claimed: AtomicBool,
}

impl WatchContext {
    /// Creates a context with default-sized components.
    pub fn new() -> Self {
        Self::with_activity(RecentActivityBuffer::new())
    }

    /// Creates a context around an existing activity buffer.
    pub fn with_activity(activity: RecentActivityBuffer) -> Self {
        Self {
            registry: Arc::new(SubscriberRegistry::new()),
            activity: Arc::new(activity),
            health: Arc::new(HealthMonitor::new()),
            capture_claimed: AtomicBool::new(false),
        }
    }

    /// Returns the subscriber registry.
    pub fn registry(&self) -> &Arc<SubscriberRegistry> {
        &self.registry
    }

    /// Returns the recent-activity buffer.
    pub fn activity(&self) -> &Arc<RecentActivityBuffer> {
        &self.activity
    }

    /// Returns the capture health monitor.
    pub fn health(&self) -> &Arc<HealthMonitor> {
        &self.health
    }

    /// Returns a broadcaster over this context's registry.
    pub fn broadcaster(&self) -> Broadcaster {
        Broadcaster::new(Arc::clone(&self.registry))
    }

    /// Claims the single capture slot of this context.
    ///
    /// Returns false if a capture strategy was already started.
    pub fn claim_capture(&self) -> bool {
        !self.capture_claimed.swap(true, Ordering::SeqCst)
    }
}

impl Default for WatchContext {
    fn default() -> Self {
        Self::new()
    }
}
