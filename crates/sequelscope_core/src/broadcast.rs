//! Fan-out of change events to every registered subscriber.

use crate::event::ChangeEvent;
use crate::registry::{SubscriberRegistry, Visit};
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Delivers change events to all subscribers in a registry.
///
/// Publishing is fire-and-forget. A subscriber whose delivery fails is closed
/// and evicted; other subscribers and the caller are unaffected.
#[derive(Clone)]
pub struct Broadcaster {
    registry: Arc<SubscriberRegistry>,
}

impl Broadcaster {
    /// Creates a broadcaster over the given registry.
    pub fn new(registry: Arc<SubscriberRegistry>) -> Self {
        Self { registry }
    }

    /// Returns the registry this broadcaster publishes to.
    pub fn registry(&self) -> &Arc<SubscriberRegistry> {
        &self.registry
    }

    /// Publishes one event. Returns the number of subscribers evicted.
    pub fn publish(&self, event: &ChangeEvent) -> usize {
        let payload: Arc<str> = match event.to_json() {
            Ok(json) => json.into(),
            Err(e) => {
                error!(error = %e, "Failed to encode change event");
                return 0;
            }
        };

        let evicted = self.registry.for_each(|subscriber| {
            match subscriber.deliver(Arc::clone(&payload)) {
                Ok(()) => Visit::Keep,
                Err(e) => {
                    warn!(subscriber = %subscriber.id(), error = %e, "Error broadcasting to client");
                    subscriber.close();
                    Visit::Evict
                }
            }
        });

        if !evicted.is_empty() {
            debug!(
                evicted = evicted.len(),
                remaining = self.registry.len(),
                "Evicted broken subscribers"
            );
        }
        evicted.len()
    }
}
