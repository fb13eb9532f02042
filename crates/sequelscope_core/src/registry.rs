//! Registry of live subscriber connections.
//!
//! The registry owns the subscriber set and its lock. Nothing else touches
//! the set: connections go through [`SubscriberRegistry::register`] and
//! [`SubscriberRegistry::deregister`], broadcasts through
//! [`SubscriberRegistry::for_each`].

use crate::error::WatchResult;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Identity of a subscriber handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(u64);

impl SubscriberId {
    /// Creates an id from a raw value.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A handle to one live duplex connection.
pub trait Subscriber: Send + Sync {
    /// Returns the handle identity.
    fn id(&self) -> SubscriberId;

    /// Hands a serialized notification to the connection.
    ///
    /// Must not block. An error means the connection is broken.
    fn deliver(&self, payload: Arc<str>) -> WatchResult<()>;

    /// Closes the underlying connection.
    fn close(&self);
}

/// Outcome of visiting one subscriber during [`SubscriberRegistry::for_each`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visit {
    /// The handle is healthy.
    Keep,
    /// The handle is broken and must be removed after the pass.
    Evict,
}

/// Concurrency-safe set of active subscribers.
pub struct SubscriberRegistry {
    subscribers: RwLock<HashMap<SubscriberId, Arc<dyn Subscriber>>>,
    next_id: AtomicU64,
}

impl SubscriberRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Allocates a fresh subscriber id.
    pub fn next_id(&self) -> SubscriberId {
        SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Adds a handle. Registering an id that is already present is a no-op.
    pub fn register(&self, handle: Arc<dyn Subscriber>) {
        self.subscribers.write().entry(handle.id()).or_insert(handle);
    }

    /// Removes a handle. No-op if absent.
    pub fn deregister(&self, id: SubscriberId) {
        self.subscribers.write().remove(&id);
    }

    /// Returns true if a handle with this id is registered.
    pub fn contains(&self, id: SubscriberId) -> bool {
        self.subscribers.read().contains_key(&id)
    }

    /// Returns the number of registered handles.
    pub fn len(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Returns true if no handle is registered.
    pub fn is_empty(&self) -> bool {
        self.subscribers.read().is_empty()
    }

    /// Visits a snapshot of the registered handles.
    ///
    /// The read lock is held only while the snapshot is taken, so `visit`
    /// never runs under the lock. Handles for which `visit` returns
    /// [`Visit::Evict`] are removed in one write section after the pass.
    /// Returns the evicted handles.
    pub fn for_each<F>(&self, mut visit: F) -> Vec<Arc<dyn Subscriber>>
    where
        F: FnMut(&dyn Subscriber) -> Visit,
    {
        let snapshot: Vec<Arc<dyn Subscriber>> =
            self.subscribers.read().values().cloned().collect();

        let broken: Vec<Arc<dyn Subscriber>> = snapshot
            .into_iter()
            .filter(|handle| visit(handle.as_ref()) == Visit::Evict)
            .collect();

        if !broken.is_empty() {
            let mut subscribers = self.subscribers.write();
            for handle in &broken {
                subscribers.remove(&handle.id());
            }
        }

        broken
    }
}

impl Default for SubscriberRegistry {
    fn default() -> Self {
        Self::new()
    }
}
