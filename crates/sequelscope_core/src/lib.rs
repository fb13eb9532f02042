//! # SequelScope Core
//!
//! Change events and live subscriber fan-out for SequelScope.
//!
//! This crate provides:
//! - The normalized [`ChangeEvent`] and its JSON wire form
//! - The raw-event translator
//! - A lock-protected subscriber registry with post-pass eviction
//! - A fire-and-forget broadcaster
//! - A bounded recent-activity buffer with per-table lookup
//! - The capture health signal and the shared [`WatchContext`]
//!
//! ## Key Invariants
//!
//! - Change events are immutable once translated
//! - The registry is never mutated while it is being iterated
//! - A subscriber whose delivery fails is evicted in the same broadcast
//! - The activity buffer never exceeds its capacity and never reorders

#![deny(unsafe_code)]
#![warn(missing_docs)]
// Production code MUST NOT use panic!/unwrap()/expect()
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod activity;
mod broadcast;
mod context;
mod error;
mod event;
mod health;
mod registry;
mod translate;

pub use activity::{RecentActivityBuffer, DEFAULT_ACTIVITY_CAPACITY, DEFAULT_TABLE_LOOKUP_LIMIT};
pub use broadcast::Broadcaster;
pub use context::WatchContext;
pub use error::{WatchError, WatchResult};
pub use event::{BinlogPosition, CaptureCursor, ChangeEvent, EventKind, Notification, RawCaptureEvent};
pub use health::{CaptureHealth, HealthMonitor};
pub use registry::{Subscriber, SubscriberId, SubscriberRegistry, Visit};
pub use translate::translate;
