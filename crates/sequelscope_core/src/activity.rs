//! Bounded history of recently observed events.
//!
//! Used to show per-table recent activity next to table metadata. Entries are
//! kept newest-first in observation order and never reordered.

use crate::event::ChangeEvent;
use parking_lot::RwLock;
use std::collections::VecDeque;

/// Default number of events retained.
pub const DEFAULT_ACTIVITY_CAPACITY: usize = 100;

/// Default number of events returned by a per-table lookup.
pub const DEFAULT_TABLE_LOOKUP_LIMIT: usize = 5;

/// Fixed-capacity, newest-first event history.
pub struct RecentActivityBuffer {
    entries: RwLock<VecDeque<ChangeEvent>>,
    capacity: usize,
}

impl RecentActivityBuffer {
    /// Creates a buffer holding the last [`DEFAULT_ACTIVITY_CAPACITY`] events.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_ACTIVITY_CAPACITY)
    }

    /// Creates a buffer with a specific capacity (at least one).
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: RwLock::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Inserts an event at the front, evicting the oldest once full.
    pub fn push(&self, event: ChangeEvent) {
        let mut entries = self.entries.write();
        entries.push_front(event);
        entries.truncate(self.capacity);
    }

    /// Returns every retained event, newest first.
    pub fn recent(&self) -> Vec<ChangeEvent> {
        self.entries.read().iter().cloned().collect()
    }

    /// Returns up to `limit` events whose statement mentions `table`
    /// (case-insensitive), newest first.
    pub fn for_table(&self, table: &str, limit: usize) -> Vec<ChangeEvent> {
        self.entries
            .read()
            .iter()
            .filter(|event| event.mentions_table(table))
            .take(limit)
            .cloned()
            .collect()
    }

    /// Returns the number of retained events.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns true if nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Returns the capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for RecentActivityBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::CaptureCursor;
    use chrono::{NaiveDate, NaiveDateTime, Utc};
    use proptest::prelude::*;

    fn at(second: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, 1)
            .and_then(|d| d.and_hms_opt(12, 0, 0))
            .unwrap()
            + chrono::Duration::seconds(i64::from(second))
    }

    fn query(sql: &str, second: u32) -> ChangeEvent {
        ChangeEvent::query_executed("", sql, Utc::now(), CaptureCursor::Watermark(at(second)))
    }

    #[test]
    fn keeps_last_hundred_newest_first() {
        let buffer = RecentActivityBuffer::new();
        for i in 0..150 {
            buffer.push(query(&format!("SELECT {i}"), i));
        }

        let recent = buffer.recent();
        assert_eq!(recent.len(), 100);
        assert_eq!(recent[0].query(), Some("SELECT 149"));
        assert_eq!(recent[99].query(), Some("SELECT 50"));
    }

    #[test]
    fn table_lookup_matches_case_insensitively() {
        let buffer = RecentActivityBuffer::new();
        buffer.push(query("SELECT * FROM users", 1));
        buffer.push(query("UPDATE orders SET x=1", 2));
        buffer.push(query("SELECT * FROM Users WHERE id=2", 3));

        let hits = buffer.for_table("users", DEFAULT_TABLE_LOOKUP_LIMIT);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].query(), Some("SELECT * FROM Users WHERE id=2"));
        assert_eq!(hits[1].query(), Some("SELECT * FROM users"));
    }

    #[test]
    fn table_lookup_is_limited() {
        let buffer = RecentActivityBuffer::new();
        for i in 0..12 {
            buffer.push(query(&format!("INSERT INTO users VALUES ({i})"), i));
        }

        let hits = buffer.for_table("users", DEFAULT_TABLE_LOOKUP_LIMIT);
        assert_eq!(hits.len(), 5);
        assert_eq!(hits[0].query(), Some("INSERT INTO users VALUES (11)"));
    }

    #[test]
    fn insertion_order_wins_over_timestamps() {
        let buffer = RecentActivityBuffer::with_capacity(3);
        buffer.push(query("SELECT 1 FROM a", 30));
        buffer.push(query("SELECT 1 FROM b", 10));

        let recent = buffer.recent();
        assert_eq!(recent[0].query(), Some("SELECT 1 FROM b"));
        assert_eq!(recent[1].query(), Some("SELECT 1 FROM a"));
    }

    proptest! {
        #[test]
        fn never_exceeds_capacity(capacity in 1usize..64, inserts in 0usize..200) {
            let buffer = RecentActivityBuffer::with_capacity(capacity);
            for i in 0..inserts {
                buffer.push(query(&format!("SELECT {i}"), i as u32));
                prop_assert!(buffer.len() <= capacity);
            }
            prop_assert_eq!(buffer.len(), inserts.min(capacity));
        }
    }
}
