//! Raw capture event to [`ChangeEvent`] translation.

use crate::event::{ChangeEvent, RawCaptureEvent};

/// Translates a raw capture event into a change event.
///
/// Pure and infallible: decode failures are reported by the capture strategy
/// before an event ever reaches this point.
pub fn translate(raw: RawCaptureEvent) -> ChangeEvent {
    match raw {
        RawCaptureEvent::RowMutation {
            database,
            table,
            timestamp,
            position,
            ..
        } => ChangeEvent::row_change(database, table, timestamp, position),
        RawCaptureEvent::StatementExecuted {
            database,
            query,
            timestamp,
            position,
        } => ChangeEvent::query_executed(database, query, timestamp, position),
    }
}
