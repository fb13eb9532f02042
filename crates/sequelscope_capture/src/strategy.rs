//! The capture strategy abstraction.

use async_trait::async_trait;
use sequelscope_core::{CaptureCursor, RawCaptureEvent, WatchResult};

/// A source of raw capture events.
///
/// Each call to [`CaptureStrategy::next_batch`] yields the next slice of an
/// infinite, non-restartable event sequence and advances the strategy's
/// cursor past it. Streaming capture yields one event per call; polling
/// capture yields one tick's rows, which may be empty.
#[async_trait]
pub trait CaptureStrategy: Send {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Returns the current resume cursor.
    fn cursor(&self) -> &CaptureCursor;

    /// Waits for and returns the next events in observation order.
    ///
    /// On error the cursor is left where it was.
    async fn next_batch(&mut self) -> WatchResult<Vec<RawCaptureEvent>>;

    /// Whether translated events feed the recent-activity buffer.
    fn records_activity(&self) -> bool {
        false
    }

    /// Whether the runner should back off after a failure.
    ///
    /// Strategies paced by their own timer return false.
    fn backs_off(&self) -> bool {
        true
    }
}

#[async_trait]
impl<S: CaptureStrategy + ?Sized> CaptureStrategy for Box<S> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn cursor(&self) -> &CaptureCursor {
        (**self).cursor()
    }

    async fn next_batch(&mut self) -> WatchResult<Vec<RawCaptureEvent>> {
        (**self).next_batch().await
    }

    fn records_activity(&self) -> bool {
        (**self).records_activity()
    }

    fn backs_off(&self) -> bool {
        (**self).backs_off()
    }
}
