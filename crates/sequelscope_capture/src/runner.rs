//! The capture loop.
//!
//! A [`CaptureRunner`] owns one strategy and drives it for the life of the
//! process: each raw event is translated, recorded in the activity buffer when
//! the strategy asks for it, and published to every subscriber. Failures are
//! logged and retried forever with capped exponential backoff; only the
//! shutdown signal ends the loop.

use crate::config::RetryConfig;
use crate::strategy::CaptureStrategy;
use sequelscope_core::{
    translate, Broadcaster, HealthMonitor, RawCaptureEvent, RecentActivityBuffer, WatchContext,
    WatchError, WatchResult,
};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Counters for one capture run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CaptureStats {
    /// Events translated and published.
    pub events_published: u64,
    /// Failed capture steps.
    pub failures: u64,
    /// Subscribers evicted during publishing.
    pub subscribers_evicted: u64,
}

/// Drives a [`CaptureStrategy`] and fans its events out.
pub struct CaptureRunner {
    strategy: Box<dyn CaptureStrategy>,
    broadcaster: Broadcaster,
    activity: Arc<RecentActivityBuffer>,
    health: Arc<HealthMonitor>,
    retry: RetryConfig,
    stats: CaptureStats,
}

impl CaptureRunner {
    /// Creates a runner publishing into `context`.
    pub fn new(strategy: Box<dyn CaptureStrategy>, context: &WatchContext, retry: RetryConfig) -> Self {
        Self {
            strategy,
            broadcaster: context.broadcaster(),
            activity: Arc::clone(context.activity()),
            health: Arc::clone(context.health()),
            retry,
            stats: CaptureStats::default(),
        }
    }

    /// Spawns the loop as a background task.
    ///
    /// Only one capture loop may run per context; a second claim fails with
    /// `InvalidConfig`.
    pub fn spawn(
        strategy: Box<dyn CaptureStrategy>,
        context: &WatchContext,
        retry: RetryConfig,
        shutdown: watch::Receiver<bool>,
    ) -> WatchResult<JoinHandle<CaptureStats>> {
        if !context.claim_capture() {
            return Err(WatchError::InvalidConfig(
                "a capture loop is already running".into(),
            ));
        }
        let runner = Self::new(strategy, context, retry);
        Ok(tokio::spawn(runner.run(shutdown)))
    }

    /// Runs until `shutdown` turns true or its sender is dropped.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> CaptureStats {
        info!(
            strategy = self.strategy.name(),
            cursor = %self.strategy.cursor(),
            "Capture started"
        );
        let mut consecutive_failures: u32 = 0;

        loop {
            if *shutdown.borrow() {
                break;
            }

            let next = tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                next = self.strategy.next_batch() => next,
            };

            match next {
                Ok(batch) => {
                    consecutive_failures = 0;
                    self.health.record_success();
                    for raw in batch {
                        self.dispatch(raw);
                    }
                }
                Err(e) => {
                    consecutive_failures = consecutive_failures.saturating_add(1);
                    self.stats.failures += 1;
                    self.health
                        .record_failure(consecutive_failures, self.retry.unhealthy_after);
                    log_failure(self.strategy.name(), &e, consecutive_failures);

                    if self.strategy.backs_off() {
                        let delay = self.retry.delay_for_attempt(consecutive_failures);
                        debug!(?delay, "Backing off before next capture attempt");
                        tokio::select! {
                            biased;
                            _ = shutdown.changed() => break,
                            _ = tokio::time::sleep(delay) => {}
                        }
                    }
                }
            }
        }

        self.health.stop();
        info!(
            strategy = self.strategy.name(),
            cursor = %self.strategy.cursor(),
            events = self.stats.events_published,
            "Capture stopped"
        );
        self.stats
    }

    fn dispatch(&mut self, raw: RawCaptureEvent) {
        match &raw {
            RawCaptureEvent::RowMutation { table, rows, .. } => {
                info!("Table {} changed: {} rows affected", table, rows);
            }
            RawCaptureEvent::StatementExecuted { query, .. } => {
                debug!("Query executed: {}", query);
            }
        }

        let event = translate(raw);
        if self.strategy.records_activity() {
            self.activity.push(event.clone());
        }
        let evicted = self.broadcaster.publish(&event);
        self.stats.events_published += 1;
        self.stats.subscribers_evicted += evicted as u64;
    }
}

fn log_failure(strategy: &str, e: &WatchError, consecutive_failures: u32) {
    match e {
        WatchError::PollQuery(_) => {
            warn!(strategy, error = %e, "Poll tick failed; retrying same window")
        }
        _ if e.is_retryable() => {
            warn!(strategy, error = %e, consecutive_failures, "Capture event error")
        }
        _ => error!(strategy, error = %e, consecutive_failures, "Capture stream error"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use parking_lot::Mutex;
    use sequelscope_core::{BinlogPosition, CaptureCursor, CaptureHealth, Subscriber, SubscriberId};
    use std::collections::VecDeque;
    use std::time::Duration;
    use tracing::field::{Field, Visit};
    use tracing::Level;
    use tracing_subscriber::layer::{Context, SubscriberExt};
    use tracing_subscriber::Layer;

    /// Strategy replaying a script, then pending forever.
    struct ScriptedStrategy {
        steps: VecDeque<WatchResult<Vec<RawCaptureEvent>>>,
        cursor: CaptureCursor,
        records_activity: bool,
    }

    impl ScriptedStrategy {
        fn new(steps: Vec<WatchResult<Vec<RawCaptureEvent>>>) -> Self {
            Self {
                steps: steps.into(),
                cursor: CaptureCursor::Binlog(BinlogPosition::new("binlog.000001", 4)),
                records_activity: false,
            }
        }
    }

    #[async_trait]
    impl CaptureStrategy for ScriptedStrategy {
        fn name(&self) -> &'static str {
            "scripted"
        }

        fn cursor(&self) -> &CaptureCursor {
            &self.cursor
        }

        async fn next_batch(&mut self) -> WatchResult<Vec<RawCaptureEvent>> {
            match self.steps.pop_front() {
                Some(step) => step,
                None => std::future::pending().await,
            }
        }

        fn records_activity(&self) -> bool {
            self.records_activity
        }
    }

    struct Collecting {
        id: SubscriberId,
        received: Mutex<Vec<String>>,
    }

    impl Subscriber for Collecting {
        fn id(&self) -> SubscriberId {
            self.id
        }

        fn deliver(&self, payload: Arc<str>) -> WatchResult<()> {
            self.received.lock().push(payload.to_string());
            Ok(())
        }

        fn close(&self) {}
    }

    fn row_mutation(table: &str, pos: u64) -> RawCaptureEvent {
        RawCaptureEvent::RowMutation {
            database: "shop".into(),
            table: table.into(),
            rows: 3,
            timestamp: Utc::now(),
            position: CaptureCursor::Binlog(BinlogPosition::new("binlog.000001", pos)),
        }
    }

    fn statement(query: &str) -> RawCaptureEvent {
        RawCaptureEvent::StatementExecuted {
            database: String::new(),
            query: query.into(),
            timestamp: Utc::now(),
            position: CaptureCursor::Binlog(BinlogPosition::new("binlog.000001", 900)),
        }
    }

    fn subscribe(context: &WatchContext) -> Arc<Collecting> {
        let subscriber = Arc::new(Collecting {
            id: context.registry().next_id(),
            received: Mutex::new(Vec::new()),
        });
        context.registry().register(subscriber.clone());
        subscriber
    }

    /// Layer keeping the level and message of every event.
    #[derive(Clone, Default)]
    struct LogRecorder {
        events: Arc<Mutex<Vec<(Level, String)>>>,
    }

    struct MessageVisitor(String);

    impl Visit for MessageVisitor {
        fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
            if field.name() == "message" {
                self.0 = format!("{value:?}");
            }
        }
    }

    impl<S: tracing::Subscriber> Layer<S> for LogRecorder {
        fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
            let mut message = MessageVisitor(String::new());
            event.record(&mut message);
            self.events.lock().push((*event.metadata().level(), message.0));
        }
    }

    async fn wait_for<F: Fn() -> bool>(condition: F) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn publishes_events_in_order_and_survives_errors() {
        let context = WatchContext::new();
        let subscriber = subscribe(&context);

        let strategy = ScriptedStrategy::new(vec![
            Ok(vec![row_mutation("orders", 100)]),
            Err(WatchError::capture_retryable("checksum mismatch")),
            Ok(vec![row_mutation("users", 200)]),
        ]);
        let (tx, rx) = watch::channel(false);
        let handle =
            CaptureRunner::spawn(Box::new(strategy), &context, RetryConfig::immediate(), rx)
                .unwrap();

        wait_for(|| subscriber.received.lock().len() == 2).await;
        assert_eq!(context.health().current(), CaptureHealth::Capturing);

        tx.send(true).unwrap();
        let stats = handle.await.unwrap();
        assert_eq!(stats.events_published, 2);
        assert_eq!(stats.failures, 1);
        assert_eq!(context.health().current(), CaptureHealth::Stopped);

        let received = subscriber.received.lock().clone();
        assert!(received[0].contains("\"table\":\"orders\""));
        assert!(received[1].contains("\"table\":\"users\""));
    }

    #[tokio::test]
    async fn repeated_failures_degrade_health() {
        let context = WatchContext::new();
        let strategy = ScriptedStrategy::new(vec![
            Err(WatchError::capture_fatal("connection reset")),
            Err(WatchError::capture_fatal("connection reset")),
        ]);
        let retry = RetryConfig::immediate().with_unhealthy_after(2);
        let (tx, rx) = watch::channel(false);
        let handle = CaptureRunner::spawn(Box::new(strategy), &context, retry, rx).unwrap();

        let health = Arc::clone(context.health());
        wait_for(|| {
            health.current()
                == CaptureHealth::Degraded {
                    consecutive_failures: 2,
                }
        })
        .await;

        tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn activity_recorded_only_when_strategy_asks() {
        let context = WatchContext::new();
        let mut strategy = ScriptedStrategy::new(vec![Ok(vec![
            statement("INSERT INTO users VALUES (1)"),
            statement("UPDATE orders SET paid = 1"),
        ])]);
        strategy.records_activity = true;

        let (tx, rx) = watch::channel(false);
        let handle =
            CaptureRunner::spawn(Box::new(strategy), &context, RetryConfig::immediate(), rx)
                .unwrap();
        let activity = Arc::clone(context.activity());
        wait_for(|| activity.len() == 2).await;

        let orders = activity.for_table("orders", 5);
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].query(), Some("UPDATE orders SET paid = 1"));

        tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn streaming_style_strategy_skips_activity() {
        let context = WatchContext::new();
        let strategy = ScriptedStrategy::new(vec![Ok(vec![row_mutation("orders", 100)])]);
        let (tx, rx) = watch::channel(false);
        let runner = CaptureRunner::new(Box::new(strategy), &context, RetryConfig::immediate());
        let handle = tokio::spawn(runner.run(rx));

        wait_for(|| context.health().current() == CaptureHealth::Capturing).await;
        tx.send(true).unwrap();
        let stats = handle.await.unwrap();
        assert_eq!(stats.events_published, 1);
        assert!(context.activity().is_empty());
    }

    #[test]
    fn statement_text_stays_out_of_info_logs() {
        let recorder = LogRecorder::default();
        let dispatch = tracing_subscriber::registry().with(recorder.clone());
        let context = WatchContext::new();
        let mut runner = CaptureRunner::new(
            Box::new(ScriptedStrategy::new(Vec::new())),
            &context,
            RetryConfig::immediate(),
        );

        tracing::subscriber::with_default(dispatch, || {
            runner.dispatch(statement("UPDATE users SET email = 'jo@example.com'"));
            runner.dispatch(row_mutation("orders", 100));
        });

        let events = recorder.events.lock().clone();
        let level_of = |prefix: &str| {
            events
                .iter()
                .find(|(_, message)| message.starts_with(prefix))
                .map(|(level, _)| *level)
        };
        assert_eq!(level_of("Query executed"), Some(Level::DEBUG));
        assert_eq!(level_of("Table orders changed"), Some(Level::INFO));
        assert!(events
            .iter()
            .filter(|(level, _)| *level <= Level::INFO)
            .all(|(_, message)| !message.contains("jo@example.com")));
    }

    #[tokio::test]
    async fn only_one_loop_per_context() {
        let context = WatchContext::new();
        let (_tx, rx) = watch::channel(false);
        let first = CaptureRunner::spawn(
            Box::new(ScriptedStrategy::new(Vec::new())),
            &context,
            RetryConfig::immediate(),
            rx.clone(),
        );
        assert!(first.is_ok());

        let second = CaptureRunner::spawn(
            Box::new(ScriptedStrategy::new(Vec::new())),
            &context,
            RetryConfig::immediate(),
            rx,
        );
        assert!(matches!(second, Err(WatchError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn dropped_sender_stops_loop() {
        let context = WatchContext::new();
        let (tx, rx) = watch::channel(false);
        let runner = CaptureRunner::new(
            Box::new(ScriptedStrategy::new(Vec::new())),
            &context,
            RetryConfig::immediate(),
        );
        let handle = tokio::spawn(runner.run(rx));
        drop(tx);
        let stats = handle.await.unwrap();
        assert_eq!(stats, CaptureStats::default());
    }
}
