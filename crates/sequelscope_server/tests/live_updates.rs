//! End-to-end tests: capture loop to websocket client.

use async_trait::async_trait;
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use sequelscope_capture::{CaptureRunner, CaptureStrategy, RetryConfig};
use sequelscope_core::{
    BinlogPosition, CaptureCursor, ChangeEvent, RawCaptureEvent, Visit, WatchContext, WatchResult,
};
use sequelscope_server::{ServerConfig, WatchServer};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Client = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Strategy fed by the test through a channel.
struct InjectedStrategy {
    rx: mpsc::UnboundedReceiver<RawCaptureEvent>,
    cursor: CaptureCursor,
}

#[async_trait]
impl CaptureStrategy for InjectedStrategy {
    fn name(&self) -> &'static str {
        "injected"
    }

    fn cursor(&self) -> &CaptureCursor {
        &self.cursor
    }

    async fn next_batch(&mut self) -> WatchResult<Vec<RawCaptureEvent>> {
        match self.rx.recv().await {
            Some(event) => {
                self.cursor = event.position().clone();
                Ok(vec![event])
            }
            None => std::future::pending().await,
        }
    }
}

struct Harness {
    addr: SocketAddr,
    context: Arc<WatchContext>,
    inject: mpsc::UnboundedSender<RawCaptureEvent>,
    stop_capture: watch::Sender<bool>,
    stop_server: Option<oneshot::Sender<()>>,
}

impl Harness {
    async fn start() -> Self {
        let context = Arc::new(WatchContext::new());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (stop_server, stopped) = oneshot::channel::<()>();
        let server = WatchServer::new(ServerConfig::new(addr), Arc::clone(&context));
        tokio::spawn(server.serve_on(listener, async move {
            let _ = stopped.await;
        }));

        let (inject, rx) = mpsc::unbounded_channel();
        let strategy = InjectedStrategy {
            rx,
            cursor: CaptureCursor::Binlog(BinlogPosition::new("binlog.000001", 4)),
        };
        let (stop_capture, shutdown) = watch::channel(false);
        CaptureRunner::spawn(
            Box::new(strategy),
            &context,
            RetryConfig::immediate(),
            shutdown,
        )
        .unwrap();

        Self {
            addr,
            context,
            inject,
            stop_capture,
            stop_server: Some(stop_server),
        }
    }

    async fn connect(&self) -> Client {
        let before = self.context.registry().len();
        let (client, _) = connect_async(format!("ws://{}/ws", self.addr)).await.unwrap();
        self.wait_for_subscribers(before + 1).await;
        client
    }

    async fn wait_for_subscribers(&self, expected: usize) {
        for _ in 0..400 {
            if self.context.registry().len() == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!(
            "expected {expected} subscribers, found {}",
            self.context.registry().len()
        );
    }

    fn row_mutation(&self, database: &str, table: &str, pos: u64) {
        self.inject
            .send(RawCaptureEvent::RowMutation {
                database: database.into(),
                table: table.into(),
                rows: 1,
                timestamp: Utc::now(),
                position: CaptureCursor::Binlog(BinlogPosition::new("binlog.000001", pos)),
            })
            .unwrap();
    }

    fn statement(&self, database: &str, query: &str, pos: u64) {
        self.inject
            .send(RawCaptureEvent::StatementExecuted {
                database: database.into(),
                query: query.into(),
                timestamp: Utc::now(),
                position: CaptureCursor::Binlog(BinlogPosition::new("binlog.000001", pos)),
            })
            .unwrap();
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        let _ = self.stop_capture.send(true);
        if let Some(stop) = self.stop_server.take() {
            let _ = stop.send(());
        }
    }
}

async fn next_text(client: &mut Client) -> String {
    let frame = tokio::time::timeout(Duration::from_secs(5), client.next())
        .await
        .expect("timed out waiting for a frame")
        .expect("stream ended")
        .unwrap();
    match frame {
        Message::Text(text) => text,
        other => panic!("unexpected frame: {other:?}"),
    }
}

#[tokio::test]
async fn row_mutation_reaches_subscriber() {
    let harness = Harness::start().await;
    let mut client = harness.connect().await;

    harness.row_mutation("shop", "orders", 120);

    assert_eq!(
        next_text(&mut client).await,
        r#"{"type":"row_change","database":"shop","table":"orders"}"#
    );
}

#[tokio::test]
async fn statement_reaches_subscriber() {
    let harness = Harness::start().await;
    let mut client = harness.connect().await;

    harness.statement("shop", "TRUNCATE carts", 300);

    assert_eq!(
        next_text(&mut client).await,
        r#"{"type":"query","database":"shop","query":"TRUNCATE carts"}"#
    );
}

#[tokio::test]
async fn every_subscriber_receives_events_in_order() {
    let harness = Harness::start().await;
    let mut first = harness.connect().await;
    let mut second = harness.connect().await;

    harness.row_mutation("shop", "orders", 120);
    harness.row_mutation("shop", "users", 240);

    for client in [&mut first, &mut second] {
        assert!(next_text(client).await.contains(r#""table":"orders""#));
        assert!(next_text(client).await.contains(r#""table":"users""#));
    }
}

#[tokio::test]
async fn closed_client_is_deregistered_and_others_unaffected() {
    let harness = Harness::start().await;
    let mut staying = harness.connect().await;
    let mut leaving = harness.connect().await;

    leaving.close(None).await.unwrap();
    harness.wait_for_subscribers(1).await;

    harness.row_mutation("shop", "orders", 120);
    assert!(next_text(&mut staying).await.contains(r#""table":"orders""#));
}

#[tokio::test]
async fn inbound_frames_are_ignored() {
    let harness = Harness::start().await;
    let mut client = harness.connect().await;

    client.send(Message::Text("hello".into())).await.unwrap();
    client.send(Message::Ping(vec![1, 2, 3])).await.unwrap();

    harness.row_mutation("shop", "orders", 120);
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), client.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        match frame {
            Message::Pong(_) => continue,
            Message::Text(text) => {
                assert!(text.contains(r#""table":"orders""#));
                break;
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }
    assert_eq!(harness.context.registry().len(), 1);
}

#[tokio::test]
async fn health_endpoint_reports_capture_state() {
    let harness = Harness::start().await;
    let mut client = harness.connect().await;

    harness.row_mutation("shop", "orders", 120);
    next_text(&mut client).await;

    let mut stream = tokio::net::TcpStream::connect(harness.addr).await.unwrap();
    tokio::io::AsyncWriteExt::write_all(
        &mut stream,
        b"GET /health HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
    )
    .await
    .unwrap();
    let mut response = String::new();
    tokio::io::AsyncReadExt::read_to_string(&mut stream, &mut response)
        .await
        .unwrap();

    assert!(response.starts_with("HTTP/1.1 200"));
    assert!(response.contains(r#"{"state":"capturing"}"#));
}

#[tokio::test]
async fn burst_reaches_reading_subscriber_in_full() {
    let harness = Harness::start().await;
    let mut client = harness.connect().await;

    let broadcaster = harness.context.broadcaster();
    let mut evicted = 0;
    for i in 0..40u64 {
        let event = ChangeEvent::row_change(
            "shop",
            format!("t{i}"),
            Utc::now(),
            CaptureCursor::Binlog(BinlogPosition::new("binlog.000001", 4 + i)),
        );
        evicted += broadcaster.publish(&event);
    }
    assert_eq!(evicted, 0);

    for i in 0..40 {
        let text = next_text(&mut client).await;
        assert!(text.contains(&format!(r#""table":"t{i}""#)), "frame {i}: {text}");
    }
    assert_eq!(harness.context.registry().len(), 1);
}

#[tokio::test]
async fn closing_a_handle_drops_the_connection() {
    let harness = Harness::start().await;
    let mut client = harness.connect().await;

    harness.context.registry().for_each(|subscriber| {
        subscriber.close();
        Visit::Keep
    });
    harness.wait_for_subscribers(0).await;

    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), client.next())
            .await
            .expect("connection stayed open");
        match frame {
            None | Some(Err(_)) | Some(Ok(Message::Close(_))) => break,
            Some(Ok(_)) => continue,
        }
    }
}
