//! Websocket subscribers.
//!
//! Each upgraded connection registers a [`ChannelSubscriber`] and runs two
//! halves: a writer task draining the subscriber's queue into the socket, and
//! a keepalive read loop that watches for the peer going away or the
//! broadcaster closing the handle. Whichever half finishes first tears the
//! connection down.

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use sequelscope_core::{Subscriber, SubscriberId, WatchContext, WatchError, WatchResult};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, info};

/// Registry handle for one websocket connection.
///
/// Delivery never waits on the network: payloads are queued for the writer
/// task. It fails only once the writer has stopped, which happens when a
/// socket write errors or times out.
pub struct ChannelSubscriber {
    id: SubscriberId,
    tx: mpsc::UnboundedSender<Arc<str>>,
    closed: Arc<Notify>,
}

impl ChannelSubscriber {
    /// Creates a subscriber, the queue its writer drains and its close signal.
    pub fn new(id: SubscriberId) -> (Self, mpsc::UnboundedReceiver<Arc<str>>, Arc<Notify>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let closed = Arc::new(Notify::new());
        let subscriber = Self {
            id,
            tx,
            closed: Arc::clone(&closed),
        };
        (subscriber, rx, closed)
    }
}

impl Subscriber for ChannelSubscriber {
    fn id(&self) -> SubscriberId {
        self.id
    }

    fn deliver(&self, payload: Arc<str>) -> WatchResult<()> {
        self.tx
            .send(payload)
            .map_err(|_| WatchError::DeliveryFailure {
                subscriber: self.id.as_u64(),
                reason: "connection closed".into(),
            })
    }

    fn close(&self) {
        self.closed.notify_one();
    }
}

/// Serves one upgraded connection until either side goes away.
pub(crate) async fn serve_subscriber(
    socket: WebSocket,
    context: Arc<WatchContext>,
    write_timeout: Duration,
    peer: SocketAddr,
) {
    let registry = Arc::clone(context.registry());
    let id = registry.next_id();
    let (subscriber, mut rx, closed) = ChannelSubscriber::new(id);
    registry.register(Arc::new(subscriber));
    info!(subscriber = %id, %peer, "Websocket connection established");

    let (mut sink, mut stream) = socket.split();

    let mut writer = tokio::spawn(async move {
        while let Some(payload) = rx.recv().await {
            let frame = Message::Text(payload.to_string());
            match tokio::time::timeout(write_timeout, sink.send(frame)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    debug!(subscriber = %id, error = %e, "Websocket write failed");
                    return;
                }
                Err(_) => {
                    debug!(subscriber = %id, ?write_timeout, "Websocket write timed out");
                    return;
                }
            }
        }
        let _ = sink.send(Message::Close(None)).await;
    });

    loop {
        tokio::select! {
            biased;
            _ = closed.notified() => {
                debug!(subscriber = %id, "Subscriber closed by broadcaster");
                break;
            }
            _ = &mut writer => break,
            frame = stream.next() => match frame {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(subscriber = %id, error = %e, "Websocket read error");
                    break;
                }
            },
        }
    }

    registry.deregister(id);
    writer.abort();
    info!(subscriber = %id, %peer, "Closing websocket connection");
}
