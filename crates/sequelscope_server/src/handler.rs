//! HTTP handlers and routing.

use crate::config::ServerConfig;
use crate::ws::serve_subscriber;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{ConnectInfo, Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use sequelscope_core::{CaptureHealth, ChangeEvent, Notification, WatchContext};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::debug;

/// State shared by all handlers.
#[derive(Clone)]
pub struct AppState {
    context: Arc<WatchContext>,
    config: Arc<ServerConfig>,
}

impl AppState {
    /// Creates handler state.
    pub fn new(context: Arc<WatchContext>, config: ServerConfig) -> Self {
        Self {
            context,
            config: Arc::new(config),
        }
    }

    /// Returns the watcher context.
    pub fn context(&self) -> &Arc<WatchContext> {
        &self.context
    }
}

/// Builds the router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_upgrade))
        .route("/health", get(health))
        .route("/activity/:table", get(table_activity))
        .with_state(state)
}

async fn ws_upgrade(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
) -> Response {
    debug!(%peer, "Websocket connection attempt");
    let context = Arc::clone(&state.context);
    let write_timeout = state.config.write_timeout;
    ws.on_upgrade(move |socket| serve_subscriber(socket, context, write_timeout, peer))
}

async fn health(State(state): State<AppState>) -> (StatusCode, Json<CaptureHealth>) {
    let health = state.context.health().current();
    let status = if health.is_ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(health))
}

/// One entry of a table's recent activity.
#[derive(Debug, Serialize)]
struct ActivityEntry<'a> {
    #[serde(flatten)]
    notification: Notification<'a>,
    timestamp: DateTime<Utc>,
}

impl<'a> From<&'a ChangeEvent> for ActivityEntry<'a> {
    fn from(event: &'a ChangeEvent) -> Self {
        Self {
            notification: event.notification(),
            timestamp: event.timestamp(),
        }
    }
}

async fn table_activity(State(state): State<AppState>, Path(table): Path<String>) -> Response {
    let events = state
        .context
        .activity()
        .for_table(&table, state.config.activity_limit);
    let entries: Vec<ActivityEntry<'_>> = events.iter().map(ActivityEntry::from).collect();
    Json(entries).into_response()
}
