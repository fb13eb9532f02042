//! Listener setup and serving.

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::handler::{router, AppState};
use sequelscope_core::WatchContext;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

/// The live-update server.
///
/// Serves the websocket endpoint and the health and activity views over a
/// shared [`WatchContext`]. The capture loop runs elsewhere and reaches the
/// server only through that context.
///
/// # Example
///
/// ```no_run
/// use sequelscope_core::WatchContext;
/// use sequelscope_server::{ServerConfig, WatchServer};
/// use std::sync::Arc;
///
/// # async fn run() -> sequelscope_server::ServerResult<()> {
/// let server = WatchServer::new(ServerConfig::default(), Arc::new(WatchContext::new()));
/// server.serve(async { let _ = tokio::signal::ctrl_c().await; }).await
/// # }
/// ```
pub struct WatchServer {
    config: ServerConfig,
    context: Arc<WatchContext>,
}

impl WatchServer {
    /// Creates a server over `context`.
    pub fn new(config: ServerConfig, context: Arc<WatchContext>) -> Self {
        Self { config, context }
    }

    /// Returns the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Returns the watcher context.
    pub fn context(&self) -> &Arc<WatchContext> {
        &self.context
    }

    /// Binds the configured address.
    pub async fn bind(&self) -> ServerResult<TcpListener> {
        let addr = self.config.bind_addr;
        TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })
    }

    /// Binds the configured address and serves until `shutdown` resolves.
    pub async fn serve<F>(self, shutdown: F) -> ServerResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = self.bind().await?;
        self.serve_on(listener, shutdown).await
    }

    /// Serves on an already bound listener until `shutdown` resolves.
    pub async fn serve_on<F>(self, listener: TcpListener, shutdown: F) -> ServerResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = listener.local_addr()?;
        info!("Starting server on http://{}", addr);

        let app = router(AppState::new(self.context, self.config));
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown)
        .await?;

        info!("Server stopped");
        Ok(())
    }
}
