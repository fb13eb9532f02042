//! SequelScope CLI
//!
//! Runs the live-update server for the SequelScope MySQL dashboard.
//!
//! # Commands
//!
//! - `serve` - Capture changes and push them to websocket subscribers
//! - `position` - Print the position capture would start from
//! - `version` - Show version information

use clap::{Args, Parser, Subcommand};
use sequelscope_capture::{
    build_strategy, connection_url, resolve_start, CaptureConfig, CaptureMode, CaptureRunner,
    RetryConfig, DEFAULT_AUDIT_TABLE, DEFAULT_SERVER_ID,
};
use sequelscope_core::{RecentActivityBuffer, WatchContext, DEFAULT_ACTIVITY_CAPACITY};
use sequelscope_server::{ServerConfig, WatchServer};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// SequelScope live-update server.
#[derive(Parser)]
#[command(name = "sequelscope")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Capture changes and push them to websocket subscribers
    Serve {
        /// HTTP network address
        #[arg(long, default_value = "127.0.0.1:4001")]
        addr: SocketAddr,

        /// Seconds a websocket write may stall before the subscriber is dropped
        #[arg(long, default_value = "10")]
        write_timeout_secs: u64,

        /// Audit-log events kept for per-table activity
        #[arg(long, default_value_t = DEFAULT_ACTIVITY_CAPACITY)]
        activity_capacity: usize,

        #[command(flatten)]
        capture: CaptureArgs,
    },

    /// Print the position capture would start from
    Position {
        #[command(flatten)]
        capture: CaptureArgs,
    },

    /// Show version information
    Version,
}

#[derive(Args)]
struct CaptureArgs {
    /// Capture mode (streaming, polling)
    #[arg(long, default_value = "streaming")]
    mode: CaptureMode,

    /// MySQL data source for metadata and audit-log queries
    #[arg(long, env = "WEB_DSN", hide_env_values = true)]
    dsn: Option<String>,

    /// MySQL data source for the replication stream
    #[arg(long, env = "REPL_DSN", hide_env_values = true)]
    repl_dsn: Option<String>,

    /// Server id announced when registering as a replica
    #[arg(long, default_value_t = DEFAULT_SERVER_ID)]
    server_id: u32,

    /// Milliseconds between audit-log polls
    #[arg(long, default_value = "1000")]
    poll_interval_ms: u64,

    /// Maximum audit-log rows read per poll
    #[arg(long, default_value = "10")]
    poll_batch: usize,

    /// Audit table to poll
    #[arg(long, default_value = DEFAULT_AUDIT_TABLE)]
    audit_table: String,
}

impl CaptureArgs {
    fn into_config(self) -> Result<CaptureConfig, Box<dyn std::error::Error>> {
        let mut config = CaptureConfig::new(self.mode)
            .with_server_id(self.server_id)
            .with_poll_interval(Duration::from_millis(self.poll_interval_ms))
            .with_poll_batch(self.poll_batch)
            .with_audit_table(self.audit_table)
            .with_retry(RetryConfig::default());
        if let Some(dsn) = self.dsn {
            config = config.with_metadata_url(connection_url(&dsn)?);
        }
        if let Some(dsn) = self.repl_dsn {
            config = config.with_replication_url(connection_url(&dsn)?);
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Serve {
            addr,
            write_timeout_secs,
            activity_capacity,
            capture,
        } => {
            let config = ServerConfig::new(addr)
                .with_write_timeout(Duration::from_secs(write_timeout_secs));
            serve(config, activity_capacity, capture.into_config()?).await?;
        }
        Commands::Position { capture } => {
            let cursor = resolve_start(&capture.into_config()?).await?;
            println!("{cursor}");
        }
        Commands::Version => {
            println!("SequelScope v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}

async fn serve(
    config: ServerConfig,
    activity_capacity: usize,
    capture: CaptureConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    let context = Arc::new(WatchContext::with_activity(
        RecentActivityBuffer::with_capacity(activity_capacity),
    ));

    // Capture failing to start leaves the server up without live updates.
    let (stop_capture, shutdown) = watch::channel(false);
    let runner = match build_strategy(&capture).await {
        Ok(strategy) => {
            Some(CaptureRunner::spawn(strategy, &context, capture.retry.clone(), shutdown)?)
        }
        Err(e) => {
            error!(error = %e, mode = %capture.mode, "Capture disabled");
            context.health().disable(e.to_string());
            None
        }
    };

    let server = WatchServer::new(config, Arc::clone(&context));
    let served = server.serve(shutdown_signal()).await;

    let _ = stop_capture.send(true);
    if let Some(runner) = runner {
        match runner.await {
            Ok(stats) => info!(
                events = stats.events_published,
                failures = stats.failures,
                evicted = stats.subscribers_evicted,
                "Capture finished"
            ),
            Err(e) => warn!(error = %e, "Capture task failed"),
        }
    }

    served?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("Shutting down gracefully...");
}
