//! # AppWatch - Consul change notifier
//!
//! Watches the per-host topology key in Consul with blocking queries and
//! tells the application manager whenever the key's index advances.
//!
//! ## Architecture
//! ```text
//! Supervisor → WatchLoop(topology) → Consul KV (blocking query)
//!                   ↓ change
//!             TokenBroker → HttpDispatcher → Application manager
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod config;
mod http;
mod notify;
mod routes;
mod status;
mod store;
mod supervisor;
mod watch;

#[cfg(test)]
mod test_support;

use crate::config::AppConfig;
use http::{HttpDispatcher, TokenBroker};
use notify::AppMgrNotifier;
use status::StatusBoard;
use store::ConsulClient;
use supervisor::{Supervisor, SupervisorExit};

/// AppWatch - Consul change notifier for the application manager
#[derive(Parser, Debug)]
#[command(name = "appwatch")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "config/appwatch.toml")]
    config: String,

    /// Consul HTTP address (overrides config)
    #[arg(long, env = "CONSUL_HTTP_ADDR")]
    consul_addr: Option<String>,

    /// Host identifier for the topology key (overrides config)
    #[arg(long, env = "APPWATCH_HOST_ID")]
    host_id: Option<String>,

    /// Status endpoint listen address (overrides config)
    #[arg(long, env = "APPWATCH_STATUS_ADDR")]
    status_addr: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "LOG_LEVEL")]
    log_level: String,

    /// Enable JSON logging output
    #[arg(long, default_value = "false")]
    json_logs: bool,

    /// Log to stdout instead of daily-rotated files next to the executable
    #[arg(long, env = "LOG_NO_FILE")]
    log_no_file: bool,

    /// Number of log files to keep; files rotate daily, not by size
    #[arg(long, default_value_t = appwatch_common::constants::DEFAULT_LOG_FILES, env = "LOG_FILES")]
    log_files: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // Parse CLI arguments
    let args = Args::parse();

    // Initialize logging; the guard flushes buffered lines on exit
    let _log_guard = init_logging(&args)?;

    info!("🔭 Starting AppWatch v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = AppConfig::load(&args.config, &args)?;
    config.validate()?;
    info!("📋 Configuration loaded from {}", args.config);

    let host_id = config.resolve_host_id()?;
    let targets = config.targets(&host_id);
    info!(host_id = %host_id, key = %targets[0].key, "Resolved watch key");

    // Coordination store client, shared by all watch tasks
    let store = ConsulClient::new(config.consul_config()).context("Failed to create Consul client")?;
    info!("✅ Consul client ready: {}", store.base_url());

    // Management API plumbing
    let dispatcher = HttpDispatcher::new(config.management.tls_policy())
        .context("Failed to create HTTP dispatcher")?;
    let broker = TokenBroker::new(
        dispatcher.clone(),
        config.management.auth_url(),
        config.management.token_timeout(),
    );
    let notifier = AppMgrNotifier::new(broker, dispatcher, config.management.notifier_config());

    // Create shutdown broadcast channel
    let (shutdown_tx, _) = broadcast::channel::<()>(4);

    let status = StatusBoard::new();
    if let Some(ref addr) = config.status.listen_addr {
        serve_status(addr, status.clone(), shutdown_tx.subscribe()).await?;
    }

    // Handle Ctrl+C
    let signal_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("🛑 Shutdown signal received");
                let _ = signal_tx.send(());
            }
            Err(e) => tracing::error!(error = %e, "Failed to install Ctrl+C handler"),
        }
    });

    let supervisor = Supervisor::new(
        targets,
        Arc::new(store),
        Arc::new(notifier),
        config.watch_settings(),
        status,
        shutdown_tx,
    )
    .with_policy(
        config.supervisor.policy,
        Duration::from_secs(config.supervisor.restart_delay_secs),
    );

    match supervisor.run().await {
        SupervisorExit::Shutdown => {
            info!("👋 AppWatch shutdown complete");
        }
        SupervisorExit::TaskCompleted(exit) => {
            tracing::warn!(topic = %exit.topic, "exiting");
            exit.result
                .with_context(|| format!("Watch task for {} failed", exit.topic))?;
        }
    }

    Ok(())
}

/// Bind the status endpoint and serve it until shutdown
async fn serve_status(
    addr: &str,
    board: StatusBoard,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind status endpoint on {addr}"))?;
    info!("🚀 Status endpoint listening on {}", addr);

    let app = routes::create_router(board);
    tokio::spawn(async move {
        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
            })
            .await;
        if let Err(e) = result {
            tracing::error!(error = %e, "Status server error");
        }
    });

    Ok(())
}

/// Initialize structured logging with tracing
fn init_logging(args: &Args) -> Result<WorkerGuard> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    let (writer, guard) = if args.log_no_file {
        tracing_appender::non_blocking(std::io::stdout())
    } else {
        tracing_appender::non_blocking(log_file_appender(args.log_files)?)
    };

    if args.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(writer))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_ansi(args.log_no_file)
                    .with_writer(writer),
            )
            .init();
    }

    Ok(guard)
}

/// Daily-rotated `<exe>.log` beside the executable
fn log_file_appender(max_files: usize) -> Result<RollingFileAppender> {
    let exe = std::env::current_exe().context("Failed to locate executable")?;
    let dir = exe
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let name = exe
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("appwatch");

    RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(format!("{name}.log"))
        .max_log_files(max_files)
        .build(dir)
        .context("Failed to create log file appender")
}
