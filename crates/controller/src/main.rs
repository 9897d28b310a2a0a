mod api;
mod collector;
mod config;
mod error;
mod host;
mod index;
mod logframe;
mod model;
mod queue;
mod scanner;
mod state;

use std::net::SocketAddr;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use crate::config::{ControllerConfig, LogFormat, LogOutput};
use crate::state::AppState;

#[derive(Parser)]
#[command(name = "controller", version, about = "Fleet Docker observability and control plane")]
struct Cli {
    /// Path to a TOML config file, overriding the default search path.
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the controller HTTP server and background collectors (default).
    Serve,
    /// Run a single retention sweep against the indexing store and exit.
    SweepNow,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Phase 1: a thread-local subscriber so config loading itself can log,
    // before we know the configured level/format.
    let _basic_tracing = init_tracing_basic();

    info!("starting fleetwatch controller v{}", env!("CARGO_PKG_VERSION"));

    let config = ControllerConfig::load(cli.config.as_deref()).context("failed to load configuration")?;

    // Phase 2: drop the thread-local guard to free the global subscriber
    // slot, then install the configured one.
    drop(_basic_tracing);
    init_tracing_from_config(&config);

    info!("configuration loaded");

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::SweepNow => sweep_now(config).await,
    }
}

async fn serve(config: ControllerConfig) -> Result<()> {
    info!(bind_address = %config.server.bind_address, "server will bind");

    let state = AppState::new(config).context("failed to construct application state")?;
    state.initialize().await.context("failed to initialize application state")?;

    let app = api::build_router(state.clone());

    let addr: SocketAddr = state.config.server.bind_address.parse().context("invalid bind address")?;
    let listener = tokio::net::TcpListener::bind(&addr).await.context("failed to bind to address")?;

    info!(address = %addr, "controller is ready");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    state.shutdown();
    info!("shut down gracefully");
    Ok(())
}

async fn sweep_now(config: ControllerConfig) -> Result<()> {
    let index = index::IndexClient::new(&config.indexing);
    index.wait_until_ready(5, std::time::Duration::from_secs(2)).await.context("indexing store unreachable")?;
    collector::retention::run_once(&index, config.indexing.retention_days).await;
    Ok(())
}

fn init_tracing_basic() -> tracing::subscriber::DefaultGuard {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,controller=debug"));

    let subscriber = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .finish();

    tracing::subscriber::set_default(subscriber)
}

/// Phase 2: replaces the global subscriber with one that honors
/// `logging.format`/`logging.output` from the loaded configuration.
fn init_tracing_from_config(config: &ControllerConfig) {
    use std::sync::Arc;
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match (&config.logging.format, &config.logging.output) {
        (LogFormat::Json, LogOutput::Stdout) => {
            let layer = fmt::layer().json().with_target(true).with_thread_ids(true);
            tracing_subscriber::registry().with(filter).with(layer).init();
        }
        (LogFormat::Json, LogOutput::File { path }) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .unwrap_or_else(|e| panic!("failed to open log file '{path}': {e}"));
            let layer = fmt::layer().json().with_target(true).with_thread_ids(true).with_ansi(false).with_writer(Arc::new(file));
            tracing_subscriber::registry().with(filter).with(layer).init();
        }
        (LogFormat::Pretty, LogOutput::Stdout) => {
            let layer = fmt::layer().with_target(true).with_thread_ids(false).with_file(false).with_line_number(false);
            tracing_subscriber::registry().with(filter).with(layer).init();
        }
        (LogFormat::Pretty, LogOutput::File { path }) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .unwrap_or_else(|e| panic!("failed to open log file '{path}': {e}"));
            let layer = fmt::layer().with_target(true).with_ansi(false).with_writer(Arc::new(file));
            tracing_subscriber::registry().with(filter).with(layer).init();
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => warn!("received Ctrl+C, initiating graceful shutdown"),
        _ = terminate => warn!("received SIGTERM, initiating graceful shutdown"),
    }
}
