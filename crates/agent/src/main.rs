use clap::Parser;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use agent::config::{AgentConfig, LogFormat};
use agent::poll::{run_heartbeat_loop, run_poll_loop};
use agent::state::AgentState;

#[derive(Parser, Debug)]
#[command(name = "agent", about = "Pull-mode fleet agent")]
struct Cli {
    /// Explicit config file path (overrides the default search locations).
    #[arg(long)]
    config: Option<String>,

    /// Override the configured log level.
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = AgentConfig::load(cli.config.as_deref())?;
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    init_logging(&config);

    info!(agent_id = %config.agent_id, controller_url = %config.controller_url, "starting agent");

    let state = AgentState::new(config)?;

    let heartbeat = tokio::spawn(run_heartbeat_loop(state.clone()));
    let poll = tokio::spawn(run_poll_loop(state.clone()));

    tokio::select! {
        _ = shutdown_signal() => {
            info!("shutdown signal received");
        }
        res = heartbeat => {
            if let Err(e) = res {
                tracing::error!(error = %e, "heartbeat loop panicked");
            }
        }
        res = poll => {
            if let Err(e) = res {
                tracing::error!(error = %e, "poll loop panicked");
            }
        }
    }

    Ok(())
}

fn init_logging(config: &AgentConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("agent={}", config.logging.level).into());

    let registry = tracing_subscriber::registry().with(filter);
    match config.logging.format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
