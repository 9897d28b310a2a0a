//! Retention sweep: deletes documents older than the configured
//! retention window from every index. Runs on an hourly loop, and is
//! also exposed as a one-shot operation for the `sweep-now` CLI command.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};

use crate::index::IndexClient;

pub async fn run_once(index: &IndexClient, retention_days: u32) {
    info!(retention_days, "running retention sweep");
    if let Err(e) = index.retention_sweep(retention_days).await {
        error!(error = %e, "retention sweep failed");
    }
}

pub async fn run(index: Arc<IndexClient>, retention_days: u32, period: Duration, mut shutdown_rx: tokio::sync::watch::Receiver<bool>) {
    let mut tick = tokio::time::interval(period);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = tick.tick() => run_once(&index, retention_days).await,
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    break;
                }
            }
        }
    }
}
