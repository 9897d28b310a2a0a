//! Metrics loop: host metrics, then per-running-container stats,
//! skipping container stats on hosts the manager can't reach directly.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use super::inventory::InventoryCache;
use crate::host::HostPool;
use crate::index::IndexClient;
use crate::model::{ContainerStatus, HostMode};

pub struct MetricsCollector {
    pool: Arc<HostPool>,
    inventory: Arc<InventoryCache>,
    index: Arc<IndexClient>,
}

impl MetricsCollector {
    pub fn new(pool: Arc<HostPool>, inventory: Arc<InventoryCache>, index: Arc<IndexClient>) -> Self {
        Self { pool, inventory, index }
    }

    pub async fn run_cycle(&self) {
        let entries = self.pool.list();
        let containers = self.inventory.list().await;

        let tasks = entries.into_iter().map(|entry| {
            let containers = &containers;
            async move {
                match entry.client.host_metrics().await {
                    Ok(metrics) => {
                        if let Err(e) = self.index.index_host_metrics(&metrics).await {
                            warn!(host = %entry.name, error = %e, "host metrics indexing failed");
                        }
                    }
                    Err(e) => warn!(host = %entry.name, error = %e, "host metrics fetch failed"),
                }

                if entry.mode == HostMode::SwarmProxy {
                    return;
                }

                for container in containers.iter().filter(|c| c.host == entry.name && c.status == ContainerStatus::Running) {
                    match entry.client.container_stats(&container.id, &container.name).await {
                        Ok(stats) => {
                            if let Err(e) = self.index.index_container_stats(&stats).await {
                                warn!(host = %entry.name, container = %container.name, error = %e, "container stats indexing failed");
                            }
                        }
                        Err(e) => debug!(host = %entry.name, container = %container.name, error = %e, "container stats unavailable"),
                    }
                }
            }
        });

        futures::future::join_all(tasks).await;
    }

    pub async fn run(self: Arc<Self>, period: Duration, mut shutdown_rx: tokio::sync::watch::Receiver<bool>) {
        let mut tick = tokio::time::interval(period);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = tick.tick() => self.run_cycle().await,
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }
    }
}
