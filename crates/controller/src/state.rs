use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::info;

use crate::collector::{InventoryCache, LogCollector, LogCursor, MetricsCollector};
use crate::config::ControllerConfig;
use crate::host::{HostPool, TopologyRefresher};
use crate::index::IndexClient;
use crate::queue::ActionQueue;

/// Shared application state handed to every axum route and background
/// loop. Process-local — nothing here survives a restart except what's
/// already durable in the indexing store.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ControllerConfig>,
    pub hosts: Arc<HostPool>,
    pub actions: Arc<ActionQueue>,
    pub index: Arc<IndexClient>,
    pub inventory: Arc<InventoryCache>,
    /// Unlike broadcast, watch never loses the signal — receivers always
    /// see the latest value, even if they subscribe after the send.
    pub shutdown_tx: tokio::sync::watch::Sender<bool>,
}

impl AppState {
    pub fn new(config: ControllerConfig) -> anyhow::Result<Self> {
        let (shutdown_tx, _) = tokio::sync::watch::channel(false);

        let hosts = Arc::new(HostPool::new());
        hosts.initialize(&config.hosts).context("initializing host pool")?;

        let index = Arc::new(IndexClient::new(&config.indexing));
        let inventory = Arc::new(InventoryCache::new(hosts.clone(), Duration::from_secs(config.collector.inventory_ttl_secs)));
        let actions = Arc::new(ActionQueue::new(Duration::from_secs(config.actions.action_timeout_secs)));

        Ok(Self {
            config: Arc::new(config),
            hosts,
            actions,
            index,
            inventory,
            shutdown_tx,
        })
    }

    /// Connects to the indexing store (bounded retry — a fatal startup
    /// error past that point), creates indices, and spawns every
    /// background loop: topology refresh, log/metrics collection, and
    /// the hourly retention sweep.
    pub async fn initialize(&self) -> anyhow::Result<()> {
        info!("connecting to indexing store");
        self.index
            .wait_until_ready(30, Duration::from_secs(2))
            .await
            .context("indexing store unreachable after startup retries")?;
        self.index.initialize().await.context("creating indexing store indices")?;

        let refresher = TopologyRefresher::new(
            self.hosts.clone(),
            Duration::from_secs(self.config.collector.host_health_check_interval_secs),
            Duration::from_secs(self.config.collector.swarm_discovery_interval_secs),
            self.shutdown_tx.subscribe(),
        );
        tokio::spawn(refresher.run());

        let cursor = Arc::new(LogCursor::new());
        let log_collector = Arc::new(LogCollector::new(
            self.hosts.clone(),
            self.inventory.clone(),
            self.index.clone(),
            cursor,
            self.config.collector.log_tail_default,
        ));
        tokio::spawn(log_collector.run(Duration::from_secs(self.config.collector.log_loop_period_secs), self.shutdown_tx.subscribe()));

        let metrics_collector = Arc::new(MetricsCollector::new(self.hosts.clone(), self.inventory.clone(), self.index.clone()));
        tokio::spawn(metrics_collector.run(Duration::from_secs(self.config.collector.metrics_loop_period_secs), self.shutdown_tx.subscribe()));

        tokio::spawn(crate::collector::retention::run(
            self.index.clone(),
            self.config.indexing.retention_days,
            Duration::from_secs(self.config.collector.retention_sweep_period_secs),
            self.shutdown_tx.subscribe(),
        ));

        info!("application state initialized");
        Ok(())
    }

    /// Signal shutdown to all background loops.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}
