//! Log collection loop: per host, per running container, incremental
//! cursor-based tailing into the indexing store.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, warn};

use super::inventory::InventoryCache;
use crate::host::HostPool;
use crate::index::IndexClient;
use crate::model::ContainerStatus;

/// `(host, container_id) -> last_seen_ts`. Shared across cycles so the
/// +1ms advance rule actually prevents re-ingestion of the newest line.
pub struct LogCursor {
    cursors: Mutex<HashMap<(String, String), DateTime<Utc>>>,
}

impl LogCursor {
    pub fn new() -> Self {
        Self { cursors: Mutex::new(HashMap::new()) }
    }

    fn get(&self, host: &str, container_id: &str) -> Option<DateTime<Utc>> {
        self.cursors.lock().get(&(host.to_string(), container_id.to_string())).copied()
    }

    fn advance(&self, host: &str, container_id: &str, max_ts: DateTime<Utc>) {
        let next = max_ts + chrono::Duration::milliseconds(1);
        self.cursors.lock().insert((host.to_string(), container_id.to_string()), next);
    }
}

impl Default for LogCursor {
    fn default() -> Self {
        Self::new()
    }
}

pub struct LogCollector {
    pool: Arc<HostPool>,
    inventory: Arc<InventoryCache>,
    index: Arc<IndexClient>,
    cursor: Arc<LogCursor>,
    tail_default: u32,
}

impl LogCollector {
    pub fn new(pool: Arc<HostPool>, inventory: Arc<InventoryCache>, index: Arc<IndexClient>, cursor: Arc<LogCursor>, tail_default: u32) -> Self {
        Self { pool, inventory, index, cursor, tail_default }
    }

    /// Runs one collection cycle across every host concurrently. A
    /// failure on one host is logged and does not interrupt the others.
    pub async fn run_cycle(&self) {
        let containers = self.inventory.list().await;
        let running: Vec<_> = containers.into_iter().filter(|c| c.status == ContainerStatus::Running).collect();

        let fetches = running.into_iter().map(|container| async move {
            let Some(entry) = self.pool.get(&container.host) else { return };
            let since = self.cursor.get(&container.host, &container.id);
            let tail = if since.is_none() { Some(self.tail_default) } else { None };

            let logs = match entry.client.container_logs(&container.id, &container.name, since, tail, container.task_id.as_deref()).await {
                Ok(logs) => logs,
                Err(e) => {
                    warn!(host = %container.host, container = %container.name, error = %e, "log fetch failed");
                    return;
                }
            };
            if logs.is_empty() {
                return;
            }

            let max_ts = logs.iter().map(|l| l.timestamp).max().unwrap();
            if let Err(e) = self.index.index_logs(&logs).await {
                warn!(host = %container.host, container = %container.name, error = %e, "log indexing failed");
                return;
            }
            self.cursor.advance(&container.host, &container.id, max_ts);
            debug!(host = %container.host, container = %container.name, count = logs.len(), "indexed logs");
        });

        futures::future::join_all(fetches).await;
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
