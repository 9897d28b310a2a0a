//! Swarm topology discovery — periodically asks a manager host for its
//! node list and synthesizes/retires `swarm-proxy` host entries for
//! workers, so the fleet tracks Swarm membership without static config.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{info, warn};

use super::pool::{build_proxy_client, HostPool, HostSource};
use crate::model::HostMode;

pub struct SwarmDiscovery {
    pool: Arc<HostPool>,
}

impl SwarmDiscovery {
    pub fn new(pool: Arc<HostPool>) -> Self {
        Self { pool }
    }

    /// Runs one discovery pass against every manager host configured with
    /// `auto_discover_nodes`. Adds `swarm-proxy` entries for nodes seen for
    /// the first time; removes previously-discovered entries whose node
    /// has disappeared from the manager's node list.
    pub async fn refresh(&self) {
        let managers: Vec<_> = self
            .pool
            .list()
            .into_iter()
            .filter(|e| e.is_manager)
            .collect();

        for manager in managers {
            let local_node = match manager.client.local_node_id().await {
                Ok(id) => id,
                Err(e) => {
                    warn!(host = %manager.name, error = %e, "could not resolve local node id during discovery");
                    continue;
                }
            };

            let nodes = match manager.client.swarm_nodes().await {
                Ok(nodes) => nodes,
                Err(e) => {
                    warn!(host = %manager.name, error = %e, "swarm node discovery failed");
                    continue;
                }
            };

            let live_node_ids: HashSet<String> = nodes.iter().map(|n| n.id.clone()).collect();

            for node in &nodes {
                if Some(&node.id) == local_node.as_ref() {
                    // The manager already enumerates its own containers directly.
                    continue;
                }
                if self.pool.get(&node.hostname).is_some() {
                    continue;
                }
                let client = build_proxy_client(&node.id, &node.hostname, manager.client.clone());
                self.pool.insert(
                    node.hostname.clone(),
                    HostMode::SwarmProxy,
                    false,
                    true,
                    HostSource::Discovered,
                    client,
                );
                info!(host = %node.hostname, node_id = %node.id, "discovered swarm node");
            }

            for discovered_name in self.pool.discovered_names() {
                let Some(entry) = self.pool.get(&discovered_name) else { continue };
                let still_present = entry
                    .client
                    .local_node_id()
                    .await
                    .ok()
                    .flatten()
                    .map(|id| live_node_ids.contains(&id))
                    .unwrap_or(false);
                if !still_present {
                    self.pool.remove(&discovered_name);
                    info!(host = %discovered_name, "swarm node disappeared, retired proxy host");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_starts_empty() {
        let pool = Arc::new(HostPool::new());
        assert_eq!(pool.count(), 0);
    }
}
