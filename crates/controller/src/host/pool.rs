//! `HostPool` — keyed registry of live `HostClient` trait objects.
//!
//! Keeps the teacher's DashMap-backed connection pool shape (health status
//! tracked per entry, reconnect-on-demand) but drops everything
//! TLS/channel-specific: a `HostClient` is constructed once per
//! `HostConfig`/discovered node and stored as a trait object.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::{info, warn};

use crate::config::HostConfig;
use crate::model::HostMode;

use super::client::{DirectApiClient, HostClient, SshClient, SwarmProxyClient};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Where a host's entry came from — a static config line, or discovered
/// off a Swarm manager's node list (and therefore removable when the node
/// disappears from a future refresh).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostSource {
    Static,
    Discovered,
}

pub struct HostEntry {
    pub name: String,
    pub mode: HostMode,
    pub is_manager: bool,
    pub route_through_this_manager: bool,
    pub source: HostSource,
    pub client: Arc<dyn HostClient>,
    health_status: parking_lot::Mutex<HealthStatus>,
    last_checked: parking_lot::Mutex<Instant>,
}

impl HostEntry {
    pub fn health_status(&self) -> HealthStatus {
        *self.health_status.lock()
    }

    fn mark(&self, status: HealthStatus) {
        *self.health_status.lock() = status;
        *self.last_checked.lock() = Instant::now();
    }
}

pub struct HostPool {
    entries: DashMap<String, Arc<HostEntry>>,
}

impl Default for HostPool {
    fn default() -> Self {
        Self::new()
    }
}

impl HostPool {
    pub fn new() -> Self {
        Self { entries: DashMap::new() }
    }

    /// Builds clients for every statically-configured host.
    pub fn initialize(&self, hosts: &[HostConfig]) -> anyhow::Result<()> {
        for host in hosts {
            if host.mode == HostMode::SwarmProxy {
                // Swarm-proxy hosts are populated by discovery, not config.
                continue;
            }
            let client = build_client(host)?;
            self.insert(host.name.clone(), host.mode, host.is_manager, host.route_through_this_manager, HostSource::Static, client);
        }
        Ok(())
    }

    pub fn insert(
        &self,
        name: String,
        mode: HostMode,
        is_manager: bool,
        route_through_this_manager: bool,
        source: HostSource,
        client: Arc<dyn HostClient>,
    ) {
        let entry = Arc::new(HostEntry {
            name: name.clone(),
            mode,
            is_manager,
            route_through_this_manager,
            source,
            client,
            health_status: parking_lot::Mutex::new(HealthStatus::Healthy),
            last_checked: parking_lot::Mutex::new(Instant::now()),
        });
        self.entries.insert(name, entry);
    }

    pub fn remove(&self, name: &str) -> Option<Arc<HostEntry>> {
        self.entries.remove(name).map(|(_, v)| v)
    }

    pub fn get(&self, name: &str) -> Option<Arc<HostEntry>> {
        self.entries.get(name).map(|e| e.clone())
    }

    pub fn manager(&self) -> Option<Arc<HostEntry>> {
        self.entries.iter().find(|e| e.is_manager).map(|e| e.clone())
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.key().clone()).collect()
    }

    pub fn list(&self) -> Vec<Arc<HostEntry>> {
        self.entries.iter().map(|e| e.clone()).collect()
    }

    pub fn discovered_names(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter(|e| e.source == HostSource::Discovered)
            .map(|e| e.key().clone())
            .collect()
    }

    pub fn count(&self) -> usize {
        self.entries.len()
    }

    pub fn healthy_count(&self) -> usize {
        self.entries.iter().filter(|e| e.health_status() == HealthStatus::Healthy).count()
    }

    /// Probes every entry by listing containers, with a short per-host
    /// deadline so one unreachable host can't stall the whole sweep.
    pub async fn health_check_all(&self) {
        let entries: Vec<_> = self.list();
        let checks = entries.into_iter().map(|entry| async move {
            let outcome = tokio::time::timeout(Duration::from_secs(5), entry.client.list_containers()).await;
            match outcome {
                Ok(Ok(_)) => entry.mark(HealthStatus::Healthy),
                Ok(Err(e)) => {
                    warn!(host = %entry.name, error = %e, "host health check failed");
                    entry.mark(HealthStatus::Degraded);
                }
                Err(_) => {
                    warn!(host = %entry.name, "host health check timed out");
                    entry.mark(HealthStatus::Unhealthy);
                }
            }
        });
        futures::future::join_all(checks).await;
    }
}

pub fn build_client(host: &HostConfig) -> anyhow::Result<Arc<dyn HostClient>> {
    let client: Arc<dyn HostClient> = match host.mode {
        HostMode::Api | HostMode::Local => {
            Arc::new(DirectApiClient::connect(&host.name, &host.endpoint, host.is_manager, host.auto_discover_nodes)?)
        }
        HostMode::Ssh => {
            let user = host
                .ssh_user
                .clone()
                .ok_or_else(|| anyhow::anyhow!("host '{}' is ssh mode but has no ssh_user", host.name))?;
            Arc::new(SshClient::new(&host.name, &user, &host.endpoint, host.ssh_key_path.clone()))
        }
        HostMode::SwarmProxy => {
            anyhow::bail!("swarm-proxy hosts are constructed via discovery, not build_client")
        }
    };
    info!(host = %host.name, mode = ?host.mode, "host client initialized");
    Ok(client)
}

pub fn build_proxy_client(node_id: &str, node_hostname: &str, manager: Arc<dyn HostClient>) -> Arc<dyn HostClient> {
    Arc::new(SwarmProxyClient {
        node_id: node_id.to_string(),
        node_hostname: node_hostname.to_string(),
        manager,
    })
}
