//! Consolidated container inventory with a short TTL cache. Callers
//! (dashboard queries, the metrics loop) ask for "all containers right
//! now" far more often than the fleet's actual container set changes.

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::warn;

use crate::host::HostPool;
use crate::model::Container;

struct Cached {
    containers: Vec<Container>,
    fetched_at: Instant,
}

pub struct InventoryCache {
    pool: std::sync::Arc<HostPool>,
    ttl: Duration,
    cached: Mutex<Option<Cached>>,
}

impl InventoryCache {
    pub fn new(pool: std::sync::Arc<HostPool>, ttl: Duration) -> Self {
        Self { pool, ttl, cached: Mutex::new(None) }
    }

    /// Returns the cached inventory if still fresh, otherwise refetches
    /// from every host in the pool concurrently. A failure on one host
    /// is logged and excluded; it never fails the whole refresh.
    pub async fn list(&self) -> Vec<Container> {
        if let Some(cached) = self.cached.lock().as_ref() {
            if cached.fetched_at.elapsed() < self.ttl {
                return cached.containers.clone();
            }
        }
        let containers = self.refresh().await;
        *self.cached.lock() = Some(Cached { containers: containers.clone(), fetched_at: Instant::now() });
        containers
    }

    pub async fn refresh(&self) -> Vec<Container> {
        let entries = self.pool.list();
        let fetches = entries.into_iter().map(|entry| async move {
            match entry.client.list_containers().await {
                Ok(containers) => containers,
                Err(e) => {
                    warn!(host = %entry.name, error = %e, "container inventory fetch failed");
                    Vec::new()
                }
            }
        });
        futures::future::join_all(fetches).await.into_iter().flatten().collect()
    }

    pub fn invalidate(&self) {
        *self.cached.lock() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_pool_returns_empty_inventory() {
        let pool = std::sync::Arc::new(HostPool::new());
        let cache = InventoryCache::new(pool, Duration::from_secs(30));
        assert!(cache.list().await.is_empty());
    }
}
