//! Periodic background loops over the `HostPool`: health checks and
//! Swarm topology refresh. Keeps the teacher's interval + shutdown-watch
//! loop shape, retargeted at the new responsibilities.

use std::sync::Arc;
use std::time::Duration;

use tokio::time;
use tracing::{debug, info};

use super::discovery::SwarmDiscovery;
use super::pool::HostPool;

pub struct TopologyRefresher {
    pool: Arc<HostPool>,
    health_check_interval: Duration,
    discovery_interval: Duration,
    shutdown_rx: tokio::sync::watch::Receiver<bool>,
}

impl TopologyRefresher {
    pub fn new(
        pool: Arc<HostPool>,
        health_check_interval: Duration,
        discovery_interval: Duration,
        shutdown_rx: tokio::sync::watch::Receiver<bool>,
    ) -> Self {
        Self { pool, health_check_interval, discovery_interval, shutdown_rx }
    }

    pub async fn run(mut self) {
        info!(
            health_check_interval_secs = self.health_check_interval.as_secs(),
            discovery_interval_secs = self.discovery_interval.as_secs(),
            "starting host topology refresher"
        );

        let discovery = SwarmDiscovery::new(self.pool.clone());
        let mut health_tick = time::interval(self.health_check_interval);
        health_tick.set_missed_tick_behavior(time::MissedTickBehavior::Skip);
        let mut discovery_tick = time::interval(self.discovery_interval);
        discovery_tick.set_missed_tick_behavior(time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = health_tick.tick() => {
                    debug!("running scheduled host health check");
                    self.pool.health_check_all().await;
                }
                _ = discovery_tick.tick() => {
                    debug!("running scheduled swarm topology refresh");
                    discovery.refresh().await;
                }
                _ = self.shutdown_rx.changed() => {
                    if *self.shutdown_rx.borrow() {
                        info!("shutdown signal received, stopping host topology refresher");
                        break;
                    }
                }
            }
        }
    }

    pub async fn health_check_now(&self) {
        self.pool.health_check_all().await;
    }
}
