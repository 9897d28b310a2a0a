pub mod client;
pub mod discovery;
pub mod pool;
pub mod registry;

pub use client::{ActionOutcome, DirectApiClient, HostClient, SshClient, SwarmProxyClient};
pub use discovery::SwarmDiscovery;
pub use pool::{HealthStatus, HostEntry, HostPool};
pub use registry::TopologyRefresher;
