//! Core data model shared across the host client, collector, indexing
//! store, and query API.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostMode {
    Api,
    Ssh,
    Local,
    SwarmProxy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostDescriptor {
    pub name: String,
    pub mode: HostMode,
    pub endpoint: String,
    pub is_manager: bool,
    pub route_through_this_manager: bool,
    pub auto_discover_nodes: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerStatus {
    Running,
    Paused,
    Exited,
    Restarting,
    Dead,
    Created,
    Removing,
}

impl ContainerStatus {
    pub fn from_docker_state(s: &str) -> Self {
        match s {
            "running" => ContainerStatus::Running,
            "paused" => ContainerStatus::Paused,
            "restarting" => ContainerStatus::Restarting,
            "dead" => ContainerStatus::Dead,
            "created" => ContainerStatus::Created,
            "removing" => ContainerStatus::Removing,
            _ => ContainerStatus::Exited,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Container {
    pub id: String,
    pub name: String,
    pub image: String,
    pub status: ContainerStatus,
    pub created_at: DateTime<Utc>,
    pub host: String,
    pub stack_project: Option<String>,
    pub stack_service: Option<String>,
    pub ports: Vec<PortMapping>,
    pub labels: HashMap<String, String>,
    /// Swarm task id, when this container was synthesized from a task.
    pub task_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortMapping {
    pub private_port: u16,
    pub public_port: Option<u16>,
    pub protocol: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerStats {
    pub host: String,
    pub container_id: String,
    pub container_name: String,
    pub timestamp: DateTime<Utc>,
    pub cpu_percent: f64,
    pub memory_usage_mb: f64,
    pub memory_limit_mb: f64,
    pub memory_percent: f64,
    pub network_rx_bytes: u64,
    pub network_tx_bytes: u64,
    pub block_read_bytes: u64,
    pub block_write_bytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GpuSample {
    pub utilization_percent: f64,
    pub vram_used_mb: f64,
    pub vram_total_mb: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostMetrics {
    pub host: String,
    pub timestamp: DateTime<Utc>,
    pub cpu_percent: f64,
    pub memory_total_mb: f64,
    pub memory_used_mb: f64,
    pub memory_percent: f64,
    pub disk_total_mb: f64,
    pub disk_used_mb: f64,
    pub disk_percent: f64,
    pub gpu: Option<GpuSample>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStream {
    Stdout,
    Stderr,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub host: String,
    pub container_id: String,
    pub container_name: String,
    pub stack_project: Option<String>,
    pub stack_service: Option<String>,
    pub stream: LogStream,
    pub message: String,
    pub level: Option<String>,
    pub http_status: Option<u16>,
    pub parsed_fields: Option<serde_json::Map<String, serde_json::Value>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerActionKind {
    Start,
    Stop,
    Restart,
    Pause,
    Unpause,
    Remove,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwarmNode {
    pub id: String,
    pub hostname: String,
    pub role: String, // "manager" | "worker"
    pub availability: String,
    pub state: String,
    pub addr: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwarmService {
    pub id: String,
    pub name: String,
    pub image: String,
    pub stack: Option<String>,
    pub replicas: Option<u64>,
    /// `ContainerSpec.Env`, `KEY=VALUE` entries — the fallback source for
    /// `GetContainerEnv` when a task's container isn't directly reachable.
    pub env: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwarmTask {
    pub id: String,
    pub service_id: String,
    pub node_id: String,
    pub container_id: Option<String>,
    pub slot: Option<u64>,
    pub desired_state: String,
    pub state: String,
}
