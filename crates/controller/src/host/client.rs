//! `HostClient` — the capability interface every reachability mode implements.
//!
//! Mirrors the pull-agent's own `DockerClient` domain methods (container
//! lifecycle, log streaming, swarm inspection) but speaks the controller's
//! shared [`crate::model`] types instead of raw bollard summaries, since the
//! controller must treat API, SSH, and Swarm-proxy hosts uniformly.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bollard::query_parameters::{
    ListContainersOptions, ListNodesOptions, ListServicesOptions, ListTasksOptions, LogsOptions,
    RemoveContainerOptions, RestartContainerOptions, StatsOptions, StopContainerOptions,
};
use bollard::Docker;
use chrono::Utc;
use futures::StreamExt;

use crate::error::HostClientError;
use crate::logframe::{self, RawLogFrame};
use crate::model::{
    Container, ContainerActionKind, ContainerStats, GpuSample, HostMetrics, LogEntry, LogStream,
    PortMapping, SwarmNode, SwarmService, SwarmTask,
};

/// One-shot execution result: success flag plus the daemon's message body.
pub struct ActionOutcome {
    pub ok: bool,
    pub message: String,
}

#[async_trait]
pub trait HostClient: Send + Sync {
    async fn list_containers(&self) -> Result<Vec<Container>, HostClientError>;
    async fn container_stats(&self, id: &str, name: &str) -> Result<ContainerStats, HostClientError>;
    async fn host_metrics(&self) -> Result<HostMetrics, HostClientError>;
    async fn container_logs(
        &self,
        id: &str,
        name: &str,
        since: Option<chrono::DateTime<Utc>>,
        tail: Option<u32>,
        task_id: Option<&str>,
    ) -> Result<Vec<LogEntry>, HostClientError>;
    async fn execute_action(
        &self,
        id: &str,
        kind: ContainerActionKind,
        timeout_secs: Option<u32>,
    ) -> Result<ActionOutcome, HostClientError>;
    async fn exec(&self, id: &str, argv: Vec<String>) -> Result<(bool, String), HostClientError>;
    async fn swarm_nodes(&self) -> Result<Vec<SwarmNode>, HostClientError>;
    async fn swarm_services(&self) -> Result<Vec<SwarmService>, HostClientError>;
    async fn swarm_tasks(&self) -> Result<Vec<SwarmTask>, HostClientError>;
    async fn local_node_id(&self) -> Result<Option<String>, HostClientError>;

    /// Tail logs for every task of a service, newest-task-first.
    async fn service_logs(&self, service_name: &str, tail: Option<u32>) -> Result<Vec<LogEntry>, HostClientError>;
    async fn remove_service(&self, service_name: &str) -> Result<(), HostClientError>;
    /// Bumps `TaskTemplate.ForceUpdate` without changing the image, forcing
    /// Swarm to redeploy every task.
    async fn force_update_service(&self, service_name: &str) -> Result<(), HostClientError>;
    /// Replaces only the tag of the service's current image, preserving
    /// registry/path and stripping any `@sha256:` digest, then bumps
    /// `ForceUpdate` so Swarm performs a rolling restart onto the new tag.
    async fn update_service_image(&self, service_name: &str, new_tag: &str) -> Result<(), HostClientError>;
    async fn remove_stack(&self, stack_name: &str) -> Result<(), HostClientError>;
    /// All services, grouped by their `com.docker.stack.namespace` label.
    async fn list_stacks_and_services(&self) -> Result<Vec<SwarmService>, HostClientError>;
}

/// Given a service's current image reference, returns the new reference
/// with the tag replaced and any digest pin dropped. `app:v1.1.0@sha256:ab..`
/// with `new_tag = "v1.2.3"` becomes `app:v1.2.3`.
pub fn replace_image_tag(current: &str, new_tag: &str) -> String {
    let without_digest = current.split('@').next().unwrap_or(current);
    // The tag separator is the last ':' after the last '/', so a port
    // number in a registry host (`registry:5000/app`) isn't mistaken for one.
    let slash_idx = without_digest.rfind('/').unwrap_or(0);
    match without_digest[slash_idx..].rfind(':') {
        Some(rel_idx) => format!("{}:{}", &without_digest[..slash_idx + rel_idx], new_tag),
        None => format!("{without_digest}:{new_tag}"),
    }
}

fn map_bollard_err(id: &str, e: bollard::errors::Error) -> HostClientError {
    match e {
        bollard::errors::Error::DockerResponseServerError { status_code: 404, .. } => {
            HostClientError::ContainerNotFound(id.to_string())
        }
        bollard::errors::Error::DockerResponseServerError { status_code: 503, .. } => {
            HostClientError::NotSwarmManager
        }
        bollard::errors::Error::DockerResponseServerError { status_code, message } => {
            HostClientError::DaemonRejected(format!("{status_code}: {message}"))
        }
        other => HostClientError::Unreachable(other.to_string()),
    }
}

fn cpu_percent(stats: &bollard::models::ContainerStatsResponse) -> f64 {
    let cpu = match &stats.cpu_stats {
        Some(c) => c,
        None => return 0.0,
    };
    let precpu = stats.precpu_stats.as_ref();
    let cpu_total = cpu.cpu_usage.as_ref().and_then(|u| u.total_usage).unwrap_or(0) as f64;
    let precpu_total = precpu
        .and_then(|p| p.cpu_usage.as_ref())
        .and_then(|u| u.total_usage)
        .unwrap_or(0) as f64;
    let system = cpu.system_cpu_usage.unwrap_or(0) as f64;
    let presystem = precpu.and_then(|p| p.system_cpu_usage).unwrap_or(0) as f64;
    let num_cpus = cpu
        .online_cpus
        .or_else(|| cpu.cpu_usage.as_ref().and_then(|u| u.percpu_usage.as_ref().map(|v| v.len() as u32)))
        .unwrap_or(1) as f64;

    let delta_total = cpu_total - precpu_total;
    let delta_system = system - presystem;

    if delta_system > 0.0 && delta_total >= 0.0 {
        (delta_total / delta_system) * num_cpus * 100.0
    } else if delta_total > 0.0 {
        // No system-time delta available: fall back to a nanosecond-based
        // estimate, capped so a sampling hiccup can't report >100% per core.
        (delta_total / 1_000_000_000.0).min(100.0 * num_cpus)
    } else {
        0.0
    }
}

fn memory_mb(stats: &bollard::models::ContainerStatsResponse) -> (f64, f64) {
    let mem = match &stats.memory_stats {
        Some(m) => m,
        None => return (0.0, 0.0),
    };
    let usage = mem.usage.unwrap_or(0) as f64 / (1024.0 * 1024.0);
    let limit_raw = mem.limit.unwrap_or(0) as f64;
    const ONE_PIB: f64 = 1024.0 * 1024.0 * 1024.0 * 1024.0 * 1024.0;
    let limit = if limit_raw > ONE_PIB {
        if usage > 0.0 {
            2.0 * usage
        } else {
            1024.0
        }
    } else {
        limit_raw / (1024.0 * 1024.0)
    };
    (usage, limit)
}

fn network_bytes(stats: &bollard::models::ContainerStatsResponse) -> (u64, u64) {
    let networks = match &stats.networks {
        Some(n) => n,
        None => return (0, 0),
    };
    networks.values().fold((0u64, 0u64), |(rx, tx), n| {
        (rx + n.rx_bytes.unwrap_or(0), tx + n.tx_bytes.unwrap_or(0))
    })
}

fn block_io_bytes(stats: &bollard::models::ContainerStatsResponse) -> (u64, u64) {
    let entries = stats
        .blkio_stats
        .as_ref()
        .and_then(|b| b.io_service_bytes_recursive.as_ref());
    let Some(entries) = entries else { return (0, 0) };
    entries.iter().fold((0u64, 0u64), |(read, write), e| {
        match e.op.as_deref() {
            Some("read") | Some("Read") => (read + e.value.unwrap_or(0), write),
            Some("write") | Some("Write") => (read, write + e.value.unwrap_or(0)),
            _ => (read, write),
        }
    })
}

/// Talks directly to a Docker daemon reachable over a unix socket or TCP.
pub struct DirectApiClient {
    docker: Docker,
    host_name: String,
    auto_discover_nodes: bool,
    is_manager: bool,
}

impl DirectApiClient {
    pub fn connect(host_name: &str, endpoint: &str, is_manager: bool, auto_discover_nodes: bool) -> Result<Self, HostClientError> {
        let docker = if endpoint.is_empty() || endpoint == "local" {
            Docker::connect_with_local_defaults()
        } else if endpoint.starts_with("tcp://") || endpoint.starts_with("http://") {
            Docker::connect_with_http(endpoint, 120, bollard::API_DEFAULT_VERSION)
        } else {
            let clean = endpoint.trim_start_matches("unix://");
            Docker::connect_with_socket(clean, 120, bollard::API_DEFAULT_VERSION)
        }
        .map_err(|e| HostClientError::ConnectionFailed(e.to_string()))?;

        Ok(Self {
            docker,
            host_name: host_name.to_string(),
            auto_discover_nodes,
            is_manager,
        })
    }
}

#[async_trait]
impl HostClient for DirectApiClient {
    async fn list_containers(&self) -> Result<Vec<Container>, HostClientError> {
        let options = Some(ListContainersOptions { all: true, ..Default::default() });
        let containers = self
            .docker
            .list_containers(options)
            .await
            .map_err(|e| map_bollard_err("", e))?;

        let local_node = if self.auto_discover_nodes && self.is_manager {
            self.local_node_id().await.ok().flatten()
        } else {
            None
        };

        let task_node_of_container: HashMap<String, String> = if local_node.is_some() {
            match self.swarm_tasks().await {
                Ok(tasks) => tasks
                    .into_iter()
                    .filter_map(|t| t.container_id.map(|cid| (cid, t.node_id)))
                    .collect(),
                Err(_) => HashMap::new(),
            }
        } else {
            HashMap::new()
        };

        let mut out = Vec::with_capacity(containers.len());
        for c in containers {
            let id = c.id.clone().unwrap_or_default();
            if let Some(local) = &local_node {
                if let Some(node) = task_node_of_container.get(&id) {
                    if node != local {
                        continue;
                    }
                }
            }

            let name = c
                .names
                .as_deref()
                .and_then(|n| n.first())
                .map(|n| n.trim_start_matches('/').to_string())
                .unwrap_or_else(|| id.chars().take(12).collect());

            let labels = c.labels.clone().unwrap_or_default();
            let (stack_project, stack_service) = stack_labels(&labels);

            let ports = c
                .ports
                .unwrap_or_default()
                .into_iter()
                .map(|p| PortMapping {
                    private_port: p.private_port,
                    public_port: p.public_port,
                    protocol: p.typ.map(|t| t.to_string().to_lowercase()).unwrap_or_else(|| "tcp".to_string()),
                })
                .collect();

            let created_at = c
                .created
                .and_then(|ts| chrono::DateTime::from_timestamp(ts, 0))
                .unwrap_or_else(Utc::now);

            out.push(Container {
                id: id.chars().take(12).collect(),
                name,
                image: c.image.unwrap_or_default(),
                status: crate::model::ContainerStatus::from_docker_state(
                    &c.state.map(|s| s.to_string()).unwrap_or_default(),
                ),
                created_at,
                host: self.host_name.clone(),
                stack_project,
                stack_service,
                ports,
                labels,
                task_id: None,
            });
        }
        Ok(out)
    }

    async fn container_stats(&self, id: &str, name: &str) -> Result<ContainerStats, HostClientError> {
        let options = Some(StatsOptions { stream: false, ..Default::default() });
        let mut stream = self.docker.stats(id, options);
        let stats = stream
            .next()
            .await
            .ok_or_else(|| HostClientError::ContainerNotFound(id.to_string()))?
            .map_err(|e| map_bollard_err(id, e))?;

        let (usage_mb, limit_mb) = memory_mb(&stats);
        let (rx, tx) = network_bytes(&stats);
        let (read, write) = block_io_bytes(&stats);
        let memory_percent = if limit_mb > 0.0 { usage_mb / limit_mb * 100.0 } else { 0.0 };

        Ok(ContainerStats {
            host: self.host_name.clone(),
            container_id: id.to_string(),
            container_name: name.to_string(),
            timestamp: Utc::now(),
            cpu_percent: cpu_percent(&stats),
            memory_usage_mb: usage_mb,
            memory_limit_mb: limit_mb,
            memory_percent,
            network_rx_bytes: rx,
            network_tx_bytes: tx,
            block_read_bytes: read,
            block_write_bytes: write,
        })
    }

    async fn host_metrics(&self) -> Result<HostMetrics, HostClientError> {
        let info = self.docker.info().await.map_err(|e| map_bollard_err("", e))?;
        let mem_total_mb = info.mem_total.unwrap_or(0) as f64 / (1024.0 * 1024.0);

        let containers = self.list_containers().await?;
        let running: Vec<_> = containers
            .into_iter()
            .filter(|c| c.status == crate::model::ContainerStatus::Running)
            .take(10)
            .collect();

        let mut cpu_sum = 0.0;
        let mut mem_used_sum = 0.0;
        let mut sampled = 0usize;
        for c in &running {
            if let Ok(s) = self.container_stats(&c.id, &c.name).await {
                cpu_sum += s.cpu_percent;
                mem_used_sum += s.memory_usage_mb;
                sampled += 1;
            }
        }
        let cpu_percent = if sampled > 0 { cpu_sum / sampled as f64 } else { 0.0 };
        let memory_percent = if mem_total_mb > 0.0 { mem_used_sum / mem_total_mb * 100.0 } else { 0.0 };

        Ok(HostMetrics {
            host: self.host_name.clone(),
            timestamp: Utc::now(),
            cpu_percent,
            memory_total_mb: mem_total_mb,
            memory_used_mb: mem_used_sum,
            memory_percent,
            disk_total_mb: 0.0,
            disk_used_mb: 0.0,
            disk_percent: 0.0,
            gpu: None,
        })
    }

    async fn container_logs(
        &self,
        id: &str,
        name: &str,
        since: Option<chrono::DateTime<Utc>>,
        tail: Option<u32>,
        _task_id: Option<&str>,
    ) -> Result<Vec<LogEntry>, HostClientError> {
        let tail_str = if since.is_none() && tail.is_none() {
            "500".to_string()
        } else {
            tail.map(|n| n.to_string()).unwrap_or_else(|| "all".to_string())
        };
        let since_secs = since.map(|dt| dt.timestamp() as i32).unwrap_or(0);

        let options = LogsOptions {
            follow: false,
            stdout: true,
            stderr: true,
            since: since_secs,
            until: 0,
            timestamps: true,
            tail: tail_str,
        };

        let mut stream = self.docker.logs(id, Some(options));
        let mut entries = Vec::new();
        while let Some(chunk) = stream.next().await {
            let output = chunk.map_err(|e| map_bollard_err(id, e))?;
            let (raw_stream, bytes) = match output {
                bollard::container::LogOutput::StdOut { message } => (crate::model::LogStream::Stdout, message),
                bollard::container::LogOutput::StdErr { message } => (crate::model::LogStream::Stderr, message),
                bollard::container::LogOutput::StdIn { message } => (crate::model::LogStream::Stdout, message),
                bollard::container::LogOutput::Console { message } => (crate::model::LogStream::Stdout, message),
            };
            for frame in logframe::split_timestamped_lines(&bytes) {
                if logframe::is_noise(&frame.message) {
                    continue;
                }
                entries.push(build_log_entry(&self.host_name, id, name, raw_stream, frame));
            }
        }
        Ok(entries)
    }

    async fn execute_action(
        &self,
        id: &str,
        kind: ContainerActionKind,
        timeout_secs: Option<u32>,
    ) -> Result<ActionOutcome, HostClientError> {
        let result = match kind {
            ContainerActionKind::Start => self.docker.start_container(id, None).await,
            ContainerActionKind::Stop => {
                let options = timeout_secs.map(|t| StopContainerOptions { t: Some(t as i32), ..Default::default() });
                self.docker.stop_container(id, options).await
            }
            ContainerActionKind::Restart => {
                let options = timeout_secs.map(|t| RestartContainerOptions { t: Some(t as i32), ..Default::default() });
                self.docker.restart_container(id, options).await
            }
            ContainerActionKind::Pause => self.docker.pause_container(id).await,
            ContainerActionKind::Unpause => self.docker.unpause_container(id).await,
            ContainerActionKind::Remove => {
                let options = Some(RemoveContainerOptions { force: true, ..Default::default() });
                self.docker.remove_container(id, options).await
            }
        };
        match result {
            Ok(_) => Ok(ActionOutcome { ok: true, message: format!("{kind:?} ok") }),
            Err(e) => Err(map_bollard_err(id, e)),
        }
    }

    async fn exec(&self, id: &str, argv: Vec<String>) -> Result<(bool, String), HostClientError> {
        use bollard::exec::{CreateExecOptions, StartExecResults};

        let exec = self
            .docker
            .create_exec(
                id,
                CreateExecOptions {
                    cmd: Some(argv),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| map_bollard_err(id, e))?;

        let results = self
            .docker
            .start_exec(&exec.id, None)
            .await
            .map_err(|e| map_bollard_err(id, e))?;

        let mut combined = Vec::new();
        if let StartExecResults::Attached { mut output, .. } = results {
            while let Some(chunk) = output.next().await {
                let output = chunk.map_err(|e| map_bollard_err(id, e))?;
                let bytes = match output {
                    bollard::container::LogOutput::StdOut { message }
                    | bollard::container::LogOutput::StdErr { message }
                    | bollard::container::LogOutput::StdIn { message }
                    | bollard::container::LogOutput::Console { message } => message,
                };
                combined.extend_from_slice(&bytes);
            }
        }
        Ok((true, String::from_utf8_lossy(&combined).to_string()))
    }

    async fn swarm_nodes(&self) -> Result<Vec<SwarmNode>, HostClientError> {
        let nodes = self
            .docker
            .list_nodes(None::<ListNodesOptions>)
            .await
            .map_err(|e| map_bollard_err("", e))?;
        Ok(nodes.into_iter().map(node_to_model).collect())
    }

    async fn swarm_services(&self) -> Result<Vec<SwarmService>, HostClientError> {
        let services = self
            .docker
            .list_services(None::<ListServicesOptions>)
            .await
            .map_err(|e| map_bollard_err("", e))?;
        Ok(services.into_iter().map(service_to_model).collect())
    }

    async fn swarm_tasks(&self) -> Result<Vec<SwarmTask>, HostClientError> {
        let tasks = self
            .docker
            .list_tasks(None::<ListTasksOptions>)
            .await
            .map_err(|e| map_bollard_err("", e))?;
        Ok(tasks.into_iter().map(task_to_model).collect())
    }

    async fn local_node_id(&self) -> Result<Option<String>, HostClientError> {
        let info = self.docker.info().await.map_err(|e| map_bollard_err("", e))?;
        Ok(info.swarm.and_then(|s| s.node_id))
    }

    async fn service_logs(&self, service_name: &str, tail: Option<u32>) -> Result<Vec<LogEntry>, HostClientError> {
        let tail_str = tail.map(|n| n.to_string()).unwrap_or_else(|| "200".to_string());
        let options = LogsOptions {
            follow: false,
            stdout: true,
            stderr: true,
            since: 0,
            until: 0,
            timestamps: true,
            tail: tail_str,
        };
        let mut stream = self.docker.service_logs(service_name, Some(options));
        let mut entries = Vec::new();
        while let Some(chunk) = stream.next().await {
            let output = chunk.map_err(|e| map_bollard_err(service_name, e))?;
            let (raw_stream, bytes) = match output {
                bollard::container::LogOutput::StdOut { message } => (crate::model::LogStream::Stdout, message),
                bollard::container::LogOutput::StdErr { message } => (crate::model::LogStream::Stderr, message),
                bollard::container::LogOutput::StdIn { message } => (crate::model::LogStream::Stdout, message),
                bollard::container::LogOutput::Console { message } => (crate::model::LogStream::Stdout, message),
            };
            for frame in logframe::split_timestamped_lines(&bytes) {
                if logframe::is_noise(&frame.message) {
                    continue;
                }
                entries.push(build_log_entry(&self.host_name, "", service_name, raw_stream, frame));
            }
        }
        Ok(entries)
    }

    async fn remove_service(&self, service_name: &str) -> Result<(), HostClientError> {
        self.docker
            .delete_service(service_name)
            .await
            .map_err(|e| map_bollard_err(service_name, e))
    }

    async fn force_update_service(&self, service_name: &str) -> Result<(), HostClientError> {
        let (mut spec, version) = self.inspect_service_spec(service_name).await?;
        let task_template = spec.task_template.get_or_insert_with(Default::default);
        task_template.force_update = Some(task_template.force_update.unwrap_or(0) + 1);
        self.push_service_update(service_name, version, spec).await
    }

    async fn update_service_image(&self, service_name: &str, new_tag: &str) -> Result<(), HostClientError> {
        let (mut spec, version) = self.inspect_service_spec(service_name).await?;
        let task_template = spec.task_template.get_or_insert_with(Default::default);
        let container_spec = task_template.container_spec.get_or_insert_with(Default::default);
        let current = container_spec.image.clone().unwrap_or_default();
        container_spec.image = Some(replace_image_tag(&current, new_tag));
        task_template.force_update = Some(task_template.force_update.unwrap_or(0) + 1);
        self.push_service_update(service_name, version, spec).await
    }

    async fn remove_stack(&self, stack_name: &str) -> Result<(), HostClientError> {
        let services = self.swarm_services().await?;
        for service in services.into_iter().filter(|s| s.stack.as_deref() == Some(stack_name)) {
            self.remove_service(&service.name).await?;
        }
        Ok(())
    }

    async fn list_stacks_and_services(&self) -> Result<Vec<SwarmService>, HostClientError> {
        self.swarm_services().await
    }
}

impl DirectApiClient {
    async fn inspect_service_spec(&self, service_name: &str) -> Result<(bollard::models::ServiceSpec, i32), HostClientError> {
        let service = self
            .docker
            .inspect_service(service_name, None::<bollard::query_parameters::InspectServiceOptions>)
            .await
            .map_err(|e| map_bollard_err(service_name, e))?;
        let version = service.version.and_then(|v| v.index).unwrap_or(0) as i32;
        let spec = service
            .spec
            .ok_or_else(|| HostClientError::DaemonRejected(format!("service {service_name} has no spec")))?;
        Ok((spec, version))
    }

    async fn push_service_update(
        &self,
        service_name: &str,
        version: i32,
        spec: bollard::models::ServiceSpec,
    ) -> Result<(), HostClientError> {
        let options = bollard::query_parameters::UpdateServiceOptions {
            version,
            ..Default::default()
        };
        self.docker
            .update_service(service_name, spec, options, None)
            .await
            .map_err(|e| map_bollard_err(service_name, e))?;
        Ok(())
    }
}

fn stack_labels(labels: &HashMap<String, String>) -> (Option<String>, Option<String>) {
    let project = labels
        .get("com.docker.compose.project")
        .or_else(|| labels.get("com.docker.stack.namespace"))
        .cloned();
    let service = labels.get("com.docker.compose.service").cloned();
    (project, service)
}

fn build_log_entry(
    host: &str,
    container_id: &str,
    container_name: &str,
    stream: LogStream,
    frame: RawLogFrame,
) -> LogEntry {
    let (level, http_status) = crate::scanner::scan(&frame.message);
    let parsed_fields = if frame.message.starts_with('{') {
        serde_json::from_str::<serde_json::Value>(&frame.message)
            .ok()
            .and_then(|v| v.as_object().cloned())
    } else {
        None
    };

    LogEntry {
        timestamp: frame.timestamp,
        host: host.to_string(),
        container_id: container_id.to_string(),
        container_name: container_name.to_string(),
        stack_project: None,
        stack_service: None,
        stream,
        message: frame.message,
        level,
        http_status,
        parsed_fields,
    }
}

fn node_to_model(n: bollard::models::Node) -> SwarmNode {
    SwarmNode {
        id: n.id.unwrap_or_default(),
        hostname: n
            .description
            .as_ref()
            .and_then(|d| d.hostname.clone())
            .unwrap_or_default(),
        role: n
            .spec
            .as_ref()
            .and_then(|s| s.role)
            .map(|r| format!("{r:?}").to_lowercase())
            .unwrap_or_default(),
        availability: n
            .spec
            .as_ref()
            .and_then(|s| s.availability)
            .map(|a| format!("{a:?}").to_lowercase())
            .unwrap_or_default(),
        state: n
            .status
            .as_ref()
            .and_then(|s| s.state)
            .map(|s| format!("{s:?}").to_lowercase())
            .unwrap_or_default(),
        addr: n.status.as_ref().and_then(|s| s.addr.clone()).unwrap_or_default(),
    }
}

fn service_to_model(s: bollard::models::Service) -> SwarmService {
    let spec = s.spec.clone();
    let name = spec.as_ref().and_then(|s| s.name.clone()).unwrap_or_default();
    let image = spec
        .as_ref()
        .and_then(|s| s.task_template.as_ref())
        .and_then(|t| t.container_spec.as_ref())
        .and_then(|c| c.image.clone())
        .unwrap_or_default();
    let stack = spec
        .as_ref()
        .and_then(|s| s.labels.as_ref())
        .and_then(|l| l.get("com.docker.stack.namespace").cloned());
    let replicas = spec
        .as_ref()
        .and_then(|s| s.mode.as_ref())
        .and_then(|m| m.replicated.as_ref())
        .and_then(|r| r.replicas)
        .map(|r| r as u64);
    let env = spec
        .as_ref()
        .and_then(|s| s.task_template.as_ref())
        .and_then(|t| t.container_spec.as_ref())
        .and_then(|c| c.env.clone())
        .unwrap_or_default();

    SwarmService {
        id: s.id.unwrap_or_default(),
        name,
        image,
        stack,
        replicas,
        env,
    }
}

fn task_to_model(t: bollard::models::Task) -> SwarmTask {
    SwarmTask {
        id: t.id.unwrap_or_default(),
        service_id: t.service_id.unwrap_or_default(),
        node_id: t.node_id.unwrap_or_default(),
        container_id: t.status.as_ref().and_then(|s| s.container_status.as_ref()).and_then(|c| c.container_id.clone()),
        slot: t.slot.map(|s| s as u64),
        desired_state: t.desired_state.map(|s| format!("{s:?}").to_lowercase()).unwrap_or_default(),
        state: t
            .status
            .as_ref()
            .and_then(|s| s.state)
            .map(|s| format!("{s:?}").to_lowercase())
            .unwrap_or_default(),
    }
}

/// Shells out to the Docker CLI over SSH. Grounded in the pull-agent's
/// `docker_cli_command()` helper, generalized to prefix every invocation
/// with `ssh user@host`.
pub struct SshClient {
    host_name: String,
    ssh_target: String,
    ssh_key_path: Option<String>,
}

impl SshClient {
    pub fn new(host_name: &str, user: &str, endpoint: &str, ssh_key_path: Option<String>) -> Self {
        Self {
            host_name: host_name.to_string(),
            ssh_target: format!("{user}@{endpoint}"),
            ssh_key_path,
        }
    }

    fn command(&self) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new("ssh");
        cmd.arg("-o").arg("BatchMode=yes").arg("-o").arg("ConnectTimeout=5");
        if let Some(key) = &self.ssh_key_path {
            cmd.arg("-i").arg(key);
        }
        cmd.arg(&self.ssh_target);
        cmd
    }

    async fn run_docker(&self, args: &[&str]) -> Result<String, HostClientError> {
        let mut cmd = self.command();
        cmd.arg("docker");
        for a in args {
            cmd.arg(a);
        }
        let output = cmd
            .output()
            .await
            .map_err(|e| HostClientError::Unreachable(e.to_string()))?;
        if !output.status.success() {
            return Err(HostClientError::DaemonRejected(String::from_utf8_lossy(&output.stderr).trim().to_string()));
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

#[async_trait]
impl HostClient for SshClient {
    async fn list_containers(&self) -> Result<Vec<Container>, HostClientError> {
        let raw = self.run_docker(&["ps", "-a", "--no-trunc", "--format", "{{json .}}"]).await?;
        let mut out = Vec::new();
        for line in raw.lines().filter(|l| !l.trim().is_empty()) {
            let v: serde_json::Value = serde_json::from_str(line)
                .map_err(|e| HostClientError::DaemonRejected(format!("bad docker ps json: {e}")))?;
            let id: String = v["ID"].as_str().unwrap_or_default().chars().take(12).collect();
            let labels: HashMap<String, String> = v["Labels"]
                .as_str()
                .unwrap_or_default()
                .split(',')
                .filter_map(|kv| kv.split_once('='))
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect();
            let (stack_project, stack_service) = stack_labels(&labels);
            out.push(Container {
                id,
                name: v["Names"].as_str().unwrap_or_default().to_string(),
                image: v["Image"].as_str().unwrap_or_default().to_string(),
                status: crate::model::ContainerStatus::from_docker_state(v["State"].as_str().unwrap_or_default()),
                created_at: Utc::now(),
                host: self.host_name.clone(),
                stack_project,
                stack_service,
                ports: Vec::new(),
                labels,
                task_id: None,
            });
        }
        Ok(out)
    }

    async fn container_stats(&self, id: &str, name: &str) -> Result<ContainerStats, HostClientError> {
        let raw = self
            .run_docker(&["stats", "--no-stream", "--format", "{{json .}}", id])
            .await?;
        let v: serde_json::Value = serde_json::from_str(raw.lines().next().unwrap_or("{}"))
            .map_err(|e| HostClientError::DaemonRejected(format!("bad docker stats json: {e}")))?;
        let cpu_percent = v["CPUPerc"]
            .as_str()
            .unwrap_or("0%")
            .trim_end_matches('%')
            .parse::<f64>()
            .unwrap_or(0.0);
        let mem_percent = v["MemPerc"]
            .as_str()
            .unwrap_or("0%")
            .trim_end_matches('%')
            .parse::<f64>()
            .unwrap_or(0.0);
        Ok(ContainerStats {
            host: self.host_name.clone(),
            container_id: id.to_string(),
            container_name: name.to_string(),
            timestamp: Utc::now(),
            cpu_percent,
            memory_usage_mb: 0.0,
            memory_limit_mb: 0.0,
            memory_percent: mem_percent,
            network_rx_bytes: 0,
            network_tx_bytes: 0,
            block_read_bytes: 0,
            block_write_bytes: 0,
        })
    }

    async fn host_metrics(&self) -> Result<HostMetrics, HostClientError> {
        let stat = self.run_via_shell("cat /proc/stat | head -1").await?;
        let cpu_percent = logframe::parse_proc_stat_busy_fraction(&stat).unwrap_or(0.0) * 100.0;

        let free = self.run_via_shell("free -m | awk 'NR==2{print $2, $3}'").await?;
        let mut parts = free.split_whitespace();
        let memory_total_mb: f64 = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0.0);
        let memory_used_mb: f64 = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0.0);
        let memory_percent = if memory_total_mb > 0.0 { memory_used_mb / memory_total_mb * 100.0 } else { 0.0 };

        let df = self.run_via_shell("df -m / | awk 'NR==2{print $2, $3}'").await?;
        let mut dparts = df.split_whitespace();
        let disk_total_mb: f64 = dparts.next().and_then(|s| s.parse().ok()).unwrap_or(0.0);
        let disk_used_mb: f64 = dparts.next().and_then(|s| s.parse().ok()).unwrap_or(0.0);
        let disk_percent = if disk_total_mb > 0.0 { disk_used_mb / disk_total_mb * 100.0 } else { 0.0 };

        Ok(HostMetrics {
            host: self.host_name.clone(),
            timestamp: Utc::now(),
            cpu_percent,
            memory_total_mb,
            memory_used_mb,
            memory_percent,
            disk_total_mb,
            disk_used_mb,
            disk_percent,
            gpu: probe_gpu(self).await,
        })
    }

    async fn container_logs(
        &self,
        id: &str,
        name: &str,
        since: Option<chrono::DateTime<Utc>>,
        tail: Option<u32>,
        _task_id: Option<&str>,
    ) -> Result<Vec<LogEntry>, HostClientError> {
        // Curl the daemon's unix socket directly over SSH rather than shelling
        // to the `docker` CLI, so the response is the raw multiplexed stream
        // format and doesn't depend on the CLI being installed remotely.
        let tail_q = if since.is_none() && tail.is_none() {
            "tail=500".to_string()
        } else {
            tail.map(|n| format!("tail={n}")).unwrap_or_else(|| "tail=all".to_string())
        };
        let since_q = since.map(|dt| format!("&since={}", dt.timestamp())).unwrap_or_default();
        let url = format!(
            "http://localhost/containers/{id}/logs?stdout=1&stderr=1&timestamps=1&{tail_q}{since_q}"
        );
        let shell_cmd = format!("curl -s --unix-socket /var/run/docker.sock '{url}'");
        let raw = self.run_via_shell(&shell_cmd).await?;

        let raw_bytes = raw.into_bytes();
        let mut entries = Vec::new();
        let frames = logframe::demux_frames(&raw_bytes);
        if frames.is_empty() && !raw_bytes.is_empty() {
            for frame in logframe::split_timestamped_lines(&raw_bytes) {
                if logframe::is_noise(&frame.message) {
                    continue;
                }
                entries.push(build_log_entry(&self.host_name, id, name, LogStream::Stdout, frame));
            }
        } else {
            for demuxed in frames {
                let stream = if demuxed.stderr { LogStream::Stderr } else { LogStream::Stdout };
                for frame in logframe::split_timestamped_lines(&demuxed.payload) {
                    if logframe::is_noise(&frame.message) {
                        continue;
                    }
                    entries.push(build_log_entry(&self.host_name, id, name, stream, frame));
                }
            }
        }
        Ok(entries)
    }

    async fn execute_action(
        &self,
        id: &str,
        kind: ContainerActionKind,
        timeout_secs: Option<u32>,
    ) -> Result<ActionOutcome, HostClientError> {
        let verb = match kind {
            ContainerActionKind::Start => "start",
            ContainerActionKind::Stop => "stop",
            ContainerActionKind::Restart => "restart",
            ContainerActionKind::Pause => "pause",
            ContainerActionKind::Unpause => "unpause",
            ContainerActionKind::Remove => "rm",
        };
        let mut args = vec![verb.to_string()];
        if matches!(kind, ContainerActionKind::Remove) {
            args.push("-f".to_string());
        }
        if let (ContainerActionKind::Stop | ContainerActionKind::Restart, Some(t)) = (kind, timeout_secs) {
            args.push("-t".to_string());
            args.push(t.to_string());
        }
        args.push(id.to_string());
        let args_ref: Vec<&str> = args.iter().map(|s| s.as_str()).collect();
        self.run_docker(&args_ref).await?;
        Ok(ActionOutcome { ok: true, message: format!("{kind:?} ok") })
    }

    async fn exec(&self, id: &str, argv: Vec<String>) -> Result<(bool, String), HostClientError> {
        let mut args = vec!["exec".to_string(), id.to_string()];
        args.extend(argv);
        let args_ref: Vec<&str> = args.iter().map(|s| s.as_str()).collect();
        let out = self.run_docker(&args_ref).await?;
        Ok((true, out))
    }

    async fn swarm_nodes(&self) -> Result<Vec<SwarmNode>, HostClientError> {
        Err(HostClientError::NotSwarmManager)
    }

    async fn swarm_services(&self) -> Result<Vec<SwarmService>, HostClientError> {
        Err(HostClientError::NotSwarmManager)
    }

    async fn swarm_tasks(&self) -> Result<Vec<SwarmTask>, HostClientError> {
        Err(HostClientError::NotSwarmManager)
    }

    async fn local_node_id(&self) -> Result<Option<String>, HostClientError> {
        Ok(None)
    }

    async fn service_logs(&self, _service_name: &str, _tail: Option<u32>) -> Result<Vec<LogEntry>, HostClientError> {
        Err(HostClientError::NotSwarmManager)
    }

    async fn remove_service(&self, _service_name: &str) -> Result<(), HostClientError> {
        Err(HostClientError::NotSwarmManager)
    }

    async fn force_update_service(&self, _service_name: &str) -> Result<(), HostClientError> {
        Err(HostClientError::NotSwarmManager)
    }

    async fn update_service_image(&self, _service_name: &str, _new_tag: &str) -> Result<(), HostClientError> {
        Err(HostClientError::NotSwarmManager)
    }

    async fn remove_stack(&self, _stack_name: &str) -> Result<(), HostClientError> {
        Err(HostClientError::NotSwarmManager)
    }

    async fn list_stacks_and_services(&self) -> Result<Vec<SwarmService>, HostClientError> {
        Err(HostClientError::NotSwarmManager)
    }
}

impl SshClient {
    async fn run_via_shell(&self, shell_cmd: &str) -> Result<String, HostClientError> {
        let mut cmd = self.command();
        cmd.arg(shell_cmd);
        let output = cmd
            .output()
            .await
            .map_err(|e| HostClientError::Unreachable(e.to_string()))?;
        if !output.status.success() {
            return Err(HostClientError::DaemonRejected(String::from_utf8_lossy(&output.stderr).trim().to_string()));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

async fn probe_gpu(client: &SshClient) -> Option<GpuSample> {
    let deadline = std::time::Duration::from_secs(5);
    if let Ok(Ok(out)) = tokio::time::timeout(
        deadline,
        client.run_via_shell("rocm-smi --showuse --showmeminfo vram --json"),
    )
    .await
    {
        if let Some(sample) = logframe::parse_rocm_smi(&out) {
            return Some(sample);
        }
    }
    if let Ok(Ok(out)) = tokio::time::timeout(
        deadline,
        client.run_via_shell(
            "nvidia-smi --query-gpu=utilization.gpu,memory.used,memory.total --format=csv,noheader,nounits",
        ),
    )
    .await
    {
        if let Some(sample) = logframe::parse_nvidia_smi(&out) {
            return Some(sample);
        }
    }
    None
}

/// Delegates to the manager's `DirectApiClient`, scoping results to one
/// Swarm node. Stats/metrics/exec are unreachable — workers aren't dialed
/// directly — so those operations fail with a clear category instead of
/// silently returning zeros.
pub struct SwarmProxyClient {
    pub node_id: String,
    pub node_hostname: String,
    pub manager: Arc<dyn HostClient>,
}

#[async_trait]
impl HostClient for SwarmProxyClient {
    async fn list_containers(&self) -> Result<Vec<Container>, HostClientError> {
        let tasks = self.manager.swarm_tasks().await?;
        let services = self.manager.swarm_services().await?;
        let services_by_id: HashMap<_, _> = services.into_iter().map(|s| (s.id.clone(), s)).collect();

        let mut out = Vec::new();
        for t in tasks.into_iter().filter(|t| t.node_id == self.node_id) {
            let Some(container_id) = t.container_id.clone() else { continue };
            let service = services_by_id.get(&t.service_id);
            out.push(Container {
                id: container_id.chars().take(12).collect(),
                name: service.map(|s| s.name.clone()).unwrap_or_else(|| t.id.clone()),
                image: service.map(|s| s.image.clone()).unwrap_or_default(),
                status: crate::model::ContainerStatus::from_docker_state(&t.state),
                created_at: Utc::now(),
                host: self.node_hostname.clone(),
                stack_project: service.and_then(|s| s.stack.clone()),
                stack_service: service.map(|s| s.name.clone()),
                ports: Vec::new(),
                labels: HashMap::new(),
                task_id: Some(t.id),
            });
        }
        Ok(out)
    }

    async fn container_stats(&self, _id: &str, _name: &str) -> Result<ContainerStats, HostClientError> {
        Err(HostClientError::Unreachable(format!(
            "{} is a swarm-proxy host; per-container stats require direct access",
            self.node_hostname
        )))
    }

    async fn host_metrics(&self) -> Result<HostMetrics, HostClientError> {
        Err(HostClientError::Unreachable(format!(
            "{} is a swarm-proxy host; host metrics require direct access",
            self.node_hostname
        )))
    }

    async fn container_logs(
        &self,
        id: &str,
        name: &str,
        since: Option<chrono::DateTime<Utc>>,
        tail: Option<u32>,
        task_id: Option<&str>,
    ) -> Result<Vec<LogEntry>, HostClientError> {
        self.manager.container_logs(id, name, since, tail, task_id).await
    }

    async fn execute_action(
        &self,
        id: &str,
        kind: ContainerActionKind,
        timeout_secs: Option<u32>,
    ) -> Result<ActionOutcome, HostClientError> {
        self.manager.execute_action(id, kind, timeout_secs).await
    }

    async fn exec(&self, id: &str, argv: Vec<String>) -> Result<(bool, String), HostClientError> {
        self.manager.exec(id, argv).await
    }

    async fn swarm_nodes(&self) -> Result<Vec<SwarmNode>, HostClientError> {
        self.manager.swarm_nodes().await
    }

    async fn swarm_services(&self) -> Result<Vec<SwarmService>, HostClientError> {
        self.manager.swarm_services().await
    }

    async fn swarm_tasks(&self) -> Result<Vec<SwarmTask>, HostClientError> {
        self.manager.swarm_tasks().await
    }

    async fn local_node_id(&self) -> Result<Option<String>, HostClientError> {
        Ok(Some(self.node_id.clone()))
    }

    async fn service_logs(&self, service_name: &str, tail: Option<u32>) -> Result<Vec<LogEntry>, HostClientError> {
        self.manager.service_logs(service_name, tail).await
    }

    async fn remove_service(&self, service_name: &str) -> Result<(), HostClientError> {
        self.manager.remove_service(service_name).await
    }

    async fn force_update_service(&self, service_name: &str) -> Result<(), HostClientError> {
        self.manager.force_update_service(service_name).await
    }

    async fn update_service_image(&self, service_name: &str, new_tag: &str) -> Result<(), HostClientError> {
        self.manager.update_service_image(service_name, new_tag).await
    }

    async fn remove_stack(&self, stack_name: &str) -> Result<(), HostClientError> {
        self.manager.remove_stack(stack_name).await
    }

    async fn list_stacks_and_services(&self) -> Result<Vec<SwarmService>, HostClientError> {
        self.manager.list_stacks_and_services().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_pib_memory_limit_is_synthesized() {
        let stats = bollard::models::ContainerStatsResponse {
            memory_stats: Some(bollard::models::ContainerMemoryStats {
                usage: Some(100 * 1024 * 1024),
                limit: Some(u64::MAX),
                ..Default::default()
            }),
            ..Default::default()
        };
        let (usage, limit) = memory_mb(&stats);
        assert_eq!(usage, 100.0);
        assert_eq!(limit, 200.0);
    }

    #[test]
    fn replace_image_tag_strips_digest_and_preserves_registry_path() {
        let updated = replace_image_tag(
            "registry.example/app:v1.1.0@sha256:abcdef1234567890",
            "v1.2.3",
        );
        assert_eq!(updated, "registry.example/app:v1.2.3");
    }

    #[test]
    fn replace_image_tag_handles_registry_port_without_tag() {
        let updated = replace_image_tag("registry.example:5000/app", "v2.0.0");
        assert_eq!(updated, "registry.example:5000/app:v2.0.0");
    }

    #[test]
    fn zero_usage_with_unlimited_memory_synthesizes_1024() {
        let stats = bollard::models::ContainerStatsResponse {
            memory_stats: Some(bollard::models::ContainerMemoryStats {
                usage: Some(0),
                limit: Some(u64::MAX),
                ..Default::default()
            }),
            ..Default::default()
        };
        let (_, limit) = memory_mb(&stats);
        assert_eq!(limit, 1024.0);
    }
}
