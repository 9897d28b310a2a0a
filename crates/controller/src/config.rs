//! Layered configuration: compile-time default, then TOML file(s), then
//! `CONTROLLER__`-prefixed environment variables, with `.env` loaded first.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::model::HostMode;

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ControllerConfig {
    pub server: ServerConfig,
    pub hosts: Vec<HostConfig>,
    pub indexing: IndexingConfig,
    pub collector: CollectorConfig,
    pub actions: ActionsConfig,
    pub gpu: GpuConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: String,
    pub read_timeout_secs: u64,
    pub write_timeout_secs: u64,
    pub enable_cors: bool,
    pub cors_origins: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HostConfig {
    pub name: String,
    pub mode: HostMode,
    pub endpoint: String,
    #[serde(default)]
    pub is_manager: bool,
    #[serde(default)]
    pub route_through_this_manager: bool,
    #[serde(default)]
    pub auto_discover_nodes: bool,
    /// SSH user, required when `mode` is `ssh`.
    #[serde(default)]
    pub ssh_user: Option<String>,
    /// Path to the SSH private key, required when `mode` is `ssh`.
    #[serde(default)]
    pub ssh_key_path: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct IndexingConfig {
    pub base_url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub index_prefix: String,
    pub retention_days: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CollectorConfig {
    pub inventory_ttl_secs: u64,
    pub log_loop_period_secs: u64,
    pub metrics_loop_period_secs: u64,
    pub retention_sweep_period_secs: u64,
    pub log_tail_default: u32,
    pub host_metrics_sample_size: usize,
    pub host_health_check_interval_secs: u64,
    pub swarm_discovery_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ActionsConfig {
    pub action_timeout_secs: u64,
    pub default_wait_timeout_secs: u64,
    pub cleanup_max_age_secs: u64,
    pub agent_freshness_window_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GpuConfig {
    pub enabled: bool,
    pub probe_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
    pub output: LogOutput,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    Stdout,
    File { path: String },
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            hosts: vec![],
            indexing: IndexingConfig::default(),
            collector: CollectorConfig::default(),
            actions: ActionsConfig::default(),
            gpu: GpuConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            read_timeout_secs: 30,
            write_timeout_secs: 30,
            enable_cors: true,
            cors_origins: vec![
                "http://localhost:3000".to_string(),
                "http://localhost:5173".to_string(),
            ],
        }
    }
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:9200".to_string(),
            username: None,
            password: None,
            index_prefix: "fleetwatch".to_string(),
            retention_days: 30,
        }
    }
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            inventory_ttl_secs: 15,
            log_loop_period_secs: 5,
            metrics_loop_period_secs: 10,
            retention_sweep_period_secs: 3600,
            log_tail_default: 200,
            host_metrics_sample_size: 5,
            host_health_check_interval_secs: 20,
            swarm_discovery_interval_secs: 300,
        }
    }
}

impl Default for ActionsConfig {
    fn default() -> Self {
        Self {
            action_timeout_secs: 60,
            default_wait_timeout_secs: 30,
            cleanup_max_age_secs: 86_400,
            agent_freshness_window_secs: 30,
        }
    }
}

impl Default for GpuConfig {
    fn default() -> Self {
        Self { enabled: true, probe_timeout_secs: 3 }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info,controller=debug".to_string(),
            format: LogFormat::Pretty,
            output: LogOutput::Stdout,
        }
    }
}

impl ControllerConfig {
    /// Load configuration from controller.toml and environment variables.
    pub fn load(explicit_path: Option<&str>) -> Result<Self> {
        dotenvy::dotenv().ok();

        let defaults = config::Config::try_from(&ControllerConfig::default())
            .context("failed to serialize default configuration")?;

        let mut builder = config::Config::builder().add_source(defaults);

        if let Some(path) = explicit_path {
            builder = builder.add_source(config::File::with_name(path).required(true));
        } else {
            let config_paths = [
                "/etc/fleetwatch/controller",
                "config/controller",
                "crates/controller/config/controller",
            ];
            for path in config_paths {
                builder = builder.add_source(config::File::with_name(path).required(false));
            }
        }

        builder = builder.add_source(
            config::Environment::with_prefix("CONTROLLER")
                .separator("__")
                .try_parsing(true),
        );

        let cfg: ControllerConfig = builder
            .build()
            .context("failed to build configuration")?
            .try_deserialize()
            .context("failed to deserialize configuration")?;

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        self.server
            .bind_address
            .parse::<std::net::SocketAddr>()
            .context("invalid server.bind_address")?;

        for host in &self.hosts {
            if host.mode == HostMode::Ssh {
                let key_path = host
                    .ssh_key_path
                    .as_ref()
                    .with_context(|| format!("host '{}' uses ssh mode but has no ssh_key_path", host.name))?;
                let p = std::path::Path::new(key_path);
                if !p.exists() {
                    anyhow::bail!(
                        "host '{}' ssh_key_path not found: {} (resolved: {})",
                        host.name,
                        key_path,
                        p.canonicalize()
                            .map(|c| c.display().to_string())
                            .unwrap_or_else(|_| "unresolvable".to_string())
                    );
                }
                if host.ssh_user.is_none() {
                    anyhow::bail!("host '{}' uses ssh mode but has no ssh_user", host.name);
                }
            }
        }

        Ok(())
    }

    pub fn read_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.server.read_timeout_secs)
    }

    pub fn write_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.server.write_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let cfg = ControllerConfig::default();
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn rejects_bad_bind_address() {
        let mut cfg = ControllerConfig::default();
        cfg.server.bind_address = "not-an-address".to_string();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_ssh_host_without_key_path() {
        let mut cfg = ControllerConfig::default();
        cfg.hosts.push(HostConfig {
            name: "worker-1".to_string(),
            mode: HostMode::Ssh,
            endpoint: "worker-1.internal".to_string(),
            is_manager: false,
            route_through_this_manager: false,
            auto_discover_nodes: false,
            ssh_user: Some("deploy".to_string()),
            ssh_key_path: None,
        });
        assert!(cfg.validate().is_err());
    }
}
