//! Layered configuration for the pull-mode agent.
//!
//! Same precedence as the controller: compile-time default, then one of a
//! handful of TOML file locations, then `AGENT__`-prefixed environment
//! variables (double underscore nests fields), with `.env` loaded first.

use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Base URL of the controller's agent endpoints, e.g. `http://controller:8080`.
    pub controller_url: String,
    /// Identity this agent registers under. Defaults to the machine hostname.
    pub agent_id: String,
    /// Docker socket path. Empty string means "use Bollard's default".
    pub docker_socket: String,
    /// How often to poll for pending actions.
    pub poll_interval_secs: u64,
    /// How often to send a heartbeat independent of polling.
    pub heartbeat_interval_secs: u64,
    /// HTTP request timeout for calls to the controller.
    pub request_timeout_secs: u64,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            controller_url: "http://localhost:8080".to_string(),
            agent_id: hostname_or_unknown(),
            docker_socket: String::new(),
            poll_interval_secs: 10,
            heartbeat_interval_secs: 5,
            request_timeout_secs: 10,
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

fn hostname_or_unknown() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "unknown-agent".to_string())
}

impl AgentConfig {
    /// Load configuration: defaults, overlaid by the first config file found,
    /// overlaid by `AGENT__`-prefixed environment variables.
    pub fn load(explicit_path: Option<&str>) -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let mut builder =
            config::Config::builder().add_source(config::Config::try_from(&AgentConfig::default())?);

        if let Some(path) = explicit_path {
            builder = builder.add_source(config::File::with_name(path).required(true));
        } else {
            for candidate in ["/etc/fleetwatch/agent", "config/agent", "crates/agent/config/agent"] {
                builder = builder.add_source(config::File::with_name(candidate).required(false));
            }
        }

        let builder = builder.add_source(
            config::Environment::with_prefix("AGENT")
                .separator("__")
                .try_parsing(true),
        );

        let cfg: AgentConfig = builder.build()?.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.controller_url.is_empty() {
            anyhow::bail!("controller_url must not be empty");
        }
        if self.agent_id.is_empty() {
            anyhow::bail!("agent_id must not be empty");
        }
        if self.poll_interval_secs == 0 {
            anyhow::bail!("poll_interval_secs must be > 0");
        }
        if self.heartbeat_interval_secs == 0 {
            anyhow::bail!("heartbeat_interval_secs must be > 0");
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let cfg = AgentConfig::default();
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn rejects_empty_controller_url() {
        let mut cfg = AgentConfig::default();
        cfg.controller_url = String::new();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_zero_poll_interval() {
        let mut cfg = AgentConfig::default();
        cfg.poll_interval_secs = 0;
        assert!(cfg.validate().is_err());
    }
}
