//! Shared agent state — the local Docker client, HTTP client, and config.

use std::sync::Arc;

use crate::config::AgentConfig;
use crate::docker::client::DockerClient;

pub struct AgentState {
    pub docker: DockerClient,
    pub http: reqwest::Client,
    pub config: AgentConfig,
}

pub type SharedState = Arc<AgentState>;

impl AgentState {
    pub fn new(config: AgentConfig) -> anyhow::Result<SharedState> {
        let docker = DockerClient::new(&config.docker_socket)
            .map_err(|e| anyhow::anyhow!("failed to connect to Docker: {e}"))?;
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;
        Ok(Arc::new(AgentState { docker, http, config }))
    }
}
