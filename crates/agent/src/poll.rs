//! Polling and heartbeat loops against the controller's agent endpoints.

use tracing::{debug, error, info, warn};

use crate::action::{self, ActionEnvelope};
use crate::state::SharedState;

#[derive(serde::Serialize)]
struct HeartbeatBody<'a> {
    agent_id: &'a str,
}

pub async fn run_heartbeat_loop(state: SharedState) {
    let mut interval = tokio::time::interval(state.config.heartbeat_interval());
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        interval.tick().await;
        let url = format!("{}/api/agent/heartbeat", state.config.controller_url);
        let body = HeartbeatBody {
            agent_id: &state.config.agent_id,
        };
        match state.http.post(&url).json(&body).send().await {
            Ok(resp) if resp.status().is_success() => {
                debug!(agent_id = %state.config.agent_id, "heartbeat sent");
            }
            Ok(resp) => {
                warn!(status = %resp.status(), "heartbeat rejected by controller");
            }
            Err(e) => {
                warn!(error = %e, "heartbeat failed — controller unreachable");
            }
        }
    }
}

pub async fn run_poll_loop(state: SharedState) {
    let mut interval = tokio::time::interval(state.config.poll_interval());
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        interval.tick().await;
        if let Err(e) = poll_once(&state).await {
            warn!(error = %e, "action poll cycle failed — controller unreachable");
        }
    }
}

async fn poll_once(state: &SharedState) -> anyhow::Result<()> {
    let url = format!(
        "{}/api/agent/actions?agent_id={}",
        state.config.controller_url, state.config.agent_id
    );

    let actions: Vec<ActionEnvelope> = state.http.get(&url).send().await?.json().await?;

    for envelope in actions {
        let action_id = envelope.id.clone();
        let kind = envelope.kind.clone();
        info!(action_id = %action_id, kind = %kind, "executing action");

        let report = action::execute(&state.docker, envelope).await;

        if !report.success {
            error!(action_id = %action_id, kind = %kind, output = %report.output, "action failed");
        }

        let result_url = format!("{}/api/agent/result", state.config.controller_url);
        if let Err(e) = state.http.post(&result_url).json(&report).send().await {
            warn!(action_id = %action_id, error = %e, "failed to report action result");
        }
    }

    Ok(())
}
