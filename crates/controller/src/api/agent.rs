//! Agent protocol routes: the pull side of the dispatch model. Agents
//! poll for work, report results, and heartbeat — wire shapes here must
//! match what `agent::poll` posts/expects byte for byte.

use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::queue::ActionEnvelope;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct AgentActionsQuery {
    pub agent_id: String,
}

/// `GET /api/agent/actions?agent_id=...`
pub async fn list_actions(State(state): State<AppState>, Query(q): Query<AgentActionsQuery>) -> Json<Vec<ActionEnvelope>> {
    Json(state.actions.poll(&q.agent_id))
}

#[derive(Debug, Deserialize)]
pub struct ActionResultReport {
    pub id: String,
    pub success: bool,
    pub output: String,
}

#[derive(Debug, Serialize)]
pub struct ActionResultAck {
    pub status: &'static str,
}

/// `POST /api/agent/result`
pub async fn report_result(State(state): State<AppState>, Json(body): Json<ActionResultReport>) -> Result<Json<ActionResultAck>, ApiError> {
    state
        .actions
        .complete(&body.id, body.success, body.output)
        .map_err(|e| ApiError::InvalidRequest(e.to_string()))?;
    Ok(Json(ActionResultAck { status: "ok" }))
}

#[derive(Debug, Deserialize)]
pub struct HeartbeatBody {
    pub agent_id: String,
}

#[derive(Debug, Serialize)]
pub struct HeartbeatAck {
    pub status: &'static str,
}

/// `POST /api/agent/heartbeat`
pub async fn heartbeat(State(state): State<AppState>, Json(body): Json<HeartbeatBody>) -> Json<HeartbeatAck> {
    state.actions.heartbeat(&body.agent_id, "ok");
    Json(HeartbeatAck { status: "ok" })
}
