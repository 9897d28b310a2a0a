//! Action queue data model — what a pull-mode agent polls for and reports
//! back, and the bookkeeping the controller keeps per agent.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    ContainerAction,
    Exec,
    GetLogs,
    GetEnv,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Expired,
}

impl ActionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, ActionStatus::Completed | ActionStatus::Failed | ActionStatus::Expired)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    pub id: String,
    pub agent_id: String,
    pub kind: ActionKind,
    pub payload: serde_json::Value,
    pub status: ActionStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub success: Option<bool>,
    pub result: Option<String>,
}

/// The wire shape an agent receives from `GET /api/agent/actions`: just
/// enough to execute, no server-side bookkeeping fields.
#[derive(Debug, Clone, Serialize)]
pub struct ActionEnvelope {
    pub id: String,
    pub kind: ActionKind,
    pub payload: serde_json::Value,
}

impl From<&Action> for ActionEnvelope {
    fn from(a: &Action) -> Self {
        ActionEnvelope { id: a.id.clone(), kind: a.kind, payload: a.payload.clone() }
    }
}

#[derive(Debug, Clone)]
pub struct AgentInfo {
    pub last_heartbeat_at: DateTime<Utc>,
    pub reported_status: String,
}

impl AgentInfo {
    pub fn online(&self, freshness_window: chrono::Duration) -> bool {
        Utc::now() - self.last_heartbeat_at < freshness_window
    }
}
