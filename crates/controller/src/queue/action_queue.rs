//! In-memory action queue: the controller's side of the pull-mode agent
//! protocol. Process-local, no persistence across restarts — mirrors the
//! teacher's preference for an in-process `AppState` over external
//! coordination for anything that doesn't need to survive a restart.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::Notify;
use uuid::Uuid;

use super::types::{Action, ActionEnvelope, ActionKind, ActionStatus, AgentInfo};
use crate::error::ActionError;

struct Inner {
    actions: HashMap<String, Action>,
    agents: HashMap<String, AgentInfo>,
    signals: HashMap<String, Arc<Notify>>,
}

pub struct ActionQueue {
    inner: Mutex<Inner>,
    action_timeout: Duration,
}

impl ActionQueue {
    pub fn new(action_timeout: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner { actions: HashMap::new(), agents: HashMap::new(), signals: HashMap::new() }),
            action_timeout,
        }
    }

    pub fn create(&self, agent_id: &str, kind: ActionKind, payload: serde_json::Value) -> Action {
        let action = Action {
            id: Uuid::new_v4().to_string(),
            agent_id: agent_id.to_string(),
            kind,
            payload,
            status: ActionStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            success: None,
            result: None,
        };
        let mut inner = self.inner.lock();
        inner.signals.insert(action.id.clone(), Arc::new(Notify::new()));
        inner.actions.insert(action.id.clone(), action.clone());
        action
    }

    /// Returns every action newly transitioned to `in_progress` for this
    /// agent, expiring any pending or in-progress action past the
    /// configured timeout along the way.
    pub fn poll(&self, agent_id: &str) -> Vec<ActionEnvelope> {
        let mut inner = self.inner.lock();
        let now = Utc::now();
        let timeout = chrono::Duration::from_std(self.action_timeout).unwrap_or(chrono::Duration::seconds(60));

        let mut ready = Vec::new();
        for action in inner.actions.values_mut() {
            if action.agent_id != agent_id {
                continue;
            }
            match action.status {
                ActionStatus::Pending => {
                    if now - action.created_at > timeout {
                        action.status = ActionStatus::Expired;
                        action.completed_at = Some(now);
                    } else {
                        action.status = ActionStatus::InProgress;
                        action.started_at = Some(now);
                        ready.push(ActionEnvelope::from(&*action));
                    }
                }
                ActionStatus::InProgress => {
                    if let Some(started) = action.started_at {
                        if now - started > timeout {
                            action.status = ActionStatus::Expired;
                            action.completed_at = Some(now);
                        }
                    }
                }
                _ => {}
            }
        }
        ready
    }

    /// Records a terminal result. Late completions on an already-expired
    /// action are recorded (result/success are kept for inspection) but
    /// never flip the status back to completed/failed.
    pub fn complete(&self, id: &str, success: bool, output: String) -> Result<Action, ActionError> {
        let (action, notify) = {
            let mut inner = self.inner.lock();
            let action = inner.actions.get_mut(id).ok_or_else(|| ActionError::NotFound(id.to_string()))?;
            action.success = Some(success);
            action.result = Some(output);
            if !action.status.is_terminal() {
                action.status = if success { ActionStatus::Completed } else { ActionStatus::Failed };
                action.completed_at = Some(Utc::now());
            }
            let snapshot = action.clone();
            let notify = inner.signals.get(id).cloned();
            (snapshot, notify)
        };
        if let Some(notify) = notify {
            notify.notify_waiters();
        }
        Ok(action)
    }

    /// Blocks until the action reaches a terminal state or `timeout`
    /// elapses, returning the current snapshot either way.
    pub async fn wait_for(&self, id: &str, timeout: Duration) -> Result<Action, ActionError> {
        let notify = {
            let inner = self.inner.lock();
            if let Some(action) = inner.actions.get(id) {
                if action.status.is_terminal() {
                    return Ok(action.clone());
                }
            } else {
                return Err(ActionError::NotFound(id.to_string()));
            }
            inner.signals.get(id).cloned()
        };

        if let Some(notify) = notify {
            let _ = tokio::time::timeout(timeout, notify.notified()).await;
        }

        let inner = self.inner.lock();
        inner.actions.get(id).cloned().ok_or_else(|| ActionError::NotFound(id.to_string()))
    }

    pub fn heartbeat(&self, agent_id: &str, status: impl Into<String>) {
        let mut inner = self.inner.lock();
        inner
            .agents
            .entry(agent_id.to_string())
            .and_modify(|a| {
                a.last_heartbeat_at = Utc::now();
                a.reported_status = status.into();
            })
            .or_insert_with(|| AgentInfo { last_heartbeat_at: Utc::now(), reported_status: "unknown".to_string() });
    }

    pub fn is_online(&self, agent_id: &str, freshness: Duration) -> bool {
        let inner = self.inner.lock();
        let window = chrono::Duration::from_std(freshness).unwrap_or(chrono::Duration::seconds(30));
        inner.agents.get(agent_id).map(|a| a.online(window)).unwrap_or(false)
    }

    pub fn cleanup_old_actions(&self, max_age: Duration) -> usize {
        let mut inner = self.inner.lock();
        let cutoff = Utc::now() - chrono::Duration::from_std(max_age).unwrap_or(chrono::Duration::days(1));
        let stale: Vec<String> = inner
            .actions
            .values()
            .filter(|a| a.status.is_terminal() && a.completed_at.map(|t| t < cutoff).unwrap_or(false))
            .map(|a| a.id.clone())
            .collect();
        for id in &stale {
            inner.actions.remove(id);
            inner.signals.remove(id);
        }
        stale.len()
    }

    pub fn get(&self, id: &str) -> Option<Action> {
        self.inner.lock().actions.get(id).cloned()
    }

    pub fn agent_info(&self, agent_id: &str) -> Option<DateTime<Utc>> {
        self.inner.lock().agents.get(agent_id).map(|a| a.last_heartbeat_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_then_poll_transitions_to_in_progress() {
        let q = ActionQueue::new(Duration::from_secs(60));
        let action = q.create("agent-1", ActionKind::GetEnv, serde_json::json!({}));
        let polled = q.poll("agent-1");
        assert_eq!(polled.len(), 1);
        assert_eq!(polled[0].id, action.id);
        assert_eq!(q.get(&action.id).unwrap().status, ActionStatus::InProgress);
    }

    #[tokio::test]
    async fn poll_does_not_return_an_action_twice() {
        let q = ActionQueue::new(Duration::from_secs(60));
        q.create("agent-1", ActionKind::Exec, serde_json::json!({}));
        assert_eq!(q.poll("agent-1").len(), 1);
        assert_eq!(q.poll("agent-1").len(), 0);
    }

    #[tokio::test]
    async fn complete_resolves_wait_for() {
        let q = Arc::new(ActionQueue::new(Duration::from_secs(60)));
        let action = q.create("agent-1", ActionKind::GetLogs, serde_json::json!({}));
        q.poll("agent-1");

        let q2 = q.clone();
        let id = action.id.clone();
        let waiter = tokio::spawn(async move { q2.wait_for(&id, Duration::from_secs(5)).await });

        tokio::task::yield_now().await;
        q.complete(&action.id, true, "ok".to_string()).unwrap();

        let result = waiter.await.unwrap().unwrap();
        assert_eq!(result.status, ActionStatus::Completed);
        assert_eq!(result.result.as_deref(), Some("ok"));
    }

    #[tokio::test]
    async fn late_completion_on_expired_action_does_not_resurrect_it() {
        let q = ActionQueue::new(Duration::from_millis(0));
        let action = q.create("agent-1", ActionKind::Exec, serde_json::json!({}));
        tokio::time::sleep(Duration::from_millis(5)).await;
        q.poll("agent-1");
        assert_eq!(q.get(&action.id).unwrap().status, ActionStatus::Expired);

        q.complete(&action.id, true, "too late".to_string()).unwrap();
        assert_eq!(q.get(&action.id).unwrap().status, ActionStatus::Expired);
        assert_eq!(q.get(&action.id).unwrap().result.as_deref(), Some("too late"));
    }

    #[tokio::test]
    async fn is_online_respects_freshness_window() {
        let q = ActionQueue::new(Duration::from_secs(60));
        assert!(!q.is_online("agent-1", Duration::from_secs(30)));
        q.heartbeat("agent-1", "ok");
        assert!(q.is_online("agent-1", Duration::from_secs(30)));
    }

    #[tokio::test]
    async fn cleanup_drops_old_terminal_actions_only() {
        let q = ActionQueue::new(Duration::from_secs(60));
        let action = q.create("agent-1", ActionKind::Exec, serde_json::json!({}));
        q.poll("agent-1");
        q.complete(&action.id, true, "done".to_string()).unwrap();
        assert_eq!(q.cleanup_old_actions(Duration::from_secs(0)), 1);
        assert!(q.get(&action.id).is_none());
    }
}
