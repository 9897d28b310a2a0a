//! Query/Aggregation API: dashboard stats, container listings with
//! latest-stat join, grouped views, log search, and the action-dispatch
//! path shared between direct host clients and agent-reported hosts.

use std::collections::HashMap;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::host::ActionOutcome;
use crate::index::{DashboardSummary, LogSearchQuery, LogSearchResult, TimeSeriesByHost, TimeSeriesPoint};
use crate::model::{Container, ContainerActionKind, ContainerStatus};
use crate::queue::ActionKind;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ListContainersQuery {
    pub host: Option<String>,
    pub stack: Option<String>,
    pub status: Option<ContainerStatus>,
    pub group_by: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ContainerView {
    #[serde(flatten)]
    pub container: Container,
    pub cpu_percent: Option<f64>,
    pub memory_percent: Option<f64>,
    pub memory_usage_mb: Option<f64>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum ListContainersResponse {
    Flat(Vec<ContainerView>),
    Grouped(HashMap<String, Vec<ContainerView>>),
}

/// `GET /api/containers`
pub async fn list_containers(
    State(state): State<AppState>,
    Query(filters): Query<ListContainersQuery>,
) -> Result<Json<ListContainersResponse>, ApiError> {
    let containers = state.inventory.list().await;
    let latest = state.index.latest_container_stats().await?;

    let views: Vec<ContainerView> = containers
        .into_iter()
        .filter(|c| filters.host.as_deref().map(|h| h == c.host).unwrap_or(true))
        .filter(|c| filters.stack.as_deref().map(|s| resolve_stack_name(c) == s).unwrap_or(true))
        .filter(|c| filters.status.map(|s| s == c.status).unwrap_or(true))
        .map(|c| {
            let stat = latest.get(&c.id);
            ContainerView {
                cpu_percent: stat.map(|s| s.cpu_percent),
                memory_percent: stat.map(|s| s.memory_percent),
                memory_usage_mb: stat.map(|s| s.memory_usage_mb),
                container: c,
            }
        })
        .collect();

    let response = match filters.group_by.as_deref() {
        Some("host") => {
            let mut groups: HashMap<String, Vec<ContainerView>> = HashMap::new();
            for v in views {
                groups.entry(v.container.host.clone()).or_default().push(v);
            }
            ListContainersResponse::Grouped(groups)
        }
        Some("stack") => {
            let mut groups: HashMap<String, Vec<ContainerView>> = HashMap::new();
            for v in views {
                groups.entry(resolve_stack_name(&v.container)).or_default().push(v);
            }
            ListContainersResponse::Grouped(groups)
        }
        _ => ListContainersResponse::Flat(views),
    };

    Ok(Json(response))
}

/// Reconciles the three name sources spec.md §4.6 calls out: the
/// compose/stack labels already resolved onto `Container.stack_project`
/// when the host client built it, a parsed container-name prefix
/// (`<stack>_<service>.<replica>.<task>` / `<project>_<service>_<n>`),
/// and finally an explicit `_standalone` bucket.
fn resolve_stack_name(c: &Container) -> String {
    if let Some(project) = &c.stack_project {
        return project.clone();
    }
    let trimmed = c.name.trim_start_matches('/');
    let sep = trimmed.find(['_', '.']);
    match sep {
        Some(idx) if idx > 0 => trimmed[..idx].to_string(),
        _ => "_standalone".to_string(),
    }
}

/// `POST /api/logs/search`
pub async fn search_logs(
    State(state): State<AppState>,
    Json(query): Json<LogSearchQuery>,
) -> Result<Json<LogSearchResult>, ApiError> {
    Ok(Json(state.index.search_logs(&query).await?))
}

/// `GET /api/dashboard/summary`
pub async fn dashboard_summary(State(state): State<AppState>) -> Result<Json<DashboardSummary>, ApiError> {
    Ok(Json(state.index.dashboard_summary().await?))
}

#[derive(Debug, Deserialize)]
pub struct TimeSeriesQuery {
    pub metric: String,
    #[serde(default = "default_hours")]
    pub hours: u32,
    #[serde(default)]
    pub interval: Option<String>,
    #[serde(default)]
    pub by_host: bool,
}

fn default_hours() -> u32 {
    24
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum TimeSeriesResponse {
    Single(Vec<TimeSeriesPoint>),
    ByHost(Vec<TimeSeriesByHost>),
}

/// `GET /api/metrics/timeseries`
pub async fn resource_time_series(
    State(state): State<AppState>,
    Query(q): Query<TimeSeriesQuery>,
) -> Result<Json<TimeSeriesResponse>, ApiError> {
    let interval = q.interval.as_deref().unwrap_or("1h");
    if q.by_host {
        let series = state.index.resource_time_series_by_host(&q.metric, q.hours, interval).await?;
        Ok(Json(TimeSeriesResponse::ByHost(series)))
    } else {
        let series = state.index.resource_time_series(&q.metric, q.hours, interval).await?;
        Ok(Json(TimeSeriesResponse::Single(series)))
    }
}

#[derive(Debug, Deserialize)]
pub struct DispatchActionRequest {
    pub host: String,
    pub container: String,
    pub action: ContainerActionKind,
    pub timeout_secs: Option<u32>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum DispatchActionResponse {
    Direct { ok: bool, message: String },
    Queued { action_id: String, success: Option<bool>, output: Option<String> },
}

/// `POST /api/actions/dispatch`. Routes through the manager's client when
/// the target host is configured to route through it (Swarm workers
/// without direct reachability); otherwise calls the host directly. Hosts
/// absent from the static/discovered pool but present in the action
/// queue's agent table are agent-reported — dispatched as a queued action
/// instead, per §12 decision 3.
pub async fn dispatch_action(
    State(state): State<AppState>,
    Json(body): Json<DispatchActionRequest>,
) -> Result<Json<DispatchActionResponse>, ApiError> {
    if let Some(entry) = state.hosts.get(&body.host) {
        let client = if entry.route_through_this_manager {
            state.hosts.manager().map(|m| m.client.clone()).unwrap_or_else(|| entry.client.clone())
        } else {
            entry.client.clone()
        };
        let ActionOutcome { ok, message } = client.execute_action(&body.container, body.action, body.timeout_secs).await?;
        return Ok(Json(DispatchActionResponse::Direct { ok, message }));
    }

    let freshness = Duration::from_secs(state.config.actions.agent_freshness_window_secs);
    if !state.actions.is_online(&body.host, freshness) {
        return Err(ApiError::HostUnreachable(body.host));
    }

    let payload = serde_json::json!({
        "container_id": body.container,
        "action": body.action,
        "timeout_secs": body.timeout_secs,
    });
    let action = state.actions.create(&body.host, ActionKind::ContainerAction, payload);
    let wait = Duration::from_secs(state.config.actions.default_wait_timeout_secs);
    let result = state
        .actions
        .wait_for(&action.id, wait)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    Ok(Json(DispatchActionResponse::Queued {
        action_id: result.id,
        success: result.success,
        output: result.result,
    }))
}

/// `GET /api/containers/:host/:container/env`
pub async fn get_container_env(
    State(state): State<AppState>,
    Path((host, container)): Path<(String, String)>,
) -> Result<Json<HashMap<String, String>>, ApiError> {
    if let Some(entry) = state.hosts.get(&host) {
        let client = if entry.route_through_this_manager {
            state.hosts.manager().map(|m| m.client.clone()).unwrap_or_else(|| entry.client.clone())
        } else {
            entry.client.clone()
        };

        if let Ok((true, out)) = client.exec(&container, vec!["printenv".to_string()]).await {
            return Ok(Json(parse_env_lines(&out)));
        }

        // Unreachable directly (e.g. a swarm worker's container behind a
        // proxy client): fall back to the owning service's spec Env.
        let tasks = client.swarm_tasks().await.unwrap_or_default();
        let service_id = tasks.into_iter().find(|t| t.container_id.as_deref() == Some(container.as_str())).map(|t| t.service_id);
        if let Some(service_id) = service_id {
            let services = client.swarm_services().await.unwrap_or_default();
            if let Some(service) = services.into_iter().find(|s| s.id == service_id) {
                return Ok(Json(parse_env_lines(&service.env.join("\n"))));
            }
        }

        return Err(ApiError::HostUnreachable(format!("{host}/{container} has no reachable env source")));
    }

    let freshness = Duration::from_secs(state.config.actions.agent_freshness_window_secs);
    if !state.actions.is_online(&host, freshness) {
        return Err(ApiError::HostUnreachable(host));
    }

    let payload = serde_json::json!({ "container_id": container });
    let action = state.actions.create(&host, ActionKind::GetEnv, payload);
    let wait = Duration::from_secs(state.config.actions.default_wait_timeout_secs);
    let result = state
        .actions
        .wait_for(&action.id, wait)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    match result.success {
        Some(true) => Ok(Json(parse_env_lines(&result.result.unwrap_or_default()))),
        _ => Err(ApiError::HostUnreachable(format!("{host}/{container} env fetch failed: {}", result.result.unwrap_or_default()))),
    }
}

fn parse_env_lines(raw: &str) -> HashMap<String, String> {
    raw.lines()
        .filter_map(|line| line.split_once('='))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ContainerStatus;
    use chrono::Utc;

    fn container(name: &str, stack_project: Option<&str>) -> Container {
        Container {
            id: "abc123".to_string(),
            name: name.to_string(),
            image: "nginx".to_string(),
            status: ContainerStatus::Running,
            created_at: Utc::now(),
            host: "mgr".to_string(),
            stack_project: stack_project.map(String::from),
            stack_service: None,
            ports: Vec::new(),
            labels: HashMap::new(),
            task_id: None,
        }
    }

    #[test]
    fn resolve_stack_name_prefers_label_over_parsed_name() {
        let c = container("web_app_1", Some("web"));
        assert_eq!(resolve_stack_name(&c), "web");
    }

    #[test]
    fn resolve_stack_name_parses_prefix_when_no_label() {
        let c = container("web_app_1", None);
        assert_eq!(resolve_stack_name(&c), "web");
    }

    #[test]
    fn resolve_stack_name_falls_back_to_standalone() {
        let c = container("registry", None);
        assert_eq!(resolve_stack_name(&c), "_standalone");
    }
}
