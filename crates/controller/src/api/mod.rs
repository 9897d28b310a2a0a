//! HTTP surface: agent protocol routes plus the dashboard/query API,
//! mounted on a single axum `Router` shared across both.

pub mod agent;
pub mod query;

use std::time::Duration;

use axum::extract::State;
use axum::http::{HeaderValue, Method, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

#[derive(Debug, Serialize)]
struct HealthBody {
    status: &'static str,
    hosts_total: usize,
    hosts_healthy: usize,
}

async fn health(State(state): State<AppState>) -> Json<HealthBody> {
    Json(HealthBody {
        status: "ok",
        hosts_total: state.hosts.count(),
        hosts_healthy: state.hosts.healthy_count(),
    })
}

async fn readiness(State(state): State<AppState>) -> (StatusCode, Json<HealthBody>) {
    let body = HealthBody {
        status: "ready",
        hosts_total: state.hosts.count(),
        hosts_healthy: state.hosts.healthy_count(),
    };
    let code = if state.hosts.count() == 0 || state.hosts.healthy_count() > 0 {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(body))
}

pub fn build_router(state: AppState) -> Router {
    let cors = if state.config.server.enable_cors {
        let origins: Vec<HeaderValue> = state
            .config
            .server
            .cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_methods([Method::GET, Method::POST])
            .allow_headers(tower_http::cors::Any)
            .allow_origin(AllowOrigin::list(origins))
    } else {
        CorsLayer::new()
    };

    let request_timeout = state.config.write_timeout().max(Duration::from_secs(1));

    Router::new()
        .route("/healthz", get(health))
        .route("/readyz", get(readiness))
        .route("/api/agent/actions", get(agent::list_actions))
        .route("/api/agent/result", post(agent::report_result))
        .route("/api/agent/heartbeat", post(agent::heartbeat))
        .route("/api/containers", get(query::list_containers))
        .route("/api/containers/{host}/{container}/env", get(query::get_container_env))
        .route("/api/logs/search", post(query::search_logs))
        .route("/api/dashboard/summary", get(query::dashboard_summary))
        .route("/api/metrics/timeseries", get(query::resource_time_series))
        .route("/api/actions/dispatch", post(query::dispatch_action))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(request_timeout))
        .layer(axum::extract::DefaultBodyLimit::max(2 * 1024 * 1024))
        .layer(cors)
        .with_state(state)
}
