//! Error taxonomy. Each component boundary gets one `thiserror` enum; the
//! binary edge collapses everything into `anyhow::Result`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Errors a `HostClient` implementation can return. Maps onto the §7
/// taxonomy: transient I/O, not-found/config, remote-unreachable.
#[derive(Debug, Error)]
pub enum HostClientError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    #[error("container not found: {0}")]
    ContainerNotFound(String),
    #[error("permission denied")]
    PermissionDenied,
    #[error("unsupported log driver: {0}")]
    UnsupportedLogDriver(String),
    #[error("host is not a swarm manager")]
    NotSwarmManager,
    #[error("host unreachable: {0}")]
    Unreachable(String),
    #[error("daemon rejected the request: {0}")]
    DaemonRejected(String),
}

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("indexing store connection failed: {0}")]
    Connection(String),
    #[error("indexing store rejected the request: {0}")]
    BackendRejected(String),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum ActionError {
    #[error("action not found: {0}")]
    NotFound(String),
    #[error("action already terminal: {0}")]
    AlreadyTerminal(String),
}

/// Errors surfaced by the HTTP query/agent API.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("container not found: {0}")]
    ContainerNotFound(String),
    #[error("host unreachable: {0}")]
    HostUnreachable(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<HostClientError> for ApiError {
    fn from(e: HostClientError) -> Self {
        match e {
            HostClientError::ContainerNotFound(id) => ApiError::ContainerNotFound(id),
            HostClientError::Unreachable(msg) | HostClientError::ConnectionFailed(msg) => {
                ApiError::HostUnreachable(msg)
            }
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<IndexError> for ApiError {
    fn from(e: IndexError) -> Self {
        ApiError::Internal(e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::ContainerNotFound(_) => StatusCode::NOT_FOUND,
            ApiError::HostUnreachable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if matches!(self, ApiError::Internal(_)) {
            tracing::error!(error = %self, "internal error");
        }
        (status, self.to_string()).into_response()
    }
}
