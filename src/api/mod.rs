//! HTTP host for the four logical operations.
//!
//! | Route | Operation |
//! |---|---|
//! | `GET /` | build-redirect |
//! | `GET /callback` | exchange-code |
//! | `GET /export/start` | start-export |
//! | `GET /export/status` | poll-status |
//! | `GET /export/jobs` | last-known jobs of the calling bearer |
//!
//! The host owns everything stateful: anti-forgery states and the job registry.
//! The clients it wraps are stateless per call.

mod export;
mod launch;

use crate::config::SmartBulkConfig;
use crate::error::{AuthError, ExportError, TransportError};
use crate::export::{ExportInitiator, ExportPoller, JobRegistry};
use crate::oauth::{StateManager, TokenExchanger};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use reqwest::Client;
use serde::Serialize;
use std::sync::Arc;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<SmartBulkConfig>,
    pub exchanger: TokenExchanger,
    pub initiator: ExportInitiator,
    pub poller: ExportPoller,
    pub state_manager: StateManager,
    pub registry: Arc<JobRegistry>,
}

impl AppState {
    pub fn new(config: SmartBulkConfig, http_client: Client) -> Self {
        Self {
            exchanger: TokenExchanger::new(http_client.clone(), &config),
            initiator: ExportInitiator::new(http_client.clone(), &config),
            poller: ExportPoller::new(http_client),
            state_manager: StateManager::new(config.server.state_expiry_seconds),
            registry: Arc::new(JobRegistry::new()),
            config: Arc::new(config),
        }
    }
}

/// Create the application router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(launch::launch_auth))
        .route("/callback", get(launch::handle_callback))
        .route("/export/start", get(export::start_export))
        .route("/export/status", get(export::check_status))
        .route("/export/jobs", get(export::list_jobs))
        .with_state(Arc::new(state))
}

/// Error response
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    status_code: Option<u16>,
}

/// Application error types for the host endpoints
#[derive(Debug)]
pub(crate) enum AppError {
    BadRequest(String),
    Unauthorized(String),
    /// Provider answered with a rejection; body forwarded verbatim
    Upstream { status_code: u16, body: String },
    BadGateway(String),
    GatewayTimeout(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error, status_code) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg, None),
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg, None),
            AppError::Upstream { status_code, body } => {
                (StatusCode::BAD_GATEWAY, body, Some(status_code))
            }
            AppError::BadGateway(msg) => (StatusCode::BAD_GATEWAY, msg, None),
            AppError::GatewayTimeout(msg) => (StatusCode::GATEWAY_TIMEOUT, msg, None),
        };

        (status, Json(ErrorResponse { error, status_code })).into_response()
    }
}

fn transport_error(err: TransportError) -> AppError {
    if err.timeout {
        AppError::GatewayTimeout(err.to_string())
    } else {
        AppError::BadGateway(err.to_string())
    }
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::MissingCode => {
                AppError::BadRequest("Authorization code not provided.".to_string())
            }
            AuthError::UpstreamRejected { status_code, body } => {
                AppError::Upstream { status_code, body }
            }
            AuthError::MissingAccessToken { .. } | AuthError::InvalidTokenResponse { .. } => {
                AppError::BadGateway(err.to_string())
            }
            AuthError::Transport(e) => transport_error(e),
        }
    }
}

impl From<ExportError> for AppError {
    fn from(err: ExportError) -> Self {
        match err {
            ExportError::KickoffRejected { status_code, body }
            | ExportError::PollFailed { status_code, body } => {
                AppError::Upstream { status_code, body }
            }
            ExportError::MissingPollingLocation => AppError::BadGateway(err.to_string()),
            ExportError::DeadlineExceeded { .. } => AppError::GatewayTimeout(err.to_string()),
            ExportError::Transport(e) => transport_error(e),
        }
    }
}
