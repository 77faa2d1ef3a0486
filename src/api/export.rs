use super::{AppError, AppState};
use crate::auth::resolve_credential;
use crate::config::split_csv;
use crate::export::{ExportJob, JobState, ManifestEntry, TrackedJob};
use axum::{
    extract::{Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Json, Response},
};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Deserialize)]
pub struct StartParams {
    token: Option<String>,
    /// Comma-separated override of the configured resource types
    #[serde(rename = "_type")]
    types: Option<String>,
}

#[derive(Deserialize)]
pub struct StatusParams {
    job_status_url: String,
    token: Option<String>,
}

#[derive(Deserialize)]
pub struct JobsParams {
    token: Option<String>,
}

#[derive(Serialize)]
struct StartResponse {
    job_status_url: String,
    status: String,
}

/// Status body: `{status}` while running, `{status, output}` once completed,
/// `{status, error, status_code}` once failed.
#[derive(Serialize)]
struct StatusResponse<'a> {
    status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    output: Option<&'a [ManifestEntry]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    status_code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    progress: Option<String>,
}

#[derive(Serialize)]
pub struct JobsResponse {
    jobs: Vec<TrackedJob>,
}

/// GET /export/start
///
/// Kicks off a bulk export with the caller's provider token and records the job.
pub(super) async fn start_export(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<StartParams>,
) -> Result<Response, AppError> {
    let credential = resolve_credential(&headers, params.token.as_deref())
        .map_err(|e| AppError::Unauthorized(e.to_string()))?;

    let resource_types = match params.types.as_deref() {
        Some(csv) => split_csv(csv),
        None => state.config.export.resource_types.clone(),
    };

    let job = state
        .initiator
        .start_export(&credential, &resource_types)
        .await?;
    let job = state.registry.record(&credential.fingerprint(), job);

    info!(job = %job.polling_location(), "Export started");

    let mut response = (
        StatusCode::ACCEPTED,
        Json(StartResponse {
            job_status_url: job.polling_location().to_string(),
            status: job.state().to_string(),
        }),
    )
        .into_response();
    if let Ok(value) = HeaderValue::from_str(job.polling_location()) {
        response.headers_mut().insert(header::CONTENT_LOCATION, value);
    }
    Ok(response)
}

/// GET /export/status
///
/// One poll of the job. Terminal results already on record for the same bearer
/// are served without contacting the provider; any other caller polls with its
/// own token.
pub(super) async fn check_status(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<StatusParams>,
) -> Result<Response, AppError> {
    let credential = resolve_credential(&headers, params.token.as_deref())
        .map_err(|e| AppError::Unauthorized(e.to_string()))?;

    if !is_http_url(&params.job_status_url) {
        return Err(AppError::BadRequest(
            "job_status_url must be an absolute http(s) URL".to_string(),
        ));
    }

    let owner = credential.fingerprint();
    let known = state
        .registry
        .get(&owner, &params.job_status_url)
        .unwrap_or_else(|| ExportJob::new(params.job_status_url.clone()));

    if known.is_terminal() {
        debug!(job = %known.polling_location(), "Serving recorded terminal result");
        return Ok(status_response(&known, None, None));
    }

    let step = state.poller.poll_step(&known, &credential).await?;
    let job = state.registry.record(&owner, step.job);

    Ok(status_response(&job, step.retry_after, step.progress))
}

/// GET /export/jobs
///
/// Jobs recorded for the calling bearer only.
pub(super) async fn list_jobs(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<JobsParams>,
) -> Result<Json<JobsResponse>, AppError> {
    let credential = resolve_credential(&headers, params.token.as_deref())
        .map_err(|e| AppError::Unauthorized(e.to_string()))?;

    Ok(Json(JobsResponse {
        jobs: state.registry.list(&credential.fingerprint()),
    }))
}

fn status_response(
    job: &ExportJob,
    retry_after: Option<Duration>,
    progress: Option<String>,
) -> Response {
    let (status, body) = match job.state() {
        JobState::Pending | JobState::InProgress => (
            StatusCode::ACCEPTED,
            StatusResponse {
                status: JobState::InProgress.to_string(),
                output: None,
                error: None,
                status_code: None,
                progress: progress.clone(),
            },
        ),
        JobState::Completed { manifest } => (
            StatusCode::OK,
            StatusResponse {
                status: job.state().to_string(),
                output: Some(manifest),
                error: None,
                status_code: None,
                progress: None,
            },
        ),
        JobState::Failed(detail) => (
            StatusCode::BAD_GATEWAY,
            StatusResponse {
                status: job.state().to_string(),
                output: None,
                error: Some(&detail.body),
                status_code: Some(detail.status_code),
                progress: None,
            },
        ),
    };

    let mut response = (status, Json(body)).into_response();
    if let Some(delay) = retry_after {
        response
            .headers_mut()
            .insert(header::RETRY_AFTER, HeaderValue::from(delay.as_secs()));
    }
    if let Some(value) = progress.and_then(|p| HeaderValue::from_str(&p).ok()) {
        response.headers_mut().insert("x-progress", value);
    }
    response
}

fn is_http_url(value: &str) -> bool {
    Url::parse(value)
        .map(|u| matches!(u.scheme(), "http" | "https") && u.has_host())
        .unwrap_or(false)
}
