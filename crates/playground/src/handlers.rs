// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! HTTP handlers for the `/_app` management API.
//!
//! Handlers are thin: they parse the request, call the [`Orchestrator`] and
//! map its [`Error`] to a status code. Every error body is
//! `{"error": "<message>"}`.

use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, warn};

use crate::app::{AppId, AppList, AppRequest};
use crate::error::Error;
use crate::orchestrator::{Orchestrator, StartOutcome};

/// Lines of logs returned when `tail` is absent or invalid.
pub const DEFAULT_LOG_TAIL: usize = 100;

/// Management UI page.
const INDEX_HTML: &str = include_str!("../static/index.html");

/// Shared state for the HTTP handlers.
pub struct PlaygroundHandlerState {
    /// Lifecycle orchestrator
    pub orchestrator: Orchestrator,
}

impl PlaygroundHandlerState {
    pub fn new(orchestrator: Orchestrator) -> Self {
        Self { orchestrator }
    }
}

pub type SharedState = Arc<PlaygroundHandlerState>;

// ============================================================================
// Errors
// ============================================================================

/// An error response.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    fn internal(context: &str, e: Error) -> Self {
        error!(error = %e, "{}", context);
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("{}: {}", context, e),
        )
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        match e {
            Error::Validation(v) => Self::bad_request(v.message()),
            Error::Conflict(name) => Self::new(
                StatusCode::CONFLICT,
                format!("app with name '{}' already exists", name),
            ),
            Error::AppNotFound(_) => Self::new(StatusCode::NOT_FOUND, "App not found"),
            other => Self::internal("Internal error", other),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

// ============================================================================
// Extractor helpers
// ============================================================================

fn parse_app_id(raw: &str) -> ApiResult<AppId> {
    raw.parse::<AppId>()
        .map_err(|_| ApiError::bad_request("invalid app ID format"))
}

fn parse_body(payload: std::result::Result<Json<AppRequest>, JsonRejection>) -> ApiResult<AppRequest> {
    match payload {
        Ok(Json(request)) => Ok(request),
        Err(rejection) => {
            warn!(error = %rejection, "Rejected request body");
            Err(ApiError::bad_request("Invalid JSON format"))
        }
    }
}

/// Query string for log endpoints.
#[derive(Debug, Default, Deserialize)]
pub struct LogsQuery {
    pub tail: Option<String>,
}

impl LogsQuery {
    /// Requested tail, or [`DEFAULT_LOG_TAIL`] unless a positive integer was given.
    pub fn tail(&self) -> usize {
        self.tail
            .as_deref()
            .and_then(|t| t.parse::<usize>().ok())
            .filter(|t| *t > 0)
            .unwrap_or(DEFAULT_LOG_TAIL)
    }
}

fn log_tail(query: std::result::Result<Query<LogsQuery>, QueryRejection>) -> usize {
    query.map(|Query(q)| q.tail()).unwrap_or(DEFAULT_LOG_TAIL)
}

// ============================================================================
// Response bodies
// ============================================================================

/// Body of start and stop responses.
#[derive(Debug, Serialize, Deserialize)]
pub struct LifecycleResponse {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl LifecycleResponse {
    fn new(status: &str, message: Option<&str>) -> Self {
        Self {
            status: status.to_string(),
            message: message.map(str::to_string),
        }
    }
}

/// Body of log responses.
#[derive(Debug, Serialize, Deserialize)]
pub struct LogsResponse {
    pub logs: String,
}

// ============================================================================
// UI and health
// ============================================================================

/// `GET /`
pub async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

/// `GET /_app/health`
pub async fn health(State(state): State<SharedState>) -> Response {
    if state.orchestrator.store_healthy().await {
        (StatusCode::OK, Json(json!({ "status": "healthy" }))).into_response()
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "unhealthy", "error": "database unavailable" })),
        )
            .into_response()
    }
}

// ============================================================================
// Apps
// ============================================================================

/// `POST /_app`
pub async fn create_app(
    State(state): State<SharedState>,
    payload: std::result::Result<Json<AppRequest>, JsonRejection>,
) -> ApiResult<Response> {
    let request = parse_body(payload)?;
    let provisioning = state.orchestrator.create(&request).await?;
    Ok((StatusCode::CREATED, Json(provisioning.app)).into_response())
}

/// `GET /_app`
pub async fn list_apps(State(state): State<SharedState>) -> ApiResult<Json<AppList>> {
    let apps = state
        .orchestrator
        .list()
        .await
        .map_err(|e| ApiError::internal("Failed to list apps", e))?;
    let total = apps.len();
    Ok(Json(AppList { apps, total }))
}

/// `GET /_app/{id}`
pub async fn get_app(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let id = parse_app_id(&id)?;
    let app = state.orchestrator.get(id).await?;
    Ok(Json(app).into_response())
}

/// `PUT /_app/{id}`
pub async fn update_app(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    payload: std::result::Result<Json<AppRequest>, JsonRejection>,
) -> ApiResult<Response> {
    let id = parse_app_id(&id)?;
    let request = parse_body(payload)?;
    let provisioning = state.orchestrator.update(id, &request).await?;
    Ok(Json(provisioning.app).into_response())
}

/// `DELETE /_app/{id}`
pub async fn delete_app(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    let id = parse_app_id(&id)?;
    match state.orchestrator.delete(id).await {
        Ok(()) => Ok(StatusCode::NO_CONTENT),
        Err(Error::AppNotFound(id)) => Err(Error::AppNotFound(id).into()),
        Err(e) => Err(ApiError::internal("Failed to delete app", e)),
    }
}

/// `POST /_app/{id}/start`
pub async fn start_app(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let id = parse_app_id(&id)?;
    let outcome = match state.orchestrator.start(id).await {
        Ok(outcome) => outcome,
        Err(Error::AppNotFound(id)) => return Err(Error::AppNotFound(id).into()),
        Err(e) => return Err(ApiError::internal("Failed to start container", e)),
    };

    let response = match outcome {
        StartOutcome::Creating(_) => (
            StatusCode::ACCEPTED,
            Json(LifecycleResponse::new(
                "creating",
                Some("Container is being created in the background"),
            )),
        ),
        StartOutcome::AlreadyRunning => (
            StatusCode::OK,
            Json(LifecycleResponse::new(
                "already_running",
                Some("Container is already running"),
            )),
        ),
        StartOutcome::Started => (
            StatusCode::OK,
            Json(LifecycleResponse::new("started", Some("Container started"))),
        ),
    };
    Ok(response.into_response())
}

/// `POST /_app/{id}/stop`
pub async fn stop_app(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> ApiResult<Json<LifecycleResponse>> {
    let id = parse_app_id(&id)?;
    state
        .orchestrator
        .stop(id)
        .await
        .map_err(|e| ApiError::internal("Failed to stop container", e))?;
    Ok(Json(LifecycleResponse::new("stopped", None)))
}

/// `GET /_app/{id}/logs`
pub async fn app_logs(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    query: std::result::Result<Query<LogsQuery>, QueryRejection>,
) -> ApiResult<Json<LogsResponse>> {
    let id = parse_app_id(&id)?;
    let logs = state
        .orchestrator
        .logs(id, log_tail(query))
        .await
        .map_err(|e| ApiError::internal("Failed to get logs", e))?;
    Ok(Json(LogsResponse { logs }))
}

/// `GET /_app/logs`
pub async fn host_logs(
    State(state): State<SharedState>,
    query: std::result::Result<Query<LogsQuery>, QueryRejection>,
) -> ApiResult<Json<LogsResponse>> {
    let logs = state
        .orchestrator
        .host_logs(log_tail(query))
        .await
        .map_err(|e| ApiError::internal("Failed to get playground logs", e))?;
    Ok(Json(LogsResponse { logs }))
}
