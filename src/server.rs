//! HTTP surface: multipart upload in, artifact or JSON error out.
//!
//! Routes:
//! - `POST /api/v1/convert/{tool}` — run one job
//! - `GET  /api/v1/limits?privileged=<bool>` — tier limits
//! - `GET  /health` — liveness

use crate::error::JobError;
use crate::form::{parse_flag, FormFields, KNOWN_FIELDS};
use crate::job::{JobRequest, Orchestrator};
use crate::model::{base_name, InputItem, JobOutput, Tool};
use crate::tier::TierLimits;
use axum::body::Body;
use axum::extract::{DefaultBodyLimit, Multipart, Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

/// Response header carrying the number of converted items.
pub const ITEMS_SUCCEEDED_HEADER: &str = "x-items-succeeded";
/// Response header carrying the number of isolated item failures.
pub const ITEMS_FAILED_HEADER: &str = "x-items-failed";

// ── Errors ───────────────────────────────────────────────────────────────

/// JSON error body: `{ "error": ..., "requiresUpgrade"?: bool }`.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requires_upgrade: Option<bool>,
}

/// An error on its way to becoming an HTTP response.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
    requires_upgrade: bool,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            requires_upgrade: false,
        }
    }

    /// Map a job error, hinting at an upgrade for unprivileged quota hits.
    pub fn from_job(err: JobError, privileged: bool) -> Self {
        let kind = err.kind();
        let status =
            StatusCode::from_u16(kind.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        Self {
            status,
            message: err.to_string(),
            requires_upgrade: kind.is_quota() && !privileged,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<JobError> for ApiError {
    fn from(err: JobError) -> Self {
        Self::from_job(err, false)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.message,
            requires_upgrade: self.requires_upgrade.then_some(true),
        };
        (self.status, Json(body)).into_response()
    }
}

// ── Router ───────────────────────────────────────────────────────────────

/// Build the service router around an orchestrator.
pub fn router(orchestrator: Orchestrator) -> Router {
    let body_limit = orchestrator.config().body_limit_bytes();
    Router::new()
        .route("/api/v1/convert/{tool}", post(convert))
        .route("/api/v1/limits", get(limits))
        .route("/health", get(health))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(orchestrator)
}

/// Bind the configured address and serve until Ctrl-C.
pub async fn serve(orchestrator: Orchestrator) -> Result<(), JobError> {
    let addr = orchestrator.config().bind_addr;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| JobError::Internal(format!("failed to bind to {addr}: {e}")))?;
    info!(
        %addr,
        body_limit = orchestrator.config().body_limit_bytes(),
        "Conversion service listening"
    );

    axum::serve(listener, router(orchestrator))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| JobError::Internal(format!("server error: {e}")))
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("Shutdown signal received");
    }
}

// ── Handlers ─────────────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
struct HealthResponse {
    status: String,
}

/// GET /health
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

#[derive(Debug, Deserialize)]
struct LimitsQuery {
    privileged: Option<String>,
}

/// GET /api/v1/limits
async fn limits(
    State(orchestrator): State<Orchestrator>,
    Query(query): Query<LimitsQuery>,
) -> Result<Json<TierLimits>, ApiError> {
    let privileged = match query.privileged.as_deref() {
        Some(v) => parse_flag("privileged", v)?,
        None => false,
    };
    Ok(Json(orchestrator.config().tiers.limits_for(privileged)))
}

/// POST /api/v1/convert/{tool}
async fn convert(
    State(orchestrator): State<Orchestrator>,
    Path(tool): Path<String>,
    multipart: Multipart,
) -> Result<Response, ApiError> {
    let tool: Tool = tool.parse().map_err(ApiError::bad_request)?;
    let (items, fields) = read_multipart(multipart).await?;

    let privileged = fields.privileged()?;
    let request = JobRequest {
        tool,
        privileged,
        tenant: fields.tenant(),
        items,
        options: fields
            .options_for(tool)
            .map_err(|e| ApiError::from_job(e, privileged))?,
    };

    let timeout_secs = orchestrator.config().request_timeout_secs;
    let started = Instant::now();
    let output = orchestrator
        .run_with_timeout(request, Duration::from_secs(timeout_secs))
        .await
        .map_err(|e| {
            if matches!(e, JobError::TimedOut { .. }) {
                warn!("{} job discarded after {}s timeout", tool, timeout_secs);
            }
            ApiError::from_job(e, privileged)
        })?;
    debug!("{} job answered in {:?}", tool, started.elapsed());

    artifact_response(output)
}

/// Split a multipart body into file items and text fields.
///
/// Any part with a filename is a file; everything else is a text field.
/// File parts with a blank filename (an empty file input) are dropped.
async fn read_multipart(mut multipart: Multipart) -> Result<(Vec<InputItem>, FormFields), ApiError> {
    let mut items = Vec::new();
    let mut fields = FormFields::new();

    while let Some(field) = multipart.next_field().await.map_err(|e| {
        ApiError::new(e.status(), format!("Malformed multipart body: {}", e.body_text()))
    })? {
        let name = field.name().unwrap_or_default().to_string();
        match field.file_name().map(str::to_string) {
            Some(file_name) if file_name.trim().is_empty() => {
                debug!("Skipping file part '{}' without a filename", name);
            }
            Some(file_name) => {
                let bytes = field.bytes().await.map_err(|e| {
                    ApiError::new(e.status(), format!("Failed to read '{file_name}': {}", e.body_text()))
                })?;
                items.push(InputItem::new(file_name, bytes.to_vec()));
            }
            None => {
                let value = field.text().await.map_err(|e| {
                    ApiError::new(e.status(), format!("Failed to read field '{name}': {}", e.body_text()))
                })?;
                if !KNOWN_FIELDS.contains(&name.as_str()) {
                    debug!("Ignoring unknown form field '{}'", name);
                }
                fields.insert(name, value);
            }
        }
    }

    Ok((items, fields))
}

fn artifact_response(output: JobOutput) -> Result<Response, ApiError> {
    let JobOutput { artifact, report } = output;
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, artifact.content_type)
        .header(header::CONTENT_LENGTH, artifact.bytes.len())
        .header(
            header::CONTENT_DISPOSITION,
            format!(
                "attachment; filename=\"{}\"",
                header_safe_name(&artifact.file_name)
            ),
        )
        .header(ITEMS_SUCCEEDED_HEADER, report.succeeded)
        .header(ITEMS_FAILED_HEADER, report.failed)
        .body(Body::from(artifact.bytes))
        .map_err(|e| ApiError::internal(format!("failed to build response: {e}")))
}

/// Printable ASCII only, without quotes or backslashes.
fn header_safe_name(name: &str) -> String {
    base_name(name)
        .chars()
        .map(|c| match c {
            '"' | '\\' => '_',
            c if c.is_ascii_graphic() || c == ' ' => c,
            _ => '_',
        })
        .collect()
}
