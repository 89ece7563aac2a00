//! HTTP request handlers for the pictor API.
//!
//! # Endpoints
//!
//! - `GET /` - Service and engine versions
//! - `GET /health` - Health check with uptime
//! - `GET /form` - Demo upload forms
//! - `GET|POST /{operation}` - Transform an image
//! - `POST /dzsave` - Submit a tile pyramid job
//! - `GET /dzsave/{job_id}` - Tile job status

use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::Bytes,
    extract::{Path, Query, Request, State},
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    response::{Html, IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::{debug, error, warn};

use crate::error::{ServiceError, StorageError};
use crate::format::{resolve_output, validate_image};
use crate::source::{SourceParams, SourceResolver};
use crate::storage::ProviderFactory;
use crate::tiling::{JobId, JobStatus, JobTicket, TileJobQueue, TileJobRequest, TileJobSpec};
use crate::transform::{
    DispatchOutcome, ImageOptions, Operation, TransformDispatcher, TransformEngine,
    TransformRequest,
};

use super::form::generate_form_html;

/// Default limit for inline request bodies (32 MiB).
pub const DEFAULT_MAX_BODY_SIZE: usize = 32 * 1024 * 1024;

// =============================================================================
// Application State
// =============================================================================

/// Shared application state.
///
/// This is passed to all handlers via Axum's State extractor.
#[derive(Clone)]
pub struct AppState {
    /// Resolves request inputs against storage backends
    pub resolver: SourceResolver,

    /// Runs transformations and routes their output
    pub dispatcher: TransformDispatcher,

    /// Background tile pyramid jobs
    pub jobs: TileJobQueue,

    /// Process start, for uptime reporting
    pub started_at: Instant,

    /// Largest accepted inline body in bytes
    pub max_body_size: usize,
}

impl AppState {
    /// Create a new application state.
    pub fn new(
        factory: Arc<dyn ProviderFactory>,
        engine: Arc<dyn TransformEngine>,
        jobs: TileJobQueue,
    ) -> Self {
        Self {
            resolver: SourceResolver::new(factory),
            dispatcher: TransformDispatcher::new(engine),
            jobs,
            started_at: Instant::now(),
            max_body_size: DEFAULT_MAX_BODY_SIZE,
        }
    }

    /// Set the instant uptime is measured from.
    pub fn with_started_at(mut self, started_at: Instant) -> Self {
        self.started_at = started_at;
        self
    }

    /// Set the inline body limit.
    pub fn with_max_body_size(mut self, max_body_size: usize) -> Self {
        self.max_body_size = max_body_size;
        self
    }
}

// =============================================================================
// Response Types
// =============================================================================

/// JSON error response returned for all error conditions.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error type identifier (e.g., "not_found", "missing_source")
    pub error: String,

    /// Human-readable error message
    pub message: String,

    /// HTTP status code (included for convenience)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

impl ErrorResponse {
    /// Create a new error response with status code.
    pub fn with_status(
        error: impl Into<String>,
        message: impl Into<String>,
        status: StatusCode,
    ) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            status: Some(status.as_u16()),
        }
    }
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Service status
    pub status: String,

    /// Service version
    pub version: String,

    /// Seconds since the service started
    pub uptime: u64,

    /// Number of CPUs available to the process
    pub cpus: usize,
}

/// Version report served at `/`.
#[derive(Debug, Serialize)]
pub struct VersionsResponse {
    pub pictor: String,
    pub engine: String,
}

// =============================================================================
// Error Mapping
// =============================================================================

impl ServiceError {
    /// HTTP status and error type identifier for this error.
    pub fn status_and_type(&self) -> (StatusCode, &'static str) {
        match self {
            ServiceError::MissingSource(_) => (StatusCode::BAD_REQUEST, "missing_source"),
            ServiceError::MissingOutputKey(_) => (StatusCode::BAD_REQUEST, "missing_output_key"),
            ServiceError::UnsupportedMediaType(_) => {
                (StatusCode::UNSUPPORTED_MEDIA_TYPE, "unsupported_media_type")
            }
            ServiceError::InvalidOutputFormat(_) => {
                (StatusCode::BAD_REQUEST, "invalid_output_format")
            }
            ServiceError::InvalidParameters(_) => (StatusCode::BAD_REQUEST, "invalid_parameters"),
            ServiceError::Transform(_) => (StatusCode::BAD_REQUEST, "transform_error"),
            ServiceError::OverlayDownload(_) => (StatusCode::BAD_REQUEST, "overlay_download_error"),

            ServiceError::Storage(storage) => match storage {
                StorageError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
                StorageError::Connection(_) => (StatusCode::BAD_GATEWAY, "connection_error"),
                StorageError::Remote(_) | StorageError::Config(_) => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "storage_error")
                }
            },

            ServiceError::UnknownOperation(_) | ServiceError::JobNotFound(_) => {
                (StatusCode::NOT_FOUND, "not_found")
            }
            ServiceError::MethodNotAllowed(_) => {
                (StatusCode::METHOD_NOT_ALLOWED, "method_not_allowed")
            }
            ServiceError::MalformedRequestBody(_) => {
                (StatusCode::NOT_ACCEPTABLE, "malformed_request_body")
            }
            ServiceError::QueueFull => (StatusCode::SERVICE_UNAVAILABLE, "queue_full"),
        }
    }
}

/// Convert ServiceError to HTTP response.
///
/// This implementation logs errors appropriately based on their severity:
/// - 4xx errors are logged at WARN level (client errors)
/// - 5xx errors are logged at ERROR level (server errors)
impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let (status, error_type) = self.status_and_type();
        let message = self.to_string();

        // Log errors based on severity
        if status.is_server_error() {
            error!(
                error_type = error_type,
                status = status.as_u16(),
                "Server error: {}",
                message
            );
        } else if status == StatusCode::NOT_FOUND {
            // Log 404s at debug level (common and expected)
            debug!(
                error_type = error_type,
                status = status.as_u16(),
                "Resource not found: {}",
                message
            );
        } else {
            warn!(
                error_type = error_type,
                status = status.as_u16(),
                "Client error: {}",
                message
            );
        }

        let error_response = ErrorResponse::with_status(error_type, message, status);

        (status, Json(error_response)).into_response()
    }
}

// =============================================================================
// Handlers
// =============================================================================

/// Handle `/` requests.
pub async fn versions_handler(State(state): State<AppState>) -> Json<VersionsResponse> {
    Json(VersionsResponse {
        pictor: env!("CARGO_PKG_VERSION").to_string(),
        engine: state.dispatcher.engine().version(),
    })
}

/// Health check endpoint.
pub async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime: state.started_at.elapsed().as_secs(),
        cpus: std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1),
    })
}

/// Serve the demo upload page.
pub async fn form_handler() -> Html<String> {
    Html(generate_form_html())
}

/// Handle `/{operation}` transform requests.
///
/// # Pipeline
///
/// 1. Parse backend and transformation parameters from the query string
/// 2. Resolve the input (storage backend or request body)
/// 3. Validate the input media type
/// 4. Choose the output format (`type`, possibly negotiated from `Accept`)
/// 5. Transform and route the output (storage destination or inline)
///
/// When the output format was negotiated, the response carries
/// `Vary: Accept`, including when the transformation fails.
pub async fn image_handler(
    State(state): State<AppState>,
    Path(operation): Path<String>,
    request: Request,
) -> Response {
    match transform_image(&state, &operation, request).await {
        Ok(response) => response,
        Err(e) => e.into_response(),
    }
}

async fn transform_image(
    state: &AppState,
    operation: &str,
    request: Request,
) -> Result<Response, ServiceError> {
    let operation: Operation = operation
        .parse()
        .map_err(|_| ServiceError::UnknownOperation(operation.to_string()))?;

    let params = SourceParams::from_parts(request.uri(), request.headers())?;
    let Query(options) = Query::<ImageOptions>::try_from_uri(request.uri())
        .map_err(|e| ServiceError::InvalidParameters(e.body_text()))?;
    let accept = request
        .headers()
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let source = state
        .resolver
        .resolve(&params, request, state.max_body_size)
        .await?;

    let media_type = validate_image(&source.data)?;
    debug!(operation = %operation, media_type, size = source.data.len(), "Input validated");

    let negotiated = resolve_output(options.output_type.as_deref(), accept.as_deref())?;
    let transform = TransformRequest::new(source.data, operation, options)
        .with_output_format(negotiated.format);

    let outcome = match state
        .dispatcher
        .dispatch(transform, source.backend.as_ref())
        .await
    {
        Ok(outcome) => outcome,
        Err(e) => {
            let mut response = e.into_response();
            if negotiated.vary_accept {
                response
                    .headers_mut()
                    .insert(header::VARY, HeaderValue::from_static("Accept"));
            }
            return Ok(response);
        }
    };

    match outcome {
        DispatchOutcome::Stored(_) => Ok(StatusCode::OK.into_response()),
        DispatchOutcome::Inline(output) => {
            let mut headers = HeaderMap::new();
            headers.insert(
                header::CONTENT_TYPE,
                HeaderValue::from_str(&output.mime)
                    .unwrap_or(HeaderValue::from_static("application/octet-stream")),
            );
            headers.insert(header::CONTENT_LENGTH, HeaderValue::from(output.body.len()));
            if negotiated.vary_accept {
                headers.insert(header::VARY, HeaderValue::from_static("Accept"));
            }
            Ok((StatusCode::OK, headers, output.body).into_response())
        }
    }
}

/// Submit a tile pyramid job.
///
/// Only `POST` is accepted. The `pending` marker is written before the
/// response is sent; the rest of the job runs in the background.
///
/// # Response
///
/// `202 Accepted` with `{ "jobId", "container", "statusKey" }`.
pub async fn dzsave_handler(
    State(state): State<AppState>,
    method: Method,
    body: Bytes,
) -> Result<(StatusCode, Json<JobTicket>), ServiceError> {
    if method != Method::POST {
        return Err(ServiceError::MethodNotAllowed(method.to_string()));
    }

    let request: TileJobRequest = serde_json::from_slice(&body).map_err(|e| {
        ServiceError::MalformedRequestBody(format!("error unmarshalling data: {}", e))
    })?;
    let spec = TileJobSpec::normalize(request)?;
    let ticket = state.jobs.submit(spec).await?;

    Ok((StatusCode::ACCEPTED, Json(ticket)))
}

/// Report the status of a tile job.
pub async fn job_status_handler(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<JobStatus>, ServiceError> {
    let id: JobId = job_id
        .parse()
        .map_err(|_| ServiceError::JobNotFound(job_id.clone()))?;

    state
        .jobs
        .status(id)
        .await
        .map(Json)
        .ok_or(ServiceError::JobNotFound(job_id))
}

// =============================================================================
// Tests
// =============================================================================
