//! HTTP surface of the WebP optimizer
//!
//! `POST /optimize` accepts an upload and answers with the optimization
//! result. `GET /download/{name}` and `GET /uploads/{name}` serve published
//! artifacts through the retrieval gate. `GET /metrics` returns the run
//! counters.

use crate::encode::EncodeError;
use crate::metrics::{MetricsSnapshot, SharedMetrics};
use crate::pipeline::{OptimizationResult, Pipeline, PipelineError};
use crate::retrieve::{retrieve, RetrieveError};
use crate::startup::ensure_directories;
use crate::upload::{receive_upload, UploadError, UploadLimits};
use crate::validate::ValidationError;
use axum::body::Body;
use axum::extract::multipart::MultipartRejection;
use axum::extract::{DefaultBodyLimit, Multipart, Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use std::any::Any;
use tokio_util::io::ReaderStream;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, warn};

/// Room for multipart boundaries and the text fields on top of the file cap
const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;

const MSG_MISSING_FILE: &str = "Please upload an image file";
const MSG_UPLOAD_FAILED: &str = "Upload failed. Please try again.";
const MSG_WRONG_TYPE: &str = "Only image files (JPG, PNG, GIF, WebP) are allowed!";
const MSG_INVALID_NAME: &str = "Invalid file name";
const MSG_TRANSCODE_FAILED: &str = "Error optimizing image. Please try again.";
const MSG_INVALID_DOWNLOAD: &str = "Invalid download request";
const MSG_NOT_FOUND: &str = "File not found";
const MSG_GENERIC: &str = "Something went wrong. Please try again.";

/// Shared state handed to every handler
#[derive(Debug, Clone)]
pub struct AppState {
    pub pipeline: Pipeline,
    pub limits: UploadLimits,
    pub metrics: SharedMetrics,
}

/// Error response: a status plus a client-facing message, rendered as
/// `{"error": message}`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
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

    pub fn internal() -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, MSG_GENERIC)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::Validation(ValidationError::MissingFile) => {
                ApiError::bad_request(MSG_MISSING_FILE)
            }
            PipelineError::Validation(ValidationError::UnreadableFile { .. }) => {
                ApiError::bad_request(MSG_UPLOAD_FAILED)
            }
            PipelineError::InvalidName(_) | PipelineError::Transcode(EncodeError::InvalidName(_)) => {
                ApiError::bad_request(MSG_INVALID_NAME)
            }
            PipelineError::Transcode(_) => {
                ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, MSG_TRANSCODE_FAILED)
            }
            PipelineError::Provision(_) | PipelineError::Report(_) | PipelineError::Internal(_) => {
                ApiError::internal()
            }
        }
    }
}

impl From<UploadError> for ApiError {
    fn from(err: UploadError) -> Self {
        match err {
            UploadError::TooLarge { limit } => ApiError::bad_request(format!(
                "File is too large. Maximum size is {}MB.",
                UploadLimits {
                    max_file_bytes: limit
                }
                .max_file_mb()
            )),
            UploadError::UnsupportedType { .. } => ApiError::bad_request(MSG_WRONG_TYPE),
            UploadError::TooManyFiles | UploadError::Malformed(_) => {
                ApiError::bad_request(MSG_UPLOAD_FAILED)
            }
            UploadError::Io(_) => {
                ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, MSG_UPLOAD_FAILED)
            }
        }
    }
}

impl From<RetrieveError> for ApiError {
    fn from(err: RetrieveError) -> Self {
        match err {
            RetrieveError::InvalidName(_) => ApiError::bad_request(MSG_INVALID_DOWNLOAD),
            RetrieveError::NotFound(_) => ApiError::new(StatusCode::NOT_FOUND, MSG_NOT_FOUND),
        }
    }
}

/// Handler for POST /optimize
async fn optimize(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<OptimizationResult>, ApiError> {
    let mut multipart = multipart.map_err(|e| {
        warn!(error = %e, "Rejected non-multipart upload");
        ApiError::bad_request(MSG_MISSING_FILE)
    })?;

    let dirs = state.pipeline.dirs();
    ensure_directories(&dirs.paths()).await.map_err(|e| {
        error!(error = %e, "Failed to provision working directories");
        ApiError::internal()
    })?;

    let request = receive_upload(&mut multipart, &dirs.incoming, &state.limits)
        .await
        .map_err(|e| {
            warn!(error = %e, "Upload rejected");
            ApiError::from(e)
        })?;

    match state.pipeline.spawn(request).await {
        Ok(outcome) => outcome.map(Json).map_err(ApiError::from),
        Err(join_error) => {
            error!(error = %join_error, "Pipeline task panicked");
            Err(PipelineError::Internal(join_error.to_string()).into())
        }
    }
}

/// Handler for GET /download/*filename
async fn download(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> Result<Response, ApiError> {
    serve_artifact(&state, &filename, "attachment").await
}

/// Handler for GET /uploads/*filename
async fn view(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> Result<Response, ApiError> {
    serve_artifact(&state, &filename, "inline").await
}

async fn serve_artifact(
    state: &AppState,
    filename: &str,
    disposition: &str,
) -> Result<Response, ApiError> {
    let path = retrieve(&state.pipeline.dirs().outputs, filename)
        .await
        .map_err(|e| {
            warn!(requested = %filename, error = %e, "Artifact request refused");
            ApiError::from(e)
        })?;

    let file = tokio::fs::File::open(&path)
        .await
        .map_err(|_| ApiError::new(StatusCode::NOT_FOUND, MSG_NOT_FOUND))?;
    let length = file.metadata().await.ok().map(|m| m.len());

    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "image/webp")
        .header(
            header::CONTENT_DISPOSITION,
            format!("{}; filename=\"{}\"", disposition, filename.replace('"', "")),
        );
    if let Some(length) = length {
        builder = builder.header(header::CONTENT_LENGTH, length);
    }

    builder
        .body(Body::from_stream(ReaderStream::new(file)))
        .map_err(|e| {
            error!(error = %e, "Failed to build artifact response");
            ApiError::internal()
        })
}

/// Handler for GET /metrics
/// Returns the current MetricsSnapshot as JSON
async fn get_metrics(State(state): State<AppState>) -> Json<MetricsSnapshot> {
    let snapshot = state.metrics.read().await.clone();
    Json(snapshot)
}

async fn fallback() -> ApiError {
    ApiError::new(StatusCode::NOT_FOUND, MSG_NOT_FOUND)
}

fn handle_panic(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    error!(panic = %detail, "Request handler panicked");
    ApiError::internal().into_response()
}

/// Creates the axum Router with every endpoint and the shared layers
pub fn create_router(state: AppState) -> Router {
    let body_limit = usize::try_from(state.limits.max_file_bytes)
        .unwrap_or(usize::MAX)
        .saturating_add(MULTIPART_OVERHEAD_BYTES);

    Router::new()
        .route("/optimize", post(optimize))
        .route("/download/*filename", get(download))
        .route("/uploads/*filename", get(view))
        .route("/metrics", get(get_metrics))
        .fallback(fallback)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(CatchPanicLayer::custom(handle_panic))
        .with_state(state)
}
