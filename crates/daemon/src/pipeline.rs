//! Pipeline module for the WebP optimizer
//!
//! Drives one upload through validation, parameter clamping, transcoding and
//! size reporting, then deletes the temporary input no matter how the run
//! ended.

use crate::cleanup::TempUpload;
use crate::encode::{run_transcode, EncodeError, OutputArtifact, WebpEncodeParams};
use crate::metrics::{RunMetrics, SharedMetrics};
use crate::params::{clamp_parameters, TransformParameters};
use crate::sanitize::{output_base, SanitizeError};
use crate::size_report::{report_sizes, SizeReport};
use crate::startup::{ensure_directories, StartupError, WorkDirs};
use crate::validate::{validate_input, ValidationError};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Error type for pipeline runs
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Working directories could not be (re)created
    #[error("Directory provisioning failed: {0}")]
    Provision(#[from] StartupError),

    /// The upload is missing or unreadable
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// The declared name cannot yield a safe artifact name
    #[error("Invalid file name: {0}")]
    InvalidName(#[from] SanitizeError),

    /// Decoding, encoding or publishing failed
    #[error("Transcode failed: {0}")]
    Transcode(#[from] EncodeError),

    /// Could not measure input or output
    #[error("Failed to measure file sizes: {0}")]
    Report(#[source] std::io::Error),

    /// The run task itself died
    #[error("Pipeline task failed: {0}")]
    Internal(String),
}

/// Stage a run has reached
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Received,
    Validated,
    Clamped,
    Transcoded,
    Reported,
    CleanedUp,
}

impl RunState {
    /// Convert state to string for metrics and logs
    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Received => "received",
            RunState::Validated => "validated",
            RunState::Clamped => "clamped",
            RunState::Transcoded => "transcoded",
            RunState::Reported => "reported",
            RunState::CleanedUp => "cleaned_up",
        }
    }
}

/// A file the transport layer stored for this run
#[derive(Debug)]
pub struct ReceivedFile {
    /// Owning handle to the raw upload on disk
    pub upload: TempUpload,
    /// Name the client declared for the file
    pub original_name: String,
}

/// Everything one `POST /optimize` hands to the pipeline.
///
/// Owned by exactly one run; dropping it deletes the stored file.
#[derive(Debug)]
pub struct UploadRequest {
    pub file: Option<ReceivedFile>,
    pub declared_width: Option<String>,
    pub declared_quality: Option<String>,
}

/// Successful outcome of a run, as returned to the client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizationResult {
    #[serde(rename = "originalSizeKB")]
    pub original_size_kb: f64,
    #[serde(rename = "optimizedSizeKB")]
    pub optimized_size_kb: f64,
    pub savings_percent: f64,
    /// Public path of the artifact, `/uploads/{downloadFilename}`
    pub artifact_path: String,
    pub download_filename: String,
    pub width: u32,
    pub quality: u8,
}

impl OptimizationResult {
    pub fn new(artifact: &OutputArtifact, report: &SizeReport, params: TransformParameters) -> Self {
        Self {
            original_size_kb: report.original_size_kb,
            optimized_size_kb: report.optimized_size_kb,
            savings_percent: report.savings_percent,
            artifact_path: format!("/uploads/{}", artifact.file_name),
            download_filename: artifact.file_name.clone(),
            width: params.width,
            quality: params.quality,
        }
    }
}

/// What a run got to before it ended, for logs and metrics
#[derive(Debug)]
struct RunProgress {
    state: RunState,
    parameters: TransformParameters,
    report: Option<SizeReport>,
}

/// Runs uploads through the optimization steps.
///
/// Cheap to clone; every clone shares the same metrics.
#[derive(Debug, Clone)]
pub struct Pipeline {
    dirs: WorkDirs,
    metrics: SharedMetrics,
    timeout: Option<Duration>,
}

impl Pipeline {
    /// Create a pipeline. A `timeout` of `None` lets transcodes run unbounded.
    pub fn new(dirs: WorkDirs, metrics: SharedMetrics, timeout: Option<Duration>) -> Self {
        Self {
            dirs,
            metrics,
            timeout,
        }
    }

    pub fn dirs(&self) -> &WorkDirs {
        &self.dirs
    }

    /// Run `request` on its own task.
    ///
    /// The run is detached from the caller, so dropping the returned handle (a
    /// client disconnect) does not interrupt it or skip its cleanup.
    pub fn spawn(&self, request: UploadRequest) -> JoinHandle<Result<OptimizationResult, PipelineError>> {
        let pipeline = self.clone();
        tokio::spawn(async move { pipeline.run(request).await })
    }

    /// Run `request` to completion. The temporary input is gone when this returns.
    pub async fn run(&self, request: UploadRequest) -> Result<OptimizationResult, PipelineError> {
        let run_id = Uuid::new_v4().to_string();
        let span = info_span!("pipeline_run", run_id = %run_id);
        self.run_inner(run_id, request).instrument(span).await
    }

    async fn run_inner(
        &self,
        run_id: String,
        request: UploadRequest,
    ) -> Result<OptimizationResult, PipelineError> {
        self.metrics.write().await.run_started();

        let mut progress = RunProgress {
            state: RunState::Received,
            parameters: TransformParameters::default(),
            report: None,
        };
        let outcome = self.execute(&request, &mut progress).await;
        let last_stage = progress.state;

        let original_name = request
            .file
            .as_ref()
            .map(|f| f.original_name.clone())
            .unwrap_or_default();
        if let Some(file) = request.file {
            self.cleanup(file.upload).await;
        }
        debug!(stage = RunState::CleanedUp.as_str(), "Temporary input released");

        match &outcome {
            Ok(result) => info!(
                stage = last_stage.as_str(),
                file = %result.download_filename,
                savings_percent = result.savings_percent,
                "Run completed"
            ),
            Err(e) => warn!(stage = last_stage.as_str(), error = %e, "Run failed"),
        }

        let report = progress.report.unwrap_or_else(|| SizeReport::from_sizes(0, 0));
        self.metrics.write().await.run_finished(RunMetrics {
            id: run_id,
            original_name,
            stage: last_stage.as_str().to_string(),
            original_bytes: report.original_bytes,
            optimized_bytes: report.optimized_bytes,
            savings_percent: report.savings_percent,
            width: progress.parameters.width,
            quality: progress.parameters.quality,
            error: outcome.as_ref().err().map(|e| e.to_string()),
        });

        outcome
    }

    async fn execute(
        &self,
        request: &UploadRequest,
        progress: &mut RunProgress,
    ) -> Result<OptimizationResult, PipelineError> {
        ensure_directories(&self.dirs.paths()).await?;

        let file = validate_input(request).await?;
        progress.state = RunState::Validated;

        let base = output_base(&file.original_name)?.to_string();

        let params = clamp_parameters(
            request.declared_width.as_deref(),
            request.declared_quality.as_deref(),
        );
        progress.parameters = params;
        progress.state = RunState::Clamped;
        debug!(width = params.width, quality = params.quality, "Parameters clamped");

        let encode_params = WebpEncodeParams {
            input_path: file.upload.path().to_path_buf(),
            output_dir: self.dirs.outputs.clone(),
            original_name: file.original_name.clone(),
            output_base: base,
            parameters: params,
            created_at_epoch_millis: epoch_millis(),
        };
        let artifact = run_transcode(encode_params, self.timeout).await?;
        progress.state = RunState::Transcoded;

        let report = report_sizes(file.upload.path(), &artifact.path)
            .await
            .map_err(PipelineError::Report)?;
        progress.state = RunState::Reported;

        let result = OptimizationResult::new(&artifact, &report, params);
        progress.report = Some(report);
        Ok(result)
    }

    async fn cleanup(&self, upload: TempUpload) {
        match upload.cleanup().await {
            Ok(()) => {}
            Err(e) if e.already_gone() => {
                debug!(path = %e.path.display(), "Temporary upload already removed");
            }
            Err(e) => {
                error!(error = %e, "Cleanup failure");
                self.metrics.write().await.cleanup_failed();
            }
        }
    }
}

fn epoch_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
