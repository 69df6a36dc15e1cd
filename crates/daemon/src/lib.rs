//! WebP Optimizer
//!
//! HTTP service that accepts raster image uploads, resizes them, re-encodes
//! them as lossy WebP and serves the results for download.

pub mod cleanup;
pub mod daemon;
pub mod encode;
pub mod http;
pub mod logging;
pub mod metrics;
pub mod params;
pub mod pipeline;
pub mod replace;
pub mod retrieve;
pub mod sanitize;
pub mod size_report;
pub mod startup;
pub mod upload;
pub mod validate;

pub use webp_optimizer_config as config;
pub use webp_optimizer_config::Config;
pub use cleanup::{CleanupError, TempUpload};
pub use daemon::{Daemon, DaemonError};
pub use encode::{run_transcode, transcode, EncodeError, OutputArtifact, WebpEncodeParams};
pub use http::{create_router, ApiError, AppState};
pub use logging::{init_logging, resolve_log_filter, LoggingError, DEFAULT_LOG_FILTER};
pub use metrics::{new_shared_metrics, MetricsSnapshot, RunMetrics, SharedMetrics};
pub use params::{clamp_parameters, TransformParameters};
pub use pipeline::{
    OptimizationResult, Pipeline, PipelineError, ReceivedFile, RunState, UploadRequest,
};
pub use replace::ReplaceError;
pub use retrieve::{retrieve, RetrieveError};
pub use sanitize::{output_base, output_filename, sanitize_filename, SanitizeError};
pub use size_report::{report_sizes, SizeReport};
pub use startup::{ensure_directories, run_startup_checks, StartupError, WorkDirs};
pub use upload::{receive_upload, UploadError, UploadLimits};
pub use validate::{validate_input, ValidationError};
