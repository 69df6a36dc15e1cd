//! Startup module for the WebP optimizer
//!
//! Provides the directory provisioning and housekeeping that must happen before
//! the server accepts requests:
//! - Working directory creation (incoming uploads, public outputs)
//! - Sweep of files orphaned by a previous process

use crate::config::Config;
use crate::replace::is_staged_file;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Error types for startup checks
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("Failed to create directory {path}: {source}")]
    Provision {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Path exists but is not a directory: {0}")]
    NotADirectory(PathBuf),

    #[error("Startup sweep task failed: {0}")]
    SweepTask(String),
}

/// The two directories every pipeline run touches.
///
/// Built once from configuration at process start and handed to every component
/// that needs a path; re-provisioning through [`ensure_directories`] is cheap and
/// has no observable effect when both already exist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkDirs {
    /// Write-only landing area for raw uploads
    pub incoming: PathBuf,
    /// Publicly served root for transcoded artifacts
    pub outputs: PathBuf,
}

impl WorkDirs {
    pub fn new(incoming: impl Into<PathBuf>, outputs: impl Into<PathBuf>) -> Self {
        Self {
            incoming: incoming.into(),
            outputs: outputs.into(),
        }
    }

    pub fn from_config(cfg: &Config) -> Self {
        Self::new(&cfg.storage.incoming_dir, &cfg.storage.output_dir)
    }

    pub fn paths(&self) -> [&Path; 2] {
        [&self.incoming, &self.outputs]
    }
}

/// Create every path (and missing ancestors), treating "already exists" as success.
///
/// Any other failure is returned so startup can abort, or so a request can
/// surface it.
pub async fn ensure_directories(paths: &[&Path]) -> Result<(), StartupError> {
    for path in paths {
        match tokio::fs::create_dir_all(path).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
            Err(source) => {
                return Err(StartupError::Provision {
                    path: path.to_path_buf(),
                    source,
                })
            }
        }

        // create_dir_all succeeds on an existing directory, but also reports
        // AlreadyExists when a regular file squats on the path.
        let is_dir = tokio::fs::metadata(path)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false);
        if !is_dir {
            return Err(StartupError::NotADirectory(path.to_path_buf()));
        }
        debug!(path = %path.display(), "Directory created or verified");
    }
    Ok(())
}

/// Remove files a previous process left behind.
///
/// At startup no pipeline run can own anything in the incoming directory, so
/// every regular file there is an orphaned upload. In the output directory only
/// staging files are removed; published artifacts are never touched.
///
/// Returns the number of files removed. Individual removal failures are logged
/// and skipped.
pub fn sweep_stale_files(dirs: &WorkDirs) -> usize {
    let mut removed = 0;

    for path in files_at_depth_one(&dirs.incoming) {
        removed += remove_logged(&path, "orphaned upload");
    }

    for path in files_at_depth_one(&dirs.outputs)
        .into_iter()
        .filter(|p| is_staged_file(p))
    {
        removed += remove_logged(&path, "stale staging file");
    }

    removed
}

fn files_at_depth_one(root: &Path) -> Vec<PathBuf> {
    if !root.exists() {
        return Vec::new();
    }

    WalkDir::new(root)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .collect()
}

fn remove_logged(path: &Path, kind: &str) -> usize {
    match std::fs::remove_file(path) {
        Ok(()) => {
            info!(path = %path.display(), "Removed {}", kind);
            1
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to remove {}", kind);
            0
        }
    }
}

/// Run all startup steps in order
///
/// 1. Provision the working directories (fatal on failure)
/// 2. Sweep leftovers from a previous process, if enabled
pub async fn run_startup_checks(cfg: &Config, dirs: &WorkDirs) -> Result<(), StartupError> {
    ensure_directories(&dirs.paths()).await?;

    if cfg.storage.sweep_on_startup {
        let sweep_dirs = dirs.clone();
        let removed = tokio::task::spawn_blocking(move || sweep_stale_files(&sweep_dirs))
            .await
            .map_err(|e| StartupError::SweepTask(e.to_string()))?;
        if removed > 0 {
            info!(removed, "Startup sweep removed leftover files");
        }
    }

    Ok(())
}
