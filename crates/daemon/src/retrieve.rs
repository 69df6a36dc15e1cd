//! Retrieval gate for published artifacts.

use crate::replace::is_staged_file;
use crate::sanitize::{sanitize_filename, SanitizeError};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RetrieveError {
    #[error("Invalid artifact name: {0}")]
    InvalidName(#[from] SanitizeError),

    #[error("Artifact not found: {0}")]
    NotFound(String),
}

/// Resolve a client-requested artifact name to a path under `output_root`.
///
/// The name is sanitized before any filesystem access. Names that do not exist
/// as regular files, and in-flight staging files, are reported as not found.
pub async fn retrieve(output_root: &Path, requested_name: &str) -> Result<PathBuf, RetrieveError> {
    let name = sanitize_filename(requested_name)?;
    let path = output_root.join(name);

    if is_staged_file(&path) {
        return Err(RetrieveError::NotFound(name.to_string()));
    }

    match tokio::fs::metadata(&path).await {
        Ok(m) if m.is_file() => Ok(path),
        _ => Err(RetrieveError::NotFound(name.to_string())),
    }
}
