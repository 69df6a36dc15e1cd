//! Staged writes and no-clobber publishing for output artifacts.
//!
//! Encoded bytes are first written to a hidden staging file next to the final
//! path, then linked into place. A reader listing or requesting the final name
//! never sees a half-written artifact, and an existing artifact is never
//! overwritten.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Extension carried by staging files
pub const STAGING_EXTENSION: &str = "part";

/// Errors that can occur while staging or publishing an artifact.
#[derive(Debug, Error)]
pub enum ReplaceError {
    /// Failed to create or fill the staging file.
    #[error("Failed to write staging file: {0}")]
    StageFailed(io::Error),

    /// Something already exists under the final name.
    #[error("Output already exists: {0}")]
    AlreadyExists(PathBuf),

    /// Failed to move the staged file to its final name.
    #[error("Failed to publish output: {0}")]
    PublishFailed(io::Error),
}

/// Generates the staging path for a final output path.
///
/// The staging path follows the format: `.<name>.part` in the same directory,
/// so publishing is a same-filesystem link or rename.
///
/// # Example
///
/// ```
/// use std::path::Path;
/// use webp_optimizer::replace::staging_path;
///
/// let staged = staging_path(Path::new("/srv/public/uploads/cat-1-optimized.webp"));
/// assert_eq!(staged, Path::new("/srv/public/uploads/.cat-1-optimized.webp.part"));
/// ```
pub fn staging_path(final_path: &Path) -> PathBuf {
    let name = final_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    final_path.with_file_name(format!(".{}.{}", name, STAGING_EXTENSION))
}

/// Whether `path` names a staging file.
pub fn is_staged_file(path: &Path) -> bool {
    let hidden = path
        .file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with('.'))
        .unwrap_or(false);
    let part = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e == STAGING_EXTENSION)
        .unwrap_or(false);
    hidden && part
}

/// Write `bytes` to the staging file for `final_path`.
///
/// The staging file is created with `create_new`, so two writers racing for the
/// same final name cannot interleave. A partially written staging file is
/// removed before the error is returned.
pub fn write_staged(final_path: &Path, bytes: &[u8]) -> Result<PathBuf, ReplaceError> {
    let staged = staging_path(final_path);

    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&staged)
        .map_err(|e| {
            if e.kind() == io::ErrorKind::AlreadyExists {
                ReplaceError::AlreadyExists(staged.clone())
            } else {
                ReplaceError::StageFailed(e)
            }
        })?;

    if let Err(e) = file.write_all(bytes).and_then(|()| file.sync_all()) {
        drop(file);
        discard_staged(&staged);
        return Err(ReplaceError::StageFailed(e));
    }

    Ok(staged)
}

/// Move a staged file to its final name without overwriting anything.
///
/// Hard-links first (atomic and refuses to clobber), then removes the staging
/// name. Where hard links are unsupported, falls back to a rename guarded by an
/// existence check. The staging file is removed on every failure.
pub fn publish_staged(staged: &Path, final_path: &Path) -> Result<(), ReplaceError> {
    match fs::hard_link(staged, final_path) {
        Ok(()) => {
            discard_staged(staged);
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
            discard_staged(staged);
            Err(ReplaceError::AlreadyExists(final_path.to_path_buf()))
        }
        Err(_) => {
            if final_path.exists() {
                discard_staged(staged);
                return Err(ReplaceError::AlreadyExists(final_path.to_path_buf()));
            }
            fs::rename(staged, final_path).map_err(|e| {
                discard_staged(staged);
                ReplaceError::PublishFailed(e)
            })
        }
    }
}

/// Remove a staging file, ignoring errors.
pub fn discard_staged(staged: &Path) {
    let _ = fs::remove_file(staged);
}
