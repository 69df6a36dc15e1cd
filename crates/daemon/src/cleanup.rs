//! Cleanup coordinator for temporary uploads.
//!
//! A [`TempUpload`] owns the raw file the transport layer saved. Whoever holds it
//! is responsible for the file: the normal path calls [`TempUpload::cleanup`]
//! exactly once, and `Drop` deletes the file if the owner goes away first
//! (early return, panic, or a dropped future).

use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

/// Failure to delete a temporary upload. Never fatal to the run that owns it.
#[derive(Debug, Error)]
#[error("Failed to delete temporary upload {path}: {source}")]
pub struct CleanupError {
    pub path: PathBuf,
    #[source]
    pub source: io::Error,
}

impl CleanupError {
    /// The file was already gone, which leaves nothing behind.
    pub fn already_gone(&self) -> bool {
        self.source.kind() == io::ErrorKind::NotFound
    }
}

/// Owning handle to a temporary input file.
#[derive(Debug)]
pub struct TempUpload {
    path: PathBuf,
    armed: bool,
}

impl TempUpload {
    /// Take ownership of `path`. The file will be deleted when this handle is
    /// cleaned up or dropped.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            armed: true,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Delete the file now.
    ///
    /// Consumes the handle so cleanup can only run once. `Drop` stays armed
    /// until the removal has finished, and does not retry after that.
    pub async fn cleanup(mut self) -> Result<(), CleanupError> {
        let removed = tokio::fs::remove_file(&self.path).await;
        self.armed = false;
        match removed {
            Ok(()) => {
                debug!(path = %self.path.display(), "Deleted temporary upload");
                Ok(())
            }
            Err(source) => Err(CleanupError {
                path: self.path.clone(),
                source,
            }),
        }
    }
}

impl Drop for TempUpload {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "Deleted temporary upload on drop"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                path = %self.path.display(),
                error = %e,
                "Failed to delete temporary upload on drop"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_cleanup_deletes_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("image-1.jpg");
        fs::write(&path, b"raw").unwrap();

        let upload = TempUpload::new(&path);
        assert_eq!(upload.path(), path.as_path());
        upload.cleanup().await.unwrap();

        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_cleanup_reports_already_gone() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("image-1.jpg");

        let err = TempUpload::new(&path).cleanup().await.unwrap_err();
        assert!(err.already_gone());
        assert_eq!(err.path, path);
    }

    #[test]
    fn test_drop_deletes_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("image-1.jpg");
        fs::write(&path, b"raw").unwrap();

        {
            let _upload = TempUpload::new(&path);
        }

        assert!(!path.exists());
    }

    #[test]
    fn test_drop_after_panic_deletes_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("image-1.jpg");
        fs::write(&path, b"raw").unwrap();

        let moved = path.clone();
        let result = std::thread::spawn(move || {
            let _upload = TempUpload::new(moved);
            panic!("pipeline blew up");
        })
        .join();

        assert!(result.is_err());
        assert!(!path.exists());
    }

    #[test]
    fn test_drop_of_missing_file_is_quiet() {
        let temp_dir = TempDir::new().unwrap();
        drop(TempUpload::new(temp_dir.path().join("never-written.jpg")));
    }

    #[tokio::test]
    async fn test_cleanup_does_not_touch_recreated_file_on_drop() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("image-1.jpg");
        fs::write(&path, b"raw").unwrap();

        let upload = TempUpload::new(&path);
        upload.cleanup().await.unwrap();

        // A later writer reusing the name is not ours to delete.
        fs::write(&path, b"someone else").unwrap();
        assert!(path.exists());
    }
}
