//! Input validation for a pipeline run.
//!
//! Confirms the transport layer actually delivered a file and that the file is
//! still readable on disk before any parameter derivation or transcoding starts.

use crate::pipeline::{ReceivedFile, UploadRequest};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ValidationError {
    /// No file reference came with the request
    #[error("No file was uploaded")]
    MissingFile,

    /// The saved temporary file is gone or is not a regular file
    #[error("Uploaded file is not accessible at {path}: {reason}")]
    UnreadableFile { path: PathBuf, reason: String },
}

/// Check that `request` carries a file that exists and can be opened.
///
/// Returns the received file on success so later steps work from the
/// validated reference.
pub async fn validate_input(request: &UploadRequest) -> Result<&ReceivedFile, ValidationError> {
    let file = request.file.as_ref().ok_or(ValidationError::MissingFile)?;
    let path = file.upload.path();

    let metadata = tokio::fs::metadata(path)
        .await
        .map_err(|e| ValidationError::UnreadableFile {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

    if !metadata.is_file() {
        return Err(ValidationError::UnreadableFile {
            path: path.to_path_buf(),
            reason: "not a regular file".to_string(),
        });
    }

    tokio::fs::File::open(path)
        .await
        .map_err(|e| ValidationError::UnreadableFile {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

    Ok(file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cleanup::TempUpload;
    use std::fs;
    use tempfile::TempDir;

    fn request_for(path: Option<PathBuf>) -> UploadRequest {
        UploadRequest {
            file: path.map(|p| ReceivedFile {
                upload: TempUpload::new(p),
                original_name: "photo.jpg".to_string(),
            }),
            declared_width: None,
            declared_quality: None,
        }
    }

    #[tokio::test]
    async fn test_missing_file() {
        let request = request_for(None);
        let result = validate_input(&request).await;
        assert!(matches!(result, Err(ValidationError::MissingFile)));
    }

    #[tokio::test]
    async fn test_file_removed_before_processing() {
        let temp_dir = TempDir::new().unwrap();
        let request = request_for(Some(temp_dir.path().join("image-gone.jpg")));

        let result = validate_input(&request).await;
        assert!(matches!(result, Err(ValidationError::UnreadableFile { .. })));
    }

    #[tokio::test]
    async fn test_directory_is_not_a_file() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().join("image-dir.jpg");
        fs::create_dir(&dir).unwrap();
        let request = request_for(Some(dir.clone()));

        let result = validate_input(&request).await;
        assert!(matches!(result, Err(ValidationError::UnreadableFile { .. })));

        // remove_file refuses directories, so the guard leaves it alone.
        drop(request);
        assert!(dir.exists());
    }

    #[tokio::test]
    async fn test_existing_file_passes() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("image-1.jpg");
        fs::write(&path, b"bytes").unwrap();
        let request = request_for(Some(path.clone()));

        let file = validate_input(&request).await.unwrap();
        assert_eq!(file.upload.path(), path.as_path());
        assert_eq!(file.original_name, "photo.jpg");
    }
}
