//! Multipart upload transport
//!
//! Receives the `image` file field and the optional `width` / `quality` text
//! fields of `POST /optimize`, streaming the file into the incoming directory
//! as `image-{uuid}{ext}`. The saved file is owned by a [`TempUpload`] from the
//! moment it is created, so a rejected or interrupted upload leaves nothing
//! behind.

use crate::cleanup::TempUpload;
use crate::pipeline::{ReceivedFile, UploadRequest};
use axum::extract::multipart::{Field, MultipartError};
use axum::extract::Multipart;
use axum::http::StatusCode;
use std::path::Path;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::debug;
use uuid::Uuid;

/// Multipart field carrying the image
pub const FILE_FIELD: &str = "image";
pub const WIDTH_FIELD: &str = "width";
pub const QUALITY_FIELD: &str = "quality";

/// Default per-file size cap (10 MiB)
pub const DEFAULT_MAX_FILE_BYTES: u64 = 10 * 1024 * 1024;

const ALLOWED_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "gif", "webp"];
const ALLOWED_MIME_TYPES: [&str; 4] = ["image/jpeg", "image/png", "image/gif", "image/webp"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadLimits {
    pub max_file_bytes: u64,
}

impl Default for UploadLimits {
    fn default() -> Self {
        Self {
            max_file_bytes: DEFAULT_MAX_FILE_BYTES,
        }
    }
}

impl UploadLimits {
    /// The cap in whole mebibytes, as shown to clients.
    pub fn max_file_mb(&self) -> u64 {
        (self.max_file_bytes / (1024 * 1024)).max(1)
    }
}

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("Uploaded file exceeds {limit} bytes")]
    TooLarge { limit: u64 },

    #[error("Unsupported upload type (name: {file_name:?}, content type: {content_type:?})")]
    UnsupportedType {
        file_name: String,
        content_type: Option<String>,
    },

    #[error("Only one file may be uploaded per request")]
    TooManyFiles,

    #[error("Malformed multipart request: {0}")]
    Malformed(String),

    #[error("Failed to store upload: {0}")]
    Io(#[from] std::io::Error),
}

impl UploadError {
    fn from_multipart(err: MultipartError, limits: &UploadLimits) -> Self {
        if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
            UploadError::TooLarge {
                limit: limits.max_file_bytes,
            }
        } else {
            UploadError::Malformed(err.body_text())
        }
    }
}

/// Whether a declared extension and content type are both on the image whitelist.
///
/// Both must match; comparison is case-insensitive.
pub fn is_allowed_image(extension: Option<&str>, content_type: Option<&str>) -> bool {
    let ext_ok = extension
        .map(|e| ALLOWED_EXTENSIONS.iter().any(|a| a.eq_ignore_ascii_case(e)))
        .unwrap_or(false);
    let mime_ok = content_type
        .map(|m| {
            let essence = m.split(';').next().unwrap_or("").trim();
            ALLOWED_MIME_TYPES
                .iter()
                .any(|a| a.eq_ignore_ascii_case(essence))
        })
        .unwrap_or(false);
    ext_ok && mime_ok
}

/// Read a whole multipart form into an [`UploadRequest`].
///
/// A file field with an empty filename counts as "no file", which the input
/// validator later reports. Unknown fields are skipped.
pub async fn receive_upload(
    multipart: &mut Multipart,
    incoming_dir: &Path,
    limits: &UploadLimits,
) -> Result<UploadRequest, UploadError> {
    let mut request = UploadRequest {
        file: None,
        declared_width: None,
        declared_quality: None,
    };

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| UploadError::from_multipart(e, limits))?
    {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some(FILE_FIELD) => {
                let file_name = field.file_name().unwrap_or("").to_string();
                if file_name.is_empty() {
                    continue;
                }
                if request.file.is_some() {
                    return Err(UploadError::TooManyFiles);
                }
                request.file = Some(store_file(field, file_name, incoming_dir, limits).await?);
            }
            Some(WIDTH_FIELD) => {
                request.declared_width = Some(
                    field
                        .text()
                        .await
                        .map_err(|e| UploadError::from_multipart(e, limits))?,
                );
            }
            Some(QUALITY_FIELD) => {
                request.declared_quality = Some(
                    field
                        .text()
                        .await
                        .map_err(|e| UploadError::from_multipart(e, limits))?,
                );
            }
            _ => {}
        }
    }

    Ok(request)
}

async fn store_file(
    mut field: Field<'_>,
    file_name: String,
    incoming_dir: &Path,
    limits: &UploadLimits,
) -> Result<ReceivedFile, UploadError> {
    let extension = Path::new(&file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    let content_type = field.content_type().map(str::to_string);

    if !is_allowed_image(extension.as_deref(), content_type.as_deref()) {
        return Err(UploadError::UnsupportedType {
            file_name,
            content_type,
        });
    }

    let stored_name = match &extension {
        Some(ext) => format!("image-{}.{}", Uuid::new_v4(), ext),
        None => format!("image-{}", Uuid::new_v4()),
    };
    let path = incoming_dir.join(stored_name);
    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&path)
        .await?;
    let upload = TempUpload::new(&path);

    let mut written: u64 = 0;
    while let Some(chunk) = field
        .chunk()
        .await
        .map_err(|e| UploadError::from_multipart(e, limits))?
    {
        written += chunk.len() as u64;
        if written > limits.max_file_bytes {
            return Err(UploadError::TooLarge {
                limit: limits.max_file_bytes,
            });
        }
        file.write_all(&chunk).await?;
    }
    file.flush().await?;

    debug!(path = %path.display(), bytes = written, original_name = %file_name, "Stored upload");

    Ok(ReceivedFile {
        upload,
        original_name: file_name,
    })
}


#[cfg(test)]
mod tests {
    use super::test_support::{content_type, multipart_body, Part};
    use super::*;
    use axum::body::Body;
    use axum::extract::FromRequest;
    use axum::http::{header, Request};
    use std::fs;
    use tempfile::TempDir;

    async fn multipart_from(parts: &[Part<'_>]) -> Multipart {
        let req = Request::builder()
            .method("POST")
            .uri("/optimize")
            .header(header::CONTENT_TYPE, content_type())
            .body(Body::from(multipart_body(parts)))
            .unwrap();
        Multipart::from_request(req, &()).await.unwrap()
    }

    fn files_in(dir: &Path) -> usize {
        fs::read_dir(dir).unwrap().count()
    }

    #[test]
    fn test_is_allowed_image() {
        assert!(is_allowed_image(Some("jpg"), Some("image/jpeg")));
        assert!(is_allowed_image(Some("JPEG"), Some("IMAGE/JPEG")));
        assert!(is_allowed_image(Some("webp"), Some("image/webp")));
        assert!(is_allowed_image(Some("png"), Some("image/png; charset=binary")));
        assert!(!is_allowed_image(Some("txt"), Some("text/plain")));
        assert!(!is_allowed_image(Some("jpg"), Some("text/plain")));
        assert!(!is_allowed_image(Some("exe"), Some("image/png")));
        assert!(!is_allowed_image(None, Some("image/png")));
        assert!(!is_allowed_image(Some("png"), None));
    }

    #[test]
    fn test_max_file_mb() {
        assert_eq!(UploadLimits::default().max_file_mb(), 10);
        assert_eq!(UploadLimits { max_file_bytes: 10 }.max_file_mb(), 1);
    }

    #[tokio::test]
    async fn test_receive_file_and_fields() {
        let temp_dir = TempDir::new().unwrap();
        let mut multipart = multipart_from(&[
            Part::Text { name: "width", value: "640" },
            Part::File {
                name: "image",
                file_name: "Cat.JPG",
                content_type: "image/jpeg",
                bytes: b"\xFF\xD8\xFFfake",
            },
            Part::Text { name: "quality", value: "70" },
            Part::Text { name: "ignored", value: "x" },
        ])
        .await;

        let request = receive_upload(&mut multipart, temp_dir.path(), &UploadLimits::default())
            .await
            .unwrap();

        assert_eq!(request.declared_width.as_deref(), Some("640"));
        assert_eq!(request.declared_quality.as_deref(), Some("70"));
        let file = request.file.as_ref().unwrap();
        assert_eq!(file.original_name, "Cat.JPG");
        let stored = file.upload.path().file_name().unwrap().to_str().unwrap();
        assert!(stored.starts_with("image-"));
        assert!(stored.ends_with(".jpg"));
        assert_eq!(fs::read(file.upload.path()).unwrap(), b"\xFF\xD8\xFFfake");

        drop(request);
        assert_eq!(files_in(temp_dir.path()), 0);
    }

    #[tokio::test]
    async fn test_receive_without_file() {
        let temp_dir = TempDir::new().unwrap();
        let mut multipart = multipart_from(&[Part::Text { name: "width", value: "50" }]).await;

        let request = receive_upload(&mut multipart, temp_dir.path(), &UploadLimits::default())
            .await
            .unwrap();

        assert!(request.file.is_none());
        assert_eq!(request.declared_width.as_deref(), Some("50"));
    }

    #[tokio::test]
    async fn test_empty_filename_means_no_file() {
        let temp_dir = TempDir::new().unwrap();
        let mut multipart = multipart_from(&[Part::File {
            name: "image",
            file_name: "",
            content_type: "application/octet-stream",
            bytes: b"",
        }])
        .await;

        let request = receive_upload(&mut multipart, temp_dir.path(), &UploadLimits::default())
            .await
            .unwrap();

        assert!(request.file.is_none());
        assert_eq!(files_in(temp_dir.path()), 0);
    }

    #[tokio::test]
    async fn test_rejects_wrong_type() {
        let temp_dir = TempDir::new().unwrap();
        let mut multipart = multipart_from(&[Part::File {
            name: "image",
            file_name: "notes.txt",
            content_type: "text/plain",
            bytes: b"hello",
        }])
        .await;

        let result = receive_upload(&mut multipart, temp_dir.path(), &UploadLimits::default()).await;

        assert!(matches!(result, Err(UploadError::UnsupportedType { .. })));
        assert_eq!(files_in(temp_dir.path()), 0);
    }

    #[tokio::test]
    async fn test_rejects_oversized_file_and_removes_partial() {
        let temp_dir = TempDir::new().unwrap();
        let big = vec![0u8; 4096];
        let mut multipart = multipart_from(&[Part::File {
            name: "image",
            file_name: "big.png",
            content_type: "image/png",
            bytes: &big,
        }])
        .await;

        let limits = UploadLimits { max_file_bytes: 1024 };
        let result = receive_upload(&mut multipart, temp_dir.path(), &limits).await;

        assert!(matches!(result, Err(UploadError::TooLarge { limit: 1024 })));
        assert_eq!(files_in(temp_dir.path()), 0);
    }

    #[tokio::test]
    async fn test_rejects_second_file() {
        let temp_dir = TempDir::new().unwrap();
        let mut multipart = multipart_from(&[
            Part::File {
                name: "image",
                file_name: "a.png",
                content_type: "image/png",
                bytes: b"a",
            },
            Part::File {
                name: "image",
                file_name: "b.png",
                content_type: "image/png",
                bytes: b"b",
            },
        ])
        .await;

        let result = receive_upload(&mut multipart, temp_dir.path(), &UploadLimits::default()).await;

        assert!(matches!(result, Err(UploadError::TooManyFiles)));
        assert_eq!(files_in(temp_dir.path()), 0);
    }
}
