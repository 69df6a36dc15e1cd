//! Filename sanitizer
//!
//! Every externally supplied filename passes through [`sanitize_filename`] before
//! it is joined onto a directory. Bad names are rejected, never repaired.

use std::path::Path;
use thiserror::Error;

/// Extension of every artifact the pipeline publishes
pub const OUTPUT_EXTENSION: &str = "webp";

/// Suffix inserted between the timestamp and the extension
const OUTPUT_SUFFIX: &str = "optimized";

/// Fallback base name when the declared name has no usable stem
const FALLBACK_BASE_NAME: &str = "image";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SanitizeError {
    #[error("filename must not be empty")]
    Empty,

    #[error("filename must not contain path separators: {0:?}")]
    PathSeparator(String),

    #[error("filename must not contain '..': {0:?}")]
    ParentSegment(String),

    #[error("filename must not contain NUL bytes")]
    NulByte,
}

/// Validate a single path component supplied by a client.
///
/// Rejects empty names, names containing `/` or `\`, any occurrence of `..`,
/// and embedded NUL bytes. Performs no filesystem access.
pub fn sanitize_filename(name: &str) -> Result<&str, SanitizeError> {
    if name.is_empty() {
        return Err(SanitizeError::Empty);
    }
    if name.contains('/') || name.contains('\\') {
        return Err(SanitizeError::PathSeparator(name.to_string()));
    }
    if name.contains("..") {
        return Err(SanitizeError::ParentSegment(name.to_string()));
    }
    if name.contains('\0') {
        return Err(SanitizeError::NulByte);
    }
    Ok(name)
}

/// Base name (file stem) of a client-declared upload name.
///
/// `"holiday.photo.JPG"` -> `"holiday.photo"`. Names without a usable stem
/// (empty, or only an extension such as `".jpg"`) fall back to `"image"`.
pub fn base_name(declared: &str) -> &str {
    let stem = Path::new(declared)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("");
    let stem = stem.trim();
    if stem.is_empty() || stem.starts_with('.') {
        FALLBACK_BASE_NAME
    } else {
        stem
    }
}

/// Sanitized base every artifact name of an upload starts with.
///
/// A declared name that tries to climb out of the output directory fails here
/// instead of producing a path.
pub fn output_base(declared: &str) -> Result<&str, SanitizeError> {
    if declared.contains('/') || declared.contains('\\') {
        return Err(SanitizeError::PathSeparator(declared.to_string()));
    }
    sanitize_filename(base_name(declared))
}

/// `{base}-{epoch_millis}-optimized.webp` for an already sanitized base.
pub fn artifact_name(base: &str, epoch_millis: u64) -> String {
    format!(
        "{}-{}-{}.{}",
        base, epoch_millis, OUTPUT_SUFFIX, OUTPUT_EXTENSION
    )
}

/// Derive the artifact filename `{base}-{epoch_millis}-optimized.webp`.
pub fn output_filename(declared: &str, epoch_millis: u64) -> Result<String, SanitizeError> {
    Ok(artifact_name(output_base(declared)?, epoch_millis))
}
