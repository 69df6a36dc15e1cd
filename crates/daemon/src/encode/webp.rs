//! WebP transcoder
//!
//! Decodes an uploaded raster image, resizes it to the requested width and
//! re-encodes it as lossy WebP. Encoding only produces bytes; output is then
//! staged and published through [`crate::replace`] so a half-written artifact
//! is never visible.

use crate::params::TransformParameters;
use crate::replace::{discard_staged, publish_staged, write_staged, ReplaceError};
use crate::sanitize::{artifact_name, output_base, sanitize_filename, SanitizeError};
use image::imageops::FilterType;
use image::{ImageFormat, ImageReader, Limits};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Source formats the transcoder accepts
pub const ACCEPTED_FORMATS: [ImageFormat; 4] = [
    ImageFormat::Jpeg,
    ImageFormat::Png,
    ImageFormat::Gif,
    ImageFormat::WebP,
];

/// How many successive millisecond stamps are tried before giving up on a name
pub const MAX_NAME_ATTEMPTS: u32 = 16;

/// Largest width or height libwebp will encode
pub const MAX_WEBP_DIMENSION: u32 = 16383;

/// Allocation ceiling for decoding one source image
pub const MAX_DECODE_ALLOC_BYTES: u64 = 512 * 1024 * 1024;

/// Error type for transcode operations
#[derive(Debug, Error)]
pub enum EncodeError {
    /// Uploaded file has no bytes
    #[error("Input file is empty")]
    EmptyInput,

    /// Content is not one of the accepted source formats
    #[error("Unsupported image format: {0}")]
    Unsupported(String),

    /// Decoder rejected the content
    #[error("Failed to decode image: {0}")]
    Decode(#[from] image::ImageError),

    /// The resized image could not be encoded as WebP
    #[error("Output of {width}x{height} exceeds the WebP size limit")]
    DimensionsTooLarge { width: u32, height: u32 },

    /// WebP encoder failed
    #[error("WebP encoding failed: {0}")]
    Encode(String),

    /// Declared name cannot produce a safe output name
    #[error("Invalid output name: {0}")]
    InvalidName(#[from] SanitizeError),

    /// Staging or publishing the artifact failed
    #[error("Failed to write output: {0}")]
    Write(#[from] ReplaceError),

    /// Every candidate name was already taken
    #[error("No free output name after {0} attempts")]
    NameCollision(u32),

    /// The encode did not finish within the configured limit
    #[error("Transcode timed out after {0:?}")]
    TimedOut(Duration),

    /// The blocking encode task panicked or was cancelled
    #[error("Transcode task failed: {0}")]
    TaskFailed(String),

    /// IO error while reading the input
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Parameters for a single transcode
#[derive(Debug, Clone)]
pub struct WebpEncodeParams {
    /// Raw uploaded file
    pub input_path: PathBuf,
    /// Directory the artifact is published into
    pub output_dir: PathBuf,
    /// Client-declared name, kept for provenance
    pub original_name: String,
    /// Sanitized base of the artifact name, see [`output_base`]
    pub output_base: String,
    /// Width and quality, already clamped
    pub parameters: TransformParameters,
    /// Timestamp embedded in the artifact name
    pub created_at_epoch_millis: u64,
}

impl WebpEncodeParams {
    /// Build parameters, deriving the artifact base from `original_name`.
    pub fn new(
        input_path: PathBuf,
        output_dir: PathBuf,
        original_name: String,
        parameters: TransformParameters,
        created_at_epoch_millis: u64,
    ) -> Result<Self, SanitizeError> {
        let output_base = output_base(&original_name)?.to_string();
        Ok(Self {
            input_path,
            output_dir,
            original_name,
            output_base,
            parameters,
            created_at_epoch_millis,
        })
    }
}

/// A published artifact. Never mutated or deleted once created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputArtifact {
    pub path: PathBuf,
    pub file_name: String,
    pub byte_size: u64,
    pub derived_from_original_name: String,
    /// Timestamp actually used in the name (may be later than requested after a collision)
    pub created_at_epoch_millis: u64,
}

/// Height that keeps the aspect ratio at `target_width`, never below 1.
pub fn scaled_height(src_width: u32, src_height: u32, target_width: u32) -> u32 {
    if src_width == 0 {
        return 1;
    }
    let h = (src_height as f64 * target_width as f64 / src_width as f64).round();
    (h as u32).max(1)
}

/// Transcode `params.input_path` into a published WebP artifact.
pub fn transcode(params: &WebpEncodeParams) -> Result<OutputArtifact, EncodeError> {
    sanitize_filename(&params.output_base)?;
    let bytes = encode_image(&params.input_path, params.parameters)?;
    publish(params, &bytes)
}

/// Decode, resize and encode `input_path`. Writes nothing to disk.
///
/// The target size is checked against [`MAX_WEBP_DIMENSION`] from the image
/// header, before any pixel buffer is allocated.
pub fn encode_image(input_path: &Path, parameters: TransformParameters) -> Result<Vec<u8>, EncodeError> {
    if std::fs::metadata(input_path)?.len() == 0 {
        return Err(EncodeError::EmptyInput);
    }

    let (src_width, src_height) = open_source(input_path)?.into_dimensions()?;
    let width = parameters.width;
    let height = scaled_height(src_width, src_height, width);
    if width > MAX_WEBP_DIMENSION || height > MAX_WEBP_DIMENSION {
        return Err(EncodeError::DimensionsTooLarge { width, height });
    }
    debug!(src_width, src_height, width, height, "Resizing image");

    let mut reader = open_source(input_path)?;
    reader.limits(decode_limits());
    let source = reader.decode()?;

    let rgba = source.resize_exact(width, height, FilterType::Lanczos3).to_rgba8();
    let encoded = ::webp::Encoder::from_rgba(rgba.as_raw(), rgba.width(), rgba.height())
        .encode_simple(false, parameters.quality as f32)
        .map_err(|e| EncodeError::Encode(format!("{:?}", e)))?;

    Ok(encoded.to_vec())
}

fn open_source(path: &Path) -> Result<ImageReader<BufReader<File>>, EncodeError> {
    let reader = ImageReader::open(path)?.with_guessed_format()?;
    match reader.format() {
        Some(format) if ACCEPTED_FORMATS.contains(&format) => Ok(reader),
        Some(format) => Err(EncodeError::Unsupported(format!("{:?}", format))),
        None => Err(EncodeError::Unsupported("unrecognized content".to_string())),
    }
}

fn decode_limits() -> Limits {
    let mut limits = Limits::default();
    limits.max_alloc = Some(MAX_DECODE_ALLOC_BYTES);
    limits
}

/// Publish encoded bytes under the first free name.
///
/// Starts at `params.created_at_epoch_millis` and moves one millisecond later
/// on each collision. Existing artifacts are never replaced.
pub fn publish(params: &WebpEncodeParams, bytes: &[u8]) -> Result<OutputArtifact, EncodeError> {
    for attempt in 0..MAX_NAME_ATTEMPTS {
        let stamp = params.created_at_epoch_millis + u64::from(attempt);
        let file_name = artifact_name(&params.output_base, stamp);
        let final_path = params.output_dir.join(&file_name);

        let staged = match write_staged(&final_path, bytes) {
            Ok(staged) => staged,
            Err(ReplaceError::AlreadyExists(_)) => continue,
            Err(e) => return Err(e.into()),
        };
        if final_path.exists() {
            discard_staged(&staged);
            continue;
        }

        match publish_staged(&staged, &final_path) {
            Ok(()) => {
                if attempt > 0 {
                    warn!(file_name = %file_name, attempt, "Output name collided, used a later timestamp");
                }
                return Ok(OutputArtifact {
                    path: final_path,
                    file_name,
                    byte_size: bytes.len() as u64,
                    derived_from_original_name: params.original_name.clone(),
                    created_at_epoch_millis: stamp,
                });
            }
            Err(ReplaceError::AlreadyExists(_)) => continue,
            Err(e) => return Err(e.into()),
        }
    }

    Err(EncodeError::NameCollision(MAX_NAME_ATTEMPTS))
}
