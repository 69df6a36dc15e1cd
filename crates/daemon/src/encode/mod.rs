//! Encoding modules for the WebP optimizer

pub mod webp;

pub use self::webp::{
    encode_image, publish, scaled_height, transcode, EncodeError, OutputArtifact,
    WebpEncodeParams, MAX_WEBP_DIMENSION,
};

use crate::sanitize::sanitize_filename;
use std::time::Duration;
use tracing::warn;

/// Run a transcode on the blocking pool.
///
/// Only the encode is bounded by `timeout`. Once it expires the run fails with
/// [`EncodeError::TimedOut`]; the encode keeps its thread until it finishes,
/// but its bytes are dropped and nothing is ever staged or published for it.
pub async fn run_transcode(
    params: WebpEncodeParams,
    timeout: Option<Duration>,
) -> Result<OutputArtifact, EncodeError> {
    sanitize_filename(&params.output_base)?;

    let input = params.input_path.clone();
    let parameters = params.parameters;
    let bytes = encode_within(move || encode_image(&input, parameters), timeout).await?;

    tokio::task::spawn_blocking(move || publish(&params, &bytes))
        .await
        .map_err(|e| EncodeError::TaskFailed(e.to_string()))?
}

async fn encode_within<F>(encode: F, timeout: Option<Duration>) -> Result<Vec<u8>, EncodeError>
where
    F: FnOnce() -> Result<Vec<u8>, EncodeError> + Send + 'static,
{
    let handle = tokio::task::spawn_blocking(encode);

    let joined = match timeout {
        Some(limit) => tokio::time::timeout(limit, handle).await.map_err(|_| {
            warn!(?limit, "Transcode timed out, abandoning output");
            EncodeError::TimedOut(limit)
        })?,
        None => handle.await,
    };

    joined.map_err(|e| EncodeError::TaskFailed(e.to_string()))?
}
