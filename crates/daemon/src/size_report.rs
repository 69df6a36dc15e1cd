//! Size Report Module
//!
//! Post-encode measurement of how much smaller the artifact is than the upload.

use std::io;
use std::path::Path;

/// Byte sizes of a run's input and output plus the derived metrics
#[derive(Debug, Clone, PartialEq)]
pub struct SizeReport {
    pub original_bytes: u64,
    pub optimized_bytes: u64,
    /// `original_bytes / 1024`, 2 decimals
    pub original_size_kb: f64,
    /// `optimized_bytes / 1024`, 2 decimals
    pub optimized_size_kb: f64,
    /// `(original - optimized) / original * 100`, 2 decimals; negative when the
    /// output grew
    pub savings_percent: f64,
}

impl SizeReport {
    pub fn from_sizes(original_bytes: u64, optimized_bytes: u64) -> Self {
        Self {
            original_bytes,
            optimized_bytes,
            original_size_kb: bytes_to_kb(original_bytes),
            optimized_size_kb: bytes_to_kb(optimized_bytes),
            savings_percent: savings_percent(original_bytes, optimized_bytes),
        }
    }
}

/// Round to two decimal places.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

pub fn bytes_to_kb(bytes: u64) -> f64 {
    round2(bytes as f64 / 1024.0)
}

/// Percentage reduction from `original_bytes` to `optimized_bytes`.
///
/// A zero-byte original never reaches this point (the transcode rejects empty
/// input); it reports 0 rather than dividing by zero.
pub fn savings_percent(original_bytes: u64, optimized_bytes: u64) -> f64 {
    if original_bytes == 0 {
        return 0.0;
    }
    let original = original_bytes as f64;
    round2((original - optimized_bytes as f64) / original * 100.0)
}

/// Measure both files and build the report.
pub async fn report_sizes(input: &Path, output: &Path) -> io::Result<SizeReport> {
    let original_bytes = tokio::fs::metadata(input).await?.len();
    let optimized_bytes = tokio::fs::metadata(output).await?.len();
    Ok(SizeReport::from_sizes(original_bytes, optimized_bytes))
}
