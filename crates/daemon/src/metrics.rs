//! Metrics module for the WebP optimizer
//!
//! Provides structs for per-run metrics and the shared snapshot served at
//! `GET /metrics`, with JSON serialization support.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;

/// How many finished runs the snapshot keeps
pub const RECENT_RUNS_CAPACITY: usize = 50;

/// Per-run record kept after a run reaches its terminal state
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunMetrics {
    pub id: String,
    pub original_name: String,
    /// Last stage the run reached before cleanup
    pub stage: String,
    pub original_bytes: u64,
    pub optimized_bytes: u64,
    pub savings_percent: f64,
    pub width: u32,
    pub quality: u8,
    pub error: Option<String>,
}

/// Aggregate counters plus the most recent runs
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct MetricsSnapshot {
    pub timestamp_unix_ms: i64,
    pub completed_runs: u64,
    pub failed_runs: u64,
    pub active_runs: usize,
    pub cleanup_failures: u64,
    pub total_bytes_in: u64,
    pub total_bytes_out: u64,
    /// Oldest first, at most [`RECENT_RUNS_CAPACITY`] entries
    pub recent_runs: Vec<RunMetrics>,
}

impl MetricsSnapshot {
    pub fn run_started(&mut self) {
        self.active_runs += 1;
        self.timestamp_unix_ms = timestamp_ms();
    }

    /// Record a finished run and drop the oldest entries beyond capacity.
    pub fn run_finished(&mut self, run: RunMetrics) {
        self.active_runs = self.active_runs.saturating_sub(1);
        if run.error.is_none() {
            self.completed_runs += 1;
            self.total_bytes_in += run.original_bytes;
            self.total_bytes_out += run.optimized_bytes;
        } else {
            self.failed_runs += 1;
        }

        self.recent_runs.push(run);
        if self.recent_runs.len() > RECENT_RUNS_CAPACITY {
            let excess = self.recent_runs.len() - RECENT_RUNS_CAPACITY;
            self.recent_runs.drain(..excess);
        }
        self.timestamp_unix_ms = timestamp_ms();
    }

    pub fn cleanup_failed(&mut self) {
        self.cleanup_failures += 1;
    }
}

/// Shared metrics state for concurrent access across server components
pub type SharedMetrics = Arc<RwLock<MetricsSnapshot>>;

/// Creates a new SharedMetrics instance with default values
pub fn new_shared_metrics() -> SharedMetrics {
    Arc::new(RwLock::new(MetricsSnapshot::default()))
}

/// Current time in milliseconds since the Unix epoch
pub fn timestamp_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
