use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};

/// Per-stage counters, shared between the loop and whoever reports on it
#[derive(Debug, Clone)]
pub struct MetricsCollector {
    metrics: Arc<Mutex<StageMetrics>>,
}

/// Counters for one stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageMetrics {
    /// Stage name as shown in logs
    pub stage: String,

    /// Start time of the metrics collection
    pub start_time: DateTime<Utc>,

    /// Items taken off the lane
    pub processed: usize,

    /// Items that reached a successful terminal outcome
    pub completed: usize,

    /// Items that reached a failed terminal outcome
    pub failed: usize,

    /// Failure notices forwarded to their chat
    pub notified: usize,

    /// Items that could not be decoded
    pub malformed: usize,

    /// Bytes of media handled
    pub bytes: u64,

    /// Total processing time in milliseconds
    pub busy_ms: u64,
}

impl StageMetrics {
    /// One-line summary for logs
    pub fn summary(&self) -> String {
        format!(
            "{}: processed={} completed={} notified={} failed={} malformed={} bytes={} busy_ms={}",
            self.stage,
            self.processed,
            self.completed,
            self.notified,
            self.failed,
            self.malformed,
            self.bytes,
            self.busy_ms
        )
    }
}

impl MetricsCollector {
    /// Create a new metrics collector
    pub fn new(stage: &str) -> Self {
        let metrics = StageMetrics {
            stage: stage.to_string(),
            start_time: Utc::now(),
            processed: 0,
            completed: 0,
            failed: 0,
            notified: 0,
            malformed: 0,
            bytes: 0,
            busy_ms: 0,
        };

        Self {
            metrics: Arc::new(Mutex::new(metrics)),
        }
    }

    /// Record an item that reached a terminal outcome
    pub async fn record(&self, success: bool, duration_ms: u64, bytes: u64) {
        let mut metrics = self.metrics.lock().await;

        metrics.processed += 1;
        if success {
            metrics.completed += 1;
        } else {
            metrics.failed += 1;
        }
        metrics.bytes += bytes;
        metrics.busy_ms += duration_ms;
    }

    /// Record a failed outcome whose notice was (or was not) forwarded
    pub async fn record_notice(&self, sent: bool, duration_ms: u64) {
        let mut metrics = self.metrics.lock().await;

        metrics.processed += 1;
        if sent {
            metrics.notified += 1;
        } else {
            metrics.failed += 1;
        }
        metrics.busy_ms += duration_ms;
    }

    /// Record an item that could not be decoded
    pub async fn record_malformed(&self) {
        let mut metrics = self.metrics.lock().await;
        metrics.processed += 1;
        metrics.malformed += 1;
    }

    /// Start timing an item
    pub fn start_timer(&self) -> RequestTimer {
        RequestTimer {
            start: Instant::now(),
        }
    }

    /// Get all metrics
    pub async fn get_metrics(&self) -> StageMetrics {
        self.metrics.lock().await.clone()
    }
}

/// Timer for measuring item durations
pub struct RequestTimer {
    /// Start time of the item
    start: Instant,
}

impl RequestTimer {
    /// End timing and get the duration in milliseconds
    pub fn end(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}
