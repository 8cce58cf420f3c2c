use chrono::{DateTime, Utc};

/// Immutable snapshot of the engine's request statistics.
/// A copy, never a live reference into the collector.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatisticsSnapshot {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub cancelled_requests: u64,
    pub active_requests: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    /// Arithmetic mean over the rolling latency window
    pub average_latency_ms: f64,
    /// Number of samples currently in the window
    pub latency_sample_count: usize,
    pub last_request_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_error_at: Option<DateTime<Utc>>,
}
