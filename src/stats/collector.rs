use chrono::Utc;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use super::types::StatisticsSnapshot;
use crate::constants::LATENCY_SAMPLE_WINDOW;

#[derive(Debug, Default)]
struct StatsInner {
    total_requests: u64,
    successful_requests: u64,
    failed_requests: u64,
    cancelled_requests: u64,
    active_requests: u64,
    bytes_sent: u64,
    bytes_received: u64,
    cache_hits: u64,
    cache_misses: u64,
    latency_samples: VecDeque<f64>,
    last_request_at: Option<chrono::DateTime<Utc>>,
    last_success_at: Option<chrono::DateTime<Utc>>,
    last_error_at: Option<chrono::DateTime<Utc>>,
}

impl StatsInner {
    fn push_latency(&mut self, elapsed_ms: f64) {
        if self.latency_samples.len() >= LATENCY_SAMPLE_WINDOW {
            self.latency_samples.pop_front();
        }
        self.latency_samples.push_back(elapsed_ms);
    }
}

/// Passive observer of request volume, outcomes, bytes and latency.
/// Never affects request outcomes. Disabled entirely in server-side
/// execution to avoid leaking state across stateless invocations.
#[derive(Debug, Clone)]
pub struct StatisticsCollector {
    enabled: bool,
    inner: Arc<Mutex<StatsInner>>,
}

impl StatisticsCollector {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            inner: Arc::new(Mutex::new(StatsInner::default())),
        }
    }

    /// Begin tracking one request. The returned tracker's Drop decrements
    /// the active count exactly once, whatever the outcome.
    pub fn track_request(&self) -> RequestTracker {
        if self.enabled {
            let mut inner = self.inner.lock();
            inner.total_requests += 1;
            inner.active_requests += 1;
            inner.last_request_at = Some(Utc::now());
        }
        RequestTracker {
            enabled: self.enabled,
            inner: Arc::clone(&self.inner),
            started: Instant::now(),
            outcome_recorded: false,
        }
    }

    pub fn track_cancellation(&self) {
        if self.enabled {
            self.inner.lock().cancelled_requests += 1;
        }
    }

    pub fn track_bytes_sent(&self, n: u64) {
        if self.enabled {
            self.inner.lock().bytes_sent += n;
        }
    }

    pub fn track_bytes_received(&self, n: u64) {
        if self.enabled {
            self.inner.lock().bytes_received += n;
        }
    }

    pub fn track_cache_hit(&self) {
        if self.enabled {
            self.inner.lock().cache_hits += 1;
        }
    }

    pub fn track_cache_miss(&self) {
        if self.enabled {
            self.inner.lock().cache_misses += 1;
        }
    }

    /// Copy of the current statistics
    pub fn snapshot(&self) -> StatisticsSnapshot {
        let inner = self.inner.lock();
        let average_latency_ms = if inner.latency_samples.is_empty() {
            0.0
        } else {
            inner.latency_samples.iter().sum::<f64>() / inner.latency_samples.len() as f64
        };
        StatisticsSnapshot {
            total_requests: inner.total_requests,
            successful_requests: inner.successful_requests,
            failed_requests: inner.failed_requests,
            cancelled_requests: inner.cancelled_requests,
            active_requests: inner.active_requests,
            bytes_sent: inner.bytes_sent,
            bytes_received: inner.bytes_received,
            cache_hits: inner.cache_hits,
            cache_misses: inner.cache_misses,
            average_latency_ms,
            latency_sample_count: inner.latency_samples.len(),
            last_request_at: inner.last_request_at,
            last_success_at: inner.last_success_at,
            last_error_at: inner.last_error_at,
        }
    }

    /// Zero all counters and clear the rolling window
    pub fn reset(&self) {
        *self.inner.lock() = StatsInner::default();
    }
}

/// Scoped tracking handle for one request. Success or error is recorded
/// at most once; dropping the tracker releases the active slot.
#[derive(Debug)]
pub struct RequestTracker {
    enabled: bool,
    inner: Arc<Mutex<StatsInner>>,
    started: Instant,
    outcome_recorded: bool,
}

impl RequestTracker {
    pub fn success(mut self) {
        if self.enabled && !self.outcome_recorded {
            let elapsed_ms = self.started.elapsed().as_secs_f64() * 1_000.0;
            let mut inner = self.inner.lock();
            inner.successful_requests += 1;
            inner.last_success_at = Some(Utc::now());
            inner.push_latency(elapsed_ms);
        }
        self.outcome_recorded = true;
    }

    pub fn error(mut self) {
        if self.enabled && !self.outcome_recorded {
            let mut inner = self.inner.lock();
            inner.failed_requests += 1;
            inner.last_error_at = Some(Utc::now());
        }
        self.outcome_recorded = true;
    }
}

impl Drop for RequestTracker {
    fn drop(&mut self) {
        if self.enabled {
            let mut inner = self.inner.lock();
            inner.active_requests = inner.active_requests.saturating_sub(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_request_outcome_counters() {
        let stats = StatisticsCollector::new(true);

        let tracker = stats.track_request();
        assert_eq!(stats.snapshot().active_requests, 1);
        tracker.success();
        let snap = stats.snapshot();
        assert_eq!(snap.total_requests, 1);
        assert_eq!(snap.successful_requests, 1);
        assert_eq!(snap.active_requests, 0);

        stats.track_request().error();
        let snap = stats.snapshot();
        assert_eq!(snap.failed_requests, 1);
        assert_eq!(snap.active_requests, 0);
    }

    #[test]
    fn test_dropped_tracker_releases_active_slot() {
        let stats = StatisticsCollector::new(true);
        {
            let _tracker = stats.track_request();
            assert_eq!(stats.snapshot().active_requests, 1);
            // Dropped without an outcome, e.g. the wrapped future panicked
        }
        let snap = stats.snapshot();
        assert_eq!(snap.active_requests, 0);
        assert_eq!(snap.successful_requests, 0);
        assert_eq!(snap.failed_requests, 0);
    }

    #[test]
    fn test_latency_window_is_bounded() {
        let stats = StatisticsCollector::new(true);
        for _ in 0..(LATENCY_SAMPLE_WINDOW + 50) {
            stats.track_request().success();
        }
        let snap = stats.snapshot();
        assert_eq!(snap.latency_sample_count, LATENCY_SAMPLE_WINDOW);
        assert_eq!(snap.successful_requests, (LATENCY_SAMPLE_WINDOW + 50) as u64);
    }

    #[test]
    fn test_byte_and_cache_counters() {
        let stats = StatisticsCollector::new(true);
        stats.track_bytes_sent(120);
        stats.track_bytes_sent(80);
        stats.track_bytes_received(4_096);
        stats.track_cache_hit();
        stats.track_cache_miss();
        stats.track_cache_miss();
        stats.track_cancellation();

        let snap = stats.snapshot();
        assert_eq!(snap.bytes_sent, 200);
        assert_eq!(snap.bytes_received, 4_096);
        assert_eq!(snap.cache_hits, 1);
        assert_eq!(snap.cache_misses, 2);
        assert_eq!(snap.cancelled_requests, 1);
    }

    #[test]
    fn test_reset_matches_fresh_instance() {
        let used = StatisticsCollector::new(true);
        for _ in 0..5 {
            used.track_request().success();
        }
        used.track_bytes_sent(999);
        used.reset();

        let fresh = StatisticsCollector::new(true);
        let sequence = |stats: &StatisticsCollector| {
            stats.track_request().success();
            stats.track_request().error();
            stats.track_bytes_received(64);
            stats.track_cache_hit();
        };
        sequence(&used);
        sequence(&fresh);

        let a = used.snapshot();
        let b = fresh.snapshot();
        // Timestamps and latencies differ; the counters must not
        assert_eq!(a.total_requests, b.total_requests);
        assert_eq!(a.successful_requests, b.successful_requests);
        assert_eq!(a.failed_requests, b.failed_requests);
        assert_eq!(a.bytes_received, b.bytes_received);
        assert_eq!(a.cache_hits, b.cache_hits);
        assert_eq!(a.latency_sample_count, b.latency_sample_count);
    }

    #[test]
    fn test_disabled_collector_is_inert() {
        let stats = StatisticsCollector::new(false);
        stats.track_request().success();
        stats.track_request().error();
        stats.track_bytes_sent(100);
        stats.track_cache_hit();
        assert_eq!(stats.snapshot(), StatisticsSnapshot::default());
    }
}
