//! Metrics collection and statistics.

use std::collections::BTreeMap;
use std::time::Duration;

use hdrhistogram::{AdditionError, Histogram};
use serde::Serialize;

use crate::client::RequestOutcome;

/// Latencies above this are clamped when recorded.
const MAX_TRACKED_LATENCY_US: u64 = 3_600_000_000;

/// Collects metrics for one virtual user, or for a whole run once merged.
///
/// Outcomes are folded in and dropped; only counters and histogram buckets
/// are kept, so memory stays flat on long runs.
#[derive(Debug, Clone)]
pub struct MetricsCollector {
    histogram: Histogram<u64>,
    requests_total: u64,
    requests_failed: u64,
    transport_errors: u64,
    bytes_total: u64,
    status_counts: BTreeMap<u16, u64>,
}

impl MetricsCollector {
    /// Create a new metrics collector.
    pub fn new() -> Self {
        Self {
            histogram: Histogram::new_with_bounds(1, MAX_TRACKED_LATENCY_US, 3)
                .expect("static histogram bounds are valid"), // 1µs to 1h
            requests_total: 0,
            requests_failed: 0,
            transport_errors: 0,
            bytes_total: 0,
            status_counts: BTreeMap::new(),
        }
    }

    /// Fold one request outcome into the counters.
    pub fn record(&mut self, outcome: &RequestOutcome) {
        self.requests_total += 1;
        self.bytes_total += outcome.bytes as u64;
        self.histogram.saturating_record(outcome.latency_us());

        if !outcome.success {
            self.requests_failed += 1;
        }

        match outcome.status_code {
            Some(code) => *self.status_counts.entry(code).or_insert(0) += 1,
            None => self.transport_errors += 1,
        }
    }

    /// Add another collector's counts into this one.
    pub fn merge(&mut self, other: &MetricsCollector) -> Result<(), AdditionError> {
        self.histogram.add(&other.histogram)?;
        self.requests_total += other.requests_total;
        self.requests_failed += other.requests_failed;
        self.transport_errors += other.transport_errors;
        self.bytes_total += other.bytes_total;
        for (code, count) in &other.status_counts {
            *self.status_counts.entry(*code).or_insert(0) += count;
        }
        Ok(())
    }

    pub fn total_requests(&self) -> u64 {
        self.requests_total
    }

    pub fn failed_requests(&self) -> u64 {
        self.requests_failed
    }

    /// Generate final run results.
    pub fn results(&self, target_url: &str, virtual_users: u32, elapsed: Duration) -> RunResult {
        let duration_secs = elapsed.as_secs_f64();
        let rps = if duration_secs > 0.0 {
            self.requests_total as f64 / duration_secs
        } else {
            0.0
        };

        RunResult {
            timestamp: chrono::Utc::now().to_rfc3339(),
            target_url: target_url.to_string(),
            virtual_users,
            duration_secs,
            total_requests: self.requests_total,
            failed_requests: self.requests_failed,
            transport_errors: self.transport_errors,
            requests_per_second: rps,
            bytes_received: self.bytes_total,
            latency: self.latency_summary(),
            status_counts: self.status_counts.clone(),
        }
    }

    fn latency_summary(&self) -> LatencySummary {
        if self.histogram.len() == 0 {
            return LatencySummary::default();
        }

        let ms = |us: u64| us as f64 / 1000.0;
        LatencySummary {
            min: ms(self.histogram.min()),
            mean: self.histogram.mean() / 1000.0,
            p50: ms(self.histogram.value_at_quantile(0.50)),
            p95: ms(self.histogram.value_at_quantile(0.95)),
            p99: ms(self.histogram.value_at_quantile(0.99)),
            max: ms(self.histogram.max()),
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

/// Latency distribution in milliseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct LatencySummary {
    pub min: f64,
    pub mean: f64,
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
    pub max: f64,
}

/// Final run results.
#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
    pub timestamp: String,
    pub target_url: String,
    pub virtual_users: u32,
    pub duration_secs: f64,
    pub total_requests: u64,
    pub failed_requests: u64,
    /// Failures where no HTTP status was received (connect error, timeout).
    pub transport_errors: u64,
    pub requests_per_second: f64,
    pub bytes_received: u64,
    pub latency: LatencySummary,
    pub status_counts: BTreeMap<u16, u64>,
}

impl RunResult {
    /// Fraction of failed requests, 0 when nothing was sent.
    pub fn failure_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.failed_requests as f64 / self.total_requests as f64
        }
    }

    pub fn successful_requests(&self) -> u64 {
        self.total_requests.saturating_sub(self.failed_requests)
    }
}
