//! Metrics collection and reporting
//!
//! Tracks classification requests, their outcome by label or failure kind,
//! and cumulative inference latency. Exposed in Prometheus text format on
//! `/metrics`.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::{error::ErrorKind, prediction::Label, store::StoreStats};

/// Central metrics collector, cheap to clone
#[derive(Debug, Clone)]
pub struct MetricsCollector {
    inner: Arc<Counters>,
    start_time: Instant,
}

#[derive(Debug, Default)]
struct Counters {
    total_requests: AtomicUsize,
    successful_requests: AtomicUsize,
    nilo_predictions: AtomicUsize,
    not_nilo_predictions: AtomicUsize,
    failures: [AtomicUsize; 6],
    total_latency_us: AtomicU64,
    submissions: AtomicUsize,
}

impl MetricsCollector {
    /// Create a new metrics collector
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Counters::default()),
            start_time: Instant::now(),
        }
    }

    /// Record a successful classification
    #[allow(clippy::cast_possible_truncation)]
    pub fn record_success(&self, label: Label, duration: Duration) {
        let c = &self.inner;
        c.total_requests.fetch_add(1, Ordering::Relaxed);
        c.successful_requests.fetch_add(1, Ordering::Relaxed);
        match label {
            Label::Nilo => c.nilo_predictions.fetch_add(1, Ordering::Relaxed),
            Label::NotNilo => c.not_nilo_predictions.fetch_add(1, Ordering::Relaxed),
        };
        c.total_latency_us
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    /// Record a failed classification
    pub fn record_failure(&self, kind: ErrorKind) {
        self.inner.total_requests.fetch_add(1, Ordering::Relaxed);
        self.inner.failures[kind.index()].fetch_add(1, Ordering::Relaxed);
    }

    /// Record a stored submission
    pub fn record_submission(&self) {
        self.inner.submissions.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current snapshot of metrics
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn snapshot(&self) -> MetricsSnapshot {
        let c = &self.inner;
        let total_requests = c.total_requests.load(Ordering::Relaxed);
        let successful = c.successful_requests.load(Ordering::Relaxed);
        let failures: Vec<(ErrorKind, usize)> = ErrorKind::ALL
            .iter()
            .map(|&kind| (kind, c.failures[kind.index()].load(Ordering::Relaxed)))
            .collect();
        let failed: usize = failures.iter().map(|(_, n)| n).sum();
        let total_latency_us = c.total_latency_us.load(Ordering::Relaxed);

        MetricsSnapshot {
            total_requests,
            successful_requests: successful,
            failed_requests: failed,
            nilo_predictions: c.nilo_predictions.load(Ordering::Relaxed),
            not_nilo_predictions: c.not_nilo_predictions.load(Ordering::Relaxed),
            failures,
            submissions: c.submissions.load(Ordering::Relaxed),
            total_latency_us,
            uptime_secs: self.start_time.elapsed().as_secs(),
            avg_latency_ms: if successful > 0 {
                (total_latency_us as f64 / 1000.0) / successful as f64
            } else {
                0.0
            },
            error_rate: if total_requests > 0 {
                failed as f64 / total_requests as f64
            } else {
                0.0
            },
        }
    }

    /// Export metrics in Prometheus format, including model store counters
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn to_prometheus(&self, store: StoreStats, model_loaded: bool) -> String {
        let s = self.snapshot();
        let mut out = format!(
            "# HELP magnolia_requests_total Total classification requests\n\
             # TYPE magnolia_requests_total counter\n\
             magnolia_requests_total {}\n\
             # HELP magnolia_requests_successful Successful classifications\n\
             # TYPE magnolia_requests_successful counter\n\
             magnolia_requests_successful {}\n\
             # HELP magnolia_requests_failed Failed classifications\n\
             # TYPE magnolia_requests_failed counter\n\
             magnolia_requests_failed {}\n\
             # HELP magnolia_predictions_total Predictions by label\n\
             # TYPE magnolia_predictions_total counter\n\
             magnolia_predictions_total{{label=\"Nilo\"}} {}\n\
             magnolia_predictions_total{{label=\"Not Nilo\"}} {}\n\
             # HELP magnolia_failures_total Failures by kind\n\
             # TYPE magnolia_failures_total counter\n",
            s.total_requests,
            s.successful_requests,
            s.failed_requests,
            s.nilo_predictions,
            s.not_nilo_predictions,
        );
        for (kind, count) in &s.failures {
            out.push_str(&format!("magnolia_failures_total{{kind=\"{kind}\"}} {count}\n"));
        }
        out.push_str(&format!(
            "# HELP magnolia_latency_seconds_total Cumulative classification latency\n\
             # TYPE magnolia_latency_seconds_total counter\n\
             magnolia_latency_seconds_total {:.6}\n\
             # HELP magnolia_avg_latency_ms Average latency in milliseconds\n\
             # TYPE magnolia_avg_latency_ms gauge\n\
             magnolia_avg_latency_ms {:.2}\n\
             # HELP magnolia_error_rate Error rate (0.0-1.0)\n\
             # TYPE magnolia_error_rate gauge\n\
             magnolia_error_rate {:.4}\n\
             # HELP magnolia_submissions_total Images submitted for review\n\
             # TYPE magnolia_submissions_total counter\n\
             magnolia_submissions_total {}\n\
             # HELP magnolia_model_loaded Whether the model is resident\n\
             # TYPE magnolia_model_loaded gauge\n\
             magnolia_model_loaded {}\n\
             # HELP magnolia_model_downloads_total Model artifact downloads\n\
             # TYPE magnolia_model_downloads_total counter\n\
             magnolia_model_downloads_total {}\n\
             # HELP magnolia_model_loads_total Model deserializations\n\
             # TYPE magnolia_model_loads_total counter\n\
             magnolia_model_loads_total {}\n\
             # HELP magnolia_model_load_failures_total Failed model loads\n\
             # TYPE magnolia_model_load_failures_total counter\n\
             magnolia_model_load_failures_total {}\n\
             # HELP magnolia_uptime_seconds Uptime in seconds\n\
             # TYPE magnolia_uptime_seconds counter\n\
             magnolia_uptime_seconds {}\n",
            s.total_latency_us as f64 / 1_000_000.0,
            s.avg_latency_ms,
            s.error_rate,
            s.submissions,
            u8::from(model_loaded),
            store.downloads,
            store.loads,
            store.load_failures,
            s.uptime_secs,
        ));
        out
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of current metrics
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    /// Classification requests processed
    pub total_requests: usize,
    /// Requests that produced a prediction
    pub successful_requests: usize,
    /// Requests that failed at any stage
    pub failed_requests: usize,
    /// Predictions labelled "Nilo"
    pub nilo_predictions: usize,
    /// Predictions labelled "Not Nilo"
    pub not_nilo_predictions: usize,
    /// Failure counts per kind, in [`ErrorKind::ALL`] order
    pub failures: Vec<(ErrorKind, usize)>,
    /// Stored submissions
    pub submissions: usize,
    /// Cumulative latency of successful requests in microseconds
    pub total_latency_us: u64,
    /// Uptime in seconds
    pub uptime_secs: u64,
    /// Average latency of successful requests in milliseconds
    pub avg_latency_ms: f64,
    /// Failed / total, 0.0 when idle
    pub error_rate: f64,
}

impl MetricsSnapshot {
    /// Failures recorded for `kind`
    #[must_use]
    pub fn failures_of(&self, kind: ErrorKind) -> usize {
        self.failures
            .iter()
            .find(|(k, _)| *k == kind)
            .map_or(0, |(_, n)| *n)
    }
}
