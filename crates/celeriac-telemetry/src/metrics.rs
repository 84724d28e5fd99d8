//! Prometheus metrics for Celeriac
//!
//! Counts what a producer can observe:
//! - Task submissions and rejected publications
//! - Result fetch outcomes
//! - Poll loops that ran out of time
//! - Publish latency

use lazy_static::lazy_static;
use prometheus::{
    core::Collector, Encoder, Histogram, HistogramOpts, IntCounterVec, Opts, Registry, TextEncoder,
};

use crate::{FetchOutcome, TelemetryError, TelemetryResult};

lazy_static! {
    /// Metrics registry for the client
    pub static ref REGISTRY: Registry = Registry::new();

    /// Total tasks submitted
    pub static ref TASKS_SUBMITTED: IntCounterVec = IntCounterVec::new(
        Opts::new("celeriac_tasks_submitted_total", "Total number of tasks submitted"),
        &["exchange", "task_name"]
    ).expect("metric can be created");

    /// Publications the broker refused or failed
    pub static ref PUBLISH_FAILURES: IntCounterVec = IntCounterVec::new(
        Opts::new("celeriac_publish_failures_total", "Total number of failed publications"),
        &["backend"]
    ).expect("metric can be created");

    /// Result fetch attempts by outcome
    pub static ref RESULT_FETCHES: IntCounterVec = IntCounterVec::new(
        Opts::new("celeriac_result_fetches_total", "Total number of result fetch attempts"),
        &["backend", "outcome"]
    ).expect("metric can be created");

    /// Poll loops that hit their deadline
    pub static ref POLL_TIMEOUTS: IntCounterVec = IntCounterVec::new(
        Opts::new("celeriac_poll_timeouts_total", "Total number of result polls that timed out"),
        &["task_name"]
    ).expect("metric can be created");

    /// Broker publish latency
    pub static ref PUBLISH_LATENCY: Histogram = Histogram::with_opts(
        HistogramOpts::new("celeriac_publish_latency_seconds", "Broker publish latency")
            .buckets(vec![0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0])
    ).expect("metric can be created");
}

/// Celeriac metrics interface
pub struct CeleriacMetrics;

impl CeleriacMetrics {
    /// Register every metric with [`REGISTRY`]; safe to call repeatedly
    pub fn register() -> TelemetryResult<()> {
        let collectors: Vec<Box<dyn Collector>> = vec![
            Box::new(TASKS_SUBMITTED.clone()),
            Box::new(PUBLISH_FAILURES.clone()),
            Box::new(RESULT_FETCHES.clone()),
            Box::new(POLL_TIMEOUTS.clone()),
            Box::new(PUBLISH_LATENCY.clone()),
        ];

        for collector in collectors {
            match REGISTRY.register(collector) {
                Ok(()) | Err(prometheus::Error::AlreadyReg) => {}
                Err(e) => return Err(TelemetryError::Metrics(e.to_string())),
            }
        }
        Ok(())
    }

    /// Get metrics as Prometheus text format
    pub fn gather() -> TelemetryResult<String> {
        Self::register()?;

        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&REGISTRY.gather(), &mut buffer)
            .map_err(|e| TelemetryError::Metrics(e.to_string()))?;
        String::from_utf8(buffer).map_err(|e| TelemetryError::Metrics(e.to_string()))
    }

    /// Record task submission
    pub fn task_submitted(exchange: &str, task_name: &str) {
        TASKS_SUBMITTED.with_label_values(&[exchange, task_name]).inc();
    }

    /// Record a failed publication
    pub fn publish_failed(backend: &str) {
        PUBLISH_FAILURES.with_label_values(&[backend]).inc();
    }

    /// Record a result fetch attempt
    pub fn result_fetched(backend: &str, outcome: FetchOutcome) {
        RESULT_FETCHES
            .with_label_values(&[backend, outcome.as_str()])
            .inc();
    }

    /// Record a poll timeout
    pub fn poll_timed_out(task_name: &str) {
        POLL_TIMEOUTS.with_label_values(&[task_name]).inc();
    }

    /// Record publish latency
    pub fn record_publish_latency(duration_secs: f64) {
        PUBLISH_LATENCY.observe(duration_secs);
    }
}
