//! Metric hooks, compiled out without the `metrics` feature

#![cfg_attr(not(feature = "metrics"), allow(unused_variables))]

use celeriac_telemetry::FetchOutcome;
use std::time::Duration;

pub(crate) fn task_submitted(exchange: &str, task_name: &str, latency: Duration) {
    #[cfg(feature = "metrics")]
    {
        celeriac_telemetry::CeleriacMetrics::task_submitted(exchange, task_name);
        celeriac_telemetry::CeleriacMetrics::record_publish_latency(latency.as_secs_f64());
    }
}

pub(crate) fn publish_failed(backend: &str) {
    #[cfg(feature = "metrics")]
    celeriac_telemetry::CeleriacMetrics::publish_failed(backend);
}

pub(crate) fn result_fetched(backend: &str, outcome: FetchOutcome) {
    #[cfg(feature = "metrics")]
    celeriac_telemetry::CeleriacMetrics::result_fetched(backend, outcome);
}

pub(crate) fn poll_timed_out(task_name: &str) {
    #[cfg(feature = "metrics")]
    celeriac_telemetry::CeleriacMetrics::poll_timed_out(task_name);
}
