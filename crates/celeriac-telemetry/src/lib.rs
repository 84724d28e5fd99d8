//! Celeriac Telemetry - Observability layer
//!
//! This crate provides observability for Celeriac clients:
//! - Structured logging on top of `tracing`
//! - Prometheus counters for submissions and result fetches
//!
//! Enable features via feature flags:
//! - `metrics` (default) - Prometheus metrics

#[cfg(feature = "metrics")]
pub mod metrics;

pub mod logging;

// Re-exports
#[cfg(feature = "metrics")]
pub use metrics::CeleriacMetrics;

pub use logging::{init_logging, LogFormat, LoggingConfig, TaskLogContext};

#[doc(hidden)]
pub use tracing;

use thiserror::Error;

/// Telemetry errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Metrics error: {0}")]
    Metrics(String),

    #[error("Logging error: {0}")]
    Logging(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type TelemetryResult<T> = Result<T, TelemetryError>;

/// Result of one fetch attempt, as a metric label
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    Ready,
    NotReady,
    Malformed,
}

impl FetchOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            FetchOutcome::Ready => "ready",
            FetchOutcome::NotReady => "not_ready",
            FetchOutcome::Malformed => "malformed",
        }
    }
}
